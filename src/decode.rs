//! Decoding primitives shared by the head adapters.

mod anchors;
mod keypoints;
mod ops;

pub use anchors::{Anchors, cell_grid, make_anchors};
pub use keypoints::decode_keypoints;
pub use ops::{
    channel_max, concat_channels, constant_confidence, decode_angles, detection_block,
    flatten_levels, flatten_spatial, level_shapes, sigmoid, sigmoid_inplace, softmax,
    split_levels,
};
