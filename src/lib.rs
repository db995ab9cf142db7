//! Export-friendly adapters for trained YOLO detection heads.
//!
//! Each adapter takes the learned sub-layers and hyperparameters of a trained
//! head and runs a forward pass that reshapes the raw convolution outputs into
//! a uniform layout: box regression, a single confidence value and per-class
//! scores, optionally followed by keypoints, oriented-box angles or mask
//! coefficients.
//!
//! # Example
//!
//! ```ignore
//! use yolo_heads_rs::{DetectV8, ExportHead, HeadConfig, V8Parts};
//!
//! let head = DetectV8::new(parts, &HeadConfig::default())?;
//! let output = head.forward(&feature_maps)?;
//! for (role, tensor) in output.iter() {
//!     println!("{role}: {:?}", tensor.shape());
//! }
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod heads;
pub mod layer;

pub use config::{ConfidenceMode, HeadConfig};
pub use error::{HeadError, Result};
pub use heads::{
    AnchorHeadParts, ClassifyParts, ClassifyV8, DecoupledBranches, DetectV5, DetectV6R1,
    DetectV6R2, DetectV6R3, DetectV6R4m, DetectV6R4s, DetectV7, DetectV8, DflHeadParts,
    ExportHead, HeadKind, HeadOutput, ObbParts, ObbV8, OutputRole, PoseParts, PoseV8,
    SegmentParts, SegmentV8, V6R1Parts, V8Parts,
};
pub use layer::{BoxedLayer, DenseLayer, Dfl, Layer, dense_fn, layer_fn};
