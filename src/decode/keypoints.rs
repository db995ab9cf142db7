//! Keypoint decoding for pose heads.

use ndarray::Array3;

use crate::decode::anchors::Anchors;
use crate::error::{HeadError, Result};

/// Decode raw keypoint predictions `[b, nkpt * ndim, a]` into image
/// coordinates.
///
/// Each keypoint's `(x, y)` becomes `(v * 2 + (anchor - 0.5)) * stride`;
/// a third visibility component, when present, goes through a sigmoid.
pub fn decode_keypoints(
    kpts: &Array3<f32>,
    kpt_shape: (usize, usize),
    anchors: &Anchors,
) -> Result<Array3<f32>> {
    let (nkpt, ndim) = kpt_shape;
    if !(2..=3).contains(&ndim) {
        return Err(HeadError::InvalidParts(format!(
            "keypoint dims must be 2 or 3, got {ndim}"
        )));
    }

    let (_, channels, a) = kpts.dim();
    if channels != nkpt * ndim {
        return Err(HeadError::channels("keypoints", nkpt * ndim, channels));
    }
    if a != anchors.len() {
        return Err(HeadError::InvalidParts(format!(
            "{a} keypoint columns but {} anchors",
            anchors.len()
        )));
    }

    let mut out = kpts.clone();
    for mut sample in out.outer_iter_mut() {
        for k in 0..nkpt {
            let base = k * ndim;
            for j in 0..a {
                let stride = anchors.strides[[j, 0]];
                for axis in 0..2 {
                    let v = &mut sample[[base + axis, j]];
                    *v = (*v * 2.0 + (anchors.points[[j, axis]] - 0.5)) * stride;
                }
                if ndim == 3 {
                    let v = &mut sample[[base + 2, j]];
                    *v = 1.0 / (1.0 + (-*v).exp());
                }
            }
        }
    }
    Ok(out)
}
