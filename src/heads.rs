//! Export adapters for trained YOLO heads.
//!
//! Each adapter is built from the parts of a trained head (its learned
//! sub-layers and hyperparameters) and exposes a forward pass producing the
//! normalized `[box | conf | cls]` layout, plus whatever extras the task needs.

mod kind;
mod output;
mod yolov5;
mod yolov6;
mod yolov8;

pub use kind::HeadKind;
pub use output::{HeadOutput, OutputRole};
pub use yolov5::{AnchorHeadParts, AnchorSigmoidHead, DetectV5, DetectV7};
pub use yolov6::{
    DecoupledBranches, DetectV6R1, DetectV6R2, DetectV6R3, DetectV6R4m, DetectV6R4s,
    DflDecoupledHead, DflHeadParts, V6R1Parts,
};
pub use yolov8::{
    ClassifyParts, ClassifyV8, DetectV8, ObbParts, ObbV8, PoseParts, PoseV8, SegmentParts,
    SegmentV8, V8Parts,
};

use ndarray::Array4;
use tracing::{Span, trace_span};

use crate::decode::level_shapes;
use crate::error::{HeadError, Result};
use crate::layer::BoxedLayer;

/// Common interface of every adapted head.
pub trait ExportHead: Send + Sync {
    /// Variant this adapter implements.
    fn kind(&self) -> HeadKind;

    /// Run the export forward pass on one feature map per level.
    fn forward(&self, features: &[Array4<f32>]) -> Result<HeadOutput>;
}

/// Check the level count and that all levels share a batch size.
pub(crate) fn check_levels(features: &[Array4<f32>], expected: usize) -> Result<usize> {
    if features.len() != expected {
        return Err(HeadError::LevelCount {
            expected,
            got: features.len(),
        });
    }
    batch_size(features)
}

/// Span entered for one forward pass, recording the input level shapes.
pub(crate) fn forward_span(kind: HeadKind, features: &[Array4<f32>]) -> Span {
    trace_span!("head_forward", %kind, shapes = ?level_shapes(features))
}

pub(crate) fn batch_size(features: &[Array4<f32>]) -> Result<usize> {
    let batch = features.first().map(|x| x.dim().0).unwrap_or(0);
    for x in features {
        let got = x.dim().0;
        if got != batch {
            return Err(HeadError::BatchMismatch {
                expected: batch,
                got,
            });
        }
    }
    Ok(batch)
}

pub(crate) fn expect_channels(
    stage: &'static str,
    x: &Array4<f32>,
    expected: usize,
) -> Result<()> {
    let got = x.dim().1;
    if got != expected {
        return Err(HeadError::channels(stage, expected, got));
    }
    Ok(())
}

/// Check that a per-level layer list matches the level count.
pub(crate) fn check_layer_list(name: &str, layers: &[BoxedLayer], nl: usize) -> Result<()> {
    if layers.len() != nl {
        return Err(HeadError::InvalidParts(format!(
            "{name} has {} layers for {nl} levels",
            layers.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_strides(stride: &[f32], nl: usize) -> Result<()> {
    if stride.len() != nl {
        return Err(HeadError::InvalidParts(format!(
            "{} strides for {nl} levels",
            stride.len()
        )));
    }
    if let Some(bad) = stride.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
        return Err(HeadError::InvalidParts(format!(
            "strides must be positive and finite, got {bad}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_levels() {
        let a = Array4::<f32>::zeros((2, 1, 4, 4));
        let b = Array4::<f32>::zeros((2, 1, 2, 2));
        assert_eq!(check_levels(&[a.clone(), b.clone()], 2).unwrap(), 2);
        assert!(matches!(
            check_levels(&[a.clone()], 2),
            Err(HeadError::LevelCount { expected: 2, got: 1 })
        ));
        let c = Array4::<f32>::zeros((1, 1, 2, 2));
        assert!(matches!(
            check_levels(&[a, c], 2),
            Err(HeadError::BatchMismatch { .. })
        ));
    }

    #[test]
    fn test_check_strides() {
        assert!(check_strides(&[8.0, 16.0], 2).is_ok());
        assert!(check_strides(&[8.0], 2).is_err());
        assert!(check_strides(&[8.0, 0.0], 2).is_err());
        assert!(check_strides(&[8.0, f32::NAN], 2).is_err());
        assert!(check_strides(&[f32::INFINITY, 16.0], 2).is_err());
    }
}
