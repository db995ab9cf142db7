//! YOLOv5 and YOLOv7 anchor-based heads.
//!
//! On-graph work is limited to the per-level convolution and a sigmoid; grid
//! and anchor decoding is left to the runtime, which receives the anchors
//! through [`AnchorSigmoidHead::anchors`].

use ndarray::{Array3, Array4};
use tracing::debug;

use crate::decode::sigmoid_inplace;
use crate::error::{HeadError, Result};
use crate::heads::{
    ExportHead, HeadKind, HeadOutput, OutputRole, check_levels, check_strides, expect_channels,
    forward_span,
};
use crate::layer::BoxedLayer;

/// Parts copied out of a trained YOLOv5/YOLOv7 `Detect` module.
pub struct AnchorHeadParts {
    /// Number of classes.
    pub nc: usize,
    /// Anchors per cell.
    pub na: usize,
    pub stride: Vec<f32>,
    /// Anchor sizes in grid units, `[nl, na, 2]`.
    pub anchors: Array3<f32>,
    /// One output convolution per level.
    pub m: Vec<BoxedLayer>,
}

/// Shared implementation of the YOLOv5/YOLOv7 adapters.
pub struct AnchorSigmoidHead {
    nc: usize,
    na: usize,
    stride: Vec<f32>,
    anchors: Array3<f32>,
    m: Vec<BoxedLayer>,
}

impl AnchorSigmoidHead {
    fn new(parts: AnchorHeadParts, kind: HeadKind) -> Result<Self> {
        let nl = parts.m.len();
        if nl == 0 || parts.na == 0 {
            return Err(HeadError::InvalidParts(
                "head needs at least one level and one anchor".into(),
            ));
        }
        check_strides(&parts.stride, nl)?;
        if parts.anchors.dim() != (nl, parts.na, 2) {
            return Err(HeadError::InvalidParts(format!(
                "anchors have shape {:?}, expected [{nl}, {}, 2]",
                parts.anchors.shape(),
                parts.na
            )));
        }

        debug!(%kind, nc = parts.nc, nl, na = parts.na, "adapted anchor head");
        Ok(Self {
            nc: parts.nc,
            na: parts.na,
            stride: parts.stride,
            anchors: parts.anchors,
            m: parts.m,
        })
    }

    pub fn nc(&self) -> usize {
        self.nc
    }

    pub fn nl(&self) -> usize {
        self.m.len()
    }

    pub fn na(&self) -> usize {
        self.na
    }

    /// Outputs per anchor: box (4), objectness (1) and classes.
    pub fn no(&self) -> usize {
        self.nc + 5
    }

    pub fn stride(&self) -> &[f32] {
        &self.stride
    }

    pub fn anchors(&self) -> &Array3<f32> {
        &self.anchors
    }

    fn run(&self, kind: HeadKind, features: &[Array4<f32>]) -> Result<HeadOutput> {
        let _span = forward_span(kind, features).entered();
        check_levels(features, self.nl())?;

        let mut output = HeadOutput::with_capacity(self.nl());
        for (level, (x, conv)) in features.iter().zip(&self.m).enumerate() {
            let mut y = conv.forward(x)?;
            expect_channels("m", &y, self.na * self.no())?;
            sigmoid_inplace(&mut y);
            output.push(OutputRole::RawLevel { level }, y);
        }
        Ok(output)
    }
}

/// YOLOv5 `Detect` head adapter.
pub struct DetectV5 {
    head: AnchorSigmoidHead,
}

impl DetectV5 {
    pub fn new(parts: AnchorHeadParts) -> Result<Self> {
        Ok(Self {
            head: AnchorSigmoidHead::new(parts, HeadKind::YoloV5)?,
        })
    }

    pub fn head(&self) -> &AnchorSigmoidHead {
        &self.head
    }
}

impl ExportHead for DetectV5 {
    fn kind(&self) -> HeadKind {
        HeadKind::YoloV5
    }

    fn forward(&self, features: &[Array4<f32>]) -> Result<HeadOutput> {
        self.head.run(self.kind(), features)
    }
}

/// YOLOv7 `Detect` head adapter.
pub struct DetectV7 {
    head: AnchorSigmoidHead,
}

impl DetectV7 {
    pub fn new(parts: AnchorHeadParts) -> Result<Self> {
        Ok(Self {
            head: AnchorSigmoidHead::new(parts, HeadKind::YoloV7)?,
        })
    }

    pub fn head(&self) -> &AnchorSigmoidHead {
        &self.head
    }
}

impl ExportHead for DetectV7 {
    fn kind(&self) -> HeadKind {
        HeadKind::YoloV7
    }

    fn forward(&self, features: &[Array4<f32>]) -> Result<HeadOutput> {
        self.head.run(self.kind(), features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::PointwiseConv;

    fn parts(nc: usize, na: usize) -> AnchorHeadParts {
        let no = nc + 5;
        AnchorHeadParts {
            nc,
            na,
            stride: vec![8.0, 16.0],
            anchors: Array3::ones((2, na, 2)),
            m: vec![
                Box::new(PointwiseConv::constant(4, na * no, 0.0)) as BoxedLayer,
                Box::new(PointwiseConv::constant(8, na * no, 100.0)) as BoxedLayer,
            ],
        }
    }

    #[test]
    fn test_detect_v5_sigmoid_levels() {
        let head = DetectV5::new(parts(2, 3)).unwrap();
        assert_eq!(head.head().no(), 7);

        let feats = vec![Array4::zeros((1, 4, 4, 4)), Array4::zeros((1, 8, 2, 2))];
        let out = head.forward(&feats).unwrap();

        assert_eq!(out.roles(), HeadKind::YoloV5.output_roles(2));
        assert_eq!(out.shapes(), vec![vec![1, 21, 4, 4], vec![1, 21, 2, 2]]);
        let tensors = out.into_tensors();
        assert!(tensors[0].iter().all(|v| (v - 0.5).abs() < 1e-6));
        assert!(tensors[1].iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_detect_v7_rejects_wrong_level_count() {
        let head = DetectV7::new(parts(1, 1)).unwrap();
        let feats = vec![Array4::zeros((1, 4, 4, 4))];
        assert!(matches!(
            head.forward(&feats),
            Err(HeadError::LevelCount { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_anchor_shape_validated() {
        let mut bad = parts(1, 3);
        bad.anchors = Array3::ones((2, 2, 2));
        assert!(DetectV5::new(bad).is_err());
    }
}
