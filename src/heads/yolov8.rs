//! YOLOv8 heads: detect, oriented boxes, pose, segment and classify.

use ndarray::{Array2, Array4, Axis};
use tracing::debug;

use crate::config::{ConfidenceMode, HeadConfig};
use crate::decode::{
    concat_channels, decode_angles, decode_keypoints, detection_block, flatten_levels,
    level_shapes, make_anchors, split_levels,
};
use crate::error::{HeadError, Result};
use crate::heads::{
    ExportHead, HeadKind, HeadOutput, OutputRole, batch_size, check_layer_list, check_levels,
    check_strides, expect_channels, forward_span,
};
use crate::layer::{BoxedLayer, DenseLayer, Dfl};

/// Parts copied out of a trained YOLOv8 `Detect` module.
pub struct V8Parts {
    pub nc: usize,
    /// DFL bins per box side.
    pub reg_max: usize,
    pub stride: Vec<f32>,
    /// Box branch per level, emitting `4 * reg_max` channels.
    pub cv2: Vec<BoxedLayer>,
    /// Class branch per level, emitting `nc` channels.
    pub cv3: Vec<BoxedLayer>,
    /// Trained DFL projection. Defaults to `0..reg_max`; with `reg_max == 1`
    /// the box branch already emits distances and no decoding happens.
    pub dfl: Option<Dfl>,
}

/// YOLOv8 detect head adapter.
///
/// Per level the output is `[b, 4 + 1 + nc, h, w]`: DFL-decoded box
/// distances, the confidence channel and sigmoid class scores.
pub struct DetectV8 {
    nc: usize,
    reg_max: usize,
    stride: Vec<f32>,
    cv2: Vec<BoxedLayer>,
    cv3: Vec<BoxedLayer>,
    dfl: Option<Dfl>,
    confidence: ConfidenceMode,
}

impl DetectV8 {
    pub fn new(parts: V8Parts, config: &HeadConfig) -> Result<Self> {
        Self::build(parts, config, HeadKind::YoloV8Detect)
    }

    fn build(parts: V8Parts, config: &HeadConfig, kind: HeadKind) -> Result<Self> {
        config.validate()?;
        let nl = parts.cv2.len();
        if nl == 0 || parts.reg_max == 0 {
            return Err(HeadError::InvalidParts(
                "head needs at least one level and reg_max >= 1".into(),
            ));
        }
        check_layer_list("cv3", &parts.cv3, nl)?;
        check_strides(&parts.stride, nl)?;

        let dfl = match parts.dfl {
            Some(dfl) if dfl.bins() != parts.reg_max => {
                return Err(HeadError::InvalidParts(format!(
                    "DFL has {} bins, expected reg_max = {}",
                    dfl.bins(),
                    parts.reg_max
                )));
            }
            Some(dfl) => Some(dfl),
            None if parts.reg_max > 1 => Some(Dfl::new(parts.reg_max)),
            None => None,
        };

        debug!(
            %kind,
            nc = parts.nc,
            nl,
            reg_max = parts.reg_max,
            confidence = ?config.confidence,
            "adapted anchor-free head"
        );
        Ok(Self {
            nc: parts.nc,
            reg_max: parts.reg_max,
            stride: parts.stride,
            cv2: parts.cv2,
            cv3: parts.cv3,
            dfl,
            confidence: config.confidence,
        })
    }

    pub fn nc(&self) -> usize {
        self.nc
    }

    pub fn nl(&self) -> usize {
        self.cv2.len()
    }

    pub fn reg_max(&self) -> usize {
        self.reg_max
    }

    /// Raw outputs per anchor before decoding.
    pub fn no(&self) -> usize {
        self.nc + 4 * self.reg_max
    }

    pub fn stride(&self) -> &[f32] {
        &self.stride
    }

    pub fn confidence(&self) -> ConfidenceMode {
        self.confidence
    }

    /// Run the detection branches, returning the per-level output blocks and
    /// the level shapes they were cut from.
    fn detect(
        &self,
        features: &[Array4<f32>],
    ) -> Result<(Vec<Array4<f32>>, Vec<(usize, usize)>)> {
        check_levels(features, self.nl())?;

        let mut boxes = Vec::with_capacity(self.nl());
        let mut scores = Vec::with_capacity(self.nl());
        for (i, x) in features.iter().enumerate() {
            let b = self.cv2[i].forward(x)?;
            expect_channels("cv2", &b, 4 * self.reg_max)?;
            let c = self.cv3[i].forward(x)?;
            expect_channels("cv3", &c, self.nc)?;
            if b.dim().2 != c.dim().2 || b.dim().3 != c.dim().3 {
                return Err(HeadError::Layer(format!(
                    "level {i}: box and class branches disagree on spatial size"
                )));
            }
            boxes.push(b);
            scores.push(c);
        }

        let shapes = level_shapes(&boxes);
        let box_flat = flatten_levels(&boxes)?;
        let box_flat = match &self.dfl {
            Some(dfl) => dfl.decode(&box_flat)?,
            None => box_flat,
        };
        let y = detection_block(&box_flat, flatten_levels(&scores)?, self.confidence)?;
        Ok((split_levels(&y, &shapes)?, shapes))
    }

    /// Run a per-level extra branch and flatten it to `[b, channels, A]`.
    fn extra_branch(
        &self,
        stage: &'static str,
        layers: &[BoxedLayer],
        features: &[Array4<f32>],
        channels: usize,
    ) -> Result<ndarray::Array3<f32>> {
        let levels = features
            .iter()
            .zip(layers)
            .map(|(x, layer)| {
                let y = layer.forward(x)?;
                expect_channels(stage, &y, channels)?;
                Ok(y)
            })
            .collect::<Result<Vec<_>>>()?;
        flatten_levels(&levels)
    }
}

impl ExportHead for DetectV8 {
    fn kind(&self) -> HeadKind {
        HeadKind::YoloV8Detect
    }

    fn forward(&self, features: &[Array4<f32>]) -> Result<HeadOutput> {
        let _span = forward_span(self.kind(), features).entered();
        let (levels, _) = self.detect(features)?;

        let mut output = HeadOutput::with_capacity(levels.len());
        for (level, y) in levels.into_iter().enumerate() {
            output.push(OutputRole::Detections { level }, y);
        }
        Ok(output)
    }
}

/// Parts copied out of a YOLOv8 `OBB` module.
pub struct ObbParts {
    pub detect: V8Parts,
    /// Extra parameters per anchor (the angle).
    pub ne: usize,
    pub cv4: Vec<BoxedLayer>,
}

/// YOLOv8 oriented-box head adapter. Appends `[b, ne, A]` angles in
/// `[-pi/4, 3pi/4]` after the detection levels.
pub struct ObbV8 {
    detect: DetectV8,
    ne: usize,
    cv4: Vec<BoxedLayer>,
}

impl ObbV8 {
    pub fn new(parts: ObbParts, config: &HeadConfig) -> Result<Self> {
        let detect = DetectV8::build(parts.detect, config, HeadKind::YoloV8Obb)?;
        check_layer_list("cv4", &parts.cv4, detect.nl())?;
        debug!(ne = parts.ne, "adapted angle branch");
        Ok(Self {
            detect,
            ne: parts.ne,
            cv4: parts.cv4,
        })
    }

    pub fn detect(&self) -> &DetectV8 {
        &self.detect
    }

    pub fn ne(&self) -> usize {
        self.ne
    }
}

impl ExportHead for ObbV8 {
    fn kind(&self) -> HeadKind {
        HeadKind::YoloV8Obb
    }

    fn forward(&self, features: &[Array4<f32>]) -> Result<HeadOutput> {
        let _span = forward_span(self.kind(), features).entered();
        let (levels, _) = self.detect.detect(features)?;
        let angle = self
            .detect
            .extra_branch("cv4", &self.cv4, features, self.ne)?;

        let mut output = HeadOutput::with_capacity(levels.len() + 1);
        for (level, y) in levels.into_iter().enumerate() {
            output.push(OutputRole::Detections { level }, y);
        }
        output.push(OutputRole::Angles, decode_angles(&angle));
        Ok(output)
    }
}

/// Parts copied out of a YOLOv8 `Pose` module.
pub struct PoseParts {
    pub detect: V8Parts,
    /// `(keypoints, dims)`, dims being 2 for `(x, y)` or 3 with visibility.
    pub kpt_shape: (usize, usize),
    pub cv4: Vec<BoxedLayer>,
}

/// YOLOv8 pose head adapter. Appends decoded keypoints `[b, nk, A]` after the
/// detection levels.
pub struct PoseV8 {
    detect: DetectV8,
    kpt_shape: (usize, usize),
    grid_cell_offset: f32,
    cv4: Vec<BoxedLayer>,
}

impl PoseV8 {
    pub fn new(parts: PoseParts, config: &HeadConfig) -> Result<Self> {
        let (nkpt, ndim) = parts.kpt_shape;
        if nkpt == 0 || !(2..=3).contains(&ndim) {
            return Err(HeadError::InvalidParts(format!(
                "unsupported keypoint shape {:?}",
                parts.kpt_shape
            )));
        }
        let detect = DetectV8::build(parts.detect, config, HeadKind::YoloV8Pose)?;
        check_layer_list("cv4", &parts.cv4, detect.nl())?;
        debug!(nkpt, ndim, "adapted keypoint branch");
        Ok(Self {
            detect,
            kpt_shape: parts.kpt_shape,
            grid_cell_offset: config.grid_cell_offset,
            cv4: parts.cv4,
        })
    }

    pub fn detect(&self) -> &DetectV8 {
        &self.detect
    }

    pub fn kpt_shape(&self) -> (usize, usize) {
        self.kpt_shape
    }

    /// Total keypoint values per anchor.
    pub fn nk(&self) -> usize {
        self.kpt_shape.0 * self.kpt_shape.1
    }
}

impl ExportHead for PoseV8 {
    fn kind(&self) -> HeadKind {
        HeadKind::YoloV8Pose
    }

    fn forward(&self, features: &[Array4<f32>]) -> Result<HeadOutput> {
        let _span = forward_span(self.kind(), features).entered();
        let (levels, shapes) = self.detect.detect(features)?;
        let kpt = self
            .detect
            .extra_branch("cv4", &self.cv4, features, self.nk())?;

        // anchors follow the current input resolution
        let anchors = make_anchors(&shapes, self.detect.stride(), self.grid_cell_offset)?;
        let keypoints = decode_keypoints(&kpt, self.kpt_shape, &anchors)?;

        let mut output = HeadOutput::with_capacity(levels.len() + 1);
        for (level, y) in levels.into_iter().enumerate() {
            output.push(OutputRole::Detections { level }, y);
        }
        output.push(OutputRole::Keypoints, keypoints);
        Ok(output)
    }
}

/// Parts copied out of a YOLOv8 `Segment` module.
pub struct SegmentParts {
    pub detect: V8Parts,
    /// Number of mask coefficients.
    pub nm: usize,
    /// Hidden width of the prototype network.
    pub npr: usize,
    /// Prototype network, run on the first level.
    pub proto: BoxedLayer,
    pub cv4: Vec<BoxedLayer>,
}

/// YOLOv8 segmentation head adapter.
///
/// Outputs alternate mask coefficients and detections per level, followed by
/// the mask prototypes.
pub struct SegmentV8 {
    detect: DetectV8,
    nm: usize,
    npr: usize,
    proto: BoxedLayer,
    cv4: Vec<BoxedLayer>,
}

impl SegmentV8 {
    pub fn new(parts: SegmentParts, config: &HeadConfig) -> Result<Self> {
        let detect = DetectV8::build(parts.detect, config, HeadKind::YoloV8Segment)?;
        check_layer_list("cv4", &parts.cv4, detect.nl())?;
        debug!(nm = parts.nm, npr = parts.npr, "adapted mask branch");
        Ok(Self {
            detect,
            nm: parts.nm,
            npr: parts.npr,
            proto: parts.proto,
            cv4: parts.cv4,
        })
    }

    pub fn detect(&self) -> &DetectV8 {
        &self.detect
    }

    pub fn nm(&self) -> usize {
        self.nm
    }

    pub fn npr(&self) -> usize {
        self.npr
    }
}

impl ExportHead for SegmentV8 {
    fn kind(&self) -> HeadKind {
        HeadKind::YoloV8Segment
    }

    fn forward(&self, features: &[Array4<f32>]) -> Result<HeadOutput> {
        let _span = forward_span(self.kind(), features).entered();
        let (levels, _) = self.detect.detect(features)?;

        let protos = self.proto.forward(&features[0])?;
        expect_channels("proto", &protos, self.nm)?;

        let mut output = HeadOutput::with_capacity(2 * levels.len() + 1);
        for (level, (y, (x, cv4))) in levels
            .into_iter()
            .zip(features.iter().zip(&self.cv4))
            .enumerate()
        {
            let mc = cv4.forward(x)?;
            expect_channels("cv4", &mc, self.nm)?;
            output.push(OutputRole::MaskCoefficients { level }, mc);
            output.push(OutputRole::Detections { level }, y);
        }
        output.push(OutputRole::Prototypes, protos);
        Ok(output)
    }
}

/// Parts copied out of a YOLOv8 `Classify` module.
pub struct ClassifyParts {
    pub conv: BoxedLayer,
    pub linear: Box<dyn DenseLayer>,
    /// Dropout rate; inert at inference.
    pub dropout: f32,
}

/// YOLOv8 classification head adapter: conv, global average pool, linear.
/// Returns logits, without a softmax.
pub struct ClassifyV8 {
    conv: BoxedLayer,
    linear: Box<dyn DenseLayer>,
    dropout: f32,
}

impl ClassifyV8 {
    pub fn new(parts: ClassifyParts) -> Self {
        debug!(
            kind = %HeadKind::YoloV8Classify,
            dropout = parts.dropout,
            "adapted classify head"
        );
        Self {
            conv: parts.conv,
            linear: parts.linear,
            dropout: parts.dropout,
        }
    }

    pub fn dropout(&self) -> f32 {
        self.dropout
    }
}

impl ExportHead for ClassifyV8 {
    fn kind(&self) -> HeadKind {
        HeadKind::YoloV8Classify
    }

    fn forward(&self, features: &[Array4<f32>]) -> Result<HeadOutput> {
        let _span = forward_span(self.kind(), features).entered();
        if features.is_empty() {
            return Err(HeadError::LevelCount {
                expected: 1,
                got: 0,
            });
        }
        batch_size(features)?;

        let parts: Vec<_> = features.iter().collect();
        let x = self.conv.forward(&concat_channels(&parts)?)?;
        let (_, _, h, w) = x.dim();
        if h * w == 0 {
            return Err(HeadError::Layer("conv produced an empty feature map".into()));
        }
        let pooled: Array2<f32> = x.sum_axis(Axis(3)).sum_axis(Axis(2)) / (h * w) as f32;
        let logits = self.linear.forward(&pooled)?;

        let mut output = HeadOutput::with_capacity(1);
        output.push(OutputRole::ClassLogits, logits);
        Ok(output)
    }
}
