//! YOLOv6 efficient decoupled heads (R1 through R4).

use ndarray::{Array3, Array4, Axis, concatenate};
use tracing::debug;

use crate::config::{ConfidenceMode, HeadConfig};
use crate::decode::{cell_grid, concat_channels, detection_block, sigmoid};
use crate::error::{HeadError, Result};
use crate::heads::{
    ExportHead, HeadKind, HeadOutput, OutputRole, check_layer_list, check_levels, check_strides,
    expect_channels, forward_span,
};
use crate::layer::{BoxedLayer, Dfl};

/// Per-level branches shared by every decoupled head.
///
/// A level runs `stem`, then splits into a classification branch
/// (`cls_conv -> cls_pred`) and a regression branch (`reg_conv -> reg_pred`).
pub struct DecoupledBranches {
    pub stems: Vec<BoxedLayer>,
    pub cls_convs: Vec<BoxedLayer>,
    pub reg_convs: Vec<BoxedLayer>,
    pub cls_preds: Vec<BoxedLayer>,
    pub reg_preds: Vec<BoxedLayer>,
}

impl DecoupledBranches {
    pub fn nl(&self) -> usize {
        self.stems.len()
    }

    fn validate(&self) -> Result<()> {
        let nl = self.nl();
        if nl == 0 {
            return Err(HeadError::InvalidParts("head has no levels".into()));
        }
        check_layer_list("cls_convs", &self.cls_convs, nl)?;
        check_layer_list("reg_convs", &self.reg_convs, nl)?;
        check_layer_list("cls_preds", &self.cls_preds, nl)?;
        check_layer_list("reg_preds", &self.reg_preds, nl)
    }

    /// Run one level, returning class logits and the regression features
    /// (before `reg_pred`).
    fn level(&self, i: usize, x: &Array4<f32>) -> Result<(Array4<f32>, Array4<f32>)> {
        let stem = self.stems[i].forward(x)?;
        let cls = self.cls_preds[i].forward(&self.cls_convs[i].forward(&stem)?)?;
        let reg_feat = self.reg_convs[i].forward(&stem)?;
        Ok((cls, reg_feat))
    }
}

/// Parts copied out of a YOLOv6 R1 head, which adds an objectness branch.
pub struct V6R1Parts {
    pub nc: usize,
    /// Anchors per cell.
    pub na: usize,
    pub branches: DecoupledBranches,
    pub obj_preds: Vec<BoxedLayer>,
}

/// YOLOv6 R1 head adapter.
///
/// Predictions are grid-decoded on-graph: `xy = (xy + cell) * stride`,
/// `wh = exp(wh) * stride`. All levels are flattened into one
/// `[b, anchors, no]` tensor.
pub struct DetectV6R1 {
    nc: usize,
    na: usize,
    stride: Vec<f32>,
    branches: DecoupledBranches,
    obj_preds: Vec<BoxedLayer>,
}

impl DetectV6R1 {
    pub fn new(parts: V6R1Parts, config: &HeadConfig) -> Result<Self> {
        config.validate()?;
        parts.branches.validate()?;
        let nl = parts.branches.nl();
        check_layer_list("obj_preds", &parts.obj_preds, nl)?;
        check_strides(&config.fallback_strides, nl)?;
        if parts.na == 0 {
            return Err(HeadError::InvalidParts("head needs at least one anchor".into()));
        }

        debug!(
            kind = %HeadKind::YoloV6R1,
            nc = parts.nc,
            nl,
            na = parts.na,
            "adapted decoupled head"
        );
        Ok(Self {
            nc: parts.nc,
            na: parts.na,
            stride: config.fallback_strides.clone(),
            branches: parts.branches,
            obj_preds: parts.obj_preds,
        })
    }

    pub fn nc(&self) -> usize {
        self.nc
    }

    pub fn nl(&self) -> usize {
        self.branches.nl()
    }

    pub fn no(&self) -> usize {
        self.nc + 5
    }

    pub fn stride(&self) -> &[f32] {
        &self.stride
    }

    fn decode_level(&self, i: usize, x: &Array4<f32>) -> Result<Array3<f32>> {
        let (cls, reg_feat) = self.branches.level(i, x)?;
        let reg = self.branches.reg_preds[i].forward(&reg_feat)?;
        let obj = self.obj_preds[i].forward(&reg_feat)?;

        let y = concat_channels(&[&reg, &sigmoid(&obj), &sigmoid(&cls)])?;
        let (b, c, ny, nx) = y.dim();
        let (na, no) = (self.na, self.no());
        if c != na * no {
            return Err(HeadError::channels("decoupled outputs", na * no, c));
        }

        // [b, na, no, ny, nx] -> [b, na, ny, nx, no]
        let mut y = y
            .to_shape((b, na, no, ny, nx))?
            .into_owned()
            .permuted_axes([0, 1, 3, 4, 2]);
        let grid = cell_grid(ny, nx);
        let stride = self.stride[i];
        for ((_, _, gy, gx, ch), v) in y.indexed_iter_mut() {
            match ch {
                0 | 1 => *v = (*v + grid[[gy, gx, ch]]) * stride,
                2 | 3 => *v = v.exp() * stride,
                _ => {}
            }
        }

        Ok(y.to_shape((b, na * ny * nx, no))?.into_owned())
    }
}

impl ExportHead for DetectV6R1 {
    fn kind(&self) -> HeadKind {
        HeadKind::YoloV6R1
    }

    fn forward(&self, features: &[Array4<f32>]) -> Result<HeadOutput> {
        let _span = forward_span(self.kind(), features).entered();
        check_levels(features, self.nl())?;

        let levels = features
            .iter()
            .enumerate()
            .map(|(i, x)| self.decode_level(i, x))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = levels.iter().map(|l| l.view()).collect();

        let mut output = HeadOutput::with_capacity(1);
        output.push(OutputRole::AnchorDetections, concatenate(Axis(1), &views)?);
        Ok(output)
    }
}

/// Parts copied out of a YOLOv6 R2/R3/R4 head.
pub struct DflHeadParts {
    pub nc: usize,
    pub branches: DecoupledBranches,
    pub use_dfl: bool,
    pub reg_max: usize,
    /// Trained projection; defaults to `0..=reg_max`.
    pub proj: Option<Dfl>,
    /// Strides recorded in the trained module. R2/R3 do not use these.
    pub stride: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy)]
struct V6Profile {
    kind: HeadKind,
    /// Whether `use_dfl` is honored. R4 small models regress boxes directly.
    honors_dfl: bool,
    /// Whether the head's own strides are used instead of the fallback.
    own_stride: bool,
    confidence: Option<ConfidenceMode>,
}

/// Shared implementation of the anchor-free YOLOv6 adapters.
///
/// Each level produces `[b, 4 + 1 + nc, h, w]` holding the (optionally
/// DFL-decoded) box distances, the confidence channel and class scores.
pub struct DflDecoupledHead {
    kind: HeadKind,
    nc: usize,
    reg_max: usize,
    dfl: Option<Dfl>,
    stride: Vec<f32>,
    confidence: ConfidenceMode,
    branches: DecoupledBranches,
}

impl DflDecoupledHead {
    fn new(parts: DflHeadParts, config: &HeadConfig, profile: V6Profile) -> Result<Self> {
        config.validate()?;
        parts.branches.validate()?;
        let nl = parts.branches.nl();

        let stride = match (profile.own_stride, parts.stride) {
            (true, Some(stride)) => stride,
            (true, None) => {
                return Err(HeadError::InvalidParts(format!(
                    "{} heads need the module's strides",
                    profile.kind
                )));
            }
            (false, _) => config.fallback_strides.clone(),
        };
        check_strides(&stride, nl)?;

        let dfl = if profile.honors_dfl && parts.use_dfl {
            let proj = parts.proj.unwrap_or_else(|| Dfl::new(parts.reg_max + 1));
            if proj.bins() != parts.reg_max + 1 {
                return Err(HeadError::InvalidParts(format!(
                    "projection has {} bins, expected reg_max + 1 = {}",
                    proj.bins(),
                    parts.reg_max + 1
                )));
            }
            Some(proj)
        } else {
            None
        };

        let confidence = profile.confidence.unwrap_or(config.confidence);
        debug!(
            kind = %profile.kind,
            nc = parts.nc,
            nl,
            reg_max = parts.reg_max,
            dfl = dfl.is_some(),
            ?confidence,
            "adapted decoupled head"
        );
        Ok(Self {
            kind: profile.kind,
            nc: parts.nc,
            reg_max: parts.reg_max,
            dfl,
            stride,
            confidence,
            branches: parts.branches,
        })
    }

    pub fn nc(&self) -> usize {
        self.nc
    }

    pub fn nl(&self) -> usize {
        self.branches.nl()
    }

    pub fn reg_max(&self) -> usize {
        self.reg_max
    }

    pub fn uses_dfl(&self) -> bool {
        self.dfl.is_some()
    }

    pub fn stride(&self) -> &[f32] {
        &self.stride
    }

    pub fn confidence(&self) -> ConfidenceMode {
        self.confidence
    }

    fn run(&self, features: &[Array4<f32>]) -> Result<HeadOutput> {
        let _span = forward_span(self.kind, features).entered();
        check_levels(features, self.nl())?;

        let mut output = HeadOutput::with_capacity(self.nl());
        for (level, x) in features.iter().enumerate() {
            let (cls, reg_feat) = self.branches.level(level, x)?;
            let mut reg = self.branches.reg_preds[level].forward(&reg_feat)?;
            if let Some(dfl) = &self.dfl {
                reg = dfl.decode_map(&reg)?;
            }
            expect_channels("reg_preds", &reg, 4)?;
            expect_channels("cls_preds", &cls, self.nc)?;

            let y = detection_block(&reg, cls, self.confidence)?;
            output.push(OutputRole::Detections { level }, y);
        }
        Ok(output)
    }
}

macro_rules! v6_variant {
    ($(#[$doc:meta])* $name:ident, $profile:expr) => {
        $(#[$doc])*
        pub struct $name {
            head: DflDecoupledHead,
        }

        impl $name {
            pub fn new(parts: DflHeadParts, config: &HeadConfig) -> Result<Self> {
                Ok(Self {
                    head: DflDecoupledHead::new(parts, config, $profile)?,
                })
            }

            pub fn head(&self) -> &DflDecoupledHead {
                &self.head
            }
        }

        impl ExportHead for $name {
            fn kind(&self) -> HeadKind {
                self.head.kind
            }

            fn forward(&self, features: &[Array4<f32>]) -> Result<HeadOutput> {
                self.head.run(features)
            }
        }
    };
}

v6_variant!(
    /// YOLOv6 R2 head adapter: R3 semantics with the max class score as confidence.
    DetectV6R2,
    V6Profile {
        kind: HeadKind::YoloV6R2,
        honors_dfl: true,
        own_stride: false,
        confidence: Some(ConfidenceMode::MaxClassScore),
    }
);

v6_variant!(
    /// YOLOv6 R3 head adapter.
    DetectV6R3,
    V6Profile {
        kind: HeadKind::YoloV6R3,
        honors_dfl: true,
        own_stride: false,
        confidence: None,
    }
);

v6_variant!(
    /// YOLOv6 R4 nano/small head adapter. Boxes are never DFL-decoded.
    DetectV6R4s,
    V6Profile {
        kind: HeadKind::YoloV6R4Small,
        honors_dfl: false,
        own_stride: true,
        confidence: None,
    }
);

v6_variant!(
    /// YOLOv6 R4 medium/large head adapter.
    DetectV6R4m,
    V6Profile {
        kind: HeadKind::YoloV6R4Medium,
        honors_dfl: true,
        own_stride: true,
        confidence: None,
    }
);
