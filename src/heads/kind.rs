//! Catalogue of supported head variants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HeadError;
use crate::heads::output::OutputRole;

/// A YOLO family/version whose head can be adapted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HeadKind {
    YoloV5,
    YoloV6R1,
    YoloV6R2,
    YoloV6R3,
    YoloV6R4Small,
    YoloV6R4Medium,
    YoloV7,
    YoloV8Detect,
    YoloV8Obb,
    YoloV8Pose,
    YoloV8Segment,
    YoloV8Classify,
}

impl HeadKind {
    pub const ALL: [HeadKind; 12] = [
        Self::YoloV5,
        Self::YoloV6R1,
        Self::YoloV6R2,
        Self::YoloV6R3,
        Self::YoloV6R4Small,
        Self::YoloV6R4Medium,
        Self::YoloV7,
        Self::YoloV8Detect,
        Self::YoloV8Obb,
        Self::YoloV8Pose,
        Self::YoloV8Segment,
        Self::YoloV8Classify,
    ];

    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::YoloV5 => "yolov5",
            Self::YoloV6R1 => "yolov6r1",
            Self::YoloV6R2 => "yolov6r2",
            Self::YoloV6R3 => "yolov6r3",
            Self::YoloV6R4Small => "yolov6r4s",
            Self::YoloV6R4Medium => "yolov6r4m",
            Self::YoloV7 => "yolov7",
            Self::YoloV8Detect => "yolov8",
            Self::YoloV8Obb => "yolov8-obb",
            Self::YoloV8Pose => "yolov8-pose",
            Self::YoloV8Segment => "yolov8-seg",
            Self::YoloV8Classify => "yolov8-cls",
        }
    }

    /// Major YOLO version.
    pub fn version(self) -> u8 {
        match self {
            Self::YoloV5 => 5,
            Self::YoloV6R1
            | Self::YoloV6R2
            | Self::YoloV6R3
            | Self::YoloV6R4Small
            | Self::YoloV6R4Medium => 6,
            Self::YoloV7 => 7,
            Self::YoloV8Detect
            | Self::YoloV8Obb
            | Self::YoloV8Pose
            | Self::YoloV8Segment
            | Self::YoloV8Classify => 8,
        }
    }

    /// Whether boxes are predicted relative to prior anchors.
    pub fn is_anchor_based(self) -> bool {
        matches!(self, Self::YoloV5 | Self::YoloV6R1 | Self::YoloV7)
    }

    /// Output layout the adapter produces for a head with `nl` levels.
    pub fn output_roles(self, nl: usize) -> Vec<OutputRole> {
        let detections = (0..nl).map(|level| OutputRole::Detections { level });
        match self {
            Self::YoloV5 | Self::YoloV7 => {
                (0..nl).map(|level| OutputRole::RawLevel { level }).collect()
            }
            Self::YoloV6R1 => vec![OutputRole::AnchorDetections],
            Self::YoloV6R2
            | Self::YoloV6R3
            | Self::YoloV6R4Small
            | Self::YoloV6R4Medium
            | Self::YoloV8Detect => detections.collect(),
            Self::YoloV8Obb => detections.chain([OutputRole::Angles]).collect(),
            Self::YoloV8Pose => detections.chain([OutputRole::Keypoints]).collect(),
            Self::YoloV8Segment => (0..nl)
                .flat_map(|level| {
                    [
                        OutputRole::MaskCoefficients { level },
                        OutputRole::Detections { level },
                    ]
                })
                .chain([OutputRole::Prototypes])
                .collect(),
            Self::YoloV8Classify => vec![OutputRole::ClassLogits],
        }
    }
}

impl fmt::Display for HeadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HeadKind {
    type Err = HeadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let kind = match normalized.as_str() {
            "yolov6r4" => Self::YoloV6R4Medium,
            "yolov8-detect" | "yolov8-det" => Self::YoloV8Detect,
            "yolov8-segment" => Self::YoloV8Segment,
            "yolov8-classify" => Self::YoloV8Classify,
            other => Self::ALL
                .into_iter()
                .find(|kind| kind.name() == other)
                .ok_or_else(|| HeadError::UnknownHeadKind(s.to_string()))?,
        };
        Ok(kind)
    }
}

impl TryFrom<String> for HeadKind {
    type Error = HeadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HeadKind> for String {
    fn from(kind: HeadKind) -> Self {
        kind.name().to_string()
    }
}
