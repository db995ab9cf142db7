//! Configuration shared by all head adapters.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HeadError, Result};

/// How the single confidence channel of a detection output is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMode {
    /// Per-cell maximum class probability. Required by on-device decoders
    /// that read the objectness slot, such as RVC2 targets.
    MaxClassScore,
    /// A constant `1.0` in every cell.
    #[default]
    Constant,
}

impl ConfidenceMode {
    /// Map the legacy `use_rvc2` switch onto a mode.
    pub fn from_rvc2(use_rvc2: bool) -> Self {
        if use_rvc2 {
            Self::MaxClassScore
        } else {
            Self::Constant
        }
    }
}

/// Configuration for the head adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadConfig {
    pub confidence: ConfidenceMode,
    /// Offset added to integer cell coordinates when generating anchors.
    pub grid_cell_offset: f32,
    /// Strides used by heads whose trained module does not record them.
    pub fallback_strides: Vec<f32>,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            confidence: ConfidenceMode::Constant,
            grid_cell_offset: 0.5,
            fallback_strides: vec![8.0, 16.0, 32.0],
        }
    }
}

impl HeadConfig {
    /// Parse and validate a config from a JSON string. Missing fields take
    /// their default value.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_confidence(mut self, confidence: ConfidenceMode) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.grid_cell_offset) {
            return Err(HeadError::InvalidParts(format!(
                "grid_cell_offset must lie in [0, 1], got {}",
                self.grid_cell_offset
            )));
        }
        let mut strides = self.fallback_strides.iter();
        if let Some(bad) = strides.find(|s| !(s.is_finite() && **s > 0.0)) {
            return Err(HeadError::InvalidParts(format!(
                "strides must be positive and finite, got {bad}"
            )));
        }
        Ok(())
    }
}
