//! Ordered, labelled head outputs.

use std::fmt;

use ndarray::{Array, ArrayD, Dimension};
use serde::{Deserialize, Serialize};

/// What a single output tensor of an adapted head holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "role")]
pub enum OutputRole {
    /// `[b, 5 + nc, h, w]` block of `[box | conf | cls]` for one level.
    Detections { level: usize },
    /// Grid-decoded predictions of all levels, `[b, anchors, no]`.
    AnchorDetections,
    /// Oriented-box angles, `[b, ne, anchors]`.
    Angles,
    /// Decoded keypoints, `[b, nk, anchors]`.
    Keypoints,
    /// Mask coefficients for one level, `[b, nm, h, w]`.
    MaskCoefficients { level: usize },
    /// Mask prototypes, `[b, nm, mh, mw]`.
    Prototypes,
    /// Classification logits, `[b, classes]`.
    ClassLogits,
    /// Sigmoid of the raw per-level convolution, `[b, na * no, h, w]`.
    RawLevel { level: usize },
}

impl OutputRole {
    /// Name suitable for a graph output.
    pub fn name(&self) -> String {
        match self {
            Self::Detections { level } => format!("output{}_detections", level + 1),
            Self::AnchorDetections => "output".to_string(),
            Self::Angles => "angles".to_string(),
            Self::Keypoints => "kpt_output".to_string(),
            Self::MaskCoefficients { level } => format!("output{}_masks", level + 1),
            Self::Prototypes => "protos_output".to_string(),
            Self::ClassLogits => "output".to_string(),
            Self::RawLevel { level } => format!("output{}_raw", level + 1),
        }
    }
}

impl fmt::Display for OutputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Output of an adapted head: tensors in graph order, each tagged with its role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadOutput {
    entries: Vec<(OutputRole, ArrayD<f32>)>,
}

impl HeadOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a tensor. Tensors are stored in row-major order so that
    /// `as_slice` holds the raw graph output.
    pub fn push<D: Dimension>(&mut self, role: OutputRole, tensor: Array<f32, D>) {
        let tensor = if tensor.is_standard_layout() {
            tensor
        } else {
            tensor.as_standard_layout().into_owned()
        };
        self.entries.push((role, tensor.into_dyn()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn roles(&self) -> Vec<OutputRole> {
        self.entries.iter().map(|(role, _)| *role).collect()
    }

    /// First tensor with the given role.
    pub fn get(&self, role: OutputRole) -> Option<&ArrayD<f32>> {
        self.entries
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, tensor)| tensor)
    }

    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.entries
            .iter()
            .map(|(_, tensor)| tensor.shape().to_vec())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(OutputRole, ArrayD<f32>)> {
        self.entries.iter()
    }

    pub fn into_tensors(self) -> Vec<ArrayD<f32>> {
        self.entries.into_iter().map(|(_, tensor)| tensor).collect()
    }
}

impl IntoIterator for HeadOutput {
    type Item = (OutputRole, ArrayD<f32>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array4};

    #[test]
    fn test_head_output_lookup() {
        let mut out = HeadOutput::new();
        out.push(OutputRole::Detections { level: 0 }, Array4::<f32>::zeros((1, 7, 2, 2)));
        out.push(OutputRole::Keypoints, Array2::<f32>::ones((1, 3)));

        assert_eq!(out.len(), 2);
        assert_eq!(out.shapes(), vec![vec![1, 7, 2, 2], vec![1, 3]]);
        assert_eq!(out.get(OutputRole::Keypoints).unwrap()[&[0, 2][..]], 1.0);
        assert!(out.get(OutputRole::Angles).is_none());
    }

    #[test]
    fn test_push_stores_row_major() {
        let transposed = Array2::from_shape_vec((2, 3), vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap()
            .reversed_axes();
        assert!(!transposed.is_standard_layout());

        let mut out = HeadOutput::new();
        out.push(OutputRole::Angles, transposed);
        let angles = out.get(OutputRole::Angles).unwrap();
        assert_eq!(angles.shape(), &[3, 2]);
        assert_eq!(angles.as_slice().unwrap(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_role_names() {
        assert_eq!(OutputRole::Detections { level: 2 }.name(), "output3_detections");
        assert_eq!(OutputRole::MaskCoefficients { level: 0 }.to_string(), "output1_masks");
    }
}
