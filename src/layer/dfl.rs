//! Distribution focal loss (DFL) decoding.

use ndarray::{Array1, Array3, Array4, Axis};

use crate::decode::softmax;
use crate::error::{HeadError, Result};

/// Decodes per-side bin distributions into continuous box distances.
///
/// The regression tensor holds `4 * bins` channels; channel `k * bins + j` is
/// the logit of bin `j` for side `k`. Each side is softmaxed over its bins and
/// reduced to the expected value under `projection`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dfl {
    projection: Array1<f32>,
}

impl Dfl {
    /// Decoder with the usual `0, 1, ..., bins - 1` projection.
    pub fn new(bins: usize) -> Self {
        Self {
            projection: Array1::from_iter((0..bins).map(|i| i as f32)),
        }
    }

    /// Decoder with explicit projection weights, e.g. copied from a trained
    /// projection conv.
    pub fn with_projection(projection: Array1<f32>) -> Result<Self> {
        if projection.is_empty() {
            return Err(HeadError::InvalidParts("empty DFL projection".into()));
        }
        Ok(Self { projection })
    }

    #[inline]
    pub fn bins(&self) -> usize {
        self.projection.len()
    }

    pub fn projection(&self) -> &Array1<f32> {
        &self.projection
    }

    /// Decode `[b, 4 * bins, a]` into `[b, 4, a]`.
    pub fn decode(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let (b, c, a) = x.dim();
        let bins = self.bins();
        if c != 4 * bins {
            return Err(HeadError::channels("dfl", 4 * bins, c));
        }

        let grouped = x.to_shape((b, 4, bins, a))?.into_owned();
        let probs = softmax(&grouped, Axis(2));
        // [bins, 1] broadcasts over the trailing [bins, a] axes
        let weights = self.projection.view().insert_axis(Axis(1));
        Ok((&probs * &weights).sum_axis(Axis(2)))
    }

    /// Decode a spatial map `[b, 4 * bins, h, w]` into `[b, 4, h, w]`.
    pub fn decode_map(&self, x: &Array4<f32>) -> Result<Array4<f32>> {
        let (b, c, h, w) = x.dim();
        let flat = x.to_shape((b, c, h * w))?.into_owned();
        let decoded = self.decode(&flat)?;
        Ok(decoded.to_shape((b, 4, h, w))?.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_logits_decode_to_mean_bin() {
        let dfl = Dfl::new(4);
        let x = Array3::<f32>::zeros((1, 16, 3));
        let y = dfl.decode(&x).unwrap();
        assert_eq!(y.dim(), (1, 4, 3));
        for v in y.iter() {
            assert!((v - 1.5).abs() < 1e-5);
        }
    }

    #[test]
    fn test_peaked_logits_pick_bin() {
        let dfl = Dfl::new(4);
        let mut x = Array3::<f32>::from_elem((1, 16, 1), -100.0);
        // side 2 concentrated on bin 3
        x[[0, 2 * 4 + 3, 0]] = 100.0;
        let y = dfl.decode(&x).unwrap();
        assert!((y[[0, 2, 0]] - 3.0).abs() < 1e-4);
        assert!((y[[0, 0, 0]] - 1.5).abs() < 1e-4);
    }

    #[test]
    fn test_decode_map_shape() {
        let dfl = Dfl::with_projection(Array1::from_vec(vec![0.0, 2.0])).unwrap();
        let x = Array4::<f32>::zeros((2, 8, 3, 5));
        let y = dfl.decode_map(&x).unwrap();
        assert_eq!(y.dim(), (2, 4, 3, 5));
        assert!((y[[1, 3, 2, 4]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_channel_mismatch() {
        let dfl = Dfl::new(16);
        assert!(dfl.decode(&Array3::zeros((1, 60, 2))).is_err());
        assert!(Dfl::with_projection(Array1::zeros(0)).is_err());
    }
}
