//! Plain layers with explicit weights: 1x1 convolution and linear.

use ndarray::{Array1, Array2, Array4, Axis};

use crate::error::{HeadError, Result};
use crate::layer::module::{DenseLayer, Layer};

/// 1x1 convolution with weight `[out, in]` and optional bias `[out]`.
#[derive(Debug, Clone)]
pub struct PointwiseConv {
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl PointwiseConv {
    pub fn new(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Result<Self> {
        check_bias(&weight, bias.as_ref())?;
        Ok(Self { weight, bias })
    }

    /// A conv emitting `out` channels of constant `value`, whatever the input.
    pub fn constant(in_channels: usize, out: usize, value: f32) -> Self {
        Self {
            weight: Array2::zeros((out, in_channels)),
            bias: Some(Array1::from_elem(out, value)),
        }
    }

    #[inline]
    pub fn in_channels(&self) -> usize {
        self.weight.ncols()
    }

    #[inline]
    pub fn out_channels(&self) -> usize {
        self.weight.nrows()
    }
}

impl Layer for PointwiseConv {
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let (b, c, h, w) = input.dim();
        if c != self.in_channels() {
            return Err(HeadError::channels("pointwise conv", self.in_channels(), c));
        }

        let out_c = self.out_channels();
        let mut out = Array4::zeros((b, out_c, h, w));
        for (src, mut dst) in input.outer_iter().zip(out.outer_iter_mut()) {
            let flat = src.to_shape((c, h * w))?;
            let mut y = self.weight.dot(&flat);
            if let Some(bias) = &self.bias {
                y += &bias.view().insert_axis(Axis(1));
            }
            dst.assign(&y.to_shape((out_c, h, w))?);
        }
        Ok(out)
    }
}

/// Fully connected layer with weight `[out, in]` and optional bias `[out]`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn new(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Result<Self> {
        check_bias(&weight, bias.as_ref())?;
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }
}

impl DenseLayer for Linear {
    fn forward(&self, input: &Array2<f32>) -> Result<Array2<f32>> {
        if input.ncols() != self.in_features() {
            return Err(HeadError::channels("linear", self.in_features(), input.ncols()));
        }
        let mut y = input.dot(&self.weight.t());
        if let Some(bias) = &self.bias {
            y += bias;
        }
        Ok(y)
    }
}

fn check_bias(weight: &Array2<f32>, bias: Option<&Array1<f32>>) -> Result<()> {
    match bias {
        Some(bias) if bias.len() != weight.nrows() => Err(HeadError::InvalidParts(format!(
            "bias has {} entries for {} outputs",
            bias.len(),
            weight.nrows()
        ))),
        _ => Ok(()),
    }
}
