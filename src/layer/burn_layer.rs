//! Burn backend for learned sub-layers.
//!
//! This module provides a `BurnLayer` that implements [`Layer`] for modules
//! built with the Burn framework, so a head's trained convolution blocks can
//! run on any Burn backend while the decoding stays on the CPU.
//!
//! # Example
//!
//! ```ignore
//! use yolo_heads_rs::layer::{BurnLayer, BurnModule};
//! use burn::backend::NdArray;
//! use burn::tensor::Tensor;
//!
//! struct Cv2Block { /* ... */ }
//!
//! impl BurnModule<NdArray> for Cv2Block {
//!     fn forward(&self, input: Tensor<NdArray, 4>) -> Tensor<NdArray, 4> {
//!         // Run the block
//!     }
//! }
//!
//! let layer = BurnLayer::new(Cv2Block::load("cv2.0.bin"), Default::default());
//! ```

use burn::prelude::*;
use burn::tensor::Tensor;
use ndarray::Array4;

use crate::error::{HeadError, Result};
use crate::layer::module::Layer;

/// Trait for Burn modules usable as head sub-layers.
pub trait BurnModule<B: Backend>: Send + Sync {
    /// Run the module on a `[batch, channels, height, width]` tensor.
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Adapter running a [`BurnModule`] behind the [`Layer`] seam.
pub struct BurnLayer<B: Backend, M: BurnModule<B>> {
    module: M,
    device: B::Device,
}

impl<B: Backend, M: BurnModule<B>> BurnLayer<B, M> {
    pub fn new(module: M, device: B::Device) -> Self {
        Self { module, device }
    }

    pub fn module(&self) -> &M {
        &self.module
    }
}

impl<B: Backend, M: BurnModule<B>> Layer for BurnLayer<B, M> {
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let (b, c, h, w) = input.dim();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor =
            Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape([b, c, h, w]);

        let output = self.module.forward(tensor);
        let [ob, oc, oh, ow] = output.dims();
        let values = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| HeadError::Layer(format!("{e:?}")))?;

        Ok(Array4::from_shape_vec((ob, oc, oh, ow), values)?)
    }
}
