//! Traits standing in for learned sub-layers of a trained head.

use ndarray::{Array2, Array4};

use crate::error::Result;

/// A learned layer mapping an NCHW feature map to another NCHW map.
///
/// Implement this for your framework's convolution blocks, or pass a closure.
///
/// # Example
///
/// ```ignore
/// use yolo_heads_rs::{BoxedLayer, layer_fn};
///
/// let scale: BoxedLayer = Box::new(layer_fn(|x| Ok(x * 2.0)));
/// ```
pub trait Layer: Send + Sync {
    /// Run the layer on `input` of shape `[batch, channels, height, width]`.
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>>;
}

impl<F> Layer for F
where
    F: Fn(&Array4<f32>) -> Result<Array4<f32>> + Send + Sync,
{
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self(input)
    }
}

/// Pin a closure's signature so it can be used as a [`Layer`].
pub fn layer_fn<F>(f: F) -> F
where
    F: Fn(&Array4<f32>) -> Result<Array4<f32>> + Send + Sync,
{
    f
}

/// Pin a closure's signature so it can be used as a [`DenseLayer`].
pub fn dense_fn<F>(f: F) -> F
where
    F: Fn(&Array2<f32>) -> Result<Array2<f32>> + Send + Sync,
{
    f
}

/// Owned, type-erased layer as stored inside head adapters.
pub type BoxedLayer = Box<dyn Layer>;

/// A learned layer over `[batch, features]` matrices.
pub trait DenseLayer: Send + Sync {
    fn forward(&self, input: &Array2<f32>) -> Result<Array2<f32>>;
}

impl<F> DenseLayer for F
where
    F: Fn(&Array2<f32>) -> Result<Array2<f32>> + Send + Sync,
{
    fn forward(&self, input: &Array2<f32>) -> Result<Array2<f32>> {
        self(input)
    }
}

/// Passes its input through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Layer for Identity {
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        Ok(input.clone())
    }
}

/// Applies a list of layers in order.
#[derive(Default)]
pub struct Sequential {
    layers: Vec<BoxedLayer>,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer.
    pub fn push(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Layer for Sequential {
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let mut x = input.clone();
        for layer in &self.layers {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }
}

impl std::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequential")
            .field("layers", &self.layers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_applies_in_order() {
        let seq = Sequential::new()
            .push(layer_fn(|x| Ok(x + 1.0)))
            .push(layer_fn(|x| Ok(x * 3.0)))
            .push(Identity);
        assert_eq!(seq.len(), 3);

        let out = seq.forward(&Array4::zeros((1, 1, 1, 1))).unwrap();
        assert_eq!(out[[0, 0, 0, 0]], 3.0);
    }
}
