//! Learned sub-layers copied out of a trained head.
//!
//! Head adapters never look inside these: they only call `forward` and check
//! the channel count of what comes back.

mod conv;
mod dfl;
mod module;

pub use conv::{Linear, PointwiseConv};
pub use dfl::Dfl;
pub use module::{BoxedLayer, DenseLayer, Identity, Layer, Sequential, dense_fn, layer_fn};

#[cfg(feature = "burn-backend")]
mod burn_layer;

#[cfg(feature = "burn-backend")]
pub use burn_layer::{BurnLayer, BurnModule};
