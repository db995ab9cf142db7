//! Element-wise and channel-wise tensor operations used by the heads.

use std::f32::consts::PI;

use ndarray::{Array, Array3, Array4, Axis, Dimension, RemoveAxis, concatenate, s};

use crate::config::ConfidenceMode;
use crate::error::{HeadError, Result};

#[inline]
fn sigmoid_scalar(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Logistic sigmoid applied element-wise.
pub fn sigmoid<D: Dimension>(x: &Array<f32, D>) -> Array<f32, D> {
    x.mapv(sigmoid_scalar)
}

pub fn sigmoid_inplace<D: Dimension>(x: &mut Array<f32, D>) {
    x.mapv_inplace(sigmoid_scalar);
}

/// Softmax along `axis`. Each lane is shifted by its maximum before
/// exponentiation.
pub fn softmax<D: Dimension>(x: &Array<f32, D>, axis: Axis) -> Array<f32, D> {
    let mut out = x.clone();
    for mut lane in out.lanes_mut(axis) {
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
    out
}

/// Concatenate tensors along the channel axis (axis 1).
pub fn concat_channels<D: RemoveAxis>(parts: &[&Array<f32, D>]) -> Result<Array<f32, D>> {
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    Ok(concatenate(Axis(1), &views)?)
}

/// Maximum over the channel axis, keeping it as a size-1 axis.
pub fn channel_max<D: RemoveAxis>(x: &Array<f32, D>) -> Result<Array<f32, D>> {
    let max = x
        .fold_axis(Axis(1), f32::NEG_INFINITY, |&m, &v| m.max(v))
        .insert_axis(Axis(1));
    Ok(max.into_dimensionality::<D>()?)
}

/// A tensor of ones shaped like `like` with a single channel.
pub fn constant_confidence<D: Dimension>(like: &Array<f32, D>) -> Array<f32, D> {
    let mut dim = like.raw_dim();
    dim[1] = 1;
    Array::ones(dim)
}

/// Build the `[box | conf | cls]` block shared by the anchor-free heads.
///
/// `cls_logits` are turned into probabilities in place; the confidence
/// channel is derived from them according to `mode`.
pub fn detection_block<D: RemoveAxis>(
    boxes: &Array<f32, D>,
    mut cls_logits: Array<f32, D>,
    mode: ConfidenceMode,
) -> Result<Array<f32, D>> {
    sigmoid_inplace(&mut cls_logits);
    let conf = match mode {
        ConfidenceMode::MaxClassScore => channel_max(&cls_logits)?,
        ConfidenceMode::Constant => constant_confidence(&cls_logits),
    };
    concat_channels(&[boxes, &conf, &cls_logits])
}

/// Map raw angle logits onto `[-pi/4, 3pi/4]`.
pub fn decode_angles(logits: &Array3<f32>) -> Array3<f32> {
    logits.mapv(|v| (sigmoid_scalar(v) - 0.25) * PI)
}

/// Spatial `(h, w)` of each level.
pub fn level_shapes(levels: &[Array4<f32>]) -> Vec<(usize, usize)> {
    levels
        .iter()
        .map(|x| {
            let (_, _, h, w) = x.dim();
            (h, w)
        })
        .collect()
}

/// Collapse `[b, c, h, w]` into `[b, c, h * w]`.
pub fn flatten_spatial(x: &Array4<f32>) -> Result<Array3<f32>> {
    let (b, c, h, w) = x.dim();
    Ok(x.to_shape((b, c, h * w))?.into_owned())
}

/// Flatten each level spatially and concatenate along the anchor axis,
/// giving `[b, c, sum(h_i * w_i)]` in row-major order.
pub fn flatten_levels(levels: &[Array4<f32>]) -> Result<Array3<f32>> {
    let flat = levels
        .iter()
        .map(flatten_spatial)
        .collect::<Result<Vec<_>>>()?;
    let views: Vec<_> = flat.iter().map(|f| f.view()).collect();
    let joined = concatenate(Axis(2), &views)?;
    if joined.is_standard_layout() {
        Ok(joined)
    } else {
        Ok(joined.as_standard_layout().into_owned())
    }
}

/// Inverse of [`flatten_levels`]: cut `[b, c, A]` back into per-level
/// `[b, c, h_i, w_i]` tensors.
pub fn split_levels(y: &Array3<f32>, shapes: &[(usize, usize)]) -> Result<Vec<Array4<f32>>> {
    let (b, c, anchors) = y.dim();
    let total: usize = shapes.iter().map(|(h, w)| h * w).sum();
    if total != anchors {
        return Err(HeadError::InvalidParts(format!(
            "level shapes cover {total} anchors but tensor has {anchors}"
        )));
    }

    let mut start = 0;
    let mut levels = Vec::with_capacity(shapes.len());
    for &(h, w) in shapes {
        let end = start + h * w;
        let level = y.slice(s![.., .., start..end]);
        levels.push(level.to_shape((b, c, h, w))?.into_owned());
        start = end;
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};

    #[test]
    fn test_sigmoid() {
        let x = array![0.0f32, 2.0, -2.0];
        let y = sigmoid(&x);
        assert!((y[0] - 0.5).abs() < 1e-6);
        assert!((y[1] + y[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_is_stable() {
        let x = array![[1000.0f32, 1000.0], [0.0, 0.0]];
        let y = softmax(&x, Axis(1));
        assert!((y[[0, 0]] - 0.5).abs() < 1e-6);
        assert!((y[[1, 1]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_channel_max_keeps_axis() {
        let x = Array3::from_shape_vec((1, 3, 2), vec![0.1, 0.9, 0.5, 0.2, 0.3, 0.4]).unwrap();
        let m = channel_max(&x).unwrap();
        assert_eq!(m.dim(), (1, 1, 2));
        assert_eq!(m[[0, 0, 0]], 0.5);
        assert_eq!(m[[0, 0, 1]], 0.9);
    }

    #[test]
    fn test_detection_block_layout() {
        let boxes = Array3::<f32>::from_elem((1, 4, 3), 7.0);
        let cls = Array3::<f32>::zeros((1, 2, 3));

        let max = detection_block(&boxes, cls.clone(), ConfidenceMode::MaxClassScore).unwrap();
        assert_eq!(max.dim(), (1, 7, 3));
        assert_eq!(max[[0, 3, 0]], 7.0);
        assert!((max[[0, 4, 0]] - 0.5).abs() < 1e-6);
        assert!((max[[0, 6, 2]] - 0.5).abs() < 1e-6);

        let constant = detection_block(&boxes, cls, ConfidenceMode::Constant).unwrap();
        assert_eq!(constant[[0, 4, 1]], 1.0);
    }

    #[test]
    fn test_decode_angles_range() {
        let x = array![[[-50.0f32, 0.0, 50.0]]];
        let a = decode_angles(&x);
        assert!((a[[0, 0, 0]] + PI / 4.0).abs() < 1e-5);
        assert!((a[[0, 0, 1]] - PI / 4.0).abs() < 1e-5);
        assert!((a[[0, 0, 2]] - 3.0 * PI / 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_flatten_then_split_levels() {
        let a = Array4::from_shape_fn((2, 3, 2, 2), |(b, c, h, w)| {
            (b * 100 + c * 10 + h * 2 + w) as f32
        });
        let b = Array4::from_shape_fn((2, 3, 1, 1), |(b, c, _, _)| -((b * 100 + c * 10) as f32));
        let flat = flatten_levels(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(flat.dim(), (2, 3, 5));
        assert!(flat.is_standard_layout());
        assert_eq!(flat[[1, 2, 3]], 123.0);
        assert_eq!(flat[[1, 2, 4]], -120.0);

        let back = split_levels(&flat, &[(2, 2), (1, 1)]).unwrap();
        assert_eq!(back[0], a);
        assert_eq!(back[1], b);
    }

    #[test]
    fn test_split_levels_rejects_wrong_total() {
        let flat = Array3::<f32>::zeros((1, 2, 5));
        assert!(split_levels(&flat, &[(2, 2)]).is_err());
    }
}
