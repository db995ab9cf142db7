//! Anchor point and cell grid generation.

use ndarray::{Array2, Array3};

use crate::error::{HeadError, Result};

/// Anchor centres and their strides for a set of feature levels.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchors {
    /// Anchor centres in grid units, shape `[a, 2]` as `(x, y)`.
    pub points: Array2<f32>,
    /// Stride of the level each anchor belongs to, shape `[a, 1]`.
    pub strides: Array2<f32>,
}

impl Anchors {
    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }
}

/// Generate anchors from level shapes.
///
/// Levels are visited in order and cells row-major within a level, which is
/// the order produced by flattening `[b, c, h, w]` maps.
pub fn make_anchors(shapes: &[(usize, usize)], strides: &[f32], offset: f32) -> Result<Anchors> {
    if shapes.len() != strides.len() {
        return Err(HeadError::InvalidParts(format!(
            "{} levels but {} strides",
            shapes.len(),
            strides.len()
        )));
    }

    let total: usize = shapes.iter().map(|(h, w)| h * w).sum();
    let mut points = Array2::zeros((total, 2));
    let mut stride_col = Array2::zeros((total, 1));

    let mut idx = 0;
    for (&(h, w), &stride) in shapes.iter().zip(strides) {
        for y in 0..h {
            for x in 0..w {
                points[[idx, 0]] = x as f32 + offset;
                points[[idx, 1]] = y as f32 + offset;
                stride_col[[idx, 0]] = stride;
                idx += 1;
            }
        }
    }

    Ok(Anchors {
        points,
        strides: stride_col,
    })
}

/// Integer cell coordinates for an `ny x nx` map, shape `[ny, nx, 2]` as `(x, y)`.
pub fn cell_grid(ny: usize, nx: usize) -> Array3<f32> {
    Array3::from_shape_fn((ny, nx, 2), |(y, x, c)| if c == 0 { x as f32 } else { y as f32 })
}
