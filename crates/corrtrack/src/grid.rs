//! Regular point grids centered in an image.

use crate::error::CorrError;

/// Regular grid given by its axes; points are the Cartesian product.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Grid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

impl Grid {
    pub fn len(&self) -> usize {
        self.xs.len() * self.ys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape `(rows, cols)` = `(ys.len(), xs.len())`.
    pub fn shape(&self) -> (usize, usize) {
        (self.ys.len(), self.xs.len())
    }

    /// Points `[x, y]` in row-major order (`y` outer, `x` inner).
    pub fn points(&self) -> Vec<[f64; 2]> {
        self.ys
            .iter()
            .flat_map(|&y| self.xs.iter().map(move |&x| [x, y]))
            .collect()
    }
}

/// `arange(0, extent, step)` shifted so its span is centered in `size`.
fn centered_span(size: u32, margin: usize, spacing: usize) -> Vec<f64> {
    let extent = size as i64 - 2 * margin as i64;
    if extent <= 0 {
        return Vec::new();
    }
    let span: Vec<i64> = (0..extent).step_by(spacing).collect();
    let last = span.last().copied().unwrap_or(0);
    let offset = (size as i64 - last) / 2;
    span.into_iter().map(|v| (v + offset) as f64).collect()
}

/// Grid with `spacing` px between points and at least `margin` px to the
/// borders of a `[height, width]` image. Both values are rounded up to
/// whole pixels.
pub fn build_grid(image_shape: [u32; 2], margin: f64, spacing: f64) -> Result<Grid, CorrError> {
    let [height, width] = image_shape;
    if !(margin.is_finite() && margin >= 0.0) {
        return Err(CorrError::InvalidConfig(format!(
            "grid margin must be non-negative, got {}",
            margin
        )));
    }
    if !(spacing.is_finite() && spacing > 0.0) {
        return Err(CorrError::InvalidConfig(format!(
            "grid spacing must be positive, got {}",
            spacing
        )));
    }
    let margin = margin.ceil() as usize;
    let spacing = spacing.ceil() as usize;

    let xs = centered_span(width, margin, spacing);
    let ys = centered_span(height, margin, spacing);
    if xs.is_empty() || ys.is_empty() {
        return Err(CorrError::EmptyGrid {
            image_size: [width, height],
            margin,
        });
    }

    tracing::info!(
        "grid size: {}x{}, i.e. {} points",
        xs.len(),
        ys.len(),
        xs.len() * ys.len()
    );
    Ok(Grid { xs, ys })
}
