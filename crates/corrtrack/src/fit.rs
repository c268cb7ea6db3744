//! Affine fit of displacement fields and the resulting strain.

use nalgebra::{DMatrix, Matrix2};

use crate::error::CorrError;
use crate::tracking::DisplacementField;

/// Least-squares affine model `u = A [x, y]^T + t` of a displacement field.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AffineFit {
    /// Rows `u` and `v`; columns multiply `x`, `y` and `1`.
    pub coefficients: [[f64; 3]; 2],
    /// Measured minus fitted displacement per point; NaN for ignored points.
    #[serde(with = "crate::nullable")]
    pub residuals: Vec<[f64; 2]>,
    /// Number of points with a finite displacement.
    pub n_used: usize,
}

impl AffineFit {
    /// Displacement gradient `A`.
    pub fn displacement_gradient(&self) -> Matrix2<f64> {
        let c = &self.coefficients;
        Matrix2::new(c[0][0], c[0][1], c[1][0], c[1][1])
    }

    /// `F = I + A`.
    pub fn deformation_gradient(&self) -> Matrix2<f64> {
        Matrix2::identity() + self.displacement_gradient()
    }

    /// Green-Lagrange strain `E = (F^T F - I) / 2`.
    pub fn green_lagrange_strain(&self) -> Matrix2<f64> {
        let f = self.deformation_gradient();
        (f.transpose() * f - Matrix2::identity()) * 0.5
    }

    pub fn translation(&self) -> [f64; 2] {
        [self.coefficients[0][2], self.coefficients[1][2]]
    }

    /// Predicted displacement at `(x, y)`.
    pub fn eval(&self, xy: [f64; 2]) -> [f64; 2] {
        let c = &self.coefficients;
        [
            c[0][0] * xy[0] + c[0][1] * xy[1] + c[0][2],
            c[1][0] * xy[0] + c[1][1] * xy[1] + c[1][2],
        ]
    }

    /// RMS norm of the residual vectors over the used points.
    pub fn rms_residual(&self) -> f64 {
        let (sum, n) = self
            .residuals
            .iter()
            .filter(|r| r[0].is_finite() && r[1].is_finite())
            .fold((0.0, 0usize), |(s, n), r| (s + r[0] * r[0] + r[1] * r[1], n + 1));
        if n == 0 {
            f64::NAN
        } else {
            (sum / n as f64).sqrt()
        }
    }
}

/// Fit an affine displacement model, ignoring points with a NaN component.
pub fn bilinear_fit(points: &[[f64; 2]], displacements: &[[f64; 2]]) -> Result<AffineFit, CorrError> {
    if points.len() != displacements.len() {
        return Err(CorrError::LengthMismatch {
            what: "fit displacements",
            expected: points.len(),
            got: displacements.len(),
        });
    }
    let used: Vec<usize> = (0..points.len())
        .filter(|&i| {
            let (p, d) = (points[i], displacements[i]);
            p[0].is_finite() && p[1].is_finite() && d[0].is_finite() && d[1].is_finite()
        })
        .collect();
    if used.len() < 3 {
        return Err(CorrError::TooFewPoints {
            needed: 3,
            got: used.len(),
        });
    }

    let m = DMatrix::from_fn(used.len(), 3, |r, c| match c {
        0 => points[used[r]][0],
        1 => points[used[r]][1],
        _ => 1.0,
    });
    let rhs = DMatrix::from_fn(used.len(), 2, |r, c| displacements[used[r]][c]);

    let svd = m.clone().svd(true, true);
    let s_max = svd.singular_values.max();
    let s_min = svd.singular_values.min();
    if !(s_min > 1e-10 * s_max) {
        return Err(CorrError::NumericalFailure(
            "fit points are collinear".into(),
        ));
    }
    let x = svd
        .solve(&rhs, 1e-12 * s_max)
        .map_err(|e| CorrError::NumericalFailure(e.to_string()))?;

    let fitted = &m * &x;
    let mut residuals = vec![[f64::NAN, f64::NAN]; points.len()];
    for (r, &i) in used.iter().enumerate() {
        residuals[i] = [rhs[(r, 0)] - fitted[(r, 0)], rhs[(r, 1)] - fitted[(r, 1)]];
    }

    Ok(AffineFit {
        coefficients: [
            [x[(0, 0)], x[(1, 0)], x[(2, 0)]],
            [x[(0, 1)], x[(1, 1)], x[(2, 1)]],
        ],
        residuals,
        n_used: used.len(),
    })
}

/// Affine fit of every step of `field`, at the points where each step was
/// measured. `None` where the fit is not defined.
pub fn fit_field(field: &DisplacementField) -> Vec<Option<AffineFit>> {
    (0..field.n_steps())
        .map(|k| {
            match bilinear_fit(&field.sample_points(k), &field.displacements[k]) {
                Ok(fit) => Some(fit),
                Err(e) => {
                    tracing::debug!("step {}: no affine fit ({})", k, e);
                    None
                }
            }
        })
        .collect()
}
