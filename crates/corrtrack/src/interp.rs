//! Interpolation of sampled displacement fields.
//!
//! Fields sampled on a complete [`Grid`] use bilinear interpolation; fields
//! with missing samples (NaN) fall back to a thin-plate spline through the
//! valid ones.

use nalgebra::{DMatrix, DVector, Matrix2};

use crate::error::CorrError;
use crate::grid::Grid;

fn check_increasing(axis: &[f64], name: &'static str) -> Result<(), CorrError> {
    if axis.is_empty() {
        return Err(CorrError::InvalidConfig(format!("{} axis is empty", name)));
    }
    if axis.iter().any(|v| !v.is_finite()) || axis.windows(2).any(|w| w[1] <= w[0]) {
        return Err(CorrError::InvalidConfig(format!(
            "{} axis must be finite and strictly increasing",
            name
        )));
    }
    Ok(())
}

/// Cell index and fractional position of `v` on `axis`.
fn locate(axis: &[f64], v: f64) -> Option<(usize, f64)> {
    let first = *axis.first()?;
    let last = *axis.last()?;
    if !(v >= first && v <= last) {
        return None;
    }
    if axis.len() == 1 {
        return Some((0, 0.0));
    }
    let i = axis.partition_point(|&a| a <= v).saturating_sub(1).min(axis.len() - 2);
    Some((i, (v - axis[i]) / (axis[i + 1] - axis[i])))
}

/// Interpolation on a rectilinear grid. Values are row-major with `y`
/// outer, matching [`Grid::points`].
#[derive(Debug, Clone)]
pub struct RegularGridInterpolator {
    xs: Vec<f64>,
    ys: Vec<f64>,
    values: Vec<f64>,
}

impl RegularGridInterpolator {
    pub fn new(xs: Vec<f64>, ys: Vec<f64>, values: Vec<f64>) -> Result<Self, CorrError> {
        check_increasing(&xs, "x")?;
        check_increasing(&ys, "y")?;
        if values.len() != xs.len() * ys.len() {
            return Err(CorrError::LengthMismatch {
                what: "grid values",
                expected: xs.len() * ys.len(),
                got: values.len(),
            });
        }
        Ok(Self { xs, ys, values })
    }

    fn at(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.xs.len() + col]
    }

    /// Bilinear interpolation; NaN outside the grid.
    pub fn linear(&self, x: f64, y: f64) -> f64 {
        let (Some((c, tx)), Some((r, ty))) = (locate(&self.xs, x), locate(&self.ys, y)) else {
            return f64::NAN;
        };
        let c1 = (c + 1).min(self.xs.len() - 1);
        let r1 = (r + 1).min(self.ys.len() - 1);
        let top = self.at(r, c) * (1.0 - tx) + self.at(r, c1) * tx;
        let bottom = self.at(r1, c) * (1.0 - tx) + self.at(r1, c1) * tx;
        top * (1.0 - ty) + bottom * ty
    }

    /// Value of the nearest grid node; NaN outside the grid.
    pub fn nearest(&self, x: f64, y: f64) -> f64 {
        let (Some((c, tx)), Some((r, ty))) = (locate(&self.xs, x), locate(&self.ys, y)) else {
            return f64::NAN;
        };
        let c = if tx > 0.5 { c + 1 } else { c };
        let r = if ty > 0.5 { r + 1 } else { r };
        self.at(r, c)
    }
}

/// Thin-plate spline `f(p) = sum w_i phi(|p - p_i|) + a0 + a1 x + a2 y`
/// with `phi(r) = r^2 ln r`.
///
/// Points are centered on their mean and scaled to unit RMS radius before
/// fitting; `smoothing` applies in those normalized units.
#[derive(Debug, Clone)]
pub struct ThinPlateSpline {
    origin: [f64; 2],
    scale: f64,
    centers: Vec<[f64; 2]>,
    weights: Vec<f64>,
    affine: [f64; 3],
}

fn tps_kernel(a: [f64; 2], b: [f64; 2]) -> f64 {
    let r2 = (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2);
    if r2 > 0.0 {
        0.5 * r2 * r2.ln()
    } else {
        0.0
    }
}

impl ThinPlateSpline {
    /// Fit through `values` at `points`. `smoothing == 0` interpolates
    /// exactly; larger values trade fidelity for smoothness.
    pub fn fit(points: &[[f64; 2]], values: &[f64], smoothing: f64) -> Result<Self, CorrError> {
        let n = points.len();
        if values.len() != n {
            return Err(CorrError::LengthMismatch {
                what: "spline values",
                expected: n,
                got: values.len(),
            });
        }
        if n < 3 {
            return Err(CorrError::TooFewPoints { needed: 3, got: n });
        }

        let inv_n = 1.0 / n as f64;
        let origin = [
            points.iter().map(|p| p[0]).sum::<f64>() * inv_n,
            points.iter().map(|p| p[1]).sum::<f64>() * inv_n,
        ];
        let spread = points
            .iter()
            .map(|p| (p[0] - origin[0]).powi(2) + (p[1] - origin[1]).powi(2))
            .sum::<f64>()
            * inv_n;
        let scale = spread.sqrt();
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(CorrError::NumericalFailure(
                "spline points coincide".into(),
            ));
        }
        let centers: Vec<[f64; 2]> = points
            .iter()
            .map(|p| [(p[0] - origin[0]) / scale, (p[1] - origin[1]) / scale])
            .collect();

        // Affine part is only determined by non-collinear points. The
        // normalized second moment has unit trace.
        let moment = centers.iter().fold(Matrix2::zeros(), |m, q| {
            m + Matrix2::new(q[0] * q[0], q[0] * q[1], q[0] * q[1], q[1] * q[1])
        }) * inv_n;
        if moment.determinant() <= 1e-10 {
            return Err(CorrError::NumericalFailure(
                "spline points are collinear".into(),
            ));
        }
        let p = DMatrix::from_fn(n, 3, |i, j| match j {
            0 => 1.0,
            1 => centers[i][0],
            _ => centers[i][1],
        });

        let mut a = DMatrix::zeros(n + 3, n + 3);
        for i in 0..n {
            for j in 0..n {
                a[(i, j)] = tps_kernel(centers[i], centers[j]);
            }
            a[(i, i)] += smoothing;
            for k in 0..3 {
                a[(i, n + k)] = p[(i, k)];
                a[(n + k, i)] = p[(i, k)];
            }
        }
        let mut b = DVector::zeros(n + 3);
        for (i, &v) in values.iter().enumerate() {
            b[i] = v;
        }

        let sol = a
            .lu()
            .solve(&b)
            .ok_or_else(|| CorrError::NumericalFailure("singular spline system".into()))?;
        if sol.iter().any(|v| !v.is_finite()) {
            return Err(CorrError::NumericalFailure(
                "non-finite spline coefficients".into(),
            ));
        }
        Ok(Self {
            origin,
            scale,
            centers,
            weights: sol.rows(0, n).iter().copied().collect(),
            affine: [sol[n], sol[n + 1], sol[n + 2]],
        })
    }

    pub fn eval(&self, x: f64, y: f64) -> f64 {
        let x = (x - self.origin[0]) / self.scale;
        let y = (y - self.origin[1]) / self.scale;
        let radial: f64 = self
            .centers
            .iter()
            .zip(&self.weights)
            .map(|(&c, &w)| w * tps_kernel([x, y], c))
            .sum();
        radial + self.affine[0] + self.affine[1] * x + self.affine[2] * y
    }
}

/// Scalar field interpolator: bilinear on complete grids, spline otherwise.
#[derive(Debug, Clone)]
pub enum FieldInterpolator {
    Structured(RegularGridInterpolator),
    Scattered(ThinPlateSpline),
}

impl FieldInterpolator {
    /// Interpolator for `values` sampled at `grid.points()`.
    ///
    /// NaN samples are dropped and the spline is fitted to the rest.
    pub fn from_grid_samples(grid: &Grid, values: &[f64]) -> Result<Self, CorrError> {
        if values.iter().all(|v| v.is_finite()) {
            return RegularGridInterpolator::new(grid.xs.clone(), grid.ys.clone(), values.to_vec())
                .map(Self::Structured);
        }
        if values.len() != grid.len() {
            return Err(CorrError::LengthMismatch {
                what: "grid values",
                expected: grid.len(),
                got: values.len(),
            });
        }
        Self::scattered(&grid.points(), values, 0.0)
    }

    /// Spline through the finite samples among `values`.
    pub fn scattered(points: &[[f64; 2]], values: &[f64], smoothing: f64) -> Result<Self, CorrError> {
        if values.len() != points.len() {
            return Err(CorrError::LengthMismatch {
                what: "scattered values",
                expected: points.len(),
                got: values.len(),
            });
        }
        let (pts, vals): (Vec<[f64; 2]>, Vec<f64>) = points
            .iter()
            .zip(values)
            .filter(|(p, v)| v.is_finite() && p[0].is_finite() && p[1].is_finite())
            .map(|(p, v)| (*p, *v))
            .unzip();
        ThinPlateSpline::fit(&pts, &vals, smoothing).map(Self::Scattered)
    }

    pub fn eval(&self, x: f64, y: f64) -> f64 {
        match self {
            Self::Structured(g) => g.linear(x, y),
            Self::Scattered(s) => s.eval(x, y),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }
}

/// Interpolated 2D displacement field `(u, v)`.
#[derive(Debug, Clone)]
pub struct DisplacementInterpolator {
    pub u: FieldInterpolator,
    pub v: FieldInterpolator,
}

impl DisplacementInterpolator {
    /// From displacements measured at `grid.points()`.
    pub fn from_grid(grid: &Grid, displacements: &[[f64; 2]]) -> Result<Self, CorrError> {
        let (u, v) = split(displacements);
        Ok(Self {
            u: FieldInterpolator::from_grid_samples(grid, &u)?,
            v: FieldInterpolator::from_grid_samples(grid, &v)?,
        })
    }

    /// From displacements measured at arbitrary points.
    pub fn from_scattered(
        points: &[[f64; 2]],
        displacements: &[[f64; 2]],
        smoothing: f64,
    ) -> Result<Self, CorrError> {
        let (u, v) = split(displacements);
        Ok(Self {
            u: FieldInterpolator::scattered(points, &u, smoothing)?,
            v: FieldInterpolator::scattered(points, &v, smoothing)?,
        })
    }

    pub fn eval(&self, xy: [f64; 2]) -> [f64; 2] {
        [self.u.eval(xy[0], xy[1]), self.v.eval(xy[0], xy[1])]
    }
}

fn split(displacements: &[[f64; 2]]) -> (Vec<f64>, Vec<f64>) {
    displacements.iter().map(|d| (d[0], d[1])).unzip()
}
