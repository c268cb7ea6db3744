//! Gaussian noise model for registration confidence.
//!
//! Model: `B(x) = A(x - d) + n(x)` with i.i.d. `n ~ N(0, sigma^2)`. For a
//! trial displacement `delta`,
//!
//! ```text
//! log L(delta) = -N/2 log(2 pi sigma^2) - (sum A^2 + sum B^2 - 2 C(delta)) / (2 sigma^2)
//! ```
//!
//! where `C(delta)` is the cross-correlation. Maximizing the likelihood is
//! maximizing the correlation, and the Fisher information of `delta` is
//! `(1/sigma^2) sum grad A grad A^T`, whose inverse is the Cramér–Rao bound.
//!
//! Correlations are evaluated with the DFT, so windows are treated as
//! periodic and `sum A(x - delta)^2 = sum A^2` holds exactly. Finite-window
//! edge effects are not modeled; they bias `C` for large displacements.

use nalgebra::Matrix2;

use crate::registration::{correlation_sum, Registration};
use crate::spectrum::fft2;
use crate::window::Patch;

/// Likelihood-based uncertainty of one registration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Uncertainty {
    /// Maximum-likelihood noise standard deviation (intensity units).
    pub noise_sigma: f64,
    /// Cramér–Rao covariance of `(dx, dy)` in px^2.
    pub crb_covariance: [[f64; 2]; 2],
    /// Square roots of the covariance diagonal `(sigma_x, sigma_y)` in px.
    pub crb_std: [f64; 2],
    /// Log-likelihood at the registered displacement; `None` for a perfect
    /// match, where it is unbounded.
    pub log_likelihood: Option<f64>,
}

/// Log-likelihood of a trial displacement given its cross-correlation.
pub fn log_likelihood(correlation: f64, sum_a2: f64, sum_b2: f64, n: usize, sigma: f64) -> f64 {
    let n = n as f64;
    let s2 = sigma * sigma;
    -0.5 * n * (std::f64::consts::TAU * s2).ln() - (sum_a2 + sum_b2 - 2.0 * correlation) / (2.0 * s2)
}

/// Maximum-likelihood noise variance at the correlation peak, clamped at 0.
pub fn ml_noise_variance(correlation_peak: f64, sum_a2: f64, sum_b2: f64, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    ((sum_a2 + sum_b2 - 2.0 * correlation_peak) / n as f64).max(0.0)
}

/// `sum grad A grad A^T` over interior pixels, `[x, y]` order, with
/// central differences.
pub fn gradient_scatter(patch: &Patch) -> Matrix2<f64> {
    let (rows, cols) = patch.shape();
    let mut m = Matrix2::zeros();
    for r in 1..rows.saturating_sub(1) {
        for c in 1..cols.saturating_sub(1) {
            let gx = 0.5 * (patch[(r, c + 1)] - patch[(r, c - 1)]);
            let gy = 0.5 * (patch[(r + 1, c)] - patch[(r - 1, c)]);
            m[(0, 0)] += gx * gx;
            m[(0, 1)] += gx * gy;
            m[(1, 1)] += gy * gy;
        }
    }
    m[(1, 0)] = m[(0, 1)];
    m
}

/// Fisher information of the displacement `(dx, dy)`.
pub fn fisher_information(patch: &Patch, sigma: f64) -> Matrix2<f64> {
    gradient_scatter(patch) / (sigma * sigma)
}

/// Cramér–Rao lower bound on the covariance of `(dx, dy)`.
///
/// `None` when `sigma` is not positive or the patch has no texture along
/// some direction (singular information).
pub fn cramer_rao_bound(patch: &Patch, sigma: f64) -> Option<Matrix2<f64>> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return None;
    }
    let scatter = gradient_scatter(patch);
    let tr = scatter.trace();
    if !(tr > 0.0) || scatter.determinant() <= 1e-12 * tr * tr {
        return None;
    }
    scatter.try_inverse().map(|inv| inv * (sigma * sigma))
}

/// Noise level and Cramér–Rao bound for a registered patch pair.
///
/// Returns `None` when the source patch is untextured. A perfect match
/// yields zero noise and a zero covariance.
pub fn estimate_uncertainty(
    source: &Patch,
    target: &Patch,
    registration: &Registration,
) -> Option<Uncertainty> {
    if source.shape() != target.shape() || source.is_empty() {
        return None;
    }
    let n = source.len();
    let s = correlation_sum(&fft2(source), &fft2(target), registration.shift_yx());
    let correlation = s.norm() / n as f64;
    let sum_a2 = source.norm_squared();
    let sum_b2 = target.norm_squared();

    let var = ml_noise_variance(correlation, sum_a2, sum_b2, n);
    let sigma = var.sqrt();
    let scatter = gradient_scatter(source);
    if !(scatter.trace() > 0.0) {
        return None;
    }

    // Relative floor: variance at roundoff level is a perfect match.
    if var <= 1e-12 * (sum_a2 + sum_b2) / n as f64 {
        return Some(Uncertainty {
            noise_sigma: 0.0,
            crb_covariance: [[0.0; 2]; 2],
            crb_std: [0.0; 2],
            log_likelihood: None,
        });
    }

    let cov = cramer_rao_bound(source, sigma)?;
    Some(Uncertainty {
        noise_sigma: sigma,
        crb_covariance: [[cov[(0, 0)], cov[(0, 1)]], [cov[(1, 0)], cov[(1, 1)]]],
        crb_std: [cov[(0, 0)].sqrt(), cov[(1, 1)].sqrt()],
        log_likelihood: Some(log_likelihood(correlation, sum_a2, sum_b2, n, sigma)),
    })
}
