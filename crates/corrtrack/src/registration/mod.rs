//! Sub-pixel translation registration between two equally sized patches.
//!
//! Two estimators are provided:
//! - [`register_upsampled`]: integer cross-correlation peak refined by a
//!   matrix-multiply DFT evaluated on a `1/upsample_factor` grid around it.
//! - [`register_optimized`]: integer peak refined by BFGS maximization of
//!   the continuous correlation, with peak-quality statistics.
//!
//! Both report the displacement of the target relative to the source,
//! `(dx, dy)`, i.e. the negated registration shift.

pub mod bfgs;
mod optimized;
mod surface;
mod upsampled;

use nalgebra::DMatrix;
use rustfft::num_complex::Complex64;

use crate::config::RegistrationMethod;
use crate::error::CorrError;
use crate::likelihood::Uncertainty;
use crate::spectrum::dft_at;
use crate::window::Patch;

pub use optimized::register_optimized;
pub use surface::{correlation_surface, CorrelationSurface};
pub use upsampled::register_upsampled;

/// Peak statistics of the optimized estimator.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PeakQuality {
    /// Correlation peak height above the surface mean, in surface standard
    /// deviations.
    pub z_score: f64,
    /// Error estimate from the peak curvature:
    /// `sqrt(trace(H^-1) * std(surface) * lambda)`.
    pub frae: f64,
    /// Correlation modulus at the optimum.
    pub peak: f64,
    /// BFGS inverse Hessian at the optimum, in `[y, x]` order.
    pub hessian_inverse: [[f64; 2]; 2],
    pub iterations: usize,
    pub converged: bool,
}

/// Result of registering one patch pair.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Registration {
    /// Target position minus source position `(dx, dy)` in pixels.
    pub displacement: [f64; 2],
    /// Normalized RMS error in `[0, 1]`; 0 for a perfect match.
    pub error: f64,
    /// Global phase difference between the two patches (radians).
    pub phase_diff: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak: Option<PeakQuality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<Uncertainty>,
}

impl Registration {
    /// Registration shift `[y, x]` that maps the target back onto the source.
    pub fn shift_yx(&self) -> [f64; 2] {
        [-self.displacement[1], -self.displacement[0]]
    }

    pub(crate) fn offset_by(mut self, dxy: [f64; 2]) -> Self {
        self.displacement[0] += dxy[0];
        self.displacement[1] += dxy[1];
        self
    }
}

/// Register `target` against `source` with the configured method.
pub fn register(
    source: &Patch,
    target: &Patch,
    method: &RegistrationMethod,
) -> Result<Registration, CorrError> {
    match *method {
        RegistrationMethod::Upsampled {
            upsample_factor,
            normalization,
        } => register_upsampled(source, target, upsample_factor, normalization),
        RegistrationMethod::Optimized {
            phase,
            gradient_tol,
            max_iters,
            frae_lambda,
        } => {
            let options = bfgs::BfgsOptions {
                gradient_tol,
                max_iters,
                ..Default::default()
            };
            register_optimized(source, target, phase, &options, frae_lambda)
        }
    }
}

pub(crate) fn check_shapes(source: &Patch, target: &Patch) -> Result<(usize, usize), CorrError> {
    let shape = source.shape();
    if shape != target.shape() {
        return Err(CorrError::ShapeMismatch {
            expected: [shape.0, shape.1],
            got: [target.nrows(), target.ncols()],
        });
    }
    if shape.0 == 0 || shape.1 == 0 {
        return Err(CorrError::ShapeMismatch {
            expected: [1, 1],
            got: [shape.0, shape.1],
        });
    }
    Ok(shape)
}

/// Unnormalized cross-correlation sum `S = sum(a * conj(b) * e^{i2pi f.s})`
/// at the registration shift `s = [y, x]`.
pub(crate) fn correlation_sum(
    src_freq: &DMatrix<Complex64>,
    tgt_freq: &DMatrix<Complex64>,
    shift_yx: [f64; 2],
) -> Complex64 {
    let product = src_freq.zip_map(tgt_freq, |a, b| a * b.conj());
    dft_at(&product, shift_yx) * product.len() as f64
}

/// Normalized RMS error and global phase difference at `shift_yx`.
pub(crate) fn match_error(
    src_freq: &DMatrix<Complex64>,
    tgt_freq: &DMatrix<Complex64>,
    shift_yx: [f64; 2],
) -> (f64, f64) {
    let s = correlation_sum(src_freq, tgt_freq, shift_yx);
    let src_amp: f64 = src_freq.iter().map(|c| c.norm_sqr()).sum();
    let tgt_amp: f64 = tgt_freq.iter().map(|c| c.norm_sqr()).sum();
    let denom = src_amp * tgt_amp;
    if !(denom > 0.0) {
        return (1.0, 0.0);
    }
    let error = (1.0 - s.norm_sqr() / denom).abs().sqrt();
    (error, s.im.atan2(s.re))
}
