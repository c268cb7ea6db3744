use nalgebra::DVector;

use crate::error::CorrError;
use crate::spectrum::{argmax_by, centered_lags, dft_with_gradient};
use crate::window::Patch;

use super::bfgs::{self, BfgsOptions};
use super::surface::PairSpectra;
use super::{match_error, PeakQuality, Registration};

/// Registration by iterative maximization of the continuous correlation.
///
/// The integer argmax of the correlation surface seeds a BFGS search over
/// `|DFT^-1[a * conj(b)](s)|`. Peak quality is scored against the surface
/// statistics: `z_score = (peak - mean) / std` and
/// `frae = sqrt(trace(H^-1) * std * frae_lambda)`.
///
/// With `phase`, patches are Blackman-windowed and the phase correlation is
/// used. A flat surface (zero variance) yields [`CorrError::FlatCorrelation`].
pub fn register_optimized(
    source: &Patch,
    target: &Patch,
    phase: bool,
    options: &BfgsOptions,
    frae_lambda: f64,
) -> Result<Registration, CorrError> {
    let spectra = PairSpectra::new(source, target, phase)?;
    let surface = spectra.surface(1);
    let (rows, cols) = surface.shape();

    let n = surface.len() as f64;
    let mean = surface.sum() / n;
    let var = surface.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if !(std > 1e-9 * mean.abs().max(1.0)) {
        return Err(CorrError::FlatCorrelation);
    }

    let (ar, ac) = argmax_by((rows, cols), |r, c| surface[(r, c)])
        .ok_or_else(|| CorrError::NumericalFailure("empty correlation surface".into()))?;
    let start = DVector::from_vec(vec![centered_lags(rows)[ar], centered_lags(cols)[ac]]);

    let product = &spectra.product;
    let objective = |s: &DVector<f64>| {
        let (d, grad) = dft_with_gradient(product, [s[0], s[1]]);
        let m = d.norm();
        if m <= 0.0 {
            return (0.0, DVector::zeros(2));
        }
        // d|D| = Re(conj(D) dD) / |D|
        let g = DVector::from_vec(vec![
            -(d.conj() * grad[0]).re / m,
            -(d.conj() * grad[1]).re / m,
        ]);
        (-m, g)
    };
    let res = bfgs::minimize(objective, start, options);
    if !res.converged {
        tracing::debug!(
            "BFGS stopped after {} iterations, |g|={:.2e}",
            res.iterations,
            res.gradient.amax()
        );
    }

    let shift = [res.x[0], res.x[1]];
    let peak = -res.f;
    let h = &res.inverse_hessian;
    let frae = (h.trace() * std * frae_lambda).max(0.0).sqrt();
    let z_score = (peak - mean) / std;

    let (error, phase_diff) = match_error(&spectra.src_freq, &spectra.tgt_freq, shift);

    Ok(Registration {
        displacement: [-shift[1], -shift[0]],
        error,
        phase_diff,
        peak: Some(PeakQuality {
            z_score,
            frae,
            peak,
            hessian_inverse: [[h[(0, 0)], h[(0, 1)]], [h[(1, 0)], h[(1, 1)]]],
            iterations: res.iterations,
            converged: res.converged,
        }),
        uncertainty: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fourier_shift, speckle_patch, SpeckleField};
    use approx::assert_abs_diff_eq;

    fn options() -> BfgsOptions {
        BfgsOptions {
            gradient_tol: 1e-6,
            ..Default::default()
        }
    }

    #[test]
    fn recovers_subpixel_shift_without_window() {
        let f = SpeckleField::with_density(21, 64.0, 64.0, 10.0);
        let src = speckle_patch(&f, [32.0, 32.0], 15, [0.0, 0.0]);
        let tgt = speckle_patch(&f, [32.0, 32.0], 15, [0.4, -1.3]);
        let r = register_optimized(&src, &tgt, false, &options(), 1.68).unwrap();
        assert_abs_diff_eq!(r.displacement[0], 0.4, epsilon = 0.25);
        assert_abs_diff_eq!(r.displacement[1], -1.3, epsilon = 0.25);
        let q = r.peak.unwrap();
        assert!(q.z_score > 2.0, "z = {}", q.z_score);
        assert!(q.frae.is_finite() && q.frae > 0.0);
    }

    #[test]
    fn recovers_subpixel_shift_with_phase_window() {
        let f = SpeckleField::with_density(22, 64.0, 64.0, 10.0);
        let src = speckle_patch(&f, [32.0, 32.0], 15, [0.0, 0.0]);
        let tgt = speckle_patch(&f, [32.0, 32.0], 15, [-0.7, 0.6]);
        let r = register_optimized(&src, &tgt, true, &options(), 1.68).unwrap();
        assert_abs_diff_eq!(r.displacement[0], -0.7, epsilon = 0.25);
        assert_abs_diff_eq!(r.displacement[1], 0.6, epsilon = 0.25);
    }

    #[test]
    fn periodic_subpixel_shift_is_recovered_exactly() {
        let f = SpeckleField::with_density(24, 64.0, 64.0, 10.0);
        let src = speckle_patch(&f, [32.0, 32.0], 15, [0.0, 0.0]);
        for d in [[0.37, -0.61], [-1.23, 0.48], [2.71, 1.09]] {
            let tgt = fourier_shift(&src, d);
            let r = register_optimized(&src, &tgt, false, &options(), 1.68).unwrap();
            assert_abs_diff_eq!(r.displacement[0], d[0], epsilon = 1e-3);
            assert_abs_diff_eq!(r.displacement[1], d[1], epsilon = 1e-3);
        }
    }

    #[test]
    fn identical_patches_give_zero_displacement() {
        let f = SpeckleField::with_density(23, 48.0, 48.0, 10.0);
        let p = speckle_patch(&f, [24.0, 24.0], 10, [0.0, 0.0]);
        let r = register_optimized(&p, &p, false, &options(), 1.68).unwrap();
        assert_abs_diff_eq!(r.displacement[0], 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(r.displacement[1], 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(r.error, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn flat_patches_are_rejected() {
        let p = Patch::from_element(9, 9, 7.0);
        assert!(matches!(
            register_optimized(&p, &p, false, &options(), 1.68),
            Err(CorrError::FlatCorrelation)
        ));
    }
}
