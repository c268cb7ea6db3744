use crate::config::Normalization;
use crate::error::CorrError;
use crate::spectrum::{argmax_norm, cross_power, fft2, ifft2, upsampled_idft};
use crate::window::Patch;

use super::{check_shapes, match_error, Registration};

/// Phase cross-correlation with single-step DFT upsampling.
///
/// The integer peak of the inverse cross-power spectrum is refined on a
/// `ceil(1.5 * upsample_factor)` square neighbourhood sampled every
/// `1 / upsample_factor` pixel. With `upsample_factor == 1` the result is
/// integer-accurate.
pub fn register_upsampled(
    source: &Patch,
    target: &Patch,
    upsample_factor: usize,
    normalization: Normalization,
) -> Result<Registration, CorrError> {
    let (rows, cols) = check_shapes(source, target)?;
    if upsample_factor == 0 {
        return Err(CorrError::InvalidConfig(
            "upsample_factor must be at least 1".into(),
        ));
    }

    let src_freq = fft2(source);
    let tgt_freq = fft2(target);
    let product = cross_power(&src_freq, &tgt_freq, normalization);
    let cc = ifft2(&product);

    let (pr, pc) = argmax_norm(&cc)
        .ok_or_else(|| CorrError::NumericalFailure("empty correlation".into()))?;
    let wrap = |p: usize, n: usize| {
        if p > n / 2 {
            p as f64 - n as f64
        } else {
            p as f64
        }
    };
    let mut shift = [wrap(pr, rows), wrap(pc, cols)];

    if upsample_factor > 1 {
        let uf = upsample_factor as f64;
        shift = shift.map(|s| (s * uf).round() / uf);
        let region = (1.5 * uf).ceil() as usize;
        let dftshift = (region as f64 / 2.0).trunc();
        let offsets = [dftshift - shift[0] * uf, dftshift - shift[1] * uf];
        let up = upsampled_idft(&product, region, upsample_factor, offsets);
        let (ur, uc) = argmax_norm(&up)
            .ok_or_else(|| CorrError::NumericalFailure("empty upsampled correlation".into()))?;
        shift[0] += (ur as f64 - dftshift) / uf;
        shift[1] += (uc as f64 - dftshift) / uf;
    }

    if rows == 1 {
        shift[0] = 0.0;
    }
    if cols == 1 {
        shift[1] = 0.0;
    }

    let (error, phase_diff) = match_error(&src_freq, &tgt_freq, shift);
    tracing::trace!(
        "upsampled registration: shift=({:.3}, {:.3}) error={:.4}",
        shift[1],
        shift[0],
        error
    );

    Ok(Registration {
        displacement: [-shift[1], -shift[0]],
        error,
        phase_diff,
        peak: None,
        uncertainty: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fourier_shift, speckle_patch, SpeckleField};
    use approx::assert_abs_diff_eq;

    fn field() -> SpeckleField {
        SpeckleField::with_density(11, 64.0, 64.0, 10.0)
    }

    #[test]
    fn integer_shift_is_recovered_exactly() {
        let f = field();
        let src = speckle_patch(&f, [32.0, 32.0], 15, [0.0, 0.0]);
        let tgt = speckle_patch(&f, [32.0, 32.0], 15, [3.0, -2.0]);
        let r = register_upsampled(&src, &tgt, 1, Normalization::Phase).unwrap();
        assert_eq!(r.displacement, [3.0, -2.0]);
    }

    #[test]
    fn subpixel_shift_with_upsampling() {
        let f = field();
        let src = speckle_patch(&f, [32.0, 32.0], 15, [0.0, 0.0]);
        for &(dx, dy) in &[(0.35, -0.6), (-1.4, 0.75), (2.2, 1.1)] {
            let tgt = speckle_patch(&f, [32.0, 32.0], 15, [dx, dy]);
            let r = register_upsampled(&src, &tgt, 20, Normalization::Phase).unwrap();
            assert_abs_diff_eq!(r.displacement[0], dx, epsilon = 0.3);
            assert_abs_diff_eq!(r.displacement[1], dy, epsilon = 0.3);
            // result lies on the upsampled grid
            let scaled = r.displacement[0] * 20.0;
            assert_abs_diff_eq!(scaled, scaled.round(), epsilon = 1e-9);
        }
    }

    #[test]
    fn periodic_subpixel_shift_lands_on_the_upsampled_grid() {
        let f = field();
        let src = speckle_patch(&f, [32.0, 32.0], 15, [0.0, 0.0]);
        for d in [[0.37, -0.61], [-1.23, 0.48], [2.71, 1.09]] {
            let tgt = fourier_shift(&src, d);
            for normalization in [Normalization::Phase, Normalization::None] {
                let r = register_upsampled(&src, &tgt, 100, normalization).unwrap();
                assert_abs_diff_eq!(r.displacement[0], d[0], epsilon = 1e-3);
                assert_abs_diff_eq!(r.displacement[1], d[1], epsilon = 1e-3);
                assert!(r.error < 1e-4, "error {}", r.error);
            }
        }
    }

    #[test]
    fn plain_cross_correlation_finds_integer_peak() {
        let f = field();
        let src = speckle_patch(&f, [32.0, 32.0], 15, [0.0, 0.0]);
        let tgt = speckle_patch(&f, [32.0, 32.0], 15, [-4.0, 1.0]);
        let r = register_upsampled(&src, &tgt, 1, Normalization::None).unwrap();
        assert_eq!(r.displacement, [-4.0, 1.0]);
        assert!(r.error > 0.0 && r.error < 1.0);
    }

    #[test]
    fn error_grows_with_mismatch() {
        let f = field();
        let other = SpeckleField::with_density(99, 64.0, 64.0, 10.0);
        let src = speckle_patch(&f, [32.0, 32.0], 15, [0.0, 0.0]);
        let near = speckle_patch(&f, [32.0, 32.0], 15, [1.0, 0.0]);
        let unrelated = speckle_patch(&other, [32.0, 32.0], 15, [0.0, 0.0]);
        let e_near = register_upsampled(&src, &near, 1, Normalization::Phase)
            .unwrap()
            .error;
        let e_far = register_upsampled(&src, &unrelated, 1, Normalization::Phase)
            .unwrap()
            .error;
        assert!(e_near < e_far, "{} vs {}", e_near, e_far);
    }

    #[test]
    fn single_row_patch_has_zero_vertical_shift() {
        let src = Patch::from_fn(1, 16, |_, c| ((c * 7) % 5) as f64);
        let tgt = Patch::from_fn(1, 16, |_, c| (((c + 15) * 7) % 5) as f64);
        let r = register_upsampled(&src, &tgt, 4, Normalization::Phase).unwrap();
        assert_eq!(r.displacement[1], 0.0);
    }
}
