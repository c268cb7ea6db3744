use nalgebra::DMatrix;
use rustfft::num_complex::Complex64;

use crate::config::Normalization;
use crate::error::CorrError;
use crate::spectrum::{argmax_by, centered_lags, cross_power, fft2, fftshift, ifft2};
use crate::window::{blackman_2d, Patch};

use super::check_shapes;

/// Spectra of a patch pair, optionally Blackman-windowed, and their
/// cross-power spectrum.
pub(super) struct PairSpectra {
    pub src_freq: DMatrix<Complex64>,
    pub tgt_freq: DMatrix<Complex64>,
    pub product: DMatrix<Complex64>,
}

impl PairSpectra {
    /// With `phase`, both patches are apodized and the cross-power spectrum
    /// is reduced to its phase.
    pub fn new(source: &Patch, target: &Patch, phase: bool) -> Result<Self, CorrError> {
        let (rows, cols) = check_shapes(source, target)?;
        let (src_freq, tgt_freq, normalization) = if phase {
            let w = blackman_2d(rows, cols);
            (
                fft2(&source.component_mul(&w)),
                fft2(&target.component_mul(&w)),
                Normalization::Phase,
            )
        } else {
            (fft2(source), fft2(target), Normalization::None)
        };
        let product = cross_power(&src_freq, &tgt_freq, normalization);
        Ok(Self {
            src_freq,
            tgt_freq,
            product,
        })
    }

    /// Zero-lag-centered modulus of the inverse cross-power spectrum,
    /// sampled every `1 / upsample_factor` pixel.
    ///
    /// Values are scaled to match the `upsample_factor == 1` surface.
    pub fn surface(&self, upsample_factor: usize) -> DMatrix<f64> {
        let (rows, cols) = self.product.shape();
        let uf = upsample_factor.max(1);
        if uf == 1 {
            return fftshift(&ifft2(&self.product).map(|c| c.norm()));
        }
        // Zero-padding the centered spectrum interpolates the correlation;
        // the resulting phase ramp disappears in the modulus.
        let centered = fftshift(&self.product);
        let mut padded = DMatrix::from_element(rows * uf, cols * uf, Complex64::new(0.0, 0.0));
        padded.view_mut((0, 0), (rows, cols)).copy_from(&centered);
        let scale = (uf * uf) as f64;
        fftshift(&ifft2(&padded).map(|c| c.norm() * scale))
    }
}

/// Correlation surface around zero lag, for inspection and plotting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CorrelationSurface {
    /// Displacement `dx` of each column (negated lag), in pixels.
    pub lags_x: Vec<f64>,
    /// Displacement `dy` of each row (negated lag), in pixels.
    pub lags_y: Vec<f64>,
    /// Correlation modulus, row-major (`values[row][col]`).
    pub values: Vec<Vec<f64>>,
    /// Displacement `(dx, dy)` at the surface maximum.
    pub peak_displacement: [f64; 2],
    pub upsample_factor: usize,
}

/// Correlation surface between `source` and `target`.
///
/// With `phase`, patches are Blackman-windowed and the phase correlation
/// is returned; otherwise the plain cross-correlation.
pub fn correlation_surface(
    source: &Patch,
    target: &Patch,
    upsample_factor: usize,
    phase: bool,
) -> Result<CorrelationSurface, CorrError> {
    let uf = upsample_factor.max(1);
    let spectra = PairSpectra::new(source, target, phase)?;
    let surface = spectra.surface(uf);
    let (rows, cols) = surface.shape();

    let lags = |n: usize| -> Vec<f64> {
        centered_lags(n)
            .into_iter()
            .map(|k| -k / uf as f64)
            .collect()
    };
    let lags_x = lags(cols);
    let lags_y = lags(rows);

    let (pr, pc) = argmax_by((rows, cols), |r, c| surface[(r, c)])
        .ok_or_else(|| CorrError::NumericalFailure("empty correlation surface".into()))?;
    let values = (0..rows)
        .map(|r| (0..cols).map(|c| surface[(r, c)]).collect())
        .collect();

    Ok(CorrelationSurface {
        peak_displacement: [lags_x[pc], lags_y[pr]],
        lags_x,
        lags_y,
        values,
        upsample_factor: uf,
    })
}
