//! 2D discrete Fourier transforms and spectrum helpers.
//!
//! Conventions follow numpy: the forward transform is unscaled, the inverse
//! is scaled by `1/N`, and frequencies are laid out as returned by
//! `fftfreq`. Positions are `[y, x]` (row, column) throughout.

use nalgebra::DMatrix;
use rustfft::num_complex::Complex64;
use rustfft::{FftDirection, FftPlanner};

use crate::config::Normalization;

/// Sample frequencies `[0, 1, ..., -n/2, ..., -1] / (n * d)`.
pub fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    let n_pos = (n + 1) / 2;
    let scale = 1.0 / (n as f64 * d);
    (0..n)
        .map(|k| {
            let k = if k < n_pos {
                k as f64
            } else {
                k as f64 - n as f64
            };
            k * scale
        })
        .collect()
}

/// Integer lags of an fft-shifted axis of length `n`: `k - n/2`.
pub fn centered_lags(n: usize) -> Vec<f64> {
    (0..n).map(|k| k as f64 - (n / 2) as f64).collect()
}

/// Move the zero-frequency (zero-lag) element to the center.
pub fn fftshift<T: nalgebra::Scalar + Copy>(m: &DMatrix<T>) -> DMatrix<T> {
    let (rows, cols) = m.shape();
    let mut out = m.clone();
    for c in 0..cols {
        for r in 0..rows {
            out[((r + rows / 2) % rows, (c + cols / 2) % cols)] = m[(r, c)];
        }
    }
    out
}

pub fn to_complex(m: &DMatrix<f64>) -> DMatrix<Complex64> {
    m.map(|v| Complex64::new(v, 0.0))
}

fn transform(mut data: DMatrix<Complex64>, direction: FftDirection) -> DMatrix<Complex64> {
    let (rows, cols) = data.shape();
    if rows == 0 || cols == 0 {
        return data;
    }
    let mut planner = FftPlanner::<f64>::new();
    // Column-major storage: each column is a contiguous chunk of `rows`.
    planner
        .plan_fft(rows, direction)
        .process(data.as_mut_slice());
    let mut t = data.transpose();
    planner.plan_fft(cols, direction).process(t.as_mut_slice());
    t.transpose()
}

/// Forward 2D FFT of a real matrix.
pub fn fft2(m: &DMatrix<f64>) -> DMatrix<Complex64> {
    transform(to_complex(m), FftDirection::Forward)
}

/// Inverse 2D FFT, scaled by `1/N`.
pub fn ifft2(s: &DMatrix<Complex64>) -> DMatrix<Complex64> {
    let n = s.len().max(1) as f64;
    transform(s.clone(), FftDirection::Inverse).map(|c| c / n)
}

/// `a * conj(b)`, optionally reduced to its phase.
///
/// In phase mode, zero-modulus bins stay zero.
pub fn cross_power(
    a: &DMatrix<Complex64>,
    b: &DMatrix<Complex64>,
    normalization: Normalization,
) -> DMatrix<Complex64> {
    let product = a.zip_map(b, |x, y| x * y.conj());
    match normalization {
        Normalization::None => product,
        Normalization::Phase => product.map(|c| {
            let m = c.norm();
            if m > 0.0 {
                c / m
            } else {
                Complex64::new(0.0, 0.0)
            }
        }),
    }
}

fn phase_ramp(n: usize, pos: f64) -> (Vec<f64>, Vec<Complex64>) {
    let freqs = fftfreq(n, 1.0);
    let ramp = freqs
        .iter()
        .map(|f| Complex64::from_polar(1.0, std::f64::consts::TAU * pos * f))
        .collect();
    (freqs, ramp)
}

/// Continuous inverse DFT of `spectrum` at a real-valued `[y, x]` position,
/// together with its gradient `[d/dy, d/dx]`.
pub fn dft_with_gradient(spectrum: &DMatrix<Complex64>, yx: [f64; 2]) -> (Complex64, [Complex64; 2]) {
    let (rows, cols) = spectrum.shape();
    let (fy, ey) = phase_ramp(rows, yx[0]);
    let (fx, ex) = phase_ramp(cols, yx[1]);
    let i2pi = Complex64::new(0.0, std::f64::consts::TAU);

    let mut value = Complex64::new(0.0, 0.0);
    let mut d_dy = Complex64::new(0.0, 0.0);
    let mut d_dx = Complex64::new(0.0, 0.0);
    for r in 0..rows {
        let mut t = Complex64::new(0.0, 0.0);
        let mut tx = Complex64::new(0.0, 0.0);
        for c in 0..cols {
            let s = spectrum[(r, c)] * ex[c];
            t += s;
            tx += s * i2pi * fx[c];
        }
        value += ey[r] * t;
        d_dy += ey[r] * i2pi * fy[r] * t;
        d_dx += ey[r] * tx;
    }

    let n = (rows * cols).max(1) as f64;
    (value / n, [d_dy / n, d_dx / n])
}

/// Continuous inverse DFT of `spectrum` at a real-valued `[y, x]` position.
pub fn dft_at(spectrum: &DMatrix<Complex64>, yx: [f64; 2]) -> Complex64 {
    dft_with_gradient(spectrum, yx).0
}

/// Unscaled inverse DFT of `spectrum` sampled on a `region x region` grid
/// with spacing `1 / upsample_factor`, where output index `p` maps to the
/// position `(p - offset) / upsample_factor`.
///
/// Matrix-multiply DFT: `K_r * S * K_c^T`, cheaper than zero-padding the
/// whole spectrum when only a small neighbourhood is needed.
pub fn upsampled_idft(
    spectrum: &DMatrix<Complex64>,
    region: usize,
    upsample_factor: usize,
    offsets: [f64; 2],
) -> DMatrix<Complex64> {
    let (rows, cols) = spectrum.shape();
    let uf = upsample_factor as f64;
    let kernel = |n: usize, offset: f64| {
        let freqs = fftfreq(n, uf);
        DMatrix::from_fn(region, n, |p, k| {
            Complex64::from_polar(1.0, std::f64::consts::TAU * (p as f64 - offset) * freqs[k])
        })
    };
    let k_rows = kernel(rows, offsets[0]);
    let k_cols = kernel(cols, offsets[1]);
    k_rows * spectrum * k_cols.transpose()
}

/// Row-major argmax of `|m|`. Returns `None` for an empty matrix.
pub fn argmax_norm(m: &DMatrix<Complex64>) -> Option<(usize, usize)> {
    argmax_by(m.shape(), |r, c| m[(r, c)].norm())
}

pub(crate) fn argmax_by(
    shape: (usize, usize),
    value: impl Fn(usize, usize) -> f64,
) -> Option<(usize, usize)> {
    let (rows, cols) = shape;
    let mut best: Option<((usize, usize), f64)> = None;
    for r in 0..rows {
        for c in 0..cols {
            let v = value(r, c);
            if best.map_or(true, |(_, b)| v > b) {
                best = Some(((r, c), v));
            }
        }
    }
    best.map(|(idx, _)| idx)
}
