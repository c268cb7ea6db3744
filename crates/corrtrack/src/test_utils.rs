//! Synthetic speckle images for unit tests.
//!
//! A speckle field is a continuous sum of small Gaussian spots, so
//! translated or deformed copies can be rendered exactly at sub-pixel
//! offsets. Spots are kept sharp: smooth texture lets the window-edge
//! discontinuity dominate the phase correlation.

use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rustfft::num_complex::Complex64;

use crate::spectrum::{fft2, fftfreq, ifft2};
use crate::window::Patch;

#[derive(Debug, Clone, Copy)]
struct Spot {
    x: f64,
    y: f64,
    inv_two_sigma2: f64,
    amplitude: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct SpeckleField {
    spots: Vec<Spot>,
    /// Spot indices bucketed on a `CELL` square lattice starting at
    /// `(-SPOT_MARGIN, -SPOT_MARGIN)`.
    buckets: Vec<Vec<usize>>,
    nx: i64,
    ny: i64,
}

const BACKGROUND: f64 = 20.0;
const SPOT_MARGIN: f64 = 12.0;
/// Spots farther than this contribute below 1e-6 gray levels.
const CELL: f64 = 5.0;

impl SpeckleField {
    /// Random spots covering `[0, width] x [0, height]` plus a margin, so
    /// shifted renderings stay textured up to the border.
    pub(crate) fn new(seed: u64, width: f64, height: f64, n_spots: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let spots = (0..n_spots)
            .map(|_| {
                let sigma: f64 = rng.gen_range(0.5..0.8);
                Spot {
                    x: rng.gen_range(-SPOT_MARGIN..width + SPOT_MARGIN),
                    y: rng.gen_range(-SPOT_MARGIN..height + SPOT_MARGIN),
                    inv_two_sigma2: 1.0 / (2.0 * sigma * sigma),
                    amplitude: rng.gen_range(50.0..120.0),
                }
            })
            .collect::<Vec<Spot>>();

        let nx = ((width + 2.0 * SPOT_MARGIN) / CELL).ceil() as i64 + 1;
        let ny = ((height + 2.0 * SPOT_MARGIN) / CELL).ceil() as i64 + 1;
        let mut buckets = vec![Vec::new(); (nx * ny) as usize];
        for (k, s) in spots.iter().enumerate() {
            let cx = ((s.x + SPOT_MARGIN) / CELL).floor() as i64;
            let cy = ((s.y + SPOT_MARGIN) / CELL).floor() as i64;
            buckets[(cy.clamp(0, ny - 1) * nx + cx.clamp(0, nx - 1)) as usize].push(k);
        }
        Self {
            spots,
            buckets,
            nx,
            ny,
        }
    }

    /// Field with roughly one spot per `pixels_per_spot` square pixels.
    pub(crate) fn with_density(seed: u64, width: f64, height: f64, pixels_per_spot: f64) -> Self {
        let area = (width + 2.0 * SPOT_MARGIN) * (height + 2.0 * SPOT_MARGIN);
        Self::new(seed, width, height, (area / pixels_per_spot).ceil() as usize)
    }

    pub(crate) fn intensity(&self, x: f64, y: f64) -> f64 {
        let cx = ((x + SPOT_MARGIN) / CELL).floor() as i64;
        let cy = ((y + SPOT_MARGIN) / CELL).floor() as i64;
        let mut v = BACKGROUND;
        for by in (cy - 1).max(0)..=(cy + 1).min(self.ny - 1) {
            for bx in (cx - 1).max(0)..=(cx + 1).min(self.nx - 1) {
                for &k in &self.buckets[(by * self.nx + bx) as usize] {
                    let s = &self.spots[k];
                    let d2 = (x - s.x).powi(2) + (y - s.y).powi(2);
                    if d2 < CELL * CELL {
                        v += s.amplitude * (-d2 * s.inv_two_sigma2).exp();
                    }
                }
            }
        }
        v
    }
}

/// Square patch of side `2 * half + 1` centered on integer-valued `center`,
/// rendered with the content translated by `shift = [dx, dy]`.
pub(crate) fn speckle_patch(
    field: &SpeckleField,
    center: [f64; 2],
    half: usize,
    shift: [f64; 2],
) -> Patch {
    let side = 2 * half + 1;
    let x0 = center[0] - half as f64;
    let y0 = center[1] - half as f64;
    Patch::from_fn(side, side, |r, c| {
        field.intensity(x0 + c as f64 - shift[0], y0 + r as f64 - shift[1])
    })
}

/// 8-bit rendering with the content displaced by `displacement(x, y)`.
pub(crate) fn deformed_image(
    field: &SpeckleField,
    width: u32,
    height: u32,
    displacement: impl Fn(f64, f64) -> [f64; 2],
) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as f64, y as f64);
        let u = displacement(x, y);
        let v = field.intensity(x - u[0], y - u[1]);
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// 8-bit rendering translated by `shift = [dx, dy]`.
pub(crate) fn speckle_image(field: &SpeckleField, width: u32, height: u32, shift: [f64; 2]) -> GrayImage {
    deformed_image(field, width, height, |_, _| shift)
}

/// `patch` translated by `shift = [dx, dy]` through a Fourier phase ramp,
/// i.e. an exact periodic sub-pixel shift. Sides should be odd so there is
/// no Nyquist bin.
pub(crate) fn fourier_shift(patch: &Patch, shift: [f64; 2]) -> Patch {
    let (rows, cols) = patch.shape();
    let fy = fftfreq(rows, 1.0);
    let fx = fftfreq(cols, 1.0);
    let mut spectrum = fft2(patch);
    for c in 0..cols {
        for r in 0..rows {
            let phase = -std::f64::consts::TAU * (fx[c] * shift[0] + fy[r] * shift[1]);
            spectrum[(r, c)] *= Complex64::from_polar(1.0, phase);
        }
    }
    ifft2(&spectrum).map(|c| c.re)
}
