//! Square correlation windows and apodization.

use image::GrayImage;
use nalgebra::DMatrix;

use crate::error::CorrError;

/// Image patch as a dense matrix: rows follow `y`, columns follow `x`.
pub type Patch = DMatrix<f64>;

/// Extract the `(2 * half_size + 1)` square centered at `xy_center`.
///
/// The center is rounded to the nearest pixel (ties to even). Returns the
/// patch and the `[i, j]` (row, column) index of its central pixel.
pub fn crop(
    image: &GrayImage,
    xy_center: [f64; 2],
    half_size: usize,
) -> Result<(Patch, [usize; 2]), CorrError> {
    let (w, h) = image.dimensions();
    let out_of_bounds = || CorrError::CropOutOfBounds {
        center: xy_center,
        half_size,
        image_size: [w, h],
    };

    let [x, y] = xy_center;
    if !x.is_finite() || !y.is_finite() {
        return Err(out_of_bounds());
    }
    let j = x.round_ties_even() as i64;
    let i = y.round_ties_even() as i64;
    let hs = half_size as i64;
    if i - hs < 0 || j - hs < 0 || i + hs >= h as i64 || j + hs >= w as i64 {
        return Err(out_of_bounds());
    }

    let (i0, j0) = ((i - hs) as u32, (j - hs) as u32);
    let side = 2 * half_size + 1;
    let patch = DMatrix::from_fn(side, side, |r, c| {
        image.get_pixel(j0 + c as u32, i0 + r as u32)[0] as f64
    });
    Ok((patch, [i as usize, j as usize]))
}

/// Symmetric Blackman window of length `n`.
pub fn blackman(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let m = (n - 1) as f64;
            (0..n)
                .map(|k| {
                    let t = std::f64::consts::TAU * k as f64 / m;
                    0.42 - 0.5 * t.cos() + 0.08 * (2.0 * t).cos()
                })
                .collect()
        }
    }
}

/// Separable 2D Blackman window.
pub fn blackman_2d(rows: usize, cols: usize) -> DMatrix<f64> {
    let u = blackman(rows);
    let v = blackman(cols);
    DMatrix::from_fn(rows, cols, |r, c| u[r] * v[c])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::Luma;

    fn ramp_image(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([(x + 10 * y) as u8]))
    }

    #[test]
    fn crop_returns_centered_square() {
        let img = ramp_image(20, 20);
        let (patch, ij) = crop(&img, [5.2, 7.6], 2).unwrap();
        assert_eq!(ij, [8, 5]);
        assert_eq!(patch.shape(), (5, 5));
        // top-left pixel is (x=3, y=6)
        assert_eq!(patch[(0, 0)], (3 + 10 * 6) as f64);
        assert_eq!(patch[(2, 2)], (5 + 10 * 8) as f64);
    }

    #[test]
    fn crop_rounds_half_to_even() {
        let img = ramp_image(20, 20);
        let (_, ij) = crop(&img, [4.5, 5.5], 1).unwrap();
        assert_eq!(ij, [6, 4]);
    }

    #[test]
    fn crop_touching_the_border_is_allowed() {
        let img = ramp_image(11, 11);
        let (patch, ij) = crop(&img, [5.0, 5.0], 5).unwrap();
        assert_eq!(ij, [5, 5]);
        assert_eq!(patch.shape(), (11, 11));
    }

    #[test]
    fn crop_outside_image_fails() {
        let img = ramp_image(20, 20);
        assert!(matches!(
            crop(&img, [1.0, 10.0], 2),
            Err(CorrError::CropOutOfBounds { .. })
        ));
        assert!(crop(&img, [10.0, 18.0], 2).is_err());
        assert!(crop(&img, [f64::NAN, 10.0], 2).is_err());
    }

    #[test]
    fn blackman_matches_reference_values() {
        let w = blackman(5);
        assert_abs_diff_eq!(w[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[1], 0.34, epsilon = 1e-12);
        assert_abs_diff_eq!(w[2], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[3], 0.34, epsilon = 1e-12);
        assert_abs_diff_eq!(w[4], 0.0, epsilon = 1e-12);
        assert_eq!(blackman(1), vec![1.0]);
        assert!(blackman(0).is_empty());
    }

    #[test]
    fn blackman_2d_is_outer_product() {
        let w = blackman_2d(5, 3);
        assert_eq!(w.shape(), (5, 3));
        assert_abs_diff_eq!(w[(2, 1)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[(1, 1)], 0.34, epsilon = 1e-12);
    }
}
