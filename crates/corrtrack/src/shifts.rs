//! Point displacement between two images.

use image::GrayImage;

use crate::config::{CorrelationConfig, Normalization};
use crate::error::CorrError;
use crate::likelihood::estimate_uncertainty;
use crate::registration::{register, register_upsampled, Registration};
use crate::window::crop;

/// Largest half size whose window, centered on the rounded `(x, y)`, fits
/// in a `width x height` image.
fn border_margin(xy: [f64; 2], width: u32, height: u32) -> usize {
    let [x, y] = xy.map(f64::round_ties_even);
    let m = x
        .min(width as f64 - 1.0 - x)
        .min(y)
        .min(height as f64 - 1.0 - y);
    if m.is_finite() && m > 0.0 {
        m as usize
    } else {
        0
    }
}

/// Prior `offset` refined by an integer registration of large windows
/// centered on `xy` and `xy + offset`.
///
/// The half size is capped by the image borders; when it drops to zero the
/// offset is returned unchanged.
fn coarse_offset(
    source: &GrayImage,
    target: &GrayImage,
    xy: [f64; 2],
    offset: [f64; 2],
    max_half_size: usize,
) -> Result<[f64; 2], CorrError> {
    let tgt_xy = [xy[0] + offset[0], xy[1] + offset[1]];
    let half = max_half_size
        .min(border_margin(xy, source.width(), source.height()))
        .min(border_margin(tgt_xy, target.width(), target.height()));
    if half == 0 {
        return Ok(offset);
    }
    let (src, _) = crop(source, xy, half)?;
    let (tgt, _) = crop(target, tgt_xy, half)?;
    let coarse = register_upsampled(&src, &tgt, 1, Normalization::Phase)?;
    let refined = [
        offset[0] + coarse.displacement[0],
        offset[1] + coarse.displacement[1],
    ];
    tracing::trace!(
        "coarse search at ({:.1}, {:.1}), half size {}: offset ({:.1}, {:.1})",
        xy[0],
        xy[1],
        half,
        refined[0],
        refined[1]
    );
    Ok(refined)
}

/// Displacement `(dx, dy)` of the content around `xy` from `source` to
/// `target`.
///
/// `offset` is a prior guess of the displacement: the target window is
/// centered on `xy + offset`. With coarse search enabled, a larger window
/// is first registered at integer accuracy to refine the guess.
pub fn get_shifts(
    source: &GrayImage,
    target: &GrayImage,
    xy: [f64; 2],
    offset: [f64; 2],
    config: &CorrelationConfig,
) -> Result<Registration, CorrError> {
    let offset = if config.coarse_search.enable {
        coarse_offset(source, target, xy, offset, config.coarse_search.max_half_size)?
    } else {
        offset
    };

    let half = config.window_half_size;
    let (src, ij_src) = crop(source, xy, half)?;
    let (tgt, ij_tgt) = crop(target, [xy[0] + offset[0], xy[1] + offset[1]], half)?;
    let mut registration = register(&src, &tgt, &config.method)?;

    if config.uncertainty.enable {
        registration.uncertainty = estimate_uncertainty(&src, &tgt, &registration);
    }

    Ok(registration.offset_by([
        ij_tgt[1] as f64 - ij_src[1] as f64,
        ij_tgt[0] as f64 - ij_src[0] as f64,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoarseSearchConfig, RegistrationMethod};
    use crate::test_utils::{speckle_image, SpeckleField};
    use approx::assert_abs_diff_eq;

    fn field() -> SpeckleField {
        SpeckleField::with_density(31, 160.0, 160.0, 10.0)
    }

    #[test]
    fn small_translation_is_measured() {
        let f = field();
        let a = speckle_image(&f, 160, 160, [0.0, 0.0]);
        let b = speckle_image(&f, 160, 160, [1.3, -0.6]);
        let r = get_shifts(&a, &b, [80.0, 80.0], [0.0, 0.0], &CorrelationConfig::default()).unwrap();
        assert_abs_diff_eq!(r.displacement[0], 1.3, epsilon = 0.3);
        assert_abs_diff_eq!(r.displacement[1], -0.6, epsilon = 0.3);
    }

    #[test]
    fn coarse_search_absorbs_large_displacement() {
        let f = field();
        let a = speckle_image(&f, 160, 160, [0.0, 0.0]);
        let b = speckle_image(&f, 160, 160, [17.4, 12.2]);
        let config = CorrelationConfig {
            window_half_size: 12,
            ..Default::default()
        };
        let r = get_shifts(&a, &b, [80.0, 80.0], [0.0, 0.0], &config).unwrap();
        assert_abs_diff_eq!(r.displacement[0], 17.4, epsilon = 0.3);
        assert_abs_diff_eq!(r.displacement[1], 12.2, epsilon = 0.3);
    }

    #[test]
    fn offset_guides_fine_window_without_coarse_search() {
        let f = field();
        let a = speckle_image(&f, 160, 160, [0.0, 0.0]);
        let b = speckle_image(&f, 160, 160, [17.4, 12.2]);
        let config = CorrelationConfig {
            window_half_size: 12,
            coarse_search: CoarseSearchConfig {
                enable: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let r = get_shifts(&a, &b, [80.0, 80.0], [17.6, 11.5], &config).unwrap();
        assert_abs_diff_eq!(r.displacement[0], 17.4, epsilon = 0.3);
        assert_abs_diff_eq!(r.displacement[1], 12.2, epsilon = 0.3);
    }

    #[test]
    fn optimized_method_and_uncertainty() {
        let f = field();
        let a = speckle_image(&f, 160, 160, [0.0, 0.0]);
        let b = speckle_image(&f, 160, 160, [-0.8, 2.3]);
        let mut config = CorrelationConfig {
            method: RegistrationMethod::optimized(true),
            ..Default::default()
        };
        config.uncertainty.enable = true;
        let r = get_shifts(&a, &b, [70.0, 90.0], [0.0, 0.0], &config).unwrap();
        assert_abs_diff_eq!(r.displacement[0], -0.8, epsilon = 0.3);
        assert_abs_diff_eq!(r.displacement[1], 2.3, epsilon = 0.3);
        assert!(r.peak.is_some());
        let u = r.uncertainty.unwrap();
        assert!(u.noise_sigma > 0.0);
    }

    #[test]
    fn window_outside_image_fails() {
        let f = field();
        let a = speckle_image(&f, 160, 160, [0.0, 0.0]);
        let err = get_shifts(&a, &a, [5.0, 80.0], [0.0, 0.0], &CorrelationConfig::default());
        assert!(matches!(err, Err(CorrError::CropOutOfBounds { .. })));
    }

    #[test]
    fn coarse_search_keeps_fractional_prior() {
        let f = field();
        let a = speckle_image(&f, 160, 160, [0.0, 0.0]);
        // both windows round to the same center, so the coarse shift is zero
        let refined = coarse_offset(&a, &a, [80.0, 80.0], [0.4, -0.3], 70).unwrap();
        assert_eq!(refined, [0.4, -0.3]);

        let b = speckle_image(&f, 160, 160, [9.0, -5.0]);
        let refined = coarse_offset(&a, &b, [80.0, 80.0], [3.4, 0.2], 70).unwrap();
        assert_abs_diff_eq!(refined[0], 9.4, epsilon = 1e-9);
        assert_abs_diff_eq!(refined[1], -4.8, epsilon = 1e-9);
    }

    #[test]
    fn coarse_search_is_skipped_at_the_border() {
        let f = field();
        let a = speckle_image(&f, 160, 160, [0.0, 0.0]);
        let refined = coarse_offset(&a, &a, [0.0, 80.0], [1.5, 2.5], 70).unwrap();
        assert_eq!(refined, [1.5, 2.5]);
    }

    #[test]
    fn border_margin_uses_last_valid_pixel() {
        assert_eq!(border_margin([10.0, 50.0], 64, 100), 10);
        assert_eq!(border_margin([54.0, 50.0], 64, 100), 9);
        assert_eq!(border_margin([-3.0, 50.0], 64, 100), 0);
    }
}
