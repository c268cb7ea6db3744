//! High-level correlation API.
//!
//! [`Correlator`] is the primary entry point. It wraps a
//! [`CorrelationConfig`] and exposes point registration, grid construction,
//! tracking over image sequences and strain fitting.

use std::borrow::Borrow;
use std::path::Path;

use image::GrayImage;

use crate::config::CorrelationConfig;
use crate::error::CorrError;
use crate::fit::{fit_field, AffineFit};
use crate::grid::{build_grid, Grid};
use crate::registration::Registration;
use crate::shifts::get_shifts;
use crate::tracking::{self, DisplacementField, Offsets, TrackingMode, TwoStepResult};

/// Primary correlation interface.
///
/// Create once, run on many images.
///
/// # Examples
///
/// ```no_run
/// use corrtrack::{Correlator, Offsets, TrackingMode};
/// use image::GrayImage;
///
/// let correlator = Correlator::default();
/// let images = vec![GrayImage::new(200, 200), GrayImage::new(200, 200)];
/// let grid = correlator.grid(&images[0], 30.0, 20.0).unwrap();
/// let field = correlator
///     .track(&images, &grid.points(), TrackingMode::Lagrangian, &Offsets::Zero)
///     .unwrap();
/// println!("{} displacements measured", field.n_valid());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Correlator {
    config: CorrelationConfig,
}

impl Correlator {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    /// Load a JSON config and create a correlator in one step.
    pub fn from_config_file(path: &Path) -> Result<Self, CorrError> {
        Ok(Self::new(CorrelationConfig::from_json_file(path)?))
    }

    /// Access the current configuration.
    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Mutable access to configuration for post-construction tuning.
    pub fn config_mut(&mut self) -> &mut CorrelationConfig {
        &mut self.config
    }

    /// Displacement of the content around `xy` from `source` to `target`.
    pub fn register(
        &self,
        source: &GrayImage,
        target: &GrayImage,
        xy: [f64; 2],
        offset: [f64; 2],
    ) -> Result<Registration, CorrError> {
        get_shifts(source, target, xy, offset, &self.config)
    }

    /// Centered regular grid over `image`.
    pub fn grid(&self, image: &GrayImage, margin: f64, spacing: f64) -> Result<Grid, CorrError> {
        build_grid([image.height(), image.width()], margin, spacing)
    }

    /// Displacement field over `images` with the given tracking mode.
    pub fn track<I: Borrow<GrayImage>>(
        &self,
        images: &[I],
        points: &[[f64; 2]],
        mode: TrackingMode,
        offsets: &Offsets,
    ) -> Result<DisplacementField, CorrError> {
        match mode {
            TrackingMode::Eulerian => {
                tracking::displacements_img_to_img(images, points, offsets, &self.config)
            }
            TrackingMode::Lagrangian => {
                tracking::track_img_to_img(images, points, offsets, &self.config)
            }
            TrackingMode::Reference => {
                tracking::track_img_to_ref(images, points, offsets, &self.config)
            }
        }
    }

    /// Lagrangian tracking with the two-step triangle-closure check.
    pub fn track_two_steps<I: Borrow<GrayImage>>(
        &self,
        images: &[I],
        points: &[[f64; 2]],
        offsets: &Offsets,
    ) -> Result<TwoStepResult, CorrError> {
        tracking::track_two_steps(images, points, offsets, &self.config)
    }

    /// Per-step affine fit of a displacement field.
    pub fn fit(&self, field: &DisplacementField) -> Vec<Option<AffineFit>> {
        fit_field(field)
    }
}
