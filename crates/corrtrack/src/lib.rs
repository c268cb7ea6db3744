//! corrtrack: sub-pixel displacement fields from image sequences.
//!
//! Square windows around sample points are matched between images by phase
//! cross-correlation. The processing stages are:
//!
//! 1. **Window** – crop a square patch around a point, optional Blackman
//!    apodization.
//! 2. **Registration** – integer correlation peak, refined either by
//!    matrix-multiply DFT upsampling or by BFGS on the continuous
//!    correlation (with peak-quality scores).
//! 3. **Shifts** – coarse-to-fine point registration between two images.
//! 4. **Tracking** – Eulerian, Lagrangian or reference-frame loops over an
//!    image sequence, plus a two-step triangle-closure check.
//! 5. **Fit** – affine least-squares fit of each step and Green-Lagrange
//!    strain.
//!
//! # Public API
//! - [`Correlator`] as the primary entry point
//! - [`CorrelationConfig`] for tuning
//! - result structures ([`Registration`], [`DisplacementField`],
//!   [`AffineFit`])
//!
//! The `registration`, `spectrum`, `window`, `likelihood` and `interp`
//! modules are public for lower-level use.

mod api;
mod config;
mod error;
mod fit;
mod grid;
pub mod interp;
pub mod likelihood;
mod nullable;
pub mod registration;
mod shifts;
pub mod spectrum;
mod tracking;
pub mod window;

#[cfg(test)]
pub(crate) mod test_utils;

pub use api::Correlator;
pub use config::{
    CoarseSearchConfig, CorrelationConfig, Normalization, RegistrationMethod, UncertaintyConfig,
};
pub use error::CorrError;
pub use fit::{bilinear_fit, fit_field, AffineFit};
pub use grid::{build_grid, Grid};
pub use likelihood::Uncertainty;
pub use registration::{
    correlation_surface, register, register_optimized, register_upsampled, CorrelationSurface,
    PeakQuality, Registration,
};
pub use shifts::get_shifts;
pub use tracking::{
    displacements_img_to_img, track_img_to_img, track_img_to_ref, track_two_steps,
    DisplacementField, Offsets, TrackingMode, TwoStepResult,
};
pub use window::{crop, Patch};
