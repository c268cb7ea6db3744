//! Displacement fields over image sequences.
//!
//! Three loops are provided:
//! - [`displacements_img_to_img`]: Eulerian, points fixed in the camera
//!   frame, each consecutive pair registered independently.
//! - [`track_img_to_img`]: Lagrangian, each point follows the material and
//!   its position is advanced by every measured step.
//! - [`track_img_to_ref`]: every frame registered against the first one at
//!   the start point, giving cumulative displacements.
//!
//! Failed registrations leave NaN. In the tracking loops a failure ends the
//! trajectory of that point.

use std::borrow::Borrow;

use image::GrayImage;

use crate::config::CorrelationConfig;
use crate::error::CorrError;
use crate::grid::Grid;
use crate::interp::DisplacementInterpolator;
use crate::shifts::get_shifts;

const NAN2: [f64; 2] = [f64::NAN, f64::NAN];

/// Prior displacement guesses fed to the registration of each step.
#[derive(Debug, Clone, Default)]
pub enum Offsets {
    #[default]
    Zero,
    /// One offset per step, shared by all points.
    PerStep(Vec<[f64; 2]>),
    /// `offsets[step][point]`.
    PerPoint(Vec<Vec<[f64; 2]>>),
}

impl Offsets {
    pub fn validate(&self, n_steps: usize, n_points: usize) -> Result<(), CorrError> {
        match self {
            Self::Zero => Ok(()),
            Self::PerStep(v) if v.len() != n_steps => Err(CorrError::LengthMismatch {
                what: "per-step offsets",
                expected: n_steps,
                got: v.len(),
            }),
            Self::PerStep(_) => Ok(()),
            Self::PerPoint(v) => {
                if v.len() != n_steps {
                    return Err(CorrError::LengthMismatch {
                        what: "per-point offsets (steps)",
                        expected: n_steps,
                        got: v.len(),
                    });
                }
                match v.iter().find(|row| row.len() != n_points) {
                    Some(row) => Err(CorrError::LengthMismatch {
                        what: "per-point offsets (points)",
                        expected: n_points,
                        got: row.len(),
                    }),
                    None => Ok(()),
                }
            }
        }
    }

    /// Offset of `point` at `step`. Indices must be validated.
    pub fn get(&self, step: usize, point: usize) -> [f64; 2] {
        match self {
            Self::Zero => [0.0, 0.0],
            Self::PerStep(v) => v[step],
            Self::PerPoint(v) => v[step][point],
        }
    }

    /// Per-point offsets at `points` interpolated from a field measured at
    /// `grid.points()`, e.g. a coarser pass over the same images.
    ///
    /// Where no estimate is available (outside the grid, or a step with too
    /// few valid samples) the offset is zero.
    pub fn interpolated(
        grid: &Grid,
        field: &DisplacementField,
        points: &[[f64; 2]],
    ) -> Result<Self, CorrError> {
        if field.n_points() != grid.len() {
            return Err(CorrError::LengthMismatch {
                what: "coarse field points",
                expected: grid.len(),
                got: field.n_points(),
            });
        }
        let per_step = field
            .displacements
            .iter()
            .enumerate()
            .map(|(k, step)| match DisplacementInterpolator::from_grid(grid, step) {
                Ok(interp) => points
                    .iter()
                    .map(|&p| interp.eval(p).map(|v| if v.is_finite() { v } else { 0.0 }))
                    .collect(),
                Err(e) => {
                    tracing::warn!("step {}: no offset interpolation ({})", k, e);
                    vec![[0.0, 0.0]; points.len()]
                }
            })
            .collect();
        Ok(Self::PerPoint(per_step))
    }
}

/// How displacement vectors relate to the sampled points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Fixed points, image-to-image displacements.
    Eulerian,
    /// Material points, image-to-image displacements.
    #[default]
    Lagrangian,
    /// Fixed points, cumulative displacements from the first image.
    Reference,
}

/// Displacements of `n_points` points over `n_steps` image steps.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DisplacementField {
    pub mode: TrackingMode,
    pub start_points: Vec<[f64; 2]>,
    /// `displacements[step][point] = (dx, dy)`; NaN when missing.
    #[serde(with = "crate::nullable")]
    pub displacements: Vec<Vec<[f64; 2]>>,
    /// Registration error per step and point; NaN when missing.
    #[serde(with = "crate::nullable")]
    pub errors: Vec<Vec<f64>>,
}

impl DisplacementField {
    fn empty(mode: TrackingMode, n_steps: usize, start_points: &[[f64; 2]]) -> Self {
        Self {
            mode,
            start_points: start_points.to_vec(),
            displacements: vec![vec![NAN2; start_points.len()]; n_steps],
            errors: vec![vec![f64::NAN; start_points.len()]; n_steps],
        }
    }

    pub fn n_steps(&self) -> usize {
        self.displacements.len()
    }

    pub fn n_points(&self) -> usize {
        self.start_points.len()
    }

    /// Positions at which the displacements of `step` were measured.
    ///
    /// Lagrangian fields advance the start points by all previous steps;
    /// the other modes measure at the start points.
    pub fn sample_points(&self, step: usize) -> Vec<[f64; 2]> {
        match self.mode {
            TrackingMode::Eulerian | TrackingMode::Reference => self.start_points.clone(),
            TrackingMode::Lagrangian => self
                .start_points
                .iter()
                .enumerate()
                .map(|(i, &p)| {
                    self.displacements[..step].iter().fold(p, |acc, step| {
                        [acc[0] + step[i][0], acc[1] + step[i][1]]
                    })
                })
                .collect(),
        }
    }

    /// Number of finite displacement vectors.
    pub fn n_valid(&self) -> usize {
        self.displacements
            .iter()
            .flatten()
            .filter(|d| d[0].is_finite() && d[1].is_finite())
            .count()
    }
}

fn check_inputs<I: Borrow<GrayImage>>(
    images: &[I],
    points: &[[f64; 2]],
    offsets: &Offsets,
) -> Result<usize, CorrError> {
    if images.len() < 2 {
        return Err(CorrError::TooFewFrames {
            needed: 2,
            got: images.len(),
        });
    }
    let n_steps = images.len() - 1;
    offsets.validate(n_steps, points.len())?;
    Ok(n_steps)
}

fn log_summary(what: &str, field: &DisplacementField) {
    tracing::info!(
        "{}: {} of {} displacements measured ({} steps, {} points)",
        what,
        field.n_valid(),
        field.n_steps() * field.n_points(),
        field.n_steps(),
        field.n_points()
    );
}

/// Eulerian image-to-image displacements at fixed `points`.
pub fn displacements_img_to_img<I: Borrow<GrayImage>>(
    images: &[I],
    points: &[[f64; 2]],
    offsets: &Offsets,
    config: &CorrelationConfig,
) -> Result<DisplacementField, CorrError> {
    let n_steps = check_inputs(images, points, offsets)?;
    let mut field = DisplacementField::empty(TrackingMode::Eulerian, n_steps, points);

    for (k, pair) in images.windows(2).enumerate() {
        let a: &GrayImage = pair[0].borrow();
        let b: &GrayImage = pair[1].borrow();
        for (i, &xy) in points.iter().enumerate() {
            match get_shifts(a, b, xy, offsets.get(k, i), config) {
                Ok(r) => {
                    field.displacements[k][i] = r.displacement;
                    field.errors[k][i] = r.error;
                }
                Err(e) => tracing::debug!("images {}->{} point {}: {}", k, k + 1, i, e),
            }
        }
        tracing::debug!("images {:02}->{:02} done", k, k + 1);
    }
    log_summary("image-to-image (Eulerian)", &field);
    Ok(field)
}

/// Lagrangian image-to-image tracking of `start_points`.
pub fn track_img_to_img<I: Borrow<GrayImage>>(
    images: &[I],
    start_points: &[[f64; 2]],
    offsets: &Offsets,
    config: &CorrelationConfig,
) -> Result<DisplacementField, CorrError> {
    let n_steps = check_inputs(images, start_points, offsets)?;
    let mut field = DisplacementField::empty(TrackingMode::Lagrangian, n_steps, start_points);

    for (i, &start) in start_points.iter().enumerate() {
        let mut xy = start;
        for (k, pair) in images.windows(2).enumerate() {
            match get_shifts(pair[0].borrow(), pair[1].borrow(), xy, offsets.get(k, i), config) {
                Ok(r) => {
                    field.displacements[k][i] = r.displacement;
                    field.errors[k][i] = r.error;
                    xy = [xy[0] + r.displacement[0], xy[1] + r.displacement[1]];
                }
                Err(e) => {
                    tracing::debug!("point {} lost at images {}->{}: {}", i, k, k + 1, e);
                    break;
                }
            }
        }
        tracing::debug!("point {}/{} tracked", i + 1, start_points.len());
    }
    log_summary("image-to-image (Lagrangian)", &field);
    Ok(field)
}

/// Cumulative displacements of every frame relative to the first one.
///
/// Each step uses the previous cumulative displacement as the initial
/// guess, plus the step offset.
pub fn track_img_to_ref<I: Borrow<GrayImage>>(
    images: &[I],
    start_points: &[[f64; 2]],
    offsets: &Offsets,
    config: &CorrelationConfig,
) -> Result<DisplacementField, CorrError> {
    let n_steps = check_inputs(images, start_points, offsets)?;
    let mut field = DisplacementField::empty(TrackingMode::Reference, n_steps, start_points);
    let reference: &GrayImage = images[0].borrow();

    for (i, &start) in start_points.iter().enumerate() {
        let mut guess = [0.0, 0.0];
        for (k, image) in images[1..].iter().enumerate() {
            let o = offsets.get(k, i);
            let offset = [guess[0] + o[0], guess[1] + o[1]];
            match get_shifts(reference, image.borrow(), start, offset, config) {
                Ok(r) => {
                    field.displacements[k][i] = r.displacement;
                    field.errors[k][i] = r.error;
                    guess = r.displacement;
                }
                Err(e) => {
                    tracing::debug!("point {} lost at image {}: {}", i, k + 1, e);
                    break;
                }
            }
        }
        tracing::debug!("point {}/{} tracked", i + 1, start_points.len());
    }
    log_summary("image-to-reference", &field);
    Ok(field)
}

/// Lagrangian tracking plus its two-step consistency check.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TwoStepResult {
    pub field: DisplacementField,
    /// `|d1[k] + d1[k+1] - d2[k]|` where `d2[k]` is the direct displacement
    /// from image `k` to image `k + 2`; `n_steps - 1` rows.
    #[serde(with = "crate::nullable")]
    pub triangle_gap: Vec<Vec<f64>>,
}

/// Lagrangian tracking with a triangle-closure check over two-image steps.
///
/// The direct `k -> k + 2` displacements are obtained by tracking the even
/// and the odd sub-sequences; the odd one starts from the points advanced
/// by the first step. Two-image steps run without offsets.
pub fn track_two_steps<I: Borrow<GrayImage>>(
    images: &[I],
    start_points: &[[f64; 2]],
    offsets: &Offsets,
    config: &CorrelationConfig,
) -> Result<TwoStepResult, CorrError> {
    if images.len() < 3 {
        return Err(CorrError::TooFewFrames {
            needed: 3,
            got: images.len(),
        });
    }
    let d1 = track_img_to_img(images, start_points, offsets, config)?;

    let even: Vec<&GrayImage> = images.iter().step_by(2).map(Borrow::borrow).collect();
    let odd: Vec<&GrayImage> = images[1..].iter().step_by(2).map(Borrow::borrow).collect();

    let d2a = track_img_to_img(&even, start_points, &Offsets::Zero, config)?;
    let d2b = if odd.len() >= 2 {
        let advanced: Vec<[f64; 2]> = start_points
            .iter()
            .zip(&d1.displacements[0])
            .map(|(p, d)| [p[0] + d[0], p[1] + d[1]])
            .collect();
        track_img_to_img(&odd, &advanced, &Offsets::Zero, config)?.displacements
    } else {
        Vec::new()
    };

    let n_gaps = d1.n_steps() - 1;
    let triangle_gap = (0..n_gaps)
        .map(|k| {
            let d2 = if k % 2 == 0 {
                &d2a.displacements[k / 2]
            } else {
                &d2b[k / 2]
            };
            (0..d1.n_points())
                .map(|i| {
                    let a = d1.displacements[k][i];
                    let b = d1.displacements[k + 1][i];
                    let gx = a[0] + b[0] - d2[i][0];
                    let gy = a[1] + b[1] - d2[i][1];
                    gx.hypot(gy)
                })
                .collect()
        })
        .collect();

    Ok(TwoStepResult {
        field: d1,
        triangle_gap,
    })
}
