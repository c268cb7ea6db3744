//! Crate-wide error type.

/// Errors produced by registration, tracking and fitting.
#[derive(Debug)]
pub enum CorrError {
    /// The square correlation window does not fit inside the image.
    CropOutOfBounds {
        center: [f64; 2],
        half_size: usize,
        image_size: [u32; 2],
    },
    /// Two patches or matrices that must share a shape do not.
    ShapeMismatch {
        expected: [usize; 2],
        got: [usize; 2],
    },
    /// A per-step or per-point input has the wrong length.
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    TooFewPoints {
        needed: usize,
        got: usize,
    },
    TooFewFrames {
        needed: usize,
        got: usize,
    },
    /// No grid point fits inside the image once the margin is removed.
    EmptyGrid {
        image_size: [u32; 2],
        margin: usize,
    },
    /// The correlation surface has zero variance; no peak can be scored.
    FlatCorrelation,
    NumericalFailure(String),
    InvalidConfig(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for CorrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CropOutOfBounds {
                center,
                half_size,
                image_size,
            } => write!(
                f,
                "crop out of image bounds: center ({:.2}, {:.2}), half size {}, image {}x{}",
                center[0], center[1], half_size, image_size[0], image_size[1]
            ),
            Self::ShapeMismatch { expected, got } => write!(
                f,
                "shape mismatch: expected {}x{}, got {}x{}",
                expected[0], expected[1], got[0], got[1]
            ),
            Self::LengthMismatch {
                what,
                expected,
                got,
            } => write!(f, "{}: expected length {}, got {}", what, expected, got),
            Self::TooFewPoints { needed, got } => {
                write!(f, "too few points: need {}, got {}", needed, got)
            }
            Self::TooFewFrames { needed, got } => {
                write!(f, "too few images: need {}, got {}", needed, got)
            }
            Self::EmptyGrid { image_size, margin } => write!(
                f,
                "empty grid: margin {} leaves no room in a {}x{} image",
                margin, image_size[0], image_size[1]
            ),
            Self::FlatCorrelation => write!(f, "correlation surface is flat"),
            Self::NumericalFailure(msg) => write!(f, "numerical failure: {}", msg),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Self::Io(e) => write!(f, "io error: {}", e),
            Self::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for CorrError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CorrError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for CorrError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_error_mentions_center_and_size() {
        let e = CorrError::CropOutOfBounds {
            center: [3.0, 4.5],
            half_size: 10,
            image_size: [64, 48],
        };
        let msg = e.to_string();
        assert!(msg.contains("3.00, 4.50"), "{msg}");
        assert!(msg.contains("64x48"), "{msg}");
    }

    #[test]
    fn io_error_is_exposed_as_source() {
        use std::error::Error;
        let e: CorrError = std::io::Error::new(std::io::ErrorKind::NotFound, "nope").into();
        assert!(e.source().is_some());
    }
}
