//! Correlation configuration.
//!
//! Every field has a default, so a JSON config only needs the values it
//! overrides:
//!
//! ```json
//! { "window_half_size": 20, "method": { "kind": "optimized", "phase": true } }
//! ```

use std::path::Path;

use crate::error::CorrError;

/// Spectrum normalization applied to the cross-power spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Divide each bin by its modulus (phase correlation).
    #[default]
    Phase,
    /// Plain cross-correlation.
    None,
}

/// Sub-pixel registration method.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistrationMethod {
    /// Integer peak followed by a matrix-multiply DFT upsampling around it.
    Upsampled {
        #[serde(default = "RegistrationMethod::default_upsample_factor")]
        upsample_factor: usize,
        #[serde(default)]
        normalization: Normalization,
    },
    /// Integer peak followed by BFGS maximization of the continuous
    /// correlation; reports peak quality (z-score, FRAE).
    Optimized {
        /// Blackman-window the patches and use phase normalization.
        #[serde(default)]
        phase: bool,
        #[serde(default = "RegistrationMethod::default_gradient_tol")]
        gradient_tol: f64,
        #[serde(default = "RegistrationMethod::default_max_iters")]
        max_iters: usize,
        /// Scale factor of the FRAE error estimate.
        #[serde(default = "RegistrationMethod::default_frae_lambda")]
        frae_lambda: f64,
    },
}

impl RegistrationMethod {
    fn default_upsample_factor() -> usize {
        20
    }

    fn default_gradient_tol() -> f64 {
        1e-3
    }

    fn default_max_iters() -> usize {
        200
    }

    fn default_frae_lambda() -> f64 {
        1.68
    }

    /// Upsampled method with the given factor and phase normalization.
    pub fn upsampled(upsample_factor: usize) -> Self {
        Self::Upsampled {
            upsample_factor,
            normalization: Normalization::Phase,
        }
    }

    /// Optimized method with default tolerances.
    pub fn optimized(phase: bool) -> Self {
        Self::Optimized {
            phase,
            gradient_tol: Self::default_gradient_tol(),
            max_iters: Self::default_max_iters(),
            frae_lambda: Self::default_frae_lambda(),
        }
    }
}

impl Default for RegistrationMethod {
    fn default() -> Self {
        Self::upsampled(Self::default_upsample_factor())
    }
}

/// Integer-accuracy registration on a larger window, run before the fine
/// registration to absorb large displacements.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CoarseSearchConfig {
    pub enable: bool,
    /// Upper bound of the coarse window half size; it is further limited
    /// by the distance of the point to the image border.
    pub max_half_size: usize,
}

impl Default for CoarseSearchConfig {
    fn default() -> Self {
        Self {
            enable: true,
            max_half_size: 70,
        }
    }
}

/// Noise-model uncertainty attached to each registration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct UncertaintyConfig {
    pub enable: bool,
}

/// Full correlation configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Half size of the square correlation window; the window side is
    /// `2 * window_half_size + 1`.
    pub window_half_size: usize,
    pub method: RegistrationMethod,
    pub coarse_search: CoarseSearchConfig,
    pub uncertainty: UncertaintyConfig,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_half_size: 15,
            method: RegistrationMethod::default(),
            coarse_search: CoarseSearchConfig::default(),
            uncertainty: UncertaintyConfig::default(),
        }
    }
}

impl CorrelationConfig {
    /// Load and validate a config from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, CorrError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Parse and validate a config from a JSON string.
    pub fn from_json_str(data: &str) -> Result<Self, CorrError> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CorrError> {
        if self.window_half_size == 0 {
            return Err(CorrError::InvalidConfig(
                "window_half_size must be at least 1".into(),
            ));
        }
        match self.method {
            RegistrationMethod::Upsampled {
                upsample_factor, ..
            } => {
                if upsample_factor == 0 {
                    return Err(CorrError::InvalidConfig(
                        "upsample_factor must be at least 1".into(),
                    ));
                }
            }
            RegistrationMethod::Optimized {
                gradient_tol,
                max_iters,
                frae_lambda,
                ..
            } => {
                if !(gradient_tol.is_finite() && gradient_tol > 0.0) {
                    return Err(CorrError::InvalidConfig(format!(
                        "gradient_tol must be positive, got {}",
                        gradient_tol
                    )));
                }
                if max_iters == 0 {
                    return Err(CorrError::InvalidConfig(
                        "max_iters must be at least 1".into(),
                    ));
                }
                if !(frae_lambda.is_finite() && frae_lambda > 0.0) {
                    return Err(CorrError::InvalidConfig(format!(
                        "frae_lambda must be positive, got {}",
                        frae_lambda
                    )));
                }
            }
        }
        Ok(())
    }
}
