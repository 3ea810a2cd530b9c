//! Run parameters of the resample pipeline.

use crate::enums::CombinePolicy;
use crate::services::SmoothingParams;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const SIGMA_RANGE: (f32, f32) = (0.0, 5.0);
pub const SLICE_DIVIDE_RANGE: (u32, u32) = (1, 50);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{parameter} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        parameter: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{parameter} = {value} must be finite and positive")]
    NotPositive { parameter: &'static str, value: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parameters of one pipeline run.
///
/// Defaults match the interactive form: sigma 1.0, no
/// slice subdivision, 50 anti-aliasing iterations, RMS tolerance 0.01.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Factor the through-plane spacing is divided by. May be fractional.
    pub slice_divide: f32,
    pub sigma: f32,
    pub max_iterations: usize,
    pub max_rms_error: f32,
    pub combine_policy: CombinePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let smoothing = SmoothingParams::default();
        Self {
            slice_divide: 1.0,
            sigma: smoothing.sigma,
            max_iterations: smoothing.max_iterations,
            max_rms_error: smoothing.max_rms_error,
            combine_policy: CombinePolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn smoothing_params(&self) -> SmoothingParams {
        SmoothingParams {
            max_iterations: self.max_iterations,
            max_rms_error: self.max_rms_error,
            sigma: self.sigma,
        }
    }

    /// Target spacing for an input with `spacing`: only the slice axis shrinks.
    pub fn target_spacing(&self, spacing: (f32, f32, f32)) -> (f32, f32, f32) {
        (spacing.0, spacing.1, spacing.2 / self.slice_divide)
    }

    /// Checks the values the pipeline itself depends on.
    ///
    /// # Errors
    ///
    /// Returns an error if `slice_divide` is not positive, or `sigma` or
    /// `max_rms_error` is negative or not finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.slice_divide.is_finite() || self.slice_divide <= 0.0 {
            return Err(ConfigError::NotPositive {
                parameter: "slice_divide",
                value: f64::from(self.slice_divide),
            });
        }
        for (parameter, value) in [("sigma", self.sigma), ("max_rms_error", self.max_rms_error)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::OutOfRange {
                    parameter,
                    value: f64::from(value),
                    min: 0.0,
                    max: f64::INFINITY,
                });
            }
        }
        Ok(())
    }

    /// Checks the ranges offered to interactive users on top of [`Self::validate`]:
    /// sigma in 0.0–5.0 and an integral slice divide in 1–50.
    ///
    /// # Errors
    ///
    /// Returns the first parameter found outside its range.
    pub fn validate_user_ranges(&self) -> Result<(), ConfigError> {
        self.validate()?;

        let (min, max) = SIGMA_RANGE;
        if !(min..=max).contains(&self.sigma) {
            return Err(ConfigError::OutOfRange {
                parameter: "sigma",
                value: f64::from(self.sigma),
                min: f64::from(min),
                max: f64::from(max),
            });
        }

        let (min, max) = SLICE_DIVIDE_RANGE;
        let integral = self.slice_divide.fract() == 0.0;
        if !integral || !(min as f32..=max as f32).contains(&self.slice_divide) {
            return Err(ConfigError::OutOfRange {
                parameter: "slice_divide",
                value: f64::from(self.slice_divide),
                min: f64::from(min),
                max: f64::from(max),
            });
        }
        Ok(())
    }
}
