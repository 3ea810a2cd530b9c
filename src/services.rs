//! Collaborator seams of the resample pipeline.
//!
//! Every call is synchronous and returns a freshly allocated volume; the
//! caller owns the result. The crate's default implementations live in
//! [`crate::interpolator`], [`crate::smoothing`] and [`crate::combine`].

use crate::volume::LabelVolume;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid spacing {0:?}: every component must be finite and positive")]
    InvalidSpacing((f32, f32, f32)),

    #[error("volume has an empty extent {0:?}")]
    EmptyVolume((usize, usize, usize)),

    #[error("geometry mismatch: {a:?} vs {b:?}")]
    GeometryMismatch {
        a: (usize, usize, usize),
        b: (usize, usize, usize),
    },

    #[error("invalid parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("label 0 is background and cannot be smoothed")]
    BackgroundLabel,
}

/// Parameters of the per-label smoothing pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingParams {
    pub max_iterations: usize,
    /// Anti-aliasing stops once the RMS change of an iteration drops below this.
    pub max_rms_error: f32,
    /// Gaussian kernel width in physical units.
    pub sigma: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_rms_error: 0.01,
            sigma: 1.0,
        }
    }
}

/// Resamples a label volume onto a grid with a new spacing.
///
/// Implementations must not introduce label values that are absent from
/// the input.
pub trait ResampleService {
    fn resample(
        &self,
        volume: &LabelVolume,
        target_spacing: (f32, f32, f32),
    ) -> Result<LabelVolume, ServiceError>;
}

/// Smooths the shape of a single label.
///
/// The result has the input's geometry and holds 1 where the smoothed
/// shape of `label` is present and 0 elsewhere.
pub trait LabelSmoothingService {
    fn smooth(
        &self,
        volume: &LabelVolume,
        label: u16,
        params: &SmoothingParams,
    ) -> Result<LabelVolume, ServiceError>;
}

/// Voxel-wise union of two label volumes of identical geometry.
///
/// Background never overwrites a label. Which operand wins where both are
/// foreground is up to the implementation and must be documented there.
pub trait LabelCombineService {
    fn combine(&self, a: &LabelVolume, b: &LabelVolume) -> Result<LabelVolume, ServiceError>;
}

pub(crate) fn validate_spacing(spacing: (f32, f32, f32)) -> Result<(), ServiceError> {
    let (x, y, z) = spacing;
    if [x, y, z].iter().all(|s| s.is_finite() && *s > 0.0) {
        Ok(())
    } else {
        Err(ServiceError::InvalidSpacing(spacing))
    }
}

pub(crate) fn validate_extent(dim: (usize, usize, usize)) -> Result<(), ServiceError> {
    if dim.0 == 0 || dim.1 == 0 || dim.2 == 0 {
        return Err(ServiceError::EmptyVolume(dim));
    }
    Ok(())
}
