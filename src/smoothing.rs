//! Per-label shape smoothing.
//!
//! One label is isolated into a signed field (+1 inside, -1 outside). The
//! band of voxels along the label boundary is anti-aliased by constrained
//! neighbour averaging, the whole field is blurred with a Gaussian and then
//! thresholded back to a binary mask.

use crate::services::{
    LabelSmoothingService, ServiceError, SmoothingParams, validate_extent, validate_spacing,
};
use crate::volume::LabelVolume;

use ndarray::{Array3, Zip};

const MAX_KERNEL_WIDTH: usize = 33;

/// Anti-aliasing followed by Gaussian smoothing of a single label.
#[derive(Clone, Copy, Debug, Default)]
pub struct AntiAliasSmoother;

impl LabelSmoothingService for AntiAliasSmoother {
    fn smooth(
        &self,
        volume: &LabelVolume,
        label: u16,
        params: &SmoothingParams,
    ) -> Result<LabelVolume, ServiceError> {
        if label == 0 {
            return Err(ServiceError::BackgroundLabel);
        }
        Self::validate_params(params)?;
        validate_spacing(volume.spacing)?;
        validate_extent(volume.dim())?;

        let inside = volume.data().mapv(|v| v == label);
        let mut phi = inside.mapv(|is_inside| if is_inside { 1.0_f32 } else { -1.0 });

        let iterations = Self::anti_alias(&mut phi, &inside, params);
        tracing::debug!(label, iterations, "anti-aliasing finished");

        let (sx, sy, sz) = volume.spacing;
        // Array axes are (z, y, x).
        for (axis, spacing) in [(0, sz), (1, sy), (2, sx)] {
            if let Some(kernel) = gaussian_kernel(params.sigma, spacing) {
                phi = convolve_axis(&phi, &kernel, axis);
            }
        }

        let mut result = volume.zeros_like();
        Zip::from(result.data_mut())
            .and(&phi)
            .par_for_each(|out, &value| *out = u16::from(value > 0.0));
        Ok(result)
    }
}

impl AntiAliasSmoother {
    fn validate_params(params: &SmoothingParams) -> Result<(), ServiceError> {
        if !params.sigma.is_finite() || params.sigma < 0.0 {
            return Err(ServiceError::InvalidParameter {
                name: "sigma",
                value: f64::from(params.sigma),
            });
        }
        if !params.max_rms_error.is_finite() || params.max_rms_error < 0.0 {
            return Err(ServiceError::InvalidParameter {
                name: "max_rms_error",
                value: f64::from(params.max_rms_error),
            });
        }
        Ok(())
    }

    /// Relaxes the boundary band of `phi` towards the mean of its face
    /// neighbours while keeping inside voxels non-negative and outside voxels
    /// non-positive. Voxels off the band stay at +1/-1. Returns the number of
    /// iterations performed.
    fn anti_alias(phi: &mut Array3<f32>, inside: &Array3<bool>, params: &SmoothingParams) -> usize {
        let band = boundary_band(inside);
        let band_size = band.iter().filter(|&&b| b).count();
        if band_size == 0 {
            return 0;
        }

        for iteration in 0..params.max_iterations {
            let mut next = phi.clone();
            let current = &*phi;
            Zip::indexed(&mut next)
                .and(inside)
                .and(&band)
                .par_for_each(|(z, y, x), out, &is_inside, &on_band| {
                    if on_band {
                        let mean = neighbour_mean(current, z, y, x);
                        *out = if is_inside { mean.max(0.0) } else { mean.min(0.0) };
                    }
                });

            let squared_change: f32 = Zip::from(&next)
                .and(&*phi)
                .fold(0.0, |acc, &a, &b| acc + (a - b) * (a - b));
            let rms = (squared_change / band_size as f32).sqrt();
            *phi = next;

            if rms < params.max_rms_error {
                return iteration + 1;
            }
        }
        params.max_iterations
    }
}

/// Voxels with at least one face neighbour on the other side of the label
/// boundary.
fn boundary_band(inside: &Array3<bool>) -> Array3<bool> {
    let (depth, height, width) = inside.dim();
    let mut band = Array3::from_elem(inside.dim(), false);
    Zip::indexed(&mut band).par_for_each(|(z, y, x), on_band| {
        let centre = inside[[z, y, x]];
        let neighbours = [
            [z.saturating_sub(1), y, x],
            [(z + 1).min(depth - 1), y, x],
            [z, y.saturating_sub(1), x],
            [z, (y + 1).min(height - 1), x],
            [z, y, x.saturating_sub(1)],
            [z, y, (x + 1).min(width - 1)],
        ];
        *on_band = neighbours.iter().any(|&index| inside[index] != centre);
    });
    band
}

/// Mean of a voxel and its six face neighbours, replicating edge values.
#[inline]
fn neighbour_mean(field: &Array3<f32>, z: usize, y: usize, x: usize) -> f32 {
    let (depth, height, width) = field.dim();
    let z0 = z.saturating_sub(1);
    let z1 = (z + 1).min(depth - 1);
    let y0 = y.saturating_sub(1);
    let y1 = (y + 1).min(height - 1);
    let x0 = x.saturating_sub(1);
    let x1 = (x + 1).min(width - 1);

    let sum = field[[z, y, x]]
        + field[[z0, y, x]]
        + field[[z1, y, x]]
        + field[[z, y0, x]]
        + field[[z, y1, x]]
        + field[[z, y, x0]]
        + field[[z, y, x1]];
    sum / 7.0
}

/// Normalized 1D Gaussian for a physical `sigma` on an axis with `spacing`.
/// `None` when the kernel would be the identity.
fn gaussian_kernel(sigma: f32, spacing: f32) -> Option<Vec<f32>> {
    if sigma <= 1e-6 {
        return None;
    }
    let voxel_sigma = f64::from(sigma) / f64::from(spacing);
    let radius = (3.0 * voxel_sigma).ceil() as usize;
    let width = (2 * radius + 1).min(MAX_KERNEL_WIDTH);
    let radius = (width - 1) / 2;
    if radius == 0 {
        return None;
    }

    let two_sigma2 = 2.0 * voxel_sigma * voxel_sigma;
    let weights: Vec<f64> = (0..width)
        .map(|i| {
            let offset = i as f64 - radius as f64;
            (-offset * offset / two_sigma2).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    Some(weights.iter().map(|w| (w / sum) as f32).collect())
}

fn convolve_axis(field: &Array3<f32>, kernel: &[f32], axis: usize) -> Array3<f32> {
    let dim = field.dim();
    let len = [dim.0, dim.1, dim.2][axis];
    let radius = (kernel.len() - 1) / 2;
    let mut out = Array3::<f32>::zeros(dim);

    Zip::indexed(&mut out).par_for_each(|(z, y, x), value| {
        let mut index = [z, y, x];
        let centre = index[axis];
        *value = kernel
            .iter()
            .enumerate()
            .map(|(k, weight)| {
                let offset = (centre + k).saturating_sub(radius).min(len - 1);
                index[axis] = offset;
                weight * field[index]
            })
            .sum();
    });
    out
}
