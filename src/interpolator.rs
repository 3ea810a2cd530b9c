use crate::services::{ResampleService, ServiceError, validate_extent, validate_spacing};
use crate::volume::LabelVolume;

use ndarray::{Array3, Axis};
use rayon::prelude::*;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Output extent for each axis when moving from `spacing` to `target_spacing`.
    ///
    /// `original_dim` is (depth, height, width), spacings are (x, y, z).
    pub(crate) fn get_resampled_dimensions(
        spacing: (f32, f32, f32),
        target_spacing: (f32, f32, f32),
        original_dim: (usize, usize, usize),
    ) -> (usize, usize, usize) {
        let extent = |n: usize, old: f32, new: f32| {
            ((n as f64 * f64::from(old) / f64::from(new)).round() as usize).max(1)
        };

        (
            extent(original_dim.0, spacing.2, target_spacing.2),
            extent(original_dim.1, spacing.1, target_spacing.1),
            extent(original_dim.2, spacing.0, target_spacing.0),
        )
    }

    /// Source index for every output index along one axis.
    ///
    /// Voxel centres share the same origin on both grids, so output index
    /// `k` sits at continuous source index `k * new / old`. Halves round up.
    pub(crate) fn nearest_indices(
        output_len: usize,
        input_len: usize,
        old: f32,
        new: f32,
    ) -> Vec<usize> {
        let ratio = f64::from(new) / f64::from(old);
        let last = input_len.saturating_sub(1);
        (0..output_len)
            .map(|k| ((k as f64 * ratio).round() as usize).min(last))
            .collect()
    }
}

/// Label-preserving nearest-neighbor resampling.
///
/// The origin is kept. Every output voxel copies exactly one input voxel,
/// so no label value can appear that the input does not already hold.
#[derive(Clone, Copy, Debug, Default)]
pub struct NearestNeighborResampler;

impl ResampleService for NearestNeighborResampler {
    fn resample(
        &self,
        volume: &LabelVolume,
        target_spacing: (f32, f32, f32),
    ) -> Result<LabelVolume, ServiceError> {
        validate_spacing(volume.spacing)?;
        validate_spacing(target_spacing)?;
        validate_extent(volume.dim())?;

        let (depth, height, width) = volume.dim();
        let output_dim =
            Interpolator::get_resampled_dimensions(volume.spacing, target_spacing, volume.dim());
        let z_map = Interpolator::nearest_indices(
            output_dim.0,
            depth,
            volume.spacing.2,
            target_spacing.2,
        );
        let y_map = Interpolator::nearest_indices(
            output_dim.1,
            height,
            volume.spacing.1,
            target_spacing.1,
        );
        let x_map = Interpolator::nearest_indices(
            output_dim.2,
            width,
            volume.spacing.0,
            target_spacing.0,
        );

        tracing::debug!(
            from = ?volume.dim(),
            to = ?output_dim,
            ?target_spacing,
            "nearest-neighbor resample"
        );

        let source = volume.data();
        let mut data = Array3::<u16>::zeros(output_dim);
        data.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(z, mut plane)| {
                let src_z = z_map[z];
                for (y, &src_y) in y_map.iter().enumerate() {
                    for (x, &src_x) in x_map.iter().enumerate() {
                        plane[[y, x]] = source[[src_z, src_y, src_x]];
                    }
                }
            });

        Ok(LabelVolume {
            data,
            origin: volume.origin,
            spacing: target_spacing,
        })
    }
}
