use crate::{enums::Orientation, volume::LabelVolume};

use image::{ImageBuffer, Luma};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const METADATA_FILE: &str = "volume.json";

#[derive(Debug, Error)]
pub enum VolumeWriterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("slice {0} could not be converted to an image")]
    InvalidSlice(usize),
}

/// Geometry written next to the slices, since PNG carries no spacing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeMetadata {
    /// (depth, height, width)
    pub dim: (usize, usize, usize),
    pub origin: (f32, f32, f32),
    pub spacing: (f32, f32, f32),
    pub orientation: Orientation,
    pub labels: Vec<u16>,
}

pub struct VolumeWriter;

impl VolumeWriter {
    /// Write every slice along `orientation` as a 16-bit grayscale PNG
    /// (`slice_0000.png`, ...) plus a `volume.json` with the geometry.
    ///
    /// Pixel values are the label ids themselves.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or a file
    /// cannot be written
    pub fn write_png_slices(
        volume: &LabelVolume,
        directory: impl AsRef<Path>,
        orientation: Orientation,
    ) -> Result<Vec<PathBuf>, VolumeWriterError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;

        let paths = (0..volume.slice_count(&orientation))
            .into_par_iter()
            .map(|index| -> Result<PathBuf, VolumeWriterError> {
                let image = Self::slice_to_image(volume, index, &orientation)?;
                let path = directory.join(format!("slice_{index:04}.png"));
                image.save(&path)?;
                Ok(path)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let metadata = VolumeMetadata {
            dim: volume.dim(),
            origin: volume.origin,
            spacing: volume.spacing,
            orientation,
            labels: volume.labels(),
        };
        fs::write(
            directory.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        tracing::info!(
            slices = paths.len(),
            directory = %directory.display(),
            "wrote label slices"
        );
        Ok(paths)
    }

    fn slice_to_image(
        volume: &LabelVolume,
        index: usize,
        orientation: &Orientation,
    ) -> Result<ImageBuffer<Luma<u16>, Vec<u16>>, VolumeWriterError> {
        let slice = volume
            .get_slice_from_axis(index, orientation)
            .ok_or(VolumeWriterError::InvalidSlice(index))?;
        let (height, width) = slice.dim();
        let pixel_data: Vec<u16> = slice.iter().copied().collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
            .ok_or(VolumeWriterError::InvalidSlice(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn volume() -> LabelVolume {
        let mut data = Array3::<u16>::zeros((3, 2, 4));
        data[[1, 0, 3]] = 2;
        data[[2, 1, 1]] = 513;
        LabelVolume::new(data, (0.5, 0.5, 1.0))
    }

    #[test]
    fn writes_one_png_per_axial_slice() {
        let dir = tempfile::tempdir().expect("temp dir");
        let paths = VolumeWriter::write_png_slices(&volume(), dir.path(), Orientation::Axial)
            .expect("slices written");

        assert_eq!(paths.len(), 3);
        let slice = image::open(&paths[1]).expect("readable png").into_luma16();
        assert_eq!(slice.dimensions(), (4, 2));
        assert_eq!(slice.get_pixel(3, 0).0[0], 2);

        let slice = image::open(&paths[2]).expect("readable png").into_luma16();
        assert_eq!(slice.get_pixel(1, 1).0[0], 513);
    }

    #[test]
    fn writes_metadata_sidecar() {
        let dir = tempfile::tempdir().expect("temp dir");
        VolumeWriter::write_png_slices(&volume(), dir.path(), Orientation::Sagittal)
            .expect("slices written");

        let text = fs::read_to_string(dir.path().join(METADATA_FILE)).expect("metadata exists");
        let metadata: VolumeMetadata = serde_json::from_str(&text).expect("valid metadata");
        assert_eq!(metadata.dim, (3, 2, 4));
        assert_eq!(metadata.orientation, Orientation::Sagittal);
        assert_eq!(metadata.labels, vec![2, 513]);
        assert_eq!(fs::read_dir(dir.path()).expect("dir exists").count(), 4 + 1);
    }
}
