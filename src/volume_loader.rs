use crate::{enums::SortBy, volume::LabelVolume};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

struct SliceEntry {
    order: Option<f32>,
    position: Option<(f32, f32, f32)>,
    image: Array2<u16>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a label volume from DICOM objects
    ///
    /// Stored pixel values are taken as they are: neither a modality nor a
    /// VOI LUT is applied, so label ids survive decoding.
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found, dimensions are inconsistent
    /// or no spacing can be determined
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<LabelVolume, VolumeLoaderError> {
        let mut entries: Vec<_> = dicom_objects
            .iter()
            .filter_map(|dicom_object| Self::extract_slice(dicom_object, &sort_by))
            .collect();

        if entries.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::sort_slices(&mut entries, sort_by);
        Self::validate_dimensions(&entries)?;

        let (in_plane_x, in_plane_y, thickness) =
            Self::get_spacing(dicom_objects).ok_or(VolumeLoaderError::MissingSpacing)?;
        let slice_spacing = Self::slice_spacing_from_positions(&entries).unwrap_or(thickness);
        let origin = entries[0].position.unwrap_or_default();

        let volume_array = Self::build_volume_array(&entries);
        tracing::info!(
            slices = entries.len(),
            dim = ?volume_array.dim(),
            "loaded DICOM label volume"
        );

        Ok(
            LabelVolume::new(volume_array, (in_plane_x, in_plane_y, slice_spacing))
                .with_origin(origin),
        )
    }

    /// Load a label volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<LabelVolume, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a label volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<LabelVolume, VolumeLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::load_from_file_paths(&paths, sort_by)
    }

    fn extract_slice(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<SliceEntry> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let image = Self::decode_image(dicom_object)?;
        Some(SliceEntry {
            order,
            position: Self::get_position(dicom_object),
            image,
        })
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                Some(Self::get_position(dicom_object).map(|(_, _, z)| z))
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    fn get_position(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<(f32, f32, f32)> {
        let pos = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float32()
            .ok()?;
        match pos.as_slice() {
            [x, y, z, ..] => Some((*x, *y, *z)),
            _ => None,
        }
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<u16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn sort_slices(entries: &mut [SliceEntry], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            entries.sort_by(|a, b| {
                a.order
                    .partial_cmp(&b.order)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    fn validate_dimensions(entries: &[SliceEntry]) -> Result<(), VolumeLoaderError> {
        let first_dim = entries[0].image.dim();
        if entries.iter().any(|entry| entry.image.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(entries: &[SliceEntry]) -> Array3<u16> {
        let (height, width) = entries[0].image.dim();
        let depth = entries.len();
        let mut volume = Array3::<u16>::zeros((depth, height, width));

        for (i, entry) in entries.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&entry.image);
        }

        volume
    }

    /// Distance between the first two slice positions, if both are known
    /// and distinct.
    fn slice_spacing_from_positions(entries: &[SliceEntry]) -> Option<f32> {
        let (_, _, z0) = entries.first()?.position?;
        let (_, _, z1) = entries.get(1)?.position?;
        let spacing = (z1 - z0).abs();
        (spacing > f32::EPSILON).then_some(spacing)
    }

    /// In-plane spacing as (x, y) plus slice thickness.
    ///
    /// PixelSpacing holds the row spacing (y) first, then the column spacing (x).
    fn get_spacing(dicom_objects: &[FileDicomObject<InMemDicomObject>]) -> Option<(f32, f32, f32)> {
        dicom_objects.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float32()
                .ok()?;

            let slice_thickness = dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()?
                .to_float32()
                .ok()?;

            match pixel_spacing.as_slice() {
                [row, column, ..] => Some((*column, *row, slice_thickness)),
                _ => None,
            }
        })
    }
}
