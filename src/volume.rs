use crate::enums::Orientation;

use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::Zip;
use ndarray::s;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// A dense 3D label raster.
///
/// Voxels are stored as `(depth, height, width)`, i.e. `(z, y, x)`, while
/// `origin` and `spacing` are given as `(x, y, z)`. The `z` spacing is the
/// through-plane (slice) spacing. Value 0 is background.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelVolume {
    pub data: Array3<u16>,
    pub origin: (f32, f32, f32),
    pub spacing: (f32, f32, f32),
}

impl LabelVolume {
    pub fn new(data: Array3<u16>, spacing: (f32, f32, f32)) -> Self {
        Self {
            data,
            origin: (0.0, 0.0, 0.0),
            spacing,
        }
    }

    pub fn with_origin(mut self, origin: (f32, f32, f32)) -> Self {
        self.origin = origin;
        self
    }

    /// An all-background volume with the same geometry as `self`.
    pub fn zeros_like(&self) -> Self {
        Self {
            data: Array3::zeros(self.data.dim()),
            origin: self.origin,
            spacing: self.spacing,
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array3<u16> {
        &mut self.data
    }

    pub fn same_geometry(&self, other: &LabelVolume) -> bool {
        self.dim() == other.dim() && self.origin == other.origin && self.spacing == other.spacing
    }

    /// Voxel count of every non-zero label, keyed in ascending label order.
    pub fn label_counts(&self) -> BTreeMap<u16, usize> {
        let planes: Vec<BTreeMap<u16, usize>> = self
            .data
            .outer_iter()
            .into_par_iter()
            .map(|plane| {
                let mut counts = BTreeMap::new();
                for &value in plane.iter().filter(|&&v| v != 0) {
                    *counts.entry(value).or_insert(0) += 1;
                }
                counts
            })
            .collect();

        planes.into_iter().fold(BTreeMap::new(), |mut acc, counts| {
            for (label, count) in counts {
                *acc.entry(label).or_insert(0) += count;
            }
            acc
        })
    }

    /// Distinct non-zero labels, ascending.
    pub fn labels(&self) -> Vec<u16> {
        self.label_counts().into_keys().collect()
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// Rewrite every foreground voxel to `label`.
    pub fn rescale_to_label(&mut self, label: u16) {
        Zip::from(&mut self.data).par_for_each(|v| {
            if *v != 0 {
                *v = label;
            }
        });
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, u16>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice_result = match orientation {
            Orientation::Axial => self.data().slice(s![index, .., ..]),
            Orientation::Coronal => self.data().slice(s![.., index, ..]),
            Orientation::Sagittal => self.data().slice(s![.., .., index]),
        };
        Some(slice_result)
    }

    pub fn slice_count(&self, orientation: &Orientation) -> usize {
        let dim = self.data.dim();
        match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        }
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        index < self.slice_count(orientation)
    }
}
