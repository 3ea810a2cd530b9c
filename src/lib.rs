//! # label-resample library
//!
//! This crate upsamples label maps (segmentations) to a finer slice spacing
//! and smooths the staircase boundaries that nearest-neighbor upsampling
//! leaves behind, without mixing label ids.
//!
//! A run goes through these steps:
//!  - Resample the input with nearest-neighbor interpolation, dividing only
//!    the slice spacing by `slice_divide`
//!  - Discover the distinct non-zero labels of the resampled volume
//!  - Smooth every label in isolation (anti-aliasing and Gaussian
//!    smoothing of a binary mask)
//!  - Fold the smoothed labels into one label volume, in ascending label
//!    order, the later label winning where two shapes overlap
//!
//! Volumes live in a [`VolumeStore`] and are addressed by [`VolumeId`]. The
//! pipeline creates exactly one high-resolution working copy per run and one
//! temporary per label, and removes all of them again before returning,
//! also when a step fails.
//!
//! The resampling, smoothing and combine steps are traits
//! ([`ResampleService`], [`LabelSmoothingService`], [`LabelCombineService`])
//! so that other implementations can be plugged into [`ResamplePipeline`].
//!
//! # Examples
//!
//! ## Resampling a DICOM label series
//!
//! ```no_run
//! # use label_resample::{
//! #     DefaultPipeline, Orientation, PipelineConfig, SortBy, VolumeLoader, VolumeStore,
//! #     VolumeWriter,
//! # };
//! let input = VolumeLoader::load_from_directory("labels", SortBy::ImagePositionPatient)
//!     .expect("should have loaded files from directory");
//!
//! let mut store = VolumeStore::new();
//! let input = store.create(input);
//! let output = store.create(Default::default());
//!
//! let config = PipelineConfig {
//!     slice_divide: 2.0,
//!     ..PipelineConfig::default()
//! };
//! DefaultPipeline::from_config(&config)
//!     .run(&mut store, Some(input), Some(output), &config)
//!     .expect("should have resampled the label map");
//!
//! let result = store.get(output).expect("output stays in the store");
//! VolumeWriter::write_png_slices(result, "resampled", Orientation::Axial)
//!     .expect("should have written slices");
//! ```

pub mod combine;
pub mod config;
pub mod enums;
mod interpolator;
pub mod pipeline;
pub mod services;
pub mod smoothing;
pub mod volume;
pub mod volume_loader;
pub mod volume_store;
pub mod volume_writer;

pub use combine::LabelUnion;
pub use config::{ConfigError, PipelineConfig};
pub use enums::{CombinePolicy, Orientation, SortBy};
pub use interpolator::NearestNeighborResampler;
pub use pipeline::{
    CancellationToken, DefaultPipeline, LabelSummary, PipelineError, ResamplePipeline, RunSummary,
    validate,
};
pub use services::{
    LabelCombineService, LabelSmoothingService, ResampleService, ServiceError, SmoothingParams,
};
pub use smoothing::AntiAliasSmoother;
pub use volume::LabelVolume;
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
pub use volume_store::{StoreError, VolumeId, VolumeStore};
pub use volume_writer::{VolumeMetadata, VolumeWriter, VolumeWriterError};
