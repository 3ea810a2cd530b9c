use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use label_resample::{
    CombinePolicy, DefaultPipeline, Orientation, PipelineConfig, SortBy, VolumeLoader,
    VolumeStore, VolumeWriter,
};

#[derive(Parser, Debug)]
#[command(name = "label-resample")]
#[command(
    about = "Resample a label map to a finer slice spacing and smooth each label",
    long_about = None
)]
struct Cli {
    /// Directory with the input label map as a DICOM series
    input: PathBuf,

    /// Directory the resampled label slices are written to
    output: PathBuf,

    /// JSON file with pipeline parameters; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Gaussian smoothing sigma in physical units (0.0-5.0)
    #[arg(long)]
    sigma: Option<f32>,

    /// Number of slices each input slice is divided into (1-50)
    #[arg(long)]
    slice_divide: Option<u32>,

    /// Maximum anti-aliasing iterations per label
    #[arg(long)]
    max_iterations: Option<usize>,

    /// RMS change at which anti-aliasing stops
    #[arg(long)]
    max_rms_error: Option<f32>,

    /// Slice ordering of the input series
    #[arg(long, value_enum, default_value_t = SortBy::ImagePositionPatient)]
    sort_by: SortBy,

    /// Axis along which output slices are written
    #[arg(long, value_enum, default_value_t = Orientation::Axial)]
    orientation: Orientation,

    /// Let labels processed earlier win where smoothed labels overlap
    #[arg(long)]
    keep_earlier_labels: bool,
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(sigma) = self.sigma {
            config.sigma = sigma;
        }
        if let Some(slice_divide) = self.slice_divide {
            config.slice_divide = slice_divide as f32;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(max_rms_error) = self.max_rms_error {
            config.max_rms_error = max_rms_error;
        }
        if self.keep_earlier_labels {
            config.combine_policy = CombinePolicy::SecondOverwrites;
        }

        config.validate_user_ranges()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = cli.pipeline_config()?;

    let input = VolumeLoader::load_from_directory(&cli.input, cli.sort_by)
        .with_context(|| format!("loading label map from {}", cli.input.display()))?;

    let mut store = VolumeStore::new();
    let input = store.create(input);
    let output = store.create(Default::default());

    let summary = DefaultPipeline::from_config(&config)
        .run(&mut store, Some(input), Some(output), &config)
        .context("resampling label map")?;

    for label in &summary.labels {
        tracing::info!(
            label = label.label,
            before = label.voxels_before,
            after = label.voxels_after,
            "label voxels"
        );
    }

    VolumeWriter::write_png_slices(store.get(output)?, &cli.output, cli.orientation)
        .with_context(|| format!("writing slices to {}", cli.output.display()))?;

    Ok(())
}
