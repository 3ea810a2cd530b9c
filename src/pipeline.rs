//! The label resample pipeline.
//!
//! A run resamples the input onto the finer slice grid, discovers the
//! labels present, smooths every label in isolation and folds the smoothed
//! shapes into a single label volume that finally replaces the contents of
//! the output volume.
//!
//! Volumes the pipeline creates in the [`VolumeStore`] are the
//! high-resolution working copy (one per run) and one temporary per label.
//! A temporary is removed before the next label starts and the working copy
//! is removed when the run ends, whether it succeeded or not.
//!
//! Labels are processed in ascending order. With the default
//! [`CombinePolicy::FirstOverwrites`] the label processed later wins where
//! two smoothed shapes overlap.

use crate::combine::LabelUnion;
use crate::config::{ConfigError, PipelineConfig};
use crate::enums::CombinePolicy;
use crate::interpolator::NearestNeighborResampler;
use crate::services::{
    LabelCombineService, LabelSmoothingService, ResampleService, ServiceError, SmoothingParams,
};
use crate::smoothing::AntiAliasSmoother;
use crate::volume::LabelVolume;
use crate::volume_store::{StoreError, VolumeId, VolumeStore};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use web_time::Instant;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("resampling failed: {0}")]
    ResampleFailure(#[source] ServiceError),

    #[error("smoothing label {label} failed: {source}")]
    SmoothingFailure { label: u16, source: ServiceError },

    #[error("combining label {label} failed: {source}")]
    CombineFailure { label: u16, source: ServiceError },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run cancelled before label {label}")]
    Cancelled { label: u16 },
}

/// Cooperative cancellation flag, checked before each label is processed.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabelSummary {
    pub label: u16,
    /// Voxels of the label in the high-resolution working copy.
    pub voxels_before: usize,
    /// Voxels of the label's smoothed shape, before overlap resolution.
    pub voxels_after: usize,
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub target_spacing: (f32, f32, f32),
    /// Dimensions of the output (depth, height, width)
    pub output_dim: (usize, usize, usize),
    /// One entry per processed label, ascending.
    pub labels: Vec<LabelSummary>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn label_ids(&self) -> Vec<u16> {
        self.labels.iter().map(|summary| summary.label).collect()
    }
}

/// Checks that both volumes are given and that they are distinct.
///
/// Pure apart from a debug log naming the failed condition. Does not look
/// into any store.
pub fn validate(input: Option<VolumeId>, output: Option<VolumeId>) -> bool {
    match check_handles(input, output) {
        Ok(_) => true,
        Err(reason) => {
            debug!("validation failed: {reason}");
            false
        }
    }
}

fn check_handles(
    input: Option<VolumeId>,
    output: Option<VolumeId>,
) -> Result<(VolumeId, VolumeId), &'static str> {
    let input = input.ok_or("no input volume defined")?;
    let output = output.ok_or("no output volume defined")?;
    if input == output {
        return Err(
            "input and output are the same volume, create a new volume for the output",
        );
    }
    Ok((input, output))
}

/// Pipeline wired with the crate's own collaborators.
pub type DefaultPipeline =
    ResamplePipeline<NearestNeighborResampler, AntiAliasSmoother, LabelUnion>;

pub struct ResamplePipeline<R, S, C> {
    resampler: R,
    smoother: S,
    combiner: C,
    cancellation: Option<CancellationToken>,
}

impl DefaultPipeline {
    pub fn new(policy: CombinePolicy) -> Self {
        Self::with_services(
            NearestNeighborResampler,
            AntiAliasSmoother,
            LabelUnion::new(policy),
        )
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.combine_policy)
    }
}

impl<R, S, C> ResamplePipeline<R, S, C>
where
    R: ResampleService,
    S: LabelSmoothingService,
    C: LabelCombineService,
{
    pub fn with_services(resampler: R, smoother: S, combiner: C) -> Self {
        Self {
            resampler,
            smoother,
            combiner,
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Runs the pipeline, replacing the contents of `output`.
    ///
    /// The output keeps its [`VolumeId`]; whatever it held before is
    /// discarded, not merged. On error the output is left untouched and
    /// every volume the run created has been removed again.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidInput`] if a handle is missing, both
    ///   handles are the same, or a handle is not in `store`.
    /// - [`PipelineError::InvalidConfig`] for unusable parameters.
    /// - [`PipelineError::ResampleFailure`], [`PipelineError::SmoothingFailure`]
    ///   and [`PipelineError::CombineFailure`] when a collaborator fails.
    /// - [`PipelineError::Cancelled`] when the cancellation token fired.
    pub fn run(
        &self,
        store: &mut VolumeStore,
        input: Option<VolumeId>,
        output: Option<VolumeId>,
        config: &PipelineConfig,
    ) -> Result<RunSummary, PipelineError> {
        let (input, output) = check_handles(input, output).map_err(|reason| {
            error!("{reason}");
            PipelineError::InvalidInput(reason.to_string())
        })?;
        if !store.contains(input) {
            return Err(PipelineError::InvalidInput(
                "input volume has no image data".to_string(),
            ));
        }
        if !store.contains(output) {
            return Err(PipelineError::InvalidInput(
                "output volume is not in the store".to_string(),
            ));
        }
        config.validate()?;

        let start = Instant::now();
        info!("Processing started");

        let source = store.get(input)?;
        let target_spacing = config.target_spacing(source.spacing);
        let high_res = self
            .resampler
            .resample(source, target_spacing)
            .map_err(PipelineError::ResampleFailure)?;
        let output_dim = high_res.dim();
        info!(?target_spacing, dim = ?output_dim, "resampled input");

        let high_res_id = store.create(high_res);
        let processed = self.process_labels(store, high_res_id, &config.smoothing_params());
        let removed = store.remove(high_res_id);
        let (accumulated, labels) = processed?;
        removed?;

        store.replace(output, accumulated)?;

        let elapsed = start.elapsed();
        info!(labels = labels.len(), ?elapsed, "Processing completed");
        Ok(RunSummary {
            target_spacing,
            output_dim,
            labels,
            elapsed,
        })
    }

    fn process_labels(
        &self,
        store: &mut VolumeStore,
        high_res_id: VolumeId,
        params: &SmoothingParams,
    ) -> Result<(LabelVolume, Vec<LabelSummary>), PipelineError> {
        let high_res = store.get(high_res_id)?;
        let label_counts = high_res.label_counts();
        let mut accumulated = high_res.zeros_like();

        if label_counts.is_empty() {
            info!("no foreground labels, output is all background");
            return Ok((accumulated, Vec::new()));
        }
        debug!(labels = ?label_counts.keys().collect::<Vec<_>>(), "discovered labels");

        let mut summaries = Vec::with_capacity(label_counts.len());
        for (label, voxels_before) in label_counts {
            if self
                .cancellation
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                warn!(label, "run cancelled");
                return Err(PipelineError::Cancelled { label });
            }

            info!(label, "Processing label");
            let voxels_after =
                self.process_label(store, high_res_id, label, params, &mut accumulated)?;
            summaries.push(LabelSummary {
                label,
                voxels_before,
                voxels_after,
            });
        }

        Ok((accumulated, summaries))
    }

    /// Smooths one label into a temporary volume and folds it into
    /// `accumulated`. The temporary is removed before returning.
    fn process_label(
        &self,
        store: &mut VolumeStore,
        high_res_id: VolumeId,
        label: u16,
        params: &SmoothingParams,
        accumulated: &mut LabelVolume,
    ) -> Result<usize, PipelineError> {
        let smoothed = self
            .smoother
            .smooth(store.get(high_res_id)?, label, params)
            .map_err(|source| PipelineError::SmoothingFailure { label, source })?;

        let temporary = store.create(smoothed);
        let committed = self.commit(store, temporary, label, accumulated);
        let removed = store.remove(temporary);
        let voxels = committed?;
        removed?;
        Ok(voxels)
    }

    fn commit(
        &self,
        store: &mut VolumeStore,
        temporary: VolumeId,
        label: u16,
        accumulated: &mut LabelVolume,
    ) -> Result<usize, PipelineError> {
        store.get_mut(temporary)?.rescale_to_label(label);
        let contribution = store.get(temporary)?;

        let voxels = contribution.foreground_count();
        if voxels == 0 {
            warn!(label, "label vanished during smoothing");
        }

        *accumulated = self
            .combiner
            .combine(contribution, accumulated)
            .map_err(|source| PipelineError::CombineFailure { label, source })?;
        Ok(voxels)
    }
}

impl Default for DefaultPipeline {
    fn default() -> Self {
        Self::new(CombinePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, s};
    use proptest::prelude::*;
    use std::cell::RefCell;

    /// Returns the isolated label as a 0/1 mask without changing its shape.
    struct IsolateOnly {
        seen: RefCell<Vec<u16>>,
    }

    impl IsolateOnly {
        fn new() -> Self {
            Self {
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl LabelSmoothingService for IsolateOnly {
        fn smooth(
            &self,
            volume: &LabelVolume,
            label: u16,
            _params: &SmoothingParams,
        ) -> Result<LabelVolume, ServiceError> {
            self.seen.borrow_mut().push(label);
            let mut mask = volume.zeros_like();
            mask.data_mut()
                .zip_mut_with(volume.data(), |out, &v| *out = u16::from(v == label));
            Ok(mask)
        }
    }

    /// Grows every label by one voxel along x so neighbouring labels overlap.
    struct GrowAlongX;

    impl LabelSmoothingService for GrowAlongX {
        fn smooth(
            &self,
            volume: &LabelVolume,
            label: u16,
            _params: &SmoothingParams,
        ) -> Result<LabelVolume, ServiceError> {
            let mut mask = volume.zeros_like();
            let (depth, height, width) = volume.dim();
            for z in 0..depth {
                for y in 0..height {
                    for x in 0..width {
                        if volume.data()[[z, y, x]] == label {
                            mask.data_mut()[[z, y, x]] = 1;
                            if x > 0 {
                                mask.data_mut()[[z, y, x - 1]] = 1;
                            }
                            if x + 1 < width {
                                mask.data_mut()[[z, y, x + 1]] = 1;
                            }
                        }
                    }
                }
            }
            Ok(mask)
        }
    }

    /// Fails when asked to smooth `fail_on`.
    struct FailOn {
        fail_on: u16,
    }

    impl LabelSmoothingService for FailOn {
        fn smooth(
            &self,
            volume: &LabelVolume,
            label: u16,
            params: &SmoothingParams,
        ) -> Result<LabelVolume, ServiceError> {
            if label == self.fail_on {
                return Err(ServiceError::InvalidParameter {
                    name: "label",
                    value: f64::from(label),
                });
            }
            IsolateOnly::new().smooth(volume, label, params)
        }
    }

    /// Smooths every label away.
    struct Vanish;

    impl LabelSmoothingService for Vanish {
        fn smooth(
            &self,
            volume: &LabelVolume,
            _label: u16,
            _params: &SmoothingParams,
        ) -> Result<LabelVolume, ServiceError> {
            Ok(volume.zeros_like())
        }
    }

    /// Combine that fails on its second call.
    struct FailSecondCombine {
        calls: RefCell<usize>,
    }

    impl LabelCombineService for FailSecondCombine {
        fn combine(&self, a: &LabelVolume, b: &LabelVolume) -> Result<LabelVolume, ServiceError> {
            *self.calls.borrow_mut() += 1;
            if *self.calls.borrow() == 2 {
                return Err(ServiceError::GeometryMismatch {
                    a: a.dim(),
                    b: b.dim(),
                });
            }
            LabelUnion::default().combine(a, b)
        }
    }

    struct FailingResampler;

    impl ResampleService for FailingResampler {
        fn resample(
            &self,
            _volume: &LabelVolume,
            target_spacing: (f32, f32, f32),
        ) -> Result<LabelVolume, ServiceError> {
            Err(ServiceError::InvalidSpacing(target_spacing))
        }
    }

    /// Labels 1, 2 and 3 in adjacent blocks along x.
    fn striped_input() -> LabelVolume {
        let mut data = Array3::<u16>::zeros((2, 4, 9));
        data.slice_mut(s![.., .., 0..3]).fill(1);
        data.slice_mut(s![.., .., 3..6]).fill(2);
        data.slice_mut(s![.., .., 6..9]).fill(3);
        LabelVolume::new(data, (1.0, 1.0, 2.0))
    }

    fn setup(input: LabelVolume) -> (VolumeStore, VolumeId, VolumeId) {
        let mut store = VolumeStore::new();
        let input_id = store.create(input);
        let output_id = store.create(LabelVolume::default());
        store.reset_peak();
        (store, input_id, output_id)
    }

    fn config(slice_divide: f32) -> PipelineConfig {
        PipelineConfig {
            slice_divide,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn validate_truth_table() {
        let mut store = VolumeStore::new();
        let a = store.create(LabelVolume::default());
        let b = store.create(LabelVolume::default());

        assert!(!validate(None, None));
        assert!(!validate(Some(a), None));
        assert!(!validate(None, Some(b)));
        assert!(!validate(Some(a), Some(a)));
        assert!(validate(Some(a), Some(b)));
        assert!(validate(Some(b), Some(a)));
    }

    #[test]
    fn invalid_input_creates_nothing() {
        let (mut store, input, _) = setup(striped_input());
        let pipeline = DefaultPipeline::default();

        let result = pipeline.run(&mut store, Some(input), Some(input), &config(2.0));
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
        let result = pipeline.run(&mut store, Some(input), None, &config(2.0));
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
        assert_eq!(store.created(), 2);
        assert_eq!(store.live(), 2);
    }

    #[test]
    fn removed_output_is_invalid_input() {
        let (mut store, input, output) = setup(striped_input());
        store.remove(output).expect("output is live");
        let result =
            DefaultPipeline::default().run(&mut store, Some(input), Some(output), &config(1.0));
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn invalid_slice_divide_is_rejected_before_resampling() {
        let (mut store, input, output) = setup(striped_input());
        let result =
            DefaultPipeline::default().run(&mut store, Some(input), Some(output), &config(0.0));
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
        assert_eq!(store.created(), 2);
    }

    #[test]
    fn background_is_never_smoothed_and_labels_ascend() {
        let (mut store, input, output) = setup(striped_input());
        let smoother = IsolateOnly::new();
        let pipeline = ResamplePipeline::with_services(
            NearestNeighborResampler,
            smoother,
            LabelUnion::default(),
        );

        let summary = pipeline
            .run(&mut store, Some(input), Some(output), &config(2.0))
            .expect("run succeeds");

        assert_eq!(*pipeline.smoother.seen.borrow(), vec![1, 2, 3]);
        assert_eq!(summary.label_ids(), vec![1, 2, 3]);
        assert_eq!(summary.output_dim, (4, 4, 9));
    }

    #[test]
    fn unsmoothed_labels_round_trip_exactly() {
        let input = striped_input();
        let (mut store, input_id, output) = setup(input.clone());
        let pipeline = ResamplePipeline::with_services(
            NearestNeighborResampler,
            IsolateOnly::new(),
            LabelUnion::default(),
        );

        pipeline
            .run(&mut store, Some(input_id), Some(output), &config(2.0))
            .expect("run succeeds");

        let expected = NearestNeighborResampler
            .resample(&input, (1.0, 1.0, 1.0))
            .expect("valid spacing");
        assert_eq!(store.get(output).expect("output is live"), &expected);
        assert_eq!(store.get(input_id).expect("input is live"), &input);
    }

    #[test]
    fn later_label_wins_on_overlap() {
        let (mut store, input, output) = setup(striped_input());
        let pipeline = ResamplePipeline::with_services(
            NearestNeighborResampler,
            GrowAlongX,
            LabelUnion::default(),
        );

        pipeline
            .run(&mut store, Some(input), Some(output), &config(1.0))
            .expect("run succeeds");

        let result = store.get(output).expect("output is live");
        // x = 2 is claimed by 1 and grown into by 2; x = 3 by 2 and 1.
        assert_eq!(result.data()[[0, 0, 2]], 2);
        assert_eq!(result.data()[[0, 0, 3]], 2);
        assert_eq!(result.data()[[0, 0, 5]], 3);
        assert_eq!(result.data()[[0, 0, 6]], 3);
        assert_eq!(result.data()[[0, 0, 0]], 1);
    }

    #[test]
    fn earlier_label_wins_with_second_overwrites() {
        let (mut store, input, output) = setup(striped_input());
        let pipeline = ResamplePipeline::with_services(
            NearestNeighborResampler,
            GrowAlongX,
            LabelUnion::new(CombinePolicy::SecondOverwrites),
        );

        pipeline
            .run(&mut store, Some(input), Some(output), &config(1.0))
            .expect("run succeeds");

        let result = store.get(output).expect("output is live");
        assert_eq!(result.data()[[0, 0, 2]], 1);
        assert_eq!(result.data()[[0, 0, 3]], 1);
        assert_eq!(result.data()[[0, 0, 6]], 2);
    }

    #[test]
    fn all_background_input_succeeds_with_background_output() {
        let input = LabelVolume::new(Array3::zeros((3, 2, 2)), (1.0, 1.0, 3.0));
        let (mut store, input_id, output) = setup(input);

        let summary = DefaultPipeline::default()
            .run(&mut store, Some(input_id), Some(output), &config(3.0))
            .expect("run succeeds");

        assert!(summary.labels.is_empty());
        let result = store.get(output).expect("output is live");
        assert_eq!(result.dim(), (9, 2, 2));
        assert_eq!(result.foreground_count(), 0);
        assert_eq!(store.created(), 3);
        assert_eq!(store.live(), 2);
    }

    #[test]
    fn temporaries_are_created_once_and_released() {
        let (mut store, input, output) = setup(striped_input());
        DefaultPipeline::default()
            .run(&mut store, Some(input), Some(output), &config(2.0))
            .expect("run succeeds");

        // Working copy plus one temporary per label.
        assert_eq!(store.created(), 2 + 1 + 3);
        assert_eq!(store.live(), 2);
        assert_eq!(store.peak_live(), 2 + 2);
    }

    #[test]
    fn smoothing_failure_cleans_up() {
        let (mut store, input, output) = setup(striped_input());
        let pipeline = ResamplePipeline::with_services(
            NearestNeighborResampler,
            FailOn { fail_on: 2 },
            LabelUnion::default(),
        );

        let result = pipeline.run(&mut store, Some(input), Some(output), &config(2.0));

        assert!(matches!(
            result,
            Err(PipelineError::SmoothingFailure { label: 2, .. })
        ));
        // Working copy and the temporary of label 1.
        assert_eq!(store.created(), 2 + 2);
        assert_eq!(store.live(), 2);
        assert_eq!(store.get(output).expect("output is live"), &LabelVolume::default());
    }

    #[test]
    fn combine_failure_cleans_up() {
        let (mut store, input, output) = setup(striped_input());
        let pipeline = ResamplePipeline::with_services(
            NearestNeighborResampler,
            IsolateOnly::new(),
            FailSecondCombine {
                calls: RefCell::new(0),
            },
        );

        let result = pipeline.run(&mut store, Some(input), Some(output), &config(2.0));

        assert!(matches!(
            result,
            Err(PipelineError::CombineFailure { label: 2, .. })
        ));
        assert_eq!(store.created(), 2 + 3);
        assert_eq!(store.live(), 2);
    }

    #[test]
    fn resample_failure_aborts_before_labels() {
        let (mut store, input, output) = setup(striped_input());
        let smoother = IsolateOnly::new();
        let pipeline =
            ResamplePipeline::with_services(FailingResampler, smoother, LabelUnion::default());

        let result = pipeline.run(&mut store, Some(input), Some(output), &config(2.0));

        assert!(matches!(result, Err(PipelineError::ResampleFailure(_))));
        assert!(pipeline.smoother.seen.borrow().is_empty());
        assert_eq!(store.created(), 2);
    }

    #[test]
    fn vanished_labels_do_not_erase_others() {
        let (mut store, input, output) = setup(striped_input());
        let pipeline = ResamplePipeline::with_services(
            NearestNeighborResampler,
            Vanish,
            LabelUnion::default(),
        );

        let summary = pipeline
            .run(&mut store, Some(input), Some(output), &config(1.0))
            .expect("run succeeds");

        assert!(summary.labels.iter().all(|label| label.voxels_after == 0));
        assert_eq!(store.get(output).expect("output is live").foreground_count(), 0);
        assert_eq!(store.live(), 2);
    }

    #[test]
    fn cancelled_run_cleans_up() {
        let (mut store, input, output) = setup(striped_input());
        let token = CancellationToken::new();
        token.cancel();
        let pipeline = DefaultPipeline::default().with_cancellation(token);

        let result = pipeline.run(&mut store, Some(input), Some(output), &config(2.0));

        assert!(matches!(result, Err(PipelineError::Cancelled { label: 1 })));
        assert_eq!(store.created(), 3);
        assert_eq!(store.live(), 2);
    }

    #[test]
    fn rerun_overwrites_previous_output() {
        let (mut store, input, output) = setup(striped_input());
        let mut stale = LabelVolume::new(Array3::from_elem((4, 4, 9), 9), (1.0, 1.0, 1.0));
        stale.data_mut()[[0, 0, 0]] = 7;
        store.replace(output, stale).expect("output is live");

        let pipeline = ResamplePipeline::with_services(
            NearestNeighborResampler,
            IsolateOnly::new(),
            LabelUnion::default(),
        );
        pipeline
            .run(&mut store, Some(input), Some(output), &config(2.0))
            .expect("run succeeds");

        assert_eq!(store.get(output).expect("output is live").labels(), vec![1, 2, 3]);
    }

    proptest! {
        #[test]
        fn validate_rejects_exactly_missing_or_aliased(
            a in proptest::bool::ANY,
            b in proptest::bool::ANY,
            same in proptest::bool::ANY,
        ) {
            let mut store = VolumeStore::new();
            let first = store.create(LabelVolume::default());
            let second = store.create(LabelVolume::default());
            let input = a.then_some(first);
            let output = b.then_some(if same { first } else { second });

            let expected = a && b && !same;
            prop_assert_eq!(validate(input, output), expected);
        }
    }
}
