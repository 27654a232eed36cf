use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{Array4, Axis};

use crate::detect::engine::{Classifier, InferenceEngine, SamplingPlan};

/// Detection tuning. The thresholds are the values the classifier was
/// validated with; the auto-remove threshold is reviewer-supplied per batch
/// run.
#[derive(Debug, Clone)]
pub struct DetectConfig {
    pub model_path: PathBuf,
    pub plan: SamplingPlan,
    /// A slice counts as bad when its confidence exceeds this.
    pub confidence_threshold: f32,
    /// A volume is flagged when the bad-slice proportion reaches this.
    pub proportion_threshold: f32,
    /// Batch mode auto-excludes volumes whose verdict score exceeds this.
    pub auto_remove_threshold: u8,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("resources/motion_classifier.json"),
            plan: SamplingPlan::default(),
            confidence_threshold: 0.7,
            proportion_threshold: 0.5,
            auto_remove_threshold: 70,
        }
    }
}

/// Derived classification for one volume. A pure function of the per-slice
/// scores; never stored independently of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeVerdict {
    Clean,
    LikelyBad { score: u8 },
    /// Inference failed for this volume; it shows no verdict marker.
    Unavailable,
}

impl VolumeVerdict {
    pub fn score(&self) -> Option<u8> {
        match self {
            VolumeVerdict::LikelyBad { score } => Some(*score),
            _ => None,
        }
    }
}

/// Ordered events emitted by the background detection worker. Exactly one
/// `ModelLoaded` (or `ModelLoadFailed`) per session, then one
/// `VolumePredicted` per volume in submission order, then `FileFinished`.
#[derive(Debug, Clone)]
pub enum DetectionEvent {
    ModelLoaded(Arc<dyn Classifier>),
    ModelLoadFailed(String),
    VolumePredicted {
        index: usize,
        scores: Option<Vec<f32>>,
    },
    FileFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectState {
    Idle,
    LoadingModel,
    Detecting,
    /// Batch mode only: between finishing one file and starting the next.
    BatchAdvance,
}

/// What the worker must do first when a detect run begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectPhase {
    /// No classifier bound yet; load the model, then detect.
    NeedsModel,
    Ready,
}

/// Interactive-thread side of the detection pipeline: tracks the state
/// machine, the bound classifier, per-volume score collection and verdict
/// aggregation. The blocking work itself runs in `run_file` on the worker.
#[derive(Debug)]
pub struct DetectionOrchestrator {
    config: DetectConfig,
    classifier: Option<Arc<dyn Classifier>>,
    state: DetectState,
    collected: Vec<Option<Vec<f32>>>,
    expected: usize,
    verdicts: Vec<VolumeVerdict>,
}

impl Default for DetectionOrchestrator {
    fn default() -> Self {
        Self::new(DetectConfig::default())
    }
}

impl DetectionOrchestrator {
    pub fn new(config: DetectConfig) -> Self {
        Self {
            config,
            classifier: None,
            state: DetectState::Idle,
            collected: Vec::new(),
            expected: 0,
            verdicts: Vec::new(),
        }
    }

    pub fn config(&self) -> &DetectConfig {
        &self.config
    }

    pub fn state(&self) -> DetectState {
        self.state
    }

    /// True while a worker run is in flight. File switching and further
    /// detect requests are refused while busy.
    pub fn is_busy(&self) -> bool {
        self.state != DetectState::Idle
    }

    pub fn classifier(&self) -> Option<Arc<dyn Classifier>> {
        self.classifier.clone()
    }

    pub fn completed(&self) -> usize {
        self.collected.len()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Verdicts of the most recently aggregated file.
    pub fn verdicts(&self) -> &[VolumeVerdict] {
        &self.verdicts
    }

    /// Drops the last run's verdicts. They are indexed by volume within one
    /// file, so they must not outlive a file switch.
    pub fn clear_verdicts(&mut self) {
        self.verdicts.clear();
    }

    /// Starts a run over `volume_count` volumes. Returns `None` when a run
    /// is already in flight (requests during `LoadingModel` are rejected,
    /// not queued). Allowed from `Idle` and, in batch mode, `BatchAdvance`.
    pub fn begin(&mut self, volume_count: usize) -> Option<DetectPhase> {
        match self.state {
            DetectState::Idle | DetectState::BatchAdvance => {}
            DetectState::LoadingModel | DetectState::Detecting => return None,
        }
        self.collected.clear();
        self.verdicts.clear();
        self.expected = volume_count;
        if self.classifier.is_some() {
            self.state = DetectState::Detecting;
            Some(DetectPhase::Ready)
        } else {
            self.state = DetectState::LoadingModel;
            Some(DetectPhase::NeedsModel)
        }
    }

    /// Model load happens once per session; later runs skip straight to
    /// `Detecting`.
    pub fn on_model_loaded(&mut self, classifier: Arc<dyn Classifier>) {
        if self.classifier.is_none() {
            self.classifier = Some(classifier);
        }
        if self.state == DetectState::LoadingModel {
            self.state = DetectState::Detecting;
        }
    }

    /// Model-load failure halts the run; no per-volume results, no ledger
    /// state touched.
    pub fn on_model_failed(&mut self) {
        self.state = DetectState::Idle;
        self.collected.clear();
        self.expected = 0;
    }

    /// Records one in-order completion. Returns the completed count.
    pub fn on_volume_predicted(&mut self, index: usize, scores: Option<Vec<f32>>) -> usize {
        if self.state != DetectState::Detecting {
            log::warn!("dropping stray prediction event for volume {index}");
            return self.collected.len();
        }
        if index != self.collected.len() {
            // Sequential submission means this cannot happen unless the
            // worker contract is broken.
            log::error!(
                "out-of-order prediction event: got volume {index}, expected {}",
                self.collected.len()
            );
        }
        self.collected.push(scores);
        self.collected.len()
    }

    /// Aggregates every collected per-volume score list into verdicts.
    /// Interactive mode returns to `Idle`; batch mode parks in
    /// `BatchAdvance` until the next file's run begins.
    pub fn finish_file(&mut self, batch_mode: bool) {
        self.verdicts = self
            .collected
            .iter()
            .map(|scores| match scores {
                Some(scores) => aggregate(
                    scores,
                    self.config.confidence_threshold,
                    self.config.proportion_threshold,
                ),
                None => VolumeVerdict::Unavailable,
            })
            .collect();
        self.collected.clear();
        self.state = if batch_mode {
            DetectState::BatchAdvance
        } else {
            DetectState::Idle
        };
    }

    /// Ends a batch run (files exhausted or advance refused).
    pub fn finish_batch(&mut self) {
        self.state = DetectState::Idle;
    }

    /// Volumes whose verdict score exceeds the auto-remove threshold, for
    /// batch-mode exclusion.
    pub fn auto_exclusions(&self) -> Vec<usize> {
        self.verdicts
            .iter()
            .enumerate()
            .filter(|(_, verdict)| {
                verdict
                    .score()
                    .is_some_and(|score| score > self.config.auto_remove_threshold)
            })
            .map(|(v, _)| v)
            .collect()
    }
}

/// Aggregation rule: `bad = count(score > confidence_threshold)`; the volume
/// is likely bad iff `bad / total >= proportion_threshold`, with verdict
/// score `round(100 * mean(scores))`.
pub fn aggregate(
    scores: &[f32],
    confidence_threshold: f32,
    proportion_threshold: f32,
) -> VolumeVerdict {
    if scores.is_empty() {
        return VolumeVerdict::Clean;
    }
    let total = scores.len() as f32;
    let bad = scores
        .iter()
        .filter(|&&score| score > confidence_threshold)
        .count() as f32;
    if bad / total >= proportion_threshold {
        let mean = scores.iter().sum::<f32>() / total;
        VolumeVerdict::LikelyBad {
            score: (mean * 100.0).round() as u8,
        }
    } else {
        VolumeVerdict::Clean
    }
}

/// Blocking per-file prediction loop, run on the background worker. Volumes
/// are processed strictly sequentially so completion order equals submission
/// order and memory stays bounded; a failed volume emits a `None` result in
/// its position and the loop continues.
pub fn run_file(
    data: &Array4<f32>,
    engine: &InferenceEngine,
    emit: &mut dyn FnMut(DetectionEvent),
) {
    let volumes = data.shape()[3];
    for v in 0..volumes {
        log::debug!("predicting volume {v}/{volumes}");
        let scores = engine.predict_volume(data.index_axis(Axis(3), v));
        emit(DetectionEvent::VolumePredicted { index: v, scores });
    }
    emit(DetectionEvent::FileFinished);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use ndarray::Array3;
    use std::sync::Mutex;

    #[test]
    fn aggregation_below_proportion_is_clean() {
        let scores = [0.9, 0.8, 0.75, 0.71, 0.3, 0.2, 0.1, 0.05, 0.02, 0.01];
        // 4 of 10 exceed 0.7 -> proportion 0.4 < 0.5.
        assert_eq!(aggregate(&scores, 0.7, 0.5), VolumeVerdict::Clean);
    }

    #[test]
    fn aggregation_at_proportion_is_likely_bad_with_mean_score() {
        let scores = [0.9, 0.8, 0.75, 0.71, 0.72, 0.2, 0.1, 0.05, 0.02, 0.01];
        // 5 of 10 exceed 0.7 -> proportion 0.5.
        let mean: f32 = scores.iter().sum::<f32>() / 10.0;
        assert_eq!(
            aggregate(&scores, 0.7, 0.5),
            VolumeVerdict::LikelyBad {
                score: (mean * 100.0).round() as u8
            }
        );
    }

    #[test]
    fn empty_score_list_is_clean() {
        assert_eq!(aggregate(&[], 0.7, 0.5), VolumeVerdict::Clean);
    }

    /// Fails the nth invocation, succeeds otherwise.
    #[derive(Debug)]
    struct FlakyClassifier {
        calls: Mutex<usize>,
        fail_on: usize,
    }

    impl Classifier for FlakyClassifier {
        fn predict_batch(&self, batch: &Array3<f32>) -> Result<Vec<f32>, InferenceError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == self.fail_on {
                Err(InferenceError("injected failure".into()))
            } else {
                Ok(vec![0.0; batch.shape()[0]])
            }
        }
    }

    #[test]
    fn run_file_emits_ordered_events_despite_failure() {
        let data = Array4::<f32>::from_elem((6, 4, 4, 5), 1.0);
        let engine = InferenceEngine::new(
            Arc::new(FlakyClassifier {
                calls: Mutex::new(0),
                fail_on: 3,
            }),
            SamplingPlan {
                slice_range: (0, 4),
                stride: 1,
                target_dim: (4, 4),
            },
        );

        let mut events = Vec::new();
        run_file(&data, &engine, &mut |event| events.push(event));

        assert_eq!(events.len(), 6);
        for (i, event) in events.iter().take(5).enumerate() {
            match event {
                DetectionEvent::VolumePredicted { index, scores } => {
                    assert_eq!(*index, i);
                    // Volume 2's failure keeps its position, result absent.
                    assert_eq!(scores.is_none(), i == 2);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(matches!(events[5], DetectionEvent::FileFinished));
    }

    #[derive(Debug)]
    struct NullClassifier;

    impl Classifier for NullClassifier {
        fn predict_batch(&self, batch: &Array3<f32>) -> Result<Vec<f32>, InferenceError> {
            Ok(vec![0.0; batch.shape()[0]])
        }
    }

    #[test]
    fn begin_rejects_concurrent_runs() {
        let mut orch = DetectionOrchestrator::new(DetectConfig::default());
        assert_eq!(orch.begin(3), Some(DetectPhase::NeedsModel));
        assert_eq!(orch.state(), DetectState::LoadingModel);
        // A second detect request while loading is rejected, not queued.
        assert_eq!(orch.begin(3), None);

        orch.on_model_loaded(Arc::new(NullClassifier));
        assert_eq!(orch.state(), DetectState::Detecting);
        assert_eq!(orch.begin(3), None);
    }

    #[test]
    fn model_loads_once_per_session() {
        let mut orch = DetectionOrchestrator::new(DetectConfig::default());
        orch.begin(1);
        orch.on_model_loaded(Arc::new(NullClassifier));
        orch.finish_file(false);
        assert_eq!(orch.state(), DetectState::Idle);
        // Classifier stays bound; the next run skips the load phase.
        assert_eq!(orch.begin(1), Some(DetectPhase::Ready));
    }

    #[test]
    fn finish_file_aggregates_and_parks_in_batch_mode() {
        let mut orch = DetectionOrchestrator::new(DetectConfig::default());
        orch.begin(3);
        orch.on_model_loaded(Arc::new(NullClassifier));
        orch.on_volume_predicted(0, Some(vec![0.9, 0.9]));
        orch.on_volume_predicted(1, None);
        orch.on_volume_predicted(2, Some(vec![0.1, 0.1]));
        orch.finish_file(true);

        assert_eq!(orch.state(), DetectState::BatchAdvance);
        assert_eq!(
            orch.verdicts(),
            &[
                VolumeVerdict::LikelyBad { score: 90 },
                VolumeVerdict::Unavailable,
                VolumeVerdict::Clean,
            ]
        );
        assert_eq!(orch.auto_exclusions(), vec![0]);

        // Advancing to the next file re-enters Detecting.
        assert_eq!(orch.begin(2), Some(DetectPhase::Ready));
        orch.finish_file(true);
        orch.finish_batch();
        assert_eq!(orch.state(), DetectState::Idle);
    }

    #[test]
    fn cleared_verdicts_do_not_survive_a_file_change() {
        let mut orch = DetectionOrchestrator::new(DetectConfig::default());
        orch.begin(2);
        orch.on_model_loaded(Arc::new(NullClassifier));
        orch.on_volume_predicted(0, Some(vec![0.9, 0.9]));
        orch.on_volume_predicted(1, Some(vec![0.1, 0.1]));
        orch.finish_file(false);
        assert_eq!(orch.verdicts().len(), 2);

        orch.clear_verdicts();
        assert!(orch.verdicts().is_empty());
        // The bound classifier is unaffected.
        assert_eq!(orch.begin(3), Some(DetectPhase::Ready));
    }

    #[test]
    fn model_failure_returns_to_idle_without_results() {
        let mut orch = DetectionOrchestrator::new(DetectConfig::default());
        orch.begin(4);
        orch.on_model_failed();
        assert_eq!(orch.state(), DetectState::Idle);
        assert!(orch.verdicts().is_empty());
        assert_eq!(orch.completed(), 0);
    }
}
