pub mod engine;
pub mod model;
pub mod orchestrator;

pub use engine::{Classifier, InferenceEngine, SamplingPlan};
pub use model::load_classifier;
pub use orchestrator::{
    aggregate, run_file, DetectConfig, DetectPhase, DetectState, DetectionEvent,
    DetectionOrchestrator, VolumeVerdict,
};
