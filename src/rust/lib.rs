//! A waste-sorting image classifier: a frozen pretrained backbone plus a small trained
//! head, with the prediction log and reporting built around it.
//!
//! Training and inference are two halves joined by a versioned [`ModelArtifact`]. The
//! artifact carries the label order and the preprocessing transform the head was
//! trained with, so the online side can never decode an index with a different label
//! list or feed it differently scaled pixels.
//!
//! # Training
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use greenguardian::{ModelManager, OnnxBackbone, PixelScaling, RuntimeConfig, Trainer, TrainingConfig};
//!
//! let backbone = OnnxBackbone::load("mobilenet_v2.onnx", PixelScaling::SignedUnit, &RuntimeConfig::default())?;
//! let artifact = Trainer::new(TrainingConfig::default(), &backbone)?.train("dataset/")?;
//!
//! let manager = ModelManager::new_default()?;
//! let version = manager.publish(&artifact, Some(std::path::Path::new("mobilenet_v2.onnx")))?;
//! println!("Published {}", version.id);
//! # Ok(())
//! # }
//! ```
//!
//! # Inference
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use greenguardian::{AppConfig, InferenceService, RuntimeConfig};
//!
//! let service = InferenceService::open(&AppConfig::from_env(), RuntimeConfig::default())?;
//! let outcome = service.submit(&std::fs::read("can.jpg")?)?;
//! println!("{} ({:.2}%): {}", outcome.prediction.label, outcome.prediction.confidence, outcome.tip);
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! [`WasteClassifier`] is immutable and `Send + Sync`; share it with `Arc`. The
//! prediction log serializes its own appends.

pub mod artifact;
pub mod assistant;
pub mod classifier;
pub mod config;
pub mod history;
pub mod labels;
pub mod model_manager;
pub mod preprocess;
pub mod reporting;
mod runtime;
pub mod service;
pub mod training;

pub use artifact::{ArtifactManifest, BackboneRecord, ModelArtifact, ARTIFACT_FORMAT_VERSION};
pub use assistant::{eco_tip, AssistantError, ChatAssistant};
pub use classifier::{
    ClassifierBuilder, ClassifierError, ClassifierInfo, FeatureExtractor, OnnxBackbone, Prediction,
    WasteClassifier,
};
pub use config::{AppConfig, AssistantConfig};
pub use history::{ClearOutcome, Confirmation, HistoryError, ImageStore, PredictionLog, PredictionRecord};
pub use labels::LabelSet;
pub use model_manager::{ArtifactVersion, LoadedVersion, ModelError, ModelManager};
pub use preprocess::{InputTensor, PixelScaling, PreprocessSpec, Preprocessor, IMAGE_SIZE};
pub use reporting::{DashboardStats, EcoLevel, HistoryView};
pub use runtime::{create_session_builder, RuntimeConfig};
pub use service::{InferenceService, ServiceError, SubmissionOutcome};
pub use training::{Trainer, TrainingConfig, TrainingError, TrainingSummary};

pub fn init_logger() {
    env_logger::init();
}
