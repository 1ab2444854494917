//! The online half: one loaded classifier, one log, one image directory.

use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;

use crate::assistant::eco_tip;
use crate::classifier::{ClassifierError, Prediction, WasteClassifier};
use crate::config::AppConfig;
use crate::history::{HistoryError, ImageStore, PredictionLog, PredictionRecord};
use crate::model_manager::{ModelError, ModelManager};
use crate::preprocess::decode_image;
use crate::runtime::RuntimeConfig;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("No trained model available: {0}")]
    ModelUnavailable(#[from] ModelError),
    #[error("Artifact has no bundled backbone in {0:?}")]
    MissingBackbone(std::path::PathBuf),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Everything one accepted submission produced.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub prediction: Prediction,
    pub record: PredictionRecord,
    pub tip: &'static str,
}

/// Classifies submitted images and records each result.
///
/// The service is the only writer of the prediction log. The classifier is built once
/// and shared read-only.
#[derive(Debug, Clone)]
pub struct InferenceService {
    classifier: Arc<WasteClassifier>,
    log: PredictionLog,
    images: ImageStore,
}

impl InferenceService {
    /// Loads the current artifact and its bundled backbone. Without a published model
    /// the service cannot start.
    pub fn open(config: &AppConfig, runtime: RuntimeConfig) -> Result<Self, ServiceError> {
        let manager = ModelManager::new(config.models_dir()).map_err(ModelError::IoError)?;
        let version = manager.load_current()?;
        info!("Loading model version {}", version.id);

        let backbone_path = version
            .backbone_path
            .ok_or_else(|| ServiceError::MissingBackbone(version.dir.clone()))?;
        let classifier = WasteClassifier::builder()
            .with_runtime_config(runtime)
            .with_artifact(version.artifact)?
            .with_onnx_backbone(backbone_path)?
            .build()?;

        Ok(Self::new(
            Arc::new(classifier),
            PredictionLog::new(config.history_file()),
            ImageStore::new(config.images_dir()),
        ))
    }

    pub fn new(classifier: Arc<WasteClassifier>, log: PredictionLog, images: ImageStore) -> Self {
        Self { classifier, log, images }
    }

    pub fn classifier(&self) -> &Arc<WasteClassifier> {
        &self.classifier
    }

    pub fn log(&self) -> &PredictionLog {
        &self.log
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    /// Classifies one encoded image, saves a copy and appends a record.
    ///
    /// An undecodable image is rejected before anything is written. If the log append
    /// fails the saved copy is removed again.
    pub fn submit(&self, bytes: &[u8]) -> Result<SubmissionOutcome, ServiceError> {
        let image = decode_image(bytes)?;
        let prediction = self.classifier.predict_image(&image)?;

        let saved = self.images.save(&image)?;
        let record = PredictionRecord::now(
            saved.to_string_lossy(),
            prediction.label.clone(),
            prediction.confidence,
        )
        .and_then(|record| self.log.append(&record).map(|_| record));

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup) = self.images.remove(&saved) {
                    warn!("Failed to remove orphaned image {:?}: {}", saved, cleanup);
                }
                return Err(e.into());
            }
        };

        info!(
            "Classified {:?} as '{}' ({:.2}%)",
            saved, prediction.label, prediction.confidence
        );
        Ok(SubmissionOutcome {
            tip: eco_tip(&prediction.label),
            prediction,
            record,
        })
    }
}
