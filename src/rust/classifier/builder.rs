use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use super::backbone::{FeatureExtractor, OnnxBackbone};
use super::classifier::WasteClassifier;
use super::error::ClassifierError;
use super::head::ClassificationHead;
use crate::artifact::ModelArtifact;
use crate::preprocess::Preprocessor;
use crate::runtime::RuntimeConfig;

/// A builder for pairing a trained artifact with its backbone.
///
/// `build` is where the consistency checks happen: the backbone must produce as many
/// features as the head consumes and must expect the pixel scaling recorded in the
/// artifact.
#[derive(Default, Debug)]
pub struct ClassifierBuilder {
    artifact: Option<ModelArtifact>,
    backbone: Option<Arc<dyn FeatureExtractor>>,
    runtime_config: RuntimeConfig,
}

impl ClassifierBuilder {
    /// Creates a new empty ClassifierBuilder instance with default configuration
    pub fn new() -> Self {
        Self {
            artifact: None,
            backbone: None,
            runtime_config: RuntimeConfig::default(),
        }
    }

    /// Sets the runtime configuration used when loading an ONNX backbone
    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    /// Sets the trained artifact (head weights, labels, preprocessing).
    ///
    /// # Errors
    /// - `BuildError` if an artifact was already set
    /// - `ValidationError` if the artifact is internally inconsistent
    pub fn with_artifact(mut self, artifact: ModelArtifact) -> Result<Self, ClassifierError> {
        if self.artifact.is_some() {
            return Err(ClassifierError::BuildError("Artifact already set".to_string()));
        }
        artifact.validate()?;
        info!("Artifact accepted with labels {}", artifact.labels);
        self.artifact = Some(artifact);
        Ok(self)
    }

    /// Uses an already constructed feature extractor.
    pub fn with_backbone(mut self, backbone: Arc<dyn FeatureExtractor>) -> Result<Self, ClassifierError> {
        if self.backbone.is_some() {
            return Err(ClassifierError::BuildError("Backbone already set".to_string()));
        }
        self.backbone = Some(backbone);
        Ok(self)
    }

    /// Loads an ONNX backbone, configured with the pixel scaling recorded in the artifact.
    ///
    /// The artifact must be set first.
    pub fn with_onnx_backbone(self, path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let scaling = self
            .artifact
            .as_ref()
            .map(|a| a.preprocess.scaling)
            .ok_or_else(|| ClassifierError::BuildError("Set the artifact before loading its backbone".to_string()))?;
        let backbone = OnnxBackbone::load(path, scaling, &self.runtime_config)?;
        self.with_backbone(Arc::new(backbone))
    }

    /// Builds and returns the final classifier.
    ///
    /// # Errors
    /// - `BuildError` if the artifact or the backbone is missing
    /// - `BuildError` if the backbone disagrees with the artifact
    pub fn build(self) -> Result<WasteClassifier, ClassifierError> {
        let artifact = self
            .artifact
            .ok_or_else(|| ClassifierError::BuildError("A trained artifact must be set".to_string()))?;
        let backbone = self
            .backbone
            .ok_or_else(|| ClassifierError::BuildError("A backbone must be set".to_string()))?;

        if backbone.feature_dim() != artifact.backbone.feature_dim {
            return Err(ClassifierError::BuildError(format!(
                "Backbone '{}' produces {} features but the artifact was trained on {}",
                backbone.name(),
                backbone.feature_dim(),
                artifact.backbone.feature_dim
            )));
        }
        if backbone.expected_scaling() != artifact.preprocess.scaling {
            return Err(ClassifierError::BuildError(format!(
                "Backbone '{}' expects {:?} pixels but the artifact preprocesses to {:?}",
                backbone.name(),
                backbone.expected_scaling(),
                artifact.preprocess.scaling
            )));
        }
        if backbone.name() != artifact.backbone.name {
            warn!(
                "Backbone name '{}' differs from the one recorded at training time ('{}')",
                backbone.name(),
                artifact.backbone.name
            );
        }

        let head = ClassificationHead::from_weights(&artifact.head)?;
        let preprocessor = Preprocessor::new(artifact.preprocess)?;
        info!(
            "Classifier ready: {} classes, {} features, {:?} scaling",
            artifact.labels.len(),
            head.input_dim(),
            artifact.preprocess.scaling
        );

        Ok(WasteClassifier {
            labels: artifact.labels,
            preprocessor,
            backbone,
            head,
        })
    }
}
