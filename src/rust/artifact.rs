//! The trained model as a self-consistent bundle.
//!
//! A [`ModelArtifact`] keeps the head weights together with everything needed to use
//! them correctly: the label ordering the output indices refer to, the preprocessing
//! transform applied during training, and the identity of the frozen backbone. Loading
//! an artifact therefore always yields a matching (weights, labels, transform) triple.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{ClassificationHead, ClassifierError, HeadWeights};
use crate::labels::LabelSet;
use crate::preprocess::{PixelScaling, PreprocessSpec};
use crate::training::TrainingSummary;

/// Bumped whenever the on-disk layout changes incompatibly.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Identity of the frozen feature extractor the head was trained on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackboneRecord {
    pub name: String,
    pub feature_dim: usize,
    pub scaling: PixelScaling,
    /// File name of the bundled network inside the version directory
    pub file: Option<String>,
    pub sha256: Option<String>,
}

/// `manifest.json` of a published version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format_version: u32,
    pub labels: LabelSet,
    pub input_shape: [usize; 3],
    pub preprocess: PreprocessSpec,
    pub backbone: BackboneRecord,
    pub hidden_units: usize,
    pub num_classes: usize,
    pub head_sha256: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub training: Option<TrainingSummary>,
}

#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub labels: LabelSet,
    pub preprocess: PreprocessSpec,
    pub backbone: BackboneRecord,
    pub head: HeadWeights,
    pub created_at: DateTime<Utc>,
    pub training: Option<TrainingSummary>,
}

impl ModelArtifact {
    /// Assembles and validates an artifact.
    pub fn new(
        labels: LabelSet,
        preprocess: PreprocessSpec,
        backbone: BackboneRecord,
        head: HeadWeights,
        training: Option<TrainingSummary>,
    ) -> Result<Self, ClassifierError> {
        let artifact = Self {
            labels,
            preprocess,
            backbone,
            head,
            created_at: Utc::now(),
            training,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Checks that labels, head, backbone and transform agree with one another.
    pub fn validate(&self) -> Result<(), ClassifierError> {
        self.preprocess.validate()?;
        let head = ClassificationHead::from_weights(&self.head)?;

        if head.num_classes() != self.labels.len() {
            return Err(ClassifierError::ValidationError(format!(
                "Head emits {} classes but the label set has {} labels",
                head.num_classes(),
                self.labels.len()
            )));
        }
        if head.input_dim() != self.backbone.feature_dim {
            return Err(ClassifierError::ValidationError(format!(
                "Head expects {} features but backbone '{}' produces {}",
                head.input_dim(),
                self.backbone.name,
                self.backbone.feature_dim
            )));
        }
        if self.backbone.scaling != self.preprocess.scaling {
            return Err(ClassifierError::ValidationError(format!(
                "Preprocessing scales pixels as {:?} but backbone '{}' expects {:?}",
                self.preprocess.scaling, self.backbone.name, self.backbone.scaling
            )));
        }
        Ok(())
    }

    pub fn manifest(&self, head_sha256: String) -> ArtifactManifest {
        ArtifactManifest {
            format_version: ARTIFACT_FORMAT_VERSION,
            labels: self.labels.clone(),
            input_shape: self.preprocess.input_shape(),
            preprocess: self.preprocess,
            backbone: self.backbone.clone(),
            hidden_units: self.head.hidden.outputs,
            num_classes: self.labels.len(),
            head_sha256,
            created_at: self.created_at,
            training: self.training.clone(),
        }
    }

    /// Rebuilds an artifact from its manifest and head weights.
    pub fn from_parts(manifest: ArtifactManifest, head: HeadWeights) -> Result<Self, ClassifierError> {
        if manifest.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ClassifierError::ValidationError(format!(
                "Unsupported artifact format version {} (expected {})",
                manifest.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }
        if manifest.input_shape != manifest.preprocess.input_shape() {
            return Err(ClassifierError::ValidationError(format!(
                "Manifest input shape {:?} disagrees with its preprocessing {:?}",
                manifest.input_shape,
                manifest.preprocess.input_shape()
            )));
        }
        if manifest.num_classes != manifest.labels.len() || manifest.hidden_units != head.hidden.outputs {
            return Err(ClassifierError::ValidationError(
                "Manifest dimensions disagree with the head weights".to_string(),
            ));
        }
        let artifact = Self {
            labels: manifest.labels,
            preprocess: manifest.preprocess,
            backbone: manifest.backbone,
            head,
            created_at: manifest.created_at,
            training: manifest.training,
        };
        artifact.validate()?;
        Ok(artifact)
    }
}
