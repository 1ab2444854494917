use std::sync::Arc;

use image::DynamicImage;
use ndarray::Array1;
use serde::Serialize;

use super::backbone::FeatureExtractor;
use super::error::ClassifierError;
use super::head::ClassificationHead;
use super::utils::argmax;
use crate::labels::LabelSet;
use crate::preprocess::{InputTensor, Preprocessor};

/// The decoded outcome of one classification.
///
/// `confidence` is the raw top-1 softmax probability expressed as a percentage. It is a
/// ranking score, not a calibrated probability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Index into the artifact's label set
    pub label_index: usize,
    pub label: String,
    /// In `[0, 100]`
    pub confidence: f32,
    /// Percentage per label, in label-set order
    pub probabilities: Vec<(String, f32)>,
}

/// A thread-safe waste classifier: frozen backbone, trained head, and the label set and
/// preprocessing transform they were trained with.
///
/// The classifier is immutable once built. Share it between request handlers with `Arc`:
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use greenguardian::{ModelManager, RuntimeConfig, WasteClassifier};
/// use std::sync::Arc;
///
/// let manager = ModelManager::new_default()?;
/// let version = manager.load_current()?;
/// let classifier = Arc::new(
///     WasteClassifier::builder()
///         .with_artifact(version.artifact)?
///         .with_onnx_backbone(version.backbone_path.expect("bundled backbone"))?
///         .build()?,
/// );
///
/// let bytes = std::fs::read("bottle.jpg")?;
/// let prediction = classifier.predict_bytes(&bytes)?;
/// println!("{} ({:.2}%)", prediction.label, prediction.confidence);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct WasteClassifier {
    pub(crate) labels: LabelSet,
    pub(crate) preprocessor: Preprocessor,
    pub(crate) backbone: Arc<dyn FeatureExtractor>,
    pub(crate) head: ClassificationHead,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<WasteClassifier>();
    }
};

impl WasteClassifier {
    /// Creates a new ClassifierBuilder for fluent construction
    pub fn builder() -> super::builder::ClassifierBuilder {
        super::builder::ClassifierBuilder::new()
    }

    /// Returns information about the classifier's current state
    pub fn info(&self) -> super::ClassifierInfo {
        super::ClassifierInfo {
            backbone_name: self.backbone.name().to_string(),
            num_classes: self.labels.len(),
            class_labels: self.labels.as_slice().to_vec(),
            feature_dim: self.head.input_dim(),
            hidden_units: self.head.hidden_dim(),
            preprocess: *self.preprocessor.spec(),
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Classifies an encoded image (JPEG, PNG, ...).
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction, ClassifierError> {
        let input = self.preprocessor.apply_bytes(bytes)?;
        self.predict_prepared(&input)
    }

    pub fn predict_image(&self, image: &DynamicImage) -> Result<Prediction, ClassifierError> {
        let input = self.preprocessor.apply_image(image);
        self.predict_prepared(&input)
    }

    /// Classifies a tensor in any range or size; it is brought into the artifact's
    /// transform first, which leaves already-prepared tensors untouched.
    pub fn predict_tensor(&self, input: InputTensor) -> Result<Prediction, ClassifierError> {
        let input = self.preprocessor.apply(input)?;
        self.predict_prepared(&input)
    }

    fn predict_prepared(&self, input: &InputTensor) -> Result<Prediction, ClassifierError> {
        let features = self.backbone.extract(input)?;
        if features.len() != self.head.input_dim() {
            return Err(ClassifierError::PredictionError(format!(
                "Backbone produced {} features, head expects {}",
                features.len(),
                self.head.input_dim()
            )));
        }
        self.decode(self.head.probabilities(&features))
    }

    fn decode(&self, probabilities: Array1<f32>) -> Result<Prediction, ClassifierError> {
        let label_index = argmax(probabilities.view()).ok_or_else(|| {
            ClassifierError::PredictionError("Model produced no finite probabilities".into())
        })?;
        let label = self.labels.decode(label_index)?.to_string();
        let to_percent = |p: f32| (p * 100.0).clamp(0.0, 100.0);

        Ok(Prediction {
            label_index,
            label,
            confidence: to_percent(probabilities[label_index]),
            probabilities: self
                .labels
                .iter()
                .zip(probabilities.iter())
                .map(|(label, &p)| (label.to_string(), to_percent(p)))
                .collect(),
        })
    }
}
