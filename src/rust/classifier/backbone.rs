use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use log::info;
use ndarray::{Array1, Ix2, Ix4};
use ort::session::Session;
use ort::value::Tensor;

use super::error::ClassifierError;
use super::utils::global_average_pool;
use crate::preprocess::{InputTensor, PixelRange, PixelScaling, PreprocessSpec};
use crate::runtime::{create_session_builder, RuntimeConfig};

/// Provides pooled image features from a frozen, pretrained network.
///
/// The extractor states which pixel scaling it was pretrained with; the training
/// pipeline records that scaling in the artifact and the classifier refuses to pair an
/// artifact with a backbone expecting a different one.
pub trait FeatureExtractor: Send + Sync + fmt::Debug {
    /// Short identifier recorded in the artifact manifest
    fn name(&self) -> &str;

    /// Length of the vector returned by [`extract`](Self::extract)
    fn feature_dim(&self) -> usize;

    /// Pixel range the network was pretrained on
    fn expected_scaling(&self) -> PixelScaling;

    /// Path of the serialized network, when there is one to bundle with the artifact
    fn source_path(&self) -> Option<&Path> {
        None
    }

    /// Runs the frozen network on one preprocessed tensor.
    ///
    /// # Errors
    /// - `ValidationError` if the tensor was not scaled the way the backbone expects
    /// - `ModelError` if the network fails to run
    fn extract(&self, input: &InputTensor) -> Result<Array1<f32>, ClassifierError>;

    /// Checks that a tensor is in the range this backbone was pretrained on.
    fn check_input(&self, input: &InputTensor) -> Result<(), ClassifierError> {
        let expected = PixelRange::Scaled(self.expected_scaling());
        if input.range() != expected {
            return Err(ClassifierError::ValidationError(format!(
                "Backbone '{}' expects {:?} input, got {:?}",
                self.name(),
                expected,
                input.range()
            )));
        }
        Ok(())
    }
}

/// A backbone exported to ONNX, executed through ONNX Runtime.
///
/// The network must take one NHWC `[1, 224, 224, 3]` float input and produce either
/// pooled features `[1, F]` or a feature map `[1, H, W, F]`, which is averaged over
/// its spatial axes.
pub struct OnnxBackbone {
    name: String,
    path: PathBuf,
    session: Session,
    scaling: PixelScaling,
    feature_dim: usize,
}

impl fmt::Debug for OnnxBackbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxBackbone")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("scaling", &self.scaling)
            .field("feature_dim", &self.feature_dim)
            .finish()
    }
}

impl OnnxBackbone {
    /// Loads the ONNX file and infers the feature dimension with a probe input.
    pub fn load(
        path: impl AsRef<Path>,
        scaling: PixelScaling,
        config: &RuntimeConfig,
    ) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ClassifierError::BuildError(format!("Backbone file not found: {:?}", path)));
        }

        let session = create_session_builder(config)?.commit_from_file(path)?;
        Self::validate_model(&session)?;
        info!("Backbone structure validated successfully");

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "backbone".to_string());

        let mut backbone = Self {
            name,
            path: path.to_path_buf(),
            session,
            scaling,
            feature_dim: 0,
        };

        let spec = PreprocessSpec::new(scaling);
        let [h, w, c] = spec.input_shape();
        let probe = InputTensor::from_scaled(ndarray::Array4::zeros((1, h, w, c)), scaling)?;
        backbone.feature_dim = backbone.run(&probe)?.len();
        info!("Inferred feature dimension from backbone: {}", backbone.feature_dim);

        Ok(backbone)
    }

    fn validate_model(session: &Session) -> Result<(), ClassifierError> {
        if session.inputs.len() != 1 {
            return Err(ClassifierError::ModelError(format!(
                "Backbone must have exactly 1 image input, found {}",
                session.inputs.len()
            )));
        }
        if session.outputs.is_empty() {
            return Err(ClassifierError::ModelError(
                "Backbone must have at least 1 output for features".to_string(),
            ));
        }
        Ok(())
    }

    fn run(&self, input: &InputTensor) -> Result<Array1<f32>, ClassifierError> {
        let input_dyn = input.data().clone().into_dyn();
        let pixels = input_dyn.as_standard_layout();

        let mut input_tensors = HashMap::new();
        input_tensors.insert(
            self.session.inputs[0].name.as_str(),
            Tensor::from_array(&pixels)
                .map_err(|e| ClassifierError::ModelError(format!("Failed to create input tensor: {}", e)))?,
        );

        let outputs = self.session.run(input_tensors)
            .map_err(|e| ClassifierError::ModelError(format!("Failed to run backbone: {}", e)))?;
        let output = outputs[0].try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::ModelError(format!("Failed to extract output tensor: {}", e)))?;

        match output.ndim() {
            2 => {
                let pooled = output
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| ClassifierError::ModelError(e.to_string()))?;
                Ok(pooled.row(0).to_owned())
            }
            4 => {
                let map = output
                    .into_dimensionality::<Ix4>()
                    .map_err(|e| ClassifierError::ModelError(e.to_string()))?;
                Ok(global_average_pool(map.index_axis(ndarray::Axis(0), 0)))
            }
            n => Err(ClassifierError::ModelError(format!(
                "Unsupported backbone output rank {} (expected 2 or 4)",
                n
            ))),
        }
    }
}

impl FeatureExtractor for OnnxBackbone {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    fn expected_scaling(&self) -> PixelScaling {
        self.scaling
    }

    fn source_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn extract(&self, input: &InputTensor) -> Result<Array1<f32>, ClassifierError> {
        self.check_input(input)?;
        self.run(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_backbone_file() {
        let err = OnnxBackbone::load(
            "/nonexistent/backbone.onnx",
            PixelScaling::SignedUnit,
            &RuntimeConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ClassifierError::BuildError(_)));
    }
}
