use ort::Error as OrtError;

/// Represents the different types of errors that can occur while building or running the classifier.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// The submitted image could not be decoded or converted
    #[error("Image error: {0}")]
    ImageError(String),
    /// Error occurred while loading or running the backbone model
    #[error("Model error: {0}")]
    ModelError(String),
    /// Error occurred during the build phase
    #[error("Build error: {0}")]
    BuildError(String),
    /// Error occurred while making predictions
    #[error("Prediction error: {0}")]
    PredictionError(String),
    /// Error occurred due to invalid input parameters
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<OrtError> for ClassifierError {
    fn from(err: OrtError) -> Self {
        ClassifierError::BuildError(err.to_string())
    }
}

impl From<image::ImageError> for ClassifierError {
    fn from(err: image::ImageError) -> Self {
        ClassifierError::ImageError(err.to_string())
    }
}
