mod backbone;
pub mod builder;
#[allow(clippy::module_inception)]
mod classifier;
mod error;
mod head;
pub(crate) mod utils;

pub use backbone::{FeatureExtractor, OnnxBackbone};
pub use builder::ClassifierBuilder;
pub use classifier::{Prediction, WasteClassifier};
pub use error::ClassifierError;
pub use head::{ClassificationHead, DenseLayer, HeadWeights};
pub(crate) use head::{cross_entropy, HeadGradients};

use crate::preprocess::PreprocessSpec;

/// Information about the current state and configuration of a classifier
#[derive(Debug, Clone)]
pub struct ClassifierInfo {
    /// Name of the frozen feature extractor
    pub backbone_name: String,
    /// Number of classes the head was trained on
    pub num_classes: usize,
    /// Labels in output-index order
    pub class_labels: Vec<String>,
    /// Size of the pooled backbone features
    pub feature_dim: usize,
    pub hidden_units: usize,
    /// Transform applied to every input
    pub preprocess: PreprocessSpec,
}
