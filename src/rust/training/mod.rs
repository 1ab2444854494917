//! Offline transfer learning: scan a labelled image directory, split it
//! reproducibly, extract frozen backbone features and fit the classification head.

pub mod dataset;
pub mod metrics;
mod optimizer;
mod trainer;

pub use dataset::{DatasetError, ImageDataset, Sample, Split, IMAGE_EXTENSIONS};
pub use metrics::{
    AverageMetrics, ClassMetrics, ClassificationReport, ConfusionMatrix, EpochMetrics, TrainingSummary,
};
pub use trainer::{FeatureSet, Trainer, TrainingConfig, TrainingError};
