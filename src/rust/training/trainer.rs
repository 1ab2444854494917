use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::dataset::{DatasetError, ImageDataset, Sample};
use super::metrics::{ClassificationReport, ConfusionMatrix, EpochMetrics, TrainingSummary};
use super::optimizer::Adam;
use crate::artifact::{BackboneRecord, ModelArtifact};
use crate::classifier::{cross_entropy, ClassificationHead, ClassifierError, FeatureExtractor};
use crate::classifier::utils::argmax;
use crate::labels::LabelSet;
use crate::preprocess::{PreprocessSpec, Preprocessor};

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),
    #[error("Cannot use training image {path:?}: {source}")]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: ClassifierError,
    },
    #[error("The training partition is empty")]
    EmptyTrainingSet,
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Hyperparameters of the head fit. Defaults follow the reference recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    pub validation_split: f32,
    pub seed: u64,
    pub dropout: f32,
    pub hidden_units: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            epochs: 10,
            learning_rate: 1e-4,
            validation_split: 0.2,
            seed: 123,
            dropout: 0.3,
            hidden_units: 128,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), TrainingError> {
        if self.batch_size == 0 || self.epochs == 0 || self.hidden_units == 0 {
            return Err(TrainingError::InvalidConfig(
                "batch size, epochs and hidden units must be positive".into(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainingError::InvalidConfig(format!("learning rate {}", self.learning_rate)));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(TrainingError::InvalidConfig(format!(
                "validation split {} not in [0, 1)",
                self.validation_split
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TrainingError::InvalidConfig(format!("dropout {} not in [0, 1)", self.dropout)));
        }
        Ok(())
    }
}

/// Pooled backbone features for a set of samples.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub features: Array2<f32>,
    pub labels: Vec<usize>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Fits a classification head on top of a frozen backbone.
///
/// The backbone is never updated, so every image is run through it exactly once and
/// the epochs iterate over cached features.
pub struct Trainer<'a> {
    config: TrainingConfig,
    backbone: &'a dyn FeatureExtractor,
    preprocessor: Preprocessor,
}

impl<'a> Trainer<'a> {
    pub fn new(config: TrainingConfig, backbone: &'a dyn FeatureExtractor) -> Result<Self, TrainingError> {
        config.validate()?;
        let preprocessor = Preprocessor::new(PreprocessSpec::new(backbone.expected_scaling()))?;
        Ok(Self { config, backbone, preprocessor })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Runs the whole pipeline on a `root/<category>/<image>` directory.
    ///
    /// The dataset layout is checked before any image is decoded, so a missing or
    /// empty dataset fails without spending backbone compute.
    pub fn train(&self, dataset_root: impl AsRef<Path>) -> Result<ModelArtifact, TrainingError> {
        let dataset = ImageDataset::scan(dataset_root)?;
        let split = dataset.split(self.config.validation_split, self.config.seed);
        if split.train.is_empty() {
            return Err(TrainingError::EmptyTrainingSet);
        }
        info!(
            "Using {} files for training, {} for validation",
            split.train.len(),
            split.validation.len()
        );

        let train = self.extract_features(&split.train)?;
        let validation = self.extract_features(&split.validation)?;

        let (head, mut summary) = self.fit(dataset.labels(), &train, &validation)?;
        summary.class_counts = dataset
            .labels()
            .iter()
            .map(str::to_string)
            .zip(dataset.class_counts())
            .collect();

        let backbone = BackboneRecord {
            name: self.backbone.name().to_string(),
            feature_dim: self.backbone.feature_dim(),
            scaling: self.backbone.expected_scaling(),
            file: None,
            sha256: None,
        };
        Ok(ModelArtifact::new(
            dataset.labels().clone(),
            *self.preprocessor.spec(),
            backbone,
            head.to_weights(),
            Some(summary),
        )?)
    }

    /// Decodes, preprocesses and runs each sample through the backbone.
    pub fn extract_features(&self, samples: &[Sample]) -> Result<FeatureSet, TrainingError> {
        let dim = self.backbone.feature_dim();
        let mut features = Array2::zeros((samples.len(), dim));
        let mut labels = Vec::with_capacity(samples.len());

        for (row, sample) in samples.iter().enumerate() {
            let unreadable = |source| TrainingError::UnreadableImage {
                path: sample.path.clone(),
                source,
            };
            let bytes = fs::read(&sample.path)
                .map_err(|e| unreadable(ClassifierError::ImageError(e.to_string())))?;
            let input = self.preprocessor.apply_bytes(&bytes).map_err(unreadable)?;
            let vector = self.backbone.extract(&input).map_err(unreadable)?;
            if vector.len() != dim {
                return Err(TrainingError::Classifier(ClassifierError::ModelError(format!(
                    "Backbone produced {} features, expected {}",
                    vector.len(),
                    dim
                ))));
            }
            features.row_mut(row).assign(&vector);
            labels.push(sample.label);

            if (row + 1) % 100 == 0 {
                debug!("Extracted features for {}/{} images", row + 1, samples.len());
            }
        }
        Ok(FeatureSet { features, labels })
    }

    /// Trains a fresh head on cached features and evaluates it on the validation set.
    pub fn fit(
        &self,
        labels: &LabelSet,
        train: &FeatureSet,
        validation: &FeatureSet,
    ) -> Result<(ClassificationHead, TrainingSummary), TrainingError> {
        if train.is_empty() {
            return Err(TrainingError::EmptyTrainingSet);
        }
        if train.labels.iter().chain(&validation.labels).any(|&l| l >= labels.len()) {
            return Err(TrainingError::Classifier(ClassifierError::ValidationError(
                "Sample label outside the label set".into(),
            )));
        }

        let cfg = &self.config;
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut head = ClassificationHead::init(
            train.features.ncols(),
            cfg.hidden_units,
            labels.len(),
            cfg.dropout,
            &mut rng,
        );
        let mut adam = Adam::new(cfg.learning_rate);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut epochs = Vec::with_capacity(cfg.epochs);

        for epoch in 1..=cfg.epochs {
            order.shuffle(&mut rng);
            let mut loss_sum = 0.0;
            let mut correct = 0;

            for batch in order.chunks(cfg.batch_size) {
                let x = train.features.select(Axis(0), batch);
                let y: Vec<usize> = batch.iter().map(|&i| train.labels[i]).collect();

                let cache = head.forward_train(&x, &mut rng);
                let (loss, grads) = head.backward(&cache, &y);
                correct += count_correct(&cache.probs, &y);
                loss_sum += loss * y.len() as f32;
                adam.step(&mut head, &grads);
            }

            let (val_loss, val_accuracy) = if validation.is_empty() {
                (None, None)
            } else {
                let probs = head.predict_proba(&validation.features);
                (
                    Some(cross_entropy(&probs, &validation.labels)),
                    Some(count_correct(&probs, &validation.labels) as f32 / validation.len() as f32),
                )
            };

            let metrics = EpochMetrics {
                epoch,
                train_loss: loss_sum / train.len() as f32,
                train_accuracy: correct as f32 / train.len() as f32,
                val_loss,
                val_accuracy,
            };
            info!(
                "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {} - val_accuracy: {}",
                epoch,
                cfg.epochs,
                metrics.train_loss,
                metrics.train_accuracy,
                format_optional(metrics.val_loss),
                format_optional(metrics.val_accuracy)
            );
            epochs.push(metrics);
        }

        let (confusion, report) = if validation.is_empty() {
            (None, None)
        } else {
            let predicted = predicted_labels(&head.predict_proba(&validation.features));
            let matrix = ConfusionMatrix::from_predictions(
                labels.as_slice().to_vec(),
                &validation.labels,
                &predicted,
            );
            let report = ClassificationReport::from_confusion(&matrix);
            (Some(matrix), Some(report))
        };

        let summary = TrainingSummary {
            seed: cfg.seed,
            train_samples: train.len(),
            validation_samples: validation.len(),
            class_counts: Vec::new(),
            epochs,
            confusion,
            report,
        };
        Ok((head, summary))
    }
}

fn predicted_labels(probs: &Array2<f32>) -> Vec<usize> {
    probs
        .axis_iter(Axis(0))
        .map(|row| argmax(row).unwrap_or(0))
        .collect()
}

fn count_correct(probs: &Array2<f32>, labels: &[usize]) -> usize {
    predicted_labels(probs)
        .iter()
        .zip(labels)
        .filter(|(p, l)| p == l)
        .count()
}

fn format_optional(value: Option<f32>) -> String {
    value.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use crate::preprocess::{InputTensor, PixelScaling};

    #[derive(Debug)]
    struct MeanColor;

    impl FeatureExtractor for MeanColor {
        fn name(&self) -> &str {
            "mean-color"
        }
        fn feature_dim(&self) -> usize {
            3
        }
        fn expected_scaling(&self) -> PixelScaling {
            PixelScaling::UnitRange
        }
        fn extract(&self, input: &InputTensor) -> Result<Array1<f32>, ClassifierError> {
            self.check_input(input)?;
            Ok(input.data().mean_axis(Axis(1)).unwrap().mean_axis(Axis(1)).unwrap().row(0).to_owned())
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(TrainingConfig::default().validate().is_ok());
        let bad = TrainingConfig { validation_split: 1.0, ..TrainingConfig::default() };
        assert!(bad.validate().is_err());
        let bad = TrainingConfig { learning_rate: 0.0, ..TrainingConfig::default() };
        assert!(bad.validate().is_err());
        let bad = TrainingConfig { batch_size: 0, ..TrainingConfig::default() };
        assert!(Trainer::new(bad, &MeanColor).is_err());
    }

    #[test]
    fn test_fit_separates_features() {
        let labels = LabelSet::new(vec!["dark", "light"]).unwrap();
        let features = Array2::from_shape_fn((20, 3), |(i, _)| if i % 2 == 0 { 0.1 } else { 0.9 });
        let train = FeatureSet {
            features,
            labels: (0..20).map(|i| i % 2).collect(),
        };
        let validation = FeatureSet {
            features: Array2::from_shape_vec((2, 3), vec![0.1, 0.1, 0.1, 0.9, 0.9, 0.9]).unwrap(),
            labels: vec![0, 1],
        };
        let config = TrainingConfig {
            batch_size: 4,
            epochs: 60,
            learning_rate: 0.01,
            dropout: 0.0,
            hidden_units: 16,
            ..TrainingConfig::default()
        };
        let trainer = Trainer::new(config, &MeanColor).unwrap();
        let (head, summary) = trainer.fit(&labels, &train, &validation).unwrap();

        assert_eq!(summary.epochs.len(), 60);
        assert_eq!(summary.final_epoch().unwrap().val_accuracy, Some(1.0));
        assert_eq!(summary.report.as_ref().unwrap().accuracy, 1.0);
        assert_eq!(head.num_classes(), 2);
    }

    #[test]
    fn test_fit_rejects_empty_training_set() {
        let labels = LabelSet::new(vec!["a"]).unwrap();
        let empty = FeatureSet { features: Array2::zeros((0, 3)), labels: vec![] };
        let trainer = Trainer::new(TrainingConfig::default(), &MeanColor).unwrap();
        assert!(matches!(
            trainer.fit(&labels, &empty, &empty),
            Err(TrainingError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn test_missing_dataset_fails_fast() {
        let trainer = Trainer::new(TrainingConfig::default(), &MeanColor).unwrap();
        assert!(matches!(
            trainer.train("/nonexistent/dataset"),
            Err(TrainingError::Dataset(DatasetError::NotFound(_)))
        ));
    }
}
