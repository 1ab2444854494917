use std::fmt;

use serde::{Deserialize, Serialize};

/// Loss and accuracy after one pass over the training partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

/// Counts indexed `[true label][predicted label]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(labels: Vec<String>) -> Self {
        let n = labels.len();
        Self { labels, counts: vec![vec![0; n]; n] }
    }

    pub fn from_predictions(labels: Vec<String>, y_true: &[usize], y_pred: &[usize]) -> Self {
        let mut matrix = Self::new(labels);
        for (&t, &p) in y_true.iter().zip(y_pred) {
            matrix.record(t, p);
        }
        matrix
    }

    /// Out-of-range indices are ignored.
    pub fn record(&mut self, actual: usize, predicted: usize) {
        if let Some(cell) = self.counts.get_mut(actual).and_then(|row| row.get_mut(predicted)) {
            *cell += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.counts.len()).map(|i| self.counts[i][i]).sum()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.labels.iter().map(String::len).max().unwrap_or(0).max(6);
        write!(f, "{:>width$}", "", width = width)?;
        for label in &self.labels {
            write!(f, " {:>width$}", label, width = width)?;
        }
        writeln!(f)?;
        for (label, row) in self.labels.iter().zip(&self.counts) {
            write!(f, "{:>width$}", label, width = width)?;
            for count in row {
                write!(f, " {:>width$}", count, width = width)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageMetrics {
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

/// Per-class precision, recall and F1 with overall accuracy and averages.
///
/// A ratio whose denominator is zero is reported as 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f32,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
    pub support: usize,
}

fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        0.0
    } else {
        num as f32 / den as f32
    }
}

impl ClassificationReport {
    pub fn from_confusion(matrix: &ConfusionMatrix) -> Self {
        let n = matrix.labels.len();
        let classes: Vec<ClassMetrics> = (0..n)
            .map(|i| {
                let tp = matrix.counts[i][i];
                let support: usize = matrix.counts[i].iter().sum();
                let predicted: usize = (0..n).map(|r| matrix.counts[r][i]).sum();
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label: matrix.labels[i].clone(),
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let total = matrix.total();
        let mean = |f: fn(&ClassMetrics) -> f32| {
            if classes.is_empty() {
                0.0
            } else {
                classes.iter().map(f).sum::<f32>() / classes.len() as f32
            }
        };
        let weighted = |f: fn(&ClassMetrics) -> f32| {
            if total == 0 {
                0.0
            } else {
                classes.iter().map(|c| f(c) * c.support as f32).sum::<f32>() / total as f32
            }
        };

        Self {
            accuracy: ratio(matrix.correct(), total),
            macro_avg: AverageMetrics {
                precision: mean(|c| c.precision),
                recall: mean(|c| c.recall),
                f1: mean(|c| c.f1),
            },
            weighted_avg: AverageMetrics {
                precision: weighted(|c| c.precision),
                recall: weighted(|c| c.recall),
                f1: weighted(|c| c.f1),
            },
            support: total,
            classes,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.label.len())
            .max()
            .unwrap_or(0)
            .max("weighted avg".len());
        writeln!(f, "{:>width$} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support", width = width)?;
        writeln!(f)?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                c.label, c.precision, c.recall, c.f1, c.support,
                width = width
            )?;
        }
        writeln!(f)?;
        writeln!(f, "{:>width$} {:>9} {:>9} {:>9.2} {:>9}", "accuracy", "", "", self.accuracy, self.support, width = width)?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1, self.support,
                width = width
            )?;
        }
        Ok(())
    }
}

/// Everything recorded about a training run, stored in the artifact manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub seed: u64,
    pub train_samples: usize,
    pub validation_samples: usize,
    /// Images per label across the whole dataset
    pub class_counts: Vec<(String, usize)>,
    pub epochs: Vec<EpochMetrics>,
    pub confusion: Option<ConfusionMatrix>,
    pub report: Option<ClassificationReport>,
}

impl TrainingSummary {
    pub fn final_epoch(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        vec!["glass".into(), "metal".into(), "paper".into()]
    }

    #[test]
    fn test_confusion_counts() {
        let m = ConfusionMatrix::from_predictions(labels(), &[0, 0, 1, 2, 2], &[0, 1, 1, 2, 0]);
        assert_eq!(m.counts, vec![vec![1, 1, 0], vec![0, 1, 0], vec![1, 0, 1]]);
        assert_eq!(m.total(), 5);
        assert_eq!(m.correct(), 3);
    }

    #[test]
    fn test_report_values() {
        let m = ConfusionMatrix::from_predictions(labels(), &[0, 0, 1, 2, 2], &[0, 1, 1, 2, 0]);
        let report = ClassificationReport::from_confusion(&m);

        assert!((report.accuracy - 0.6).abs() < 1e-6);
        let glass = &report.classes[0];
        assert!((glass.precision - 0.5).abs() < 1e-6);
        assert!((glass.recall - 0.5).abs() < 1e-6);
        assert_eq!(glass.support, 2);
        let metal = &report.classes[1];
        assert!((metal.precision - 0.5).abs() < 1e-6);
        assert!((metal.recall - 1.0).abs() < 1e-6);

        let text = report.to_string();
        assert!(text.contains("weighted avg"));
        assert!(text.contains("glass"));
    }

    #[test]
    fn test_report_zero_division() {
        let m = ConfusionMatrix::from_predictions(labels(), &[0, 0], &[0, 0]);
        let report = ClassificationReport::from_confusion(&m);
        assert_eq!(report.classes[1].precision, 0.0);
        assert_eq!(report.classes[1].f1, 0.0);
        assert_eq!(report.accuracy, 1.0);
    }
}
