use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierError;

/// The ordered list of categories a trained head can emit.
///
/// Index `i` of the head's output vector always decodes to `labels[i]`. The set is
/// derived once from the dataset layout and then travels inside the model artifact,
/// so inference never decodes against a list maintained by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    /// Creates a label set from an explicit ordering.
    ///
    /// # Errors
    /// - `ValidationError` if the list is empty, holds an empty name or a duplicate
    pub fn new(labels: Vec<impl Into<String>>) -> Result<Self, ClassifierError> {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(ClassifierError::ValidationError("Label set cannot be empty".into()));
        }
        if let Some(pos) = labels.iter().position(|l| l.trim().is_empty()) {
            return Err(ClassifierError::ValidationError(
                format!("Label {} cannot be empty", pos + 1)
            ));
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(ClassifierError::ValidationError(
                    format!("Duplicate label '{}'", label)
                ));
            }
        }
        Ok(Self { labels })
    }

    /// Creates a label set ordered lexicographically, whatever the input order.
    pub fn sorted(labels: Vec<impl Into<String>>) -> Result<Self, ClassifierError> {
        let mut labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        labels.sort();
        Self::new(labels)
    }

    /// Reads the category names from the immediate subdirectories of a dataset root.
    ///
    /// Hidden directories are skipped. The result is sorted lexicographically.
    pub fn from_dataset_dir(root: &Path) -> Result<Self, ClassifierError> {
        let entries = fs::read_dir(root).map_err(|e| {
            ClassifierError::ValidationError(format!("Cannot read dataset directory {:?}: {}", root, e))
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ClassifierError::ValidationError(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if entry.path().is_dir() {
                names.push(name);
            }
        }
        Self::sorted(names)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Decodes an output index into its category name.
    pub fn decode(&self, index: usize) -> Result<&str, ClassifierError> {
        self.labels.get(index).map(String::as_str).ok_or_else(|| {
            ClassifierError::PredictionError(format!(
                "Output index {} is outside the label set ({} labels)",
                index,
                self.labels.len()
            ))
        })
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }
}

impl TryFrom<Vec<String>> for LabelSet {
    type Error = ClassifierError;

    fn try_from(labels: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(labels)
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(set: LabelSet) -> Self {
        set.labels
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.labels.join(", "))
    }
}
