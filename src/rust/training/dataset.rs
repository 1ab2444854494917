use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::classifier::ClassifierError;
use crate::labels::LabelSet;

/// File extensions picked up when scanning a category directory (case-insensitive).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif"];

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Dataset directory not found: {0:?}")]
    NotFound(PathBuf),
    #[error("Dataset directory {0:?} has no category subdirectories")]
    NoCategories(PathBuf),
    #[error("Dataset directory {0:?} contains no images")]
    NoImages(PathBuf),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid label set: {0}")]
    Labels(#[from] ClassifierError),
}

/// One labelled image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    /// Index into the dataset's label set
    pub label: usize,
}

/// Train/validation partition of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<Sample>,
    pub validation: Vec<Sample>,
}

/// An image directory laid out as `root/<category>/<image>`.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    root: PathBuf,
    labels: LabelSet,
    samples: Vec<Sample>,
}

impl ImageDataset {
    /// Scans the dataset layout without decoding any image.
    ///
    /// The label set is the lexically sorted list of category directories; samples are
    /// listed class by class, each class in path order.
    ///
    /// # Errors
    /// - `NotFound` if `root` is not a directory
    /// - `NoCategories` if it has no (non-hidden) subdirectory
    /// - `NoImages` if no category holds an image
    pub fn scan(root: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(DatasetError::NotFound(root));
        }

        let mut categories = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') && entry.path().is_dir() {
                categories.push(name);
            }
        }
        if categories.is_empty() {
            return Err(DatasetError::NoCategories(root));
        }
        let labels = LabelSet::sorted(categories)?;

        let mut samples = Vec::new();
        for (index, label) in labels.iter().enumerate() {
            let mut files = Vec::new();
            collect_images(&root.join(label), &mut files)?;
            files.sort();
            if files.is_empty() {
                warn!("Category '{}' has no images", label);
            }
            samples.extend(files.into_iter().map(|path| Sample { path, label: index }));
        }
        if samples.is_empty() {
            return Err(DatasetError::NoImages(root));
        }

        info!("Found {} images belonging to {} classes: {}", samples.len(), labels.len(), labels);
        Ok(Self { root, labels, samples })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of images per label, in label order.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.labels.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }

    /// Shuffles once with `seed` and holds out the last `floor(n * validation_split)`
    /// samples. The same seed on the same files always yields the same partition.
    pub fn split(&self, validation_split: f32, seed: u64) -> Split {
        let mut shuffled = self.samples.clone();
        let mut rng = StdRng::seed_from_u64(seed);
        shuffled.shuffle(&mut rng);

        let validation_len = ((shuffled.len() as f64) * validation_split as f64).floor() as usize;
        let validation = shuffled.split_off(shuffled.len() - validation_len.min(shuffled.len()));
        Split { train: shuffled, validation }
    }
}

fn collect_images(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(false);
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_images(&path, out)?;
        } else if is_image_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(classes: &[(&str, usize)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (class, count) in classes {
            let class_dir = dir.path().join(class);
            fs::create_dir_all(&class_dir).unwrap();
            for i in 0..*count {
                fs::write(class_dir.join(format!("{:03}.jpg", i)), b"x").unwrap();
            }
            fs::write(class_dir.join("notes.txt"), b"ignored").unwrap();
        }
        dir
    }

    #[test]
    fn test_scan_orders_labels_and_samples() {
        let dir = layout(&[("trash", 2), ("cardboard", 3), ("glass", 1)]);
        let dataset = ImageDataset::scan(dir.path()).unwrap();

        assert_eq!(dataset.labels().as_slice(), &["cardboard", "glass", "trash"]);
        assert_eq!(dataset.len(), 6);
        assert_eq!(dataset.class_counts(), vec![3, 1, 2]);
        assert_eq!(dataset.samples()[0].label, 0);
        assert!(dataset.samples()[0].path.ends_with("cardboard/000.jpg"));
    }

    #[test]
    fn test_missing_or_empty_dataset() {
        assert!(matches!(
            ImageDataset::scan("/nonexistent/dataset"),
            Err(DatasetError::NotFound(_))
        ));

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(ImageDataset::scan(empty.path()), Err(DatasetError::NoCategories(_))));

        let no_images = layout(&[("paper", 0)]);
        assert!(matches!(ImageDataset::scan(no_images.path()), Err(DatasetError::NoImages(_))));
    }

    #[test]
    fn test_split_is_reproducible() {
        let dir = layout(&[("metal", 10), ("paper", 10), ("plastic", 5)]);
        let dataset = ImageDataset::scan(dir.path()).unwrap();

        let a = dataset.split(0.2, 123);
        let b = dataset.split(0.2, 123);
        assert_eq!(a, b);
        assert_eq!(a.validation.len(), 5);
        assert_eq!(a.train.len(), 20);

        let c = dataset.split(0.2, 7);
        assert_ne!(a.validation, c.validation);
    }

    #[test]
    fn test_split_without_validation() {
        let dir = layout(&[("metal", 3)]);
        let dataset = ImageDataset::scan(dir.path()).unwrap();
        let split = dataset.split(0.0, 1);
        assert_eq!(split.train.len(), 3);
        assert!(split.validation.is_empty());
    }

    #[test]
    fn test_image_extensions() {
        assert!(is_image_file(Path::new("a/b.JPG")));
        assert!(is_image_file(Path::new("b.png")));
        assert!(!is_image_file(Path::new("b.txt")));
        assert!(!is_image_file(Path::new("jpg")));
    }
}
