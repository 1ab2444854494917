//! The append-only prediction log and the saved-image directory.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDateTime};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `YYYY-MM-DD HH:MM:SS`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// One row of `history.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub image_path: String,
    pub prediction: String,
    /// Percentage in `[0, 100]`, two decimals
    pub confidence: f64,
    /// Local time, [`TIMESTAMP_FORMAT`]
    pub timestamp: String,
}

impl PredictionRecord {
    pub fn new(
        image_path: impl Into<String>,
        prediction: impl Into<String>,
        confidence: f32,
        timestamp: NaiveDateTime,
    ) -> Result<Self, HistoryError> {
        let prediction = prediction.into();
        if prediction.is_empty() {
            return Err(HistoryError::InvalidRecord("prediction label cannot be empty".into()));
        }
        if !confidence.is_finite() || !(0.0..=100.0).contains(&confidence) {
            return Err(HistoryError::InvalidRecord(format!(
                "confidence {} outside [0, 100]",
                confidence
            )));
        }
        Ok(Self {
            image_path: image_path.into(),
            prediction,
            confidence: (confidence as f64 * 100.0).round() / 100.0,
            timestamp: timestamp.format(TIMESTAMP_FORMAT).to_string(),
        })
    }

    /// Stamps the record with the current local time.
    pub fn now(
        image_path: impl Into<String>,
        prediction: impl Into<String>,
        confidence: f32,
    ) -> Result<Self, HistoryError> {
        Self::new(image_path, prediction, confidence, Local::now().naive_local())
    }

    /// `YYYY-MM-DD` part of the timestamp.
    pub fn day(&self) -> &str {
        self.timestamp.get(..10).unwrap_or(&self.timestamp)
    }

    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()
    }
}

/// Whether a destructive action was explicitly confirmed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    NotConfirmed,
}

impl From<bool> for Confirmation {
    fn from(confirmed: bool) -> Self {
        if confirmed {
            Self::Confirmed
        } else {
            Self::NotConfirmed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The log file was removed
    Deleted { rows: usize },
    /// Not confirmed; the log was left as it was
    Kept { rows: usize },
    /// There was no log to delete
    NothingToDelete,
}

/// Handle on the CSV prediction log.
///
/// Appends go through a mutex shared by every clone of the handle and are written
/// with `O_APPEND`, so concurrent submissions never rewrite or interleave rows. Keep
/// one handle per log file per process.
#[derive(Debug, Clone)]
pub struct PredictionLog {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl PredictionLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Appends one record, writing the header first if the file is new or empty.
    pub fn append(&self, record: &PredictionRecord) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        log::debug!("Appended prediction '{}' to {:?}", record.prediction, self.path);
        Ok(())
    }

    /// All records in append order. A missing log is an empty history.
    pub fn read_all(&self) -> Result<Vec<PredictionRecord>, HistoryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        let mut records = Vec::new();
        for record in reader.deserialize() {
            records.push(record?);
        }
        Ok(records)
    }

    pub fn len(&self) -> Result<usize, HistoryError> {
        Ok(self.read_all()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, HistoryError> {
        Ok(self.len()? == 0)
    }

    /// Raw CSV content, header included. A missing log exports as a header-only file.
    pub fn export_csv(&self) -> Result<Vec<u8>, HistoryError> {
        if self.path.exists() {
            return Ok(fs::read(&self.path)?);
        }
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["image_path", "prediction", "confidence", "timestamp"])?;
        writer
            .into_inner()
            .map_err(|e| HistoryError::IoError(io::Error::new(io::ErrorKind::Other, e.to_string())))
    }

    /// Deletes the whole log, only when `confirmation` is `Confirmed`. There is no undo.
    pub fn clear(&self, confirmation: Confirmation) -> Result<ClearOutcome, HistoryError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.path.exists() {
            return Ok(ClearOutcome::NothingToDelete);
        }
        let rows = self.count_rows();
        match confirmation {
            Confirmation::NotConfirmed => {
                log::info!("Log deletion not confirmed, keeping {} rows", rows);
                Ok(ClearOutcome::Kept { rows })
            }
            Confirmation::Confirmed => {
                fs::remove_file(&self.path)?;
                log::warn!("Deleted prediction log {:?} ({} rows)", self.path, rows);
                Ok(ClearOutcome::Deleted { rows })
            }
        }
    }

    /// Data rows as raw CSV records, without parsing fields, so a damaged row still
    /// counts and never blocks deletion.
    fn count_rows(&self) -> usize {
        csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .map(|mut reader| reader.records().count())
            .unwrap_or(0)
    }
}

/// Directory holding one copy of every classified image.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Saves the image as JPEG under a fresh UUID, so identical uploads never collide.
    pub fn save(&self, image: &DynamicImage) -> Result<PathBuf, HistoryError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.jpg", Uuid::new_v4().simple()));
        image.to_rgb8().save_with_format(&path, ImageFormat::Jpeg)?;
        Ok(path)
    }

    pub fn remove(&self, path: &Path) -> Result<(), HistoryError> {
        if path.starts_with(&self.dir) && path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
