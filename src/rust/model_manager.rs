use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::artifact::{ArtifactManifest, ModelArtifact};
use crate::classifier::{ClassifierError, HeadWeights};
use crate::config::AppConfig;

const CURRENT_FILE: &str = "CURRENT";
const MANIFEST_FILE: &str = "manifest.json";
const HEAD_FILE: &str = "head.json";
const BACKBONE_FILE: &str = "backbone.onnx";
const BACKBONES_DIR: &str = "backbones";
const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("No model has been published yet in {0:?}")]
    NoCurrentVersion(PathBuf),
    #[error("Model version not found: {0}")]
    NotFound(String),
    #[error("No earlier version to roll back to from {0}")]
    NoPreviousVersion(String),
    #[error("Download error: {0}")]
    DownloadError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid manifest: {0}")]
    ManifestError(#[from] serde_json::Error),
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(#[from] ClassifierError),
    #[error("Model verification failed")]
    VerificationFailed,
    #[error("Hash mismatch: expected {expected}, got {actual} for {file_type} file")]
    HashMismatch {
        file_type: String,
        expected: String,
        actual: String,
    },
}

/// A published version directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactVersion {
    pub id: String,
    pub dir: PathBuf,
}

/// A verified artifact together with where it lives on disk.
#[derive(Debug, Clone)]
pub struct LoadedVersion {
    pub id: String,
    pub dir: PathBuf,
    pub artifact: ModelArtifact,
    /// Bundled backbone network, if the artifact carries one
    pub backbone_path: Option<PathBuf>,
}

/// Stores trained artifacts as immutable version directories behind a `CURRENT` pointer.
///
/// ```text
/// models/
///   CURRENT                        -> "20261019T101500.123Z-1a2b3c4d"
///   20261019T101500.123Z-1a2b3c4d/
///     manifest.json  head.json  backbone.onnx
///   backbones/                     downloaded backbone cache
/// ```
///
/// Publishing never touches an existing version: the new one is written to a
/// `.partial` directory, verified, renamed into place, and only then does `CURRENT`
/// switch over (temp file + rename). Earlier versions stay available for rollback.
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    download_lock: Arc<Mutex<()>>,
    publish_lock: Arc<std::sync::Mutex<()>>,
}

impl ModelManager {
    /// Creates a new ModelManager with the default models directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_models_dir())
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        AppConfig::default_home().join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            download_lock: Arc::new(Mutex::new(())),
            publish_lock: Arc::new(std::sync::Mutex::new(())),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn version_dir(&self, id: &str) -> PathBuf {
        self.models_dir.join(id)
    }

    pub fn backbone_cache_path(&self, name: &str) -> PathBuf {
        self.models_dir.join(BACKBONES_DIR).join(format!("{}.onnx", name))
    }

    /// Writes `artifact` as a new version and makes it current.
    ///
    /// When `backbone_file` is given it is copied into the version directory and its
    /// hash recorded, so the version is self-contained.
    pub fn publish(
        &self,
        artifact: &ModelArtifact,
        backbone_file: Option<&Path>,
    ) -> Result<ArtifactVersion, ModelError> {
        artifact.validate()?;
        let _lock = self.publish_lock.lock().unwrap_or_else(|e| e.into_inner());

        let id = new_version_id();
        let staging = self.models_dir.join(format!("{}{}", id, PARTIAL_SUFFIX));
        log::info!("Staging model version {} at {:?}", id, staging);

        match self.write_version(&staging, artifact, backbone_file) {
            Ok(()) => {}
            Err(e) => {
                log::error!("Failed to stage model version {}: {}", id, e);
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        }

        let dir = self.version_dir(&id);
        fs::rename(&staging, &dir)?;
        self.set_current(&id)?;
        log::info!("Model version {} published and set as current", id);
        Ok(ArtifactVersion { id, dir })
    }

    fn write_version(
        &self,
        dir: &Path,
        artifact: &ModelArtifact,
        backbone_file: Option<&Path>,
    ) -> Result<(), ModelError> {
        fs::create_dir_all(dir)?;
        let mut artifact = artifact.clone();

        if let Some(source) = backbone_file {
            let target = dir.join(BACKBONE_FILE);
            log::info!("Bundling backbone {:?}", source);
            fs::copy(source, &target)?;
            artifact.backbone.file = Some(BACKBONE_FILE.to_string());
            artifact.backbone.sha256 = Some(sha256_file(&target)?);
        }

        let head_bytes = serde_json::to_vec(&artifact.head)?;
        fs::write(dir.join(HEAD_FILE), &head_bytes)?;

        let manifest = artifact.manifest(sha256_bytes(&head_bytes));
        fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;

        // Read back through the same path inference uses.
        Self::read_version_dir(dir)?;
        Ok(())
    }

    /// Lists published versions, oldest first.
    pub fn list_versions(&self) -> Result<Vec<ArtifactVersion>, ModelError> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.models_dir)? {
            let entry = entry?;
            let id = entry.file_name().to_string_lossy().to_string();
            let dir = entry.path();
            if id.ends_with(PARTIAL_SUFFIX) || id == BACKBONES_DIR || !dir.is_dir() {
                continue;
            }
            if dir.join(MANIFEST_FILE).exists() {
                versions.push(ArtifactVersion { id, dir });
            }
        }
        versions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(versions)
    }

    pub fn current_version(&self) -> Result<Option<String>, ModelError> {
        let pointer = self.models_dir.join(CURRENT_FILE);
        if !pointer.exists() {
            return Ok(None);
        }
        let id = fs::read_to_string(pointer)?.trim().to_string();
        Ok(if id.is_empty() { None } else { Some(id) })
    }

    /// Atomically points `CURRENT` at an existing version.
    pub fn set_current(&self, id: &str) -> Result<(), ModelError> {
        if !self.version_dir(id).join(MANIFEST_FILE).exists() {
            return Err(ModelError::NotFound(id.to_string()));
        }
        let tmp = self.models_dir.join(format!("{}.tmp", CURRENT_FILE));
        fs::write(&tmp, format!("{}\n", id))?;
        fs::rename(&tmp, self.models_dir.join(CURRENT_FILE))?;
        Ok(())
    }

    /// Switches `CURRENT` to the version published just before it.
    pub fn rollback(&self) -> Result<String, ModelError> {
        let current = self
            .current_version()?
            .ok_or_else(|| ModelError::NoCurrentVersion(self.models_dir.clone()))?;
        let versions = self.list_versions()?;
        let position = versions
            .iter()
            .position(|v| v.id == current)
            .ok_or_else(|| ModelError::NotFound(current.clone()))?;
        if position == 0 {
            return Err(ModelError::NoPreviousVersion(current));
        }
        let previous = versions[position - 1].id.clone();
        self.set_current(&previous)?;
        log::info!("Rolled back from {} to {}", current, previous);
        Ok(previous)
    }

    pub fn load_current(&self) -> Result<LoadedVersion, ModelError> {
        let id = self
            .current_version()?
            .ok_or_else(|| ModelError::NoCurrentVersion(self.models_dir.clone()))?;
        self.load_version(&id)
    }

    pub fn load_version(&self, id: &str) -> Result<LoadedVersion, ModelError> {
        let dir = self.version_dir(id);
        if !dir.join(MANIFEST_FILE).exists() {
            return Err(ModelError::NotFound(id.to_string()));
        }
        let (artifact, backbone_path) = Self::read_version_dir(&dir)?;
        log::info!("Loaded model version {} with labels {}", id, artifact.labels);
        Ok(LoadedVersion {
            id: id.to_string(),
            dir,
            artifact,
            backbone_path,
        })
    }

    /// Re-checks the hashes of a stored version. Returns false instead of failing when
    /// the content does not match.
    pub fn verify_version(&self, id: &str) -> Result<bool, ModelError> {
        match self.load_version(id) {
            Ok(_) => Ok(true),
            Err(ModelError::HashMismatch { .. })
            | Err(ModelError::VerificationFailed)
            | Err(ModelError::InvalidArtifact(_))
            | Err(ModelError::ManifestError(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_version_dir(dir: &Path) -> Result<(ModelArtifact, Option<PathBuf>), ModelError> {
        let manifest: ArtifactManifest = serde_json::from_slice(&fs::read(dir.join(MANIFEST_FILE))?)?;

        let head_bytes = fs::read(dir.join(HEAD_FILE))?;
        let head_hash = sha256_bytes(&head_bytes);
        if head_hash != manifest.head_sha256 {
            return Err(ModelError::HashMismatch {
                file_type: "head".to_string(),
                expected: manifest.head_sha256.clone(),
                actual: head_hash,
            });
        }
        let head: HeadWeights = serde_json::from_slice(&head_bytes)?;

        let backbone_path = match &manifest.backbone.file {
            Some(file) => {
                let path = dir.join(file);
                if !path.exists() {
                    log::error!("Bundled backbone missing at {:?}", path);
                    return Err(ModelError::VerificationFailed);
                }
                if let Some(expected) = &manifest.backbone.sha256 {
                    let actual = sha256_file(&path)?;
                    if &actual != expected {
                        return Err(ModelError::HashMismatch {
                            file_type: "backbone".to_string(),
                            expected: expected.clone(),
                            actual,
                        });
                    }
                }
                Some(path)
            }
            None => None,
        };

        Ok((ModelArtifact::from_parts(manifest, head)?, backbone_path))
    }

    /// Downloads a backbone network into the cache, verifying its SHA-256.
    ///
    /// An existing cached file that still verifies is reused unless `fresh` is set.
    pub async fn fetch_backbone(
        &self,
        name: &str,
        url: &str,
        expected_hash: &str,
        fresh: bool,
    ) -> Result<PathBuf, ModelError> {
        let _lock = self.download_lock.lock().await;
        let path = self.backbone_cache_path(name);

        if fresh && path.exists() {
            log::info!("Fresh download requested - removing {:?}", path);
            fs::remove_file(&path)?;
        }
        if path.exists() {
            log::info!("Backbone file exists at {:?}, verifying...", path);
            if verify_file(&path, expected_hash)? {
                log::info!("Existing backbone file verified successfully");
                return Ok(path);
            }
            log::warn!("Backbone file verification failed, redownloading");
        }

        match download_and_verify_file(url, &path, expected_hash, "backbone").await {
            Ok(()) => Ok(path),
            Err(e) => {
                log::error!("Failed to fetch backbone: {}", e);
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }
}

fn new_version_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ"), &suffix[..8])
}

pub(crate) fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub(crate) fn sha256_file(path: &Path) -> io::Result<String> {
    Ok(sha256_bytes(&fs::read(path)?))
}

fn verify_file(path: &Path, expected_hash: &str) -> Result<bool, ModelError> {
    log::info!("Verifying file: {:?}", path);
    let hash = sha256_file(path)?;
    log::debug!("Calculated hash: {}", hash);
    log::debug!("Expected hash:   {}", expected_hash);
    Ok(hash.eq_ignore_ascii_case(expected_hash))
}

async fn download_and_verify_file(
    url: &str,
    path: &Path,
    expected_hash: &str,
    file_type: &str,
) -> Result<(), ModelError> {
    log::info!("Downloading {} file from {} to {:?}", file_type, url, path);
    let response = reqwest::get(url).await?.error_for_status()?;
    log::info!("Download response status: {}", response.status());
    let bytes = response.bytes().await?;
    log::info!("Downloaded {} bytes", bytes.len());

    let hash = sha256_bytes(&bytes);
    if !hash.eq_ignore_ascii_case(expected_hash) {
        log::error!("{} hash mismatch: expected {}, got {}", file_type, expected_hash, hash);
        return Err(ModelError::HashMismatch {
            file_type: file_type.to_string(),
            expected: expected_hash.to_string(),
            actual: hash,
        });
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &bytes)?;

    if !verify_file(path, expected_hash)? {
        return Err(ModelError::VerificationFailed);
    }

    log::info!("{} file downloaded and verified successfully", file_type);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ids_sort_chronologically() {
        let a = new_version_id();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = new_version_id();
        assert!(a < b);
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_sha256_bytes() {
        assert_eq!(
            sha256_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_store_has_no_current() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(dir.path()).unwrap();
        assert_eq!(manager.current_version().unwrap(), None);
        assert!(manager.list_versions().unwrap().is_empty());
        assert!(matches!(manager.load_current(), Err(ModelError::NoCurrentVersion(_))));
        assert!(matches!(manager.rollback(), Err(ModelError::NoCurrentVersion(_))));
        assert!(matches!(manager.set_current("missing"), Err(ModelError::NotFound(_))));
    }

    #[test]
    fn test_fetch_backbone_rejects_bad_url() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(dir.path()).unwrap();
        let result = tokio_test::block_on(manager.fetch_backbone("mobilenet", "not a url", "00", false));
        assert!(matches!(result, Err(ModelError::DownloadError(_))));
        assert!(!manager.backbone_cache_path("mobilenet").exists());
    }

    #[test]
    fn test_fetch_backbone_reuses_verified_cache() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(dir.path()).unwrap();
        let path = manager.backbone_cache_path("mobilenet");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"abc").unwrap();

        let hash = sha256_bytes(b"abc");
        let fetched = tokio_test::block_on(manager.fetch_backbone("mobilenet", "not a url", &hash, false)).unwrap();
        assert_eq!(fetched, path);
    }
}
