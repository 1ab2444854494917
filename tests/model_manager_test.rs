use std::fs;

use greenguardian::classifier::ClassificationHead;
use greenguardian::{
    BackboneRecord, LabelSet, ModelArtifact, ModelError, ModelManager, PixelScaling, PreprocessSpec,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn artifact(labels: &[&str], seed: u64) -> ModelArtifact {
    let mut rng = StdRng::seed_from_u64(seed);
    let head = ClassificationHead::init(8, 4, labels.len(), 0.3, &mut rng);
    ModelArtifact::new(
        LabelSet::sorted(labels.to_vec()).unwrap(),
        PreprocessSpec::new(PixelScaling::SignedUnit),
        BackboneRecord {
            name: "test-backbone".to_string(),
            feature_dim: 8,
            scaling: PixelScaling::SignedUnit,
            file: None,
            sha256: None,
        },
        head.to_weights(),
        None,
    )
    .unwrap()
}

#[test]
fn test_publish_sets_current() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let manager = ModelManager::new(dir.path())?;

    assert!(matches!(manager.load_current(), Err(ModelError::NoCurrentVersion(_))));

    let first = manager.publish(&artifact(&["glass", "paper"], 1), None)?;
    assert_eq!(manager.current_version()?, Some(first.id.clone()));
    assert!(first.dir.join("manifest.json").exists());
    assert!(first.dir.join("head.json").exists());

    let second = manager.publish(&artifact(&["glass", "metal", "paper"], 2), None)?;
    assert_eq!(manager.current_version()?, Some(second.id.clone()));
    assert_eq!(manager.load_current()?.artifact.labels.len(), 3);

    // Earlier versions stay untouched.
    let versions = manager.list_versions()?;
    assert_eq!(versions, vec![first.clone(), second]);
    assert_eq!(manager.load_version(&first.id)?.artifact.labels.len(), 2);
    Ok(())
}

#[test]
fn test_rollback() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let manager = ModelManager::new(dir.path())?;
    let first = manager.publish(&artifact(&["a", "b"], 1), None)?;

    assert!(matches!(manager.rollback(), Err(ModelError::NoPreviousVersion(_))));

    manager.publish(&artifact(&["a", "b", "c"], 2), None)?;
    assert_eq!(manager.rollback()?, first.id);
    assert_eq!(manager.current_version()?, Some(first.id));
    assert_eq!(manager.load_current()?.artifact.labels.as_slice(), &["a", "b"]);
    Ok(())
}

#[test]
fn test_bundled_backbone_is_verified() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let backbone = dir.path().join("net.onnx");
    fs::write(&backbone, b"not really onnx, only hashed here")?;

    let manager = ModelManager::new(dir.path().join("models"))?;
    let version = manager.publish(&artifact(&["x", "y"], 3), Some(&backbone))?;

    let loaded = manager.load_current()?;
    let bundled = loaded.backbone_path.expect("bundled backbone");
    assert!(bundled.starts_with(&version.dir));
    assert!(loaded.artifact.backbone.sha256.is_some());
    assert!(manager.verify_version(&version.id)?);

    fs::write(&bundled, b"tampered")?;
    assert!(!manager.verify_version(&version.id)?);
    assert!(matches!(
        manager.load_current(),
        Err(ModelError::HashMismatch { ref file_type, .. }) if file_type == "backbone"
    ));
    Ok(())
}

#[test]
fn test_tampered_head_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let manager = ModelManager::new(dir.path())?;
    let version = manager.publish(&artifact(&["x", "y"], 4), None)?;

    let head = version.dir.join("head.json");
    let mut content = fs::read_to_string(&head)?;
    content = content.replacen("0.3", "0.2", 1);
    fs::write(&head, content)?;

    assert!(matches!(manager.load_current(), Err(ModelError::HashMismatch { .. })));
    Ok(())
}

#[test]
fn test_partial_versions_are_ignored() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let manager = ModelManager::new(dir.path())?;
    let published = manager.publish(&artifact(&["x", "y"], 5), None)?;

    fs::create_dir_all(dir.path().join("20990101T000000.000Z-deadbeef.partial"))?;
    let ids: Vec<String> = manager.list_versions()?.into_iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![published.id]);
    Ok(())
}

#[tokio::test]
async fn test_fetch_backbone_unreachable() {
    let dir = tempfile::tempdir().unwrap();
    let manager = ModelManager::new(dir.path()).unwrap();
    let result = manager
        .fetch_backbone("mobilenet", "http://127.0.0.1:9/mobilenet.onnx", "00", false)
        .await;
    assert!(result.is_err());
    assert!(!manager.backbone_cache_path("mobilenet").exists());
}
