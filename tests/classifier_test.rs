mod common;

use std::sync::Arc;
use std::thread;

use common::{colored_image, encode_png, init, QuadrantColor, CATEGORIES};
use greenguardian::classifier::ClassificationHead;
use greenguardian::{
    BackboneRecord, ClassifierError, InputTensor, LabelSet, ModelArtifact, PixelScaling, PreprocessSpec,
    Preprocessor, WasteClassifier,
};
use ndarray::Array4;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn artifact(feature_dim: usize, scaling: PixelScaling) -> ModelArtifact {
    let labels = LabelSet::sorted(CATEGORIES.iter().map(|(l, _)| *l).collect::<Vec<_>>()).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let head = ClassificationHead::init(feature_dim, 16, labels.len(), 0.3, &mut rng);
    ModelArtifact::new(
        labels,
        PreprocessSpec::new(scaling),
        BackboneRecord {
            name: "quadrant-color".to_string(),
            feature_dim,
            scaling,
            file: None,
            sha256: None,
        },
        head.to_weights(),
        None,
    )
    .unwrap()
}

fn setup_test_classifier() -> WasteClassifier {
    WasteClassifier::builder()
        .with_artifact(artifact(12, PixelScaling::SignedUnit))
        .unwrap()
        .with_backbone(Arc::new(QuadrantColor))
        .unwrap()
        .build()
        .expect("Failed to create classifier")
}

#[test]
fn test_prediction_shape() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let classifier = setup_test_classifier();
    let prediction = classifier.predict_image(&colored_image([90, 120, 30], 50, 0))?;

    assert!(prediction.label_index < classifier.labels().len());
    assert_eq!(classifier.labels().decode(prediction.label_index)?, prediction.label);
    assert!((0.0..=100.0).contains(&prediction.confidence));
    assert_eq!(prediction.probabilities.len(), 6);

    let total: f32 = prediction.probabilities.iter().map(|(_, p)| p).sum();
    assert!((total - 100.0).abs() < 1e-2);
    let best = prediction
        .probabilities
        .iter()
        .map(|(_, p)| *p)
        .fold(f32::MIN, f32::max);
    assert!((best - prediction.confidence).abs() < 1e-4);
    Ok(())
}

#[test]
fn test_bytes_and_image_agree() -> Result<(), Box<dyn std::error::Error>> {
    let classifier = setup_test_classifier();
    let image = colored_image([200, 30, 30], 224, 3);
    let from_image = classifier.predict_image(&image)?;
    let from_bytes = classifier.predict_bytes(&encode_png(&image))?;
    assert_eq!(from_image, from_bytes);
    Ok(())
}

#[test]
fn test_prepared_tensor_is_not_transformed_twice() -> Result<(), Box<dyn std::error::Error>> {
    let classifier = setup_test_classifier();
    let image = colored_image([10, 140, 250], 224, 5);

    let prepared = classifier.preprocessor().apply_image(&image);
    let again = classifier.preprocessor().apply(prepared.clone())?;
    assert_eq!(prepared, again);

    assert_eq!(classifier.predict_tensor(prepared)?, classifier.predict_image(&image)?);
    Ok(())
}

#[test]
fn test_raw_tensor_is_preprocessed() -> Result<(), Box<dyn std::error::Error>> {
    let classifier = setup_test_classifier();
    let raw = InputTensor::from_raw(Array4::from_elem((1, 224, 224, 3), 127.5))?;
    let prediction = classifier.predict_tensor(raw)?;
    assert!(prediction.label_index < 6);

    let preprocessor = Preprocessor::new(PreprocessSpec::new(PixelScaling::SignedUnit))?;
    let small = InputTensor::from_raw(Array4::from_elem((1, 10, 20, 3), 255.0))?;
    let prepared = preprocessor.apply(small)?;
    assert_eq!(prepared.data().shape(), &[1, 224, 224, 3]);
    assert!(prepared.data().iter().all(|v| (*v - 1.0).abs() < 1e-6));
    Ok(())
}

#[test]
fn test_thread_safety() -> Result<(), Box<dyn std::error::Error>> {
    let classifier = Arc::new(setup_test_classifier());
    let expected = classifier.predict_image(&colored_image(CATEGORIES[2].1, 32, 0))?;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let classifier = Arc::clone(&classifier);
            thread::spawn(move || classifier.predict_image(&colored_image(CATEGORIES[2].1, 32, 0)).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
    Ok(())
}

#[test]
fn test_classifier_info() {
    let classifier = setup_test_classifier();
    let info = classifier.info();
    assert_eq!(info.backbone_name, "quadrant-color");
    assert_eq!(info.num_classes, 6);
    assert_eq!(info.class_labels[0], "cardboard");
    assert_eq!(info.feature_dim, 12);
    assert_eq!(info.hidden_units, 16);
    assert_eq!(info.preprocess.scaling, PixelScaling::SignedUnit);
}

#[test]
fn test_invalid_image() {
    let classifier = setup_test_classifier();
    assert!(matches!(classifier.predict_bytes(&[]), Err(ClassifierError::ImageError(_))));
    assert!(matches!(
        classifier.predict_bytes(b"\x89PNG broken"),
        Err(ClassifierError::ImageError(_))
    ));
}
