use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::thread;

use chrono::NaiveDate;
use greenguardian::{ClearOutcome, Confirmation, HistoryView, PredictionLog, PredictionRecord};

fn record(i: usize) -> PredictionRecord {
    let labels = ["cardboard", "glass", "metal", "paper", "plastic", "trash"];
    let timestamp = NaiveDate::from_ymd_opt(2026, 4, 1 + (i % 28) as u32)
        .unwrap()
        .and_hms_opt(8, (i % 60) as u32, 0)
        .unwrap();
    PredictionRecord::new(
        format!("saved_images/{:04}.jpg", i),
        labels[i % labels.len()],
        (i % 101) as f32 * 0.99,
        timestamp,
    )
    .unwrap()
}

fn log_with(dir: &std::path::Path, n: usize) -> PredictionLog {
    let log = PredictionLog::new(dir.join("history.csv"));
    for i in 0..n {
        log.append(&record(i)).unwrap();
    }
    log
}

#[test]
fn test_round_trip_counts() {
    for n in [0, 1, 57] {
        let dir = tempfile::tempdir().unwrap();
        let log = log_with(dir.path(), n);
        let records = log.read_all().unwrap();

        assert_eq!(records.len(), n);
        let expected: Vec<PredictionRecord> = (0..n).map(record).collect();
        assert_eq!(records, expected);
        assert!(records.iter().all(|r| (0.0..=100.0).contains(&r.confidence)));
    }
}

#[test]
fn test_fields_with_separators_survive() {
    let dir = tempfile::tempdir().unwrap();
    let log = PredictionLog::new(dir.path().join("history.csv"));
    let tricky = PredictionRecord::new(
        "saved images/a, \"quoted\".jpg",
        "glass",
        12.5,
        NaiveDate::from_ymd_opt(2026, 1, 2).unwrap().and_hms_opt(3, 4, 5).unwrap(),
    )
    .unwrap();
    log.append(&tricky).unwrap();
    assert_eq!(log.read_all().unwrap(), vec![tricky]);
}

#[test]
fn test_concurrent_appends_are_not_lost() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(PredictionLog::new(dir.path().join("history.csv")));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let log = log.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    log.append(&record(t * 25 + i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut paths: Vec<String> = log.read_all().unwrap().into_iter().map(|r| r.image_path).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 100);
}

#[test]
fn test_clear_requires_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let log = log_with(dir.path(), 5);

    assert_eq!(log.clear(Confirmation::NotConfirmed).unwrap(), ClearOutcome::Kept { rows: 5 });
    assert_eq!(log.len().unwrap(), 5);

    assert_eq!(log.clear(Confirmation::from(true)).unwrap(), ClearOutcome::Deleted { rows: 5 });
    assert!(!log.path().exists());
    assert!(log.read_all().unwrap().is_empty());
    assert_eq!(log.clear(Confirmation::Confirmed).unwrap(), ClearOutcome::NothingToDelete);
}

#[test]
fn test_confirmed_clear_removes_damaged_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = log_with(dir.path(), 5);
    let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
    writeln!(file, "x.jpg,glass,not-a-number,2026-04-02 08:00:00").unwrap();
    drop(file);
    assert!(log.read_all().is_err());

    assert_eq!(log.clear(Confirmation::NotConfirmed).unwrap(), ClearOutcome::Kept { rows: 6 });
    assert!(log.path().exists());

    assert_eq!(log.clear(Confirmation::Confirmed).unwrap(), ClearOutcome::Deleted { rows: 6 });
    assert!(!log.path().exists());
    assert!(log.read_all().unwrap().is_empty());
}

#[test]
fn test_append_after_clear_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let log = log_with(dir.path(), 3);
    log.clear(Confirmation::Confirmed).unwrap();
    log.append(&record(42)).unwrap();

    assert_eq!(log.read_all().unwrap(), vec![record(42)]);
    let exported = String::from_utf8(log.export_csv().unwrap()).unwrap();
    assert!(exported.starts_with("image_path,prediction,confidence,timestamp\n"));
    assert_eq!(exported.lines().count(), 2);
}

#[test]
fn test_history_view_filters() {
    let dir = tempfile::tempdir().unwrap();
    let log = log_with(dir.path(), 12);
    let view = HistoryView::new(log.read_all().unwrap());

    assert_eq!(view.len(), 12);
    assert_eq!(view.categories().len(), 6);
    assert_eq!(view.days().first().map(String::as_str), Some("2026-04-01"));

    let newest = &view.records()[0];
    assert_eq!(newest.image_path, "saved_images/0011.jpg");

    let glass = view.filter(Some("glass"), None);
    assert_eq!(glass.len(), 2);
    assert!(glass.iter().all(|r| r.prediction == "glass"));

    let one_day = view.filter(None, Some("2026-04-03"));
    assert_eq!(one_day.len(), 1);
    assert_eq!(one_day[0].prediction, "metal");

    assert!(view.filter(Some("glass"), Some("2026-04-03")).is_empty());
}
