//! Read-only views over the prediction log: the dashboard figures and the browsable
//! history. Everything is recomputed from the full record list on each call.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::history::PredictionRecord;

const ECO_POINTS_PER_SORT: f64 = 2.5;
/// Illustrative figure, not a measured quantity
const CO2_KG_PER_SORT: f64 = 0.08;
const CO2_KG_PER_TREE: f64 = 20.0;
const POINTS_FOR_FULL_PROGRESS: f64 = 100.0;

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EcoLevel {
    Beginner,
    Citizen,
    PlanetProtector,
    EarthGuardian,
}

impl EcoLevel {
    pub fn for_total(total: usize) -> Self {
        match total {
            0..=19 => Self::Beginner,
            20..=49 => Self::Citizen,
            50..=99 => Self::PlanetProtector,
            _ => Self::EarthGuardian,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Beginner => "You are starting your green journey. Keep learning to sort well!",
            Self::Citizen => "Great! Your actions already make a real difference.",
            Self::PlanetProtector => "You are a model for your community.",
            Self::EarthGuardian => "Incredible! Your commitment to ecology is exemplary.",
        }
    }
}

impl fmt::Display for EcoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Beginner => "Eco Beginner",
            Self::Citizen => "Eco Citizen",
            Self::PlanetProtector => "Planet Protector",
            Self::EarthGuardian => "Earth Guardian",
        };
        f.write_str(name)
    }
}

/// Aggregate figures for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total: usize,
    pub average_confidence: f64,
    /// Ties go to the lexically first category
    pub most_common: String,
    pub eco_points: f64,
    pub co2_saved_kg: f64,
    pub trees_saved: f64,
    /// Share of the next milestone reached, in `[0, 1]`
    pub progress: f64,
    pub level: EcoLevel,
    /// Ties go to the earliest day
    pub most_active_day: Option<NaiveDate>,
    /// Day of the most recently appended record
    pub last_sorted_day: Option<NaiveDate>,
    /// Descending by count, ties by name
    pub category_counts: Vec<(String, usize)>,
    pub daily_trend: BTreeMap<NaiveDate, usize>,
}

impl DashboardStats {
    /// `None` when there is nothing to report yet.
    pub fn from_records(records: &[PredictionRecord]) -> Option<Self> {
        let last = records.last()?;
        let total = records.len();

        let average_confidence = records.iter().map(|r| r.confidence).sum::<f64>() / total as f64;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in records {
            *counts.entry(record.prediction.as_str()).or_default() += 1;
        }
        let mut category_counts: Vec<(String, usize)> =
            counts.into_iter().map(|(label, n)| (label.to_string(), n)).collect();
        category_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let most_common = category_counts[0].0.clone();

        let mut daily_trend = BTreeMap::new();
        for record in records {
            match record_day(record) {
                Some(day) => *daily_trend.entry(day).or_default() += 1,
                None => log::warn!("Skipping unparseable timestamp '{}'", record.timestamp),
            }
        }
        // BTreeMap iterates in date order, so max_by_key would pick the latest tie.
        let most_active_day = daily_trend
            .iter()
            .fold(None::<(NaiveDate, usize)>, |best, (&day, &n)| match best {
                Some((_, best_n)) if best_n >= n => best,
                _ => Some((day, n)),
            })
            .map(|(day, _)| day);

        let eco_points = round_to(total as f64 * ECO_POINTS_PER_SORT, 1);
        let co2_saved_kg = round_to(total as f64 * CO2_KG_PER_SORT, 2);

        Some(Self {
            total,
            average_confidence,
            most_common,
            eco_points,
            co2_saved_kg,
            trees_saved: round_to(co2_saved_kg / CO2_KG_PER_TREE, 3),
            progress: (eco_points / POINTS_FOR_FULL_PROGRESS).min(1.0),
            level: EcoLevel::for_total(total),
            most_active_day,
            last_sorted_day: record_day(last),
            category_counts,
            daily_trend,
        })
    }

    /// Percentage share of each category, in `category_counts` order.
    pub fn category_shares(&self) -> Vec<(String, f64)> {
        self.category_counts
            .iter()
            .map(|(label, n)| (label.clone(), *n as f64 * 100.0 / self.total as f64))
            .collect()
    }
}

fn record_day(record: &PredictionRecord) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(record.day(), "%Y-%m-%d").ok()
}

/// The history page: newest first, optionally filtered.
#[derive(Debug, Clone, Default)]
pub struct HistoryView {
    records: Vec<PredictionRecord>,
}

impl HistoryView {
    pub fn new(mut records: Vec<PredictionRecord>) -> Self {
        // Stable sort keeps append order among equal timestamps, reversed below.
        records.reverse();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Self { records }
    }

    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct predicted categories, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.records.iter().map(|r| r.prediction.clone()).collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Distinct `YYYY-MM-DD` days, ascending.
    pub fn days(&self) -> Vec<String> {
        let mut days: Vec<String> = self.records.iter().map(|r| r.day().to_string()).collect();
        days.sort();
        days.dedup();
        days
    }

    /// `None` means no constraint on that field.
    pub fn filter(&self, category: Option<&str>, day: Option<&str>) -> Vec<&PredictionRecord> {
        self.records
            .iter()
            .filter(|r| category.map_or(true, |c| r.prediction == c))
            .filter(|r| day.map_or(true, |d| r.timestamp.starts_with(d)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: &str, confidence: f64, timestamp: &str) -> PredictionRecord {
        PredictionRecord {
            image_path: format!("saved_images/{}.jpg", label),
            prediction: label.to_string(),
            confidence,
            timestamp: timestamp.to_string(),
        }
    }

    #[test]
    fn test_empty_log_has_no_stats() {
        assert!(DashboardStats::from_records(&[]).is_none());
        assert!(HistoryView::new(Vec::new()).is_empty());
    }

    #[test]
    fn test_levels() {
        assert_eq!(EcoLevel::for_total(0), EcoLevel::Beginner);
        assert_eq!(EcoLevel::for_total(19), EcoLevel::Beginner);
        assert_eq!(EcoLevel::for_total(20), EcoLevel::Citizen);
        assert_eq!(EcoLevel::for_total(50), EcoLevel::PlanetProtector);
        assert_eq!(EcoLevel::for_total(99), EcoLevel::PlanetProtector);
        assert_eq!(EcoLevel::for_total(100), EcoLevel::EarthGuardian);
    }

    #[test]
    fn test_ties() {
        let records = vec![
            record("plastic", 80.0, "2026-05-02 10:00:00"),
            record("glass", 60.0, "2026-05-02 11:00:00"),
            record("glass", 70.0, "2026-05-01 09:00:00"),
            record("plastic", 90.0, "2026-05-01 12:00:00"),
        ];
        let stats = DashboardStats::from_records(&records).unwrap();
        assert_eq!(stats.most_common, "glass");
        assert_eq!(stats.most_active_day, NaiveDate::from_ymd_opt(2026, 5, 1));
        assert_eq!(stats.last_sorted_day, NaiveDate::from_ymd_opt(2026, 5, 1));
        assert_eq!(stats.average_confidence, 75.0);
        assert_eq!(
            stats.category_counts,
            vec![("glass".to_string(), 2), ("plastic".to_string(), 2)]
        );
    }

    #[test]
    fn test_newest_first_is_stable() {
        let view = HistoryView::new(vec![
            record("paper", 50.0, "2026-05-01 09:00:00"),
            record("metal", 50.0, "2026-05-03 09:00:00"),
            record("glass", 50.0, "2026-05-01 09:00:00"),
        ]);
        let order: Vec<&str> = view.records().iter().map(|r| r.prediction.as_str()).collect();
        assert_eq!(order, vec!["metal", "glass", "paper"]);
    }
}
