#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use riskwatch::config::PipelineConfig;
use riskwatch::model::classifier::{CandidateSpec, ModelParams};
use riskwatch::model::ensemble::{BoostingParams, ForestParams};
use riskwatch::model::linear::LogisticParams;
use riskwatch::types::{
    DemographicRow, DemographicTable, EventRow, EventTable, OUTCOME_COLUMN, ObservationRow,
    ObservationTable,
};
use std::collections::BTreeMap;
use std::path::Path;

pub struct Cohort {
    pub observations: ObservationTable,
    pub events: EventTable,
    pub demographics: DemographicTable,
    /// Outcome per patient, as written on every row.
    pub labels: BTreeMap<String, u8>,
}

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

/// Daily records for one patient whose channels drift with `risk` in [0, 1].
pub fn patient_rows(id: &str, days: usize, risk: f64, label: u8, rng: &mut StdRng) -> Vec<ObservationRow> {
    let base_weight = rng.gen_range(60.0..95.0);
    // Per-patient offsets keep channels from being near-duplicates of each other.
    let glucose_offset = rng.gen_range(-25.0..25.0);
    let adherence_offset = rng.gen_range(-0.1..0.1);
    let hba1c_offset = rng.gen_range(-0.8..0.8);
    (0..days)
        .map(|day| {
            let date = start_date() + Duration::days(day as i64);
            let glucose = 105.0 + 110.0 * risk + glucose_offset + rng.gen_range(-15.0..15.0);
            let systolic = 118.0 + 45.0 * risk + rng.gen_range(-8.0..8.0);
            let diastolic = 74.0 + 14.0 * risk + rng.gen_range(-6.0..6.0);
            let adherence: f64 = 0.95 - 0.4 * risk + adherence_offset + rng.gen_range(-0.05..0.05);
            let mut row = ObservationRow::new(id, date)
                .with_value("systolic_bp", systolic)
                .with_value("diastolic_bp", diastolic)
                .with_value("weight_kg", base_weight + 0.08 * risk * day as f64 + rng.gen_range(-0.4..0.4))
                .with_value("heart_rate", 68.0 + 12.0 * risk + rng.gen_range(-5.0..5.0))
                .with_value("adherence_avg", adherence.clamp(0.0, 1.0))
                .with_value("sleep_hours", 7.0 + rng.gen_range(-1.0..1.0))
                .with_value(OUTCOME_COLUMN, f64::from(label));
            row = if rng.gen_range(0.0..1.0) < 0.05 {
                row.with_missing("glucose_mg_dl")
            } else {
                row.with_value("glucose_mg_dl", glucose)
            };
            row = if rng.gen_range(0.0..1.0) < 0.1 {
                row.with_missing("steps")
            } else {
                row.with_value("steps", 8500.0 - 4500.0 * risk + rng.gen_range(-800.0..800.0))
            };
            row = if day % 10 == 0 {
                row.with_value("hba1c", 6.2 + 3.5 * risk + hba1c_offset + rng.gen_range(-0.2..0.2))
            } else {
                row.with_missing("hba1c")
            };
            row
        })
        .collect()
}

fn demographic_row(id: &str, risk: f64, rng: &mut StdRng) -> DemographicRow {
    let mut numeric = BTreeMap::new();
    numeric.insert("age".to_string(), Some((48.0 + 30.0 * risk + rng.gen_range(-6.0..6.0)).round()));
    numeric.insert("comorbidity_count".to_string(), Some((4.0 * risk).round()));
    numeric.insert("bmi".to_string(), Some(24.0 + 8.0 * risk + rng.gen_range(-2.0..2.0)));
    let mut categorical = BTreeMap::new();
    let gender = if rng.gen_range(0.0..1.0) < 0.5 { "F" } else { "M" };
    categorical.insert("gender".to_string(), Some(gender.to_string()));
    let condition = ["diabetes", "heart_failure", "hypertension"][rng.gen_range(0..3)];
    categorical.insert("primary_condition".to_string(), Some(condition.to_string()));
    DemographicRow {
        patient_id: id.to_string(),
        numeric,
        categorical,
    }
}

/// A reproducible cohort of `patients` patients with `days` daily rows each.
pub fn synthetic_cohort(patients: usize, days: usize, seed: u64) -> Cohort {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::new();
    let mut demographics = Vec::new();
    let mut events = Vec::new();
    let mut labels = BTreeMap::new();
    for p in 0..patients {
        let id = format!("P{p:03}");
        let risk: f64 = rng.gen_range(0.0..1.0);
        let mut label = u8::from(risk > 0.55);
        if rng.gen_range(0.0..1.0) < 0.08 {
            label = 1 - label;
        }
        rows.extend(patient_rows(&id, days, risk, label, &mut rng));
        demographics.push(demographic_row(&id, risk, &mut rng));
        if label == 1 {
            events.push(EventRow {
                patient_id: id.clone(),
                event_date: Some(start_date() + Duration::days(days as i64)),
                event_type: Some("hospitalization".to_string()),
            });
        }
        labels.insert(id, label);
    }
    Cohort {
        observations: ObservationTable::from_rows(rows),
        events: EventTable::from_rows(events),
        demographics: DemographicTable::from_rows(demographics),
        labels,
    }
}

/// Default configuration with a roster small enough for tests.
pub fn quick_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.training.test_fraction = 0.25;
    config.training.candidates = vec![
        CandidateSpec::new(
            "Gradient Boosting",
            ModelParams::GradientBoosting(BoostingParams {
                n_rounds: 30,
                max_depth: 3,
                min_samples_leaf: 2,
                ..Default::default()
            }),
        ),
        CandidateSpec::new(
            "Random Forest",
            ModelParams::RandomForest(ForestParams {
                n_trees: 25,
                max_depth: 5,
                min_samples_split: 4,
                min_samples_leaf: 2,
                ..Default::default()
            }),
        ),
        CandidateSpec::new(
            "Logistic Regression",
            ModelParams::LogisticRegression(LogisticParams::default()),
        ),
    ];
    config
}

/// Writes the cohort as the three CSV files the CLI reads.
pub fn write_csvs(cohort: &Cohort, dir: &Path) -> (std::path::PathBuf, std::path::PathBuf, std::path::PathBuf) {
    let observations = dir.join("observations.csv");
    let mut w = csv::Writer::from_path(&observations).unwrap();
    w.write_record(&cohort.observations.columns).unwrap();
    for row in &cohort.observations.rows {
        let record: Vec<String> = cohort
            .observations
            .columns
            .iter()
            .map(|c| match c.as_str() {
                "patient_id" => row.patient_id.clone(),
                "date" => row.date.to_string(),
                name => match (row.numeric.get(name), row.categorical.get(name)) {
                    (Some(Some(v)), _) => v.to_string(),
                    (_, Some(Some(s))) => s.clone(),
                    _ => String::new(),
                },
            })
            .collect();
        w.write_record(&record).unwrap();
    }
    w.flush().unwrap();

    let events = dir.join("events.csv");
    let mut w = csv::Writer::from_path(&events).unwrap();
    w.write_record(["patient_id", "event_date", "event_type"]).unwrap();
    for e in &cohort.events.rows {
        w.write_record([
            e.patient_id.clone(),
            e.event_date.map(|d| d.to_string()).unwrap_or_default(),
            e.event_type.clone().unwrap_or_default(),
        ])
        .unwrap();
    }
    w.flush().unwrap();

    let demographics = dir.join("demographics.csv");
    let mut w = csv::Writer::from_path(&demographics).unwrap();
    w.write_record(&cohort.demographics.columns).unwrap();
    for row in &cohort.demographics.rows {
        let record: Vec<String> = cohort
            .demographics
            .columns
            .iter()
            .map(|c| match c.as_str() {
                "patient_id" => row.patient_id.clone(),
                name => match (row.numeric.get(name), row.categorical.get(name)) {
                    (Some(Some(v)), _) => v.to_string(),
                    (_, Some(Some(s))) => s.clone(),
                    _ => String::new(),
                },
            })
            .collect();
        w.write_record(&record).unwrap();
    }
    w.flush().unwrap();

    (observations, events, demographics)
}
