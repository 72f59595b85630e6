//! # Snapshot Builder
//!
//! Collapses each patient's trailing window of the engineered frame into one
//! fixed-width feature vector with a binary target. The same per-patient
//! extraction (`patient_features`) is used at inference so training and
//! prediction see identically constructed vectors.

use crate::config::SnapshotConfig;
use crate::features::frame::{ColumnKind, LongitudinalFrame, PatientPartition};
use crate::stats;
use crate::types::OUTCOME_COLUMN;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error(
        "No patient is eligible for the snapshot: {considered} considered, {short_history} with fewer than {lookback_days} rows, {sparse} too sparse."
    )]
    Empty {
        considered: usize,
        short_history: usize,
        sparse: usize,
        lookback_days: usize,
    },
    #[error("The processed frame has no '{0}' column.")]
    MissingOutcome(&'static str),
}

/// Which frame columns feed the snapshot and how each is summarised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotLayout {
    /// Last value in the window, under the column's own name.
    pub static_columns: Vec<String>,
    /// Last value in the window, as `{name}_latest`.
    pub latest_channels: Vec<String>,
    /// Mean over the window.
    pub rate_columns: Vec<String>,
    /// Last value in the window.
    pub score_columns: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for SnapshotLayout {
    fn default() -> Self {
        Self {
            static_columns: names(&[
                "age",
                "comorbidity_count",
                "bmi",
                "primary_condition_encoded",
                "baseline_risk_encoded",
                "gender_encoded",
            ]),
            latest_channels: names(&[
                "glucose_mg_dl",
                "weight_kg",
                "systolic_bp",
                "diastolic_bp",
                "heart_rate",
                "adherence_avg",
                "steps",
                "sleep_hours",
                "hba1c",
                "creatinine",
                "egfr",
            ]),
            rate_columns: names(&["glucose_tir", "bp_controlled"]),
            score_columns: names(&[
                "glucose_variability_score",
                "bp_risk_score",
                "adherence_risk_score",
            ]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Summary {
    Last,
    WindowMean,
}

/// One snapshot feature: its output name, the frame column it reads and how.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FeatureSource {
    name: String,
    column: String,
    summary: Summary,
}

impl SnapshotLayout {
    /// Output features in snapshot order, restricted to columns the frame carries.
    fn sources(&self, frame: &LongitudinalFrame) -> Vec<FeatureSource> {
        let mut sources = Vec::new();
        let mut add = |name: String, column: &str, summary: Summary| {
            if frame.has_column(column) {
                sources.push(FeatureSource {
                    name,
                    column: column.to_string(),
                    summary,
                });
            }
        };
        for column in &self.static_columns {
            add(column.clone(), column.as_str(), Summary::Last);
        }
        for channel in &self.latest_channels {
            add(format!("{channel}_latest"), channel.as_str(), Summary::Last);
        }
        for column in frame.columns().iter().filter(|c| c.kind == ColumnKind::Rolling) {
            add(column.name.clone(), column.name.as_str(), Summary::Last);
        }
        for column in &self.rate_columns {
            add(column.clone(), column.as_str(), Summary::WindowMean);
        }
        for column in &self.score_columns {
            add(column.clone(), column.as_str(), Summary::Last);
        }
        sources
    }

    pub fn feature_names(&self, frame: &LongitudinalFrame) -> Vec<String> {
        self.sources(frame).into_iter().map(|s| s.name).collect()
    }

    /// Feature values for one patient over its trailing `lookback_days` rows.
    /// Features the frame lacks are absent from the map; present features may be missing.
    pub fn patient_features(
        &self,
        frame: &LongitudinalFrame,
        part: &PatientPartition,
        lookback_days: usize,
    ) -> BTreeMap<String, Option<f64>> {
        let window = part.tail(lookback_days);
        self.sources(frame)
            .into_iter()
            .map(|source| {
                let cells = frame
                    .values(&source.column)
                    .map(|v| &v[window.clone()])
                    .unwrap_or_default();
                let value = match source.summary {
                    Summary::Last => cells.last().copied().flatten(),
                    Summary::WindowMean => stats::mean(&stats::present(cells)),
                };
                (source.name, value)
            })
            .collect()
    }
}

/// The per-patient training table.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub patient_ids: Vec<String>,
    pub feature_names: Vec<String>,
    /// Rows follow `patient_ids`; columns follow `feature_names`. Fully filled.
    pub features: Array2<f64>,
    pub target: Vec<u8>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.patient_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patient_ids.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.target.iter().filter(|&&t| t == 1).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiagnostics {
    pub patients_considered: usize,
    pub excluded_short_history: usize,
    pub excluded_missing_outcome: usize,
    pub dropped_sparse: usize,
    pub feature_count: usize,
    pub positives: usize,
    pub positive_rate: f64,
}

pub struct SnapshotBuilder<'a> {
    config: &'a SnapshotConfig,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(config: &'a SnapshotConfig) -> Self {
        Self { config }
    }

    pub fn build(
        &self,
        frame: &LongitudinalFrame,
        lookback_days: usize,
    ) -> Result<(Snapshot, SnapshotDiagnostics), SnapshotError> {
        let outcome = frame
            .values(OUTCOME_COLUMN)
            .ok_or(SnapshotError::MissingOutcome(OUTCOME_COLUMN))?;
        let layout = &self.config.layout;
        let feature_names = layout.feature_names(frame);
        let mut diagnostics = SnapshotDiagnostics {
            patients_considered: frame.partitions().len(),
            feature_count: feature_names.len(),
            ..Default::default()
        };

        let mut patient_ids = Vec::new();
        let mut rows: Vec<Vec<Option<f64>>> = Vec::new();
        let mut target = Vec::new();
        for part in frame.partitions() {
            if part.len() < lookback_days {
                diagnostics.excluded_short_history += 1;
                continue;
            }
            let Some(last_outcome) = outcome[part.rows.end - 1] else {
                diagnostics.excluded_missing_outcome += 1;
                continue;
            };
            let features = layout.patient_features(frame, part, lookback_days);
            patient_ids.push(part.patient_id.clone());
            rows.push(
                feature_names
                    .iter()
                    .map(|name| features.get(name).copied().flatten())
                    .collect(),
            );
            target.push(u8::from(last_outcome != 0.0));
        }

        // patient_id and target count towards the row width.
        let width = feature_names.len() + 2;
        let allowed_missing = self.config.max_missing_fraction * width as f64;
        let mut kept = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let missing = row.iter().filter(|v| v.is_none()).count();
            if missing as f64 > allowed_missing {
                diagnostics.dropped_sparse += 1;
            } else {
                kept.push(i);
            }
        }

        if kept.is_empty() {
            return Err(SnapshotError::Empty {
                considered: diagnostics.patients_considered,
                short_history: diagnostics.excluded_short_history,
                sparse: diagnostics.dropped_sparse,
                lookback_days,
            });
        }

        let medians: Vec<f64> = (0..feature_names.len())
            .map(|j| {
                let column: Vec<f64> = kept.iter().filter_map(|&i| rows[i][j]).collect();
                stats::median(&column).unwrap_or(0.0)
            })
            .collect();
        let features = Array2::from_shape_fn((kept.len(), feature_names.len()), |(r, j)| {
            rows[kept[r]][j].unwrap_or(medians[j])
        });

        let snapshot = Snapshot {
            patient_ids: kept.iter().map(|&i| patient_ids[i].clone()).collect(),
            feature_names,
            features,
            target: kept.iter().map(|&i| target[i]).collect(),
        };
        diagnostics.positives = snapshot.positives();
        diagnostics.positive_rate = diagnostics.positives as f64 / snapshot.len() as f64;

        log::info!(
            "Snapshot: {} patients considered, {} short history, {} without outcome, {} too sparse; {} rows x {} features, {} positive ({:.3})",
            diagnostics.patients_considered,
            diagnostics.excluded_short_history,
            diagnostics.excluded_missing_outcome,
            diagnostics.dropped_sparse,
            snapshot.len(),
            diagnostics.feature_count,
            diagnostics.positives,
            diagnostics.positive_rate
        );
        Ok((snapshot, diagnostics))
    }
}
