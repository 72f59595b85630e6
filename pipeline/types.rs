//! Input tables and the prediction-facing result types.

use crate::clinical::recommend::Recommendation;
use crate::clinical::trends::Trends;
use crate::model::explain::Explanation;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const PATIENT_ID_COLUMN: &str = "patient_id";
pub const DATE_COLUMN: &str = "date";
pub const OUTCOME_COLUMN: &str = "deterioration_90d";

/// One dated record for one patient, as supplied by the data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    pub patient_id: String,
    pub date: NaiveDate,
    /// Numeric channels, static attributes and the outcome flag, keyed by column name.
    pub numeric: BTreeMap<String, Option<f64>>,
    pub categorical: BTreeMap<String, Option<String>>,
}

impl ObservationRow {
    pub fn new(patient_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            patient_id: patient_id.into(),
            date,
            numeric: BTreeMap::new(),
            categorical: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, column: &str, value: f64) -> Self {
        self.numeric.insert(column.to_string(), Some(value));
        self
    }

    pub fn with_missing(mut self, column: &str) -> Self {
        self.numeric.insert(column.to_string(), None);
        self
    }

    pub fn with_category(mut self, column: &str, value: &str) -> Self {
        self.categorical
            .insert(column.to_string(), Some(value.to_string()));
        self
    }
}

/// The observation table. `columns` is the header as supplied, used for schema checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationTable {
    pub columns: Vec<String>,
    pub rows: Vec<ObservationRow>,
}

impl ObservationTable {
    /// Builds a table whose header is the union of the row keys plus the identifying columns.
    pub fn from_rows(rows: Vec<ObservationRow>) -> Self {
        let mut columns = vec![PATIENT_ID_COLUMN.to_string(), DATE_COLUMN.to_string()];
        for row in &rows {
            for name in row.numeric.keys().chain(row.categorical.keys()) {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }
        Self { columns, rows }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub patient_id: String,
    pub event_date: Option<NaiveDate>,
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventTable {
    pub columns: Vec<String>,
    pub rows: Vec<EventRow>,
}

impl EventTable {
    pub fn from_rows(rows: Vec<EventRow>) -> Self {
        Self {
            columns: vec![
                PATIENT_ID_COLUMN.to_string(),
                "event_date".to_string(),
                "event_type".to_string(),
            ],
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemographicRow {
    pub patient_id: String,
    pub numeric: BTreeMap<String, Option<f64>>,
    pub categorical: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemographicTable {
    pub columns: Vec<String>,
    pub rows: Vec<DemographicRow>,
}

impl DemographicTable {
    pub fn from_rows(rows: Vec<DemographicRow>) -> Self {
        let mut columns = vec![PATIENT_ID_COLUMN.to_string()];
        for row in &rows {
            for name in row.numeric.keys().chain(row.categorical.keys()) {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }
        Self { columns, rows }
    }
}

/// Three-way risk bucket. One convention is used everywhere:
/// `p < 0.3` is Low, `0.3 <= p <= 0.6` is Medium and `p > 0.6` is High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

impl RiskCategory {
    pub const LOW_UPPER: f64 = 0.3;
    pub const HIGH_LOWER: f64 = 0.6;

    pub fn from_probability(p: f64) -> Self {
        if p < Self::LOW_UPPER {
            Self::Low
        } else if p <= Self::HIGH_LOWER {
            Self::Medium
        } else {
            Self::High
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
        }
    }
}

/// Everything the service layer returns for one patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub patient_id: String,
    pub risk_probability: f64,
    pub risk_category: RiskCategory,
    pub risk_class: u8,
    pub explanations: Vec<Explanation>,
    pub trends: Trends,
    pub recommendations: Vec<Recommendation>,
    pub last_updated: DateTime<Utc>,
}
