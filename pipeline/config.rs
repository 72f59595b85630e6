//! Pipeline configuration.
//!
//! Every field has a default matching the reference deployment, so an empty
//! TOML file (or no file at all) yields a working pipeline. Sections:
//! `[columns]`, `[snapshot]`, `[training]` and `[explanation]`.

use crate::features::snapshot::SnapshotLayout;
use crate::model::classifier::CandidateSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// How each input column is treated by imputation and feature engineering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnRoles {
    /// Forward/backward filled within a patient.
    pub labs: Vec<String>,
    /// Filled with the patient's own median.
    pub vitals: Vec<String>,
    /// Filled with the population median.
    pub lifestyle: Vec<String>,
    /// Integer-encoded into `{name}_encoded`.
    pub categorical: Vec<String>,
    pub rolling_channels: Vec<String>,
    pub rolling_windows: Vec<usize>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for ColumnRoles {
    fn default() -> Self {
        Self {
            labs: names(&[
                "hba1c",
                "creatinine",
                "egfr",
                "cholesterol_total",
                "cholesterol_ldl",
            ]),
            vitals: names(&[
                "weight_kg",
                "glucose_mg_dl",
                "systolic_bp",
                "diastolic_bp",
                "heart_rate",
            ]),
            lifestyle: names(&["steps", "exercise_minutes", "sleep_hours"]),
            categorical: names(&[
                "primary_condition",
                "baseline_risk",
                "gender",
                "smoking_history",
            ]),
            rolling_channels: names(&[
                "glucose_mg_dl",
                "weight_kg",
                "systolic_bp",
                "heart_rate",
                "adherence_avg",
                "steps",
                "sleep_hours",
            ]),
            rolling_windows: vec![7, 14, 30],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub lookback_days: usize,
    /// Rows missing more than this fraction of their cells are dropped.
    pub max_missing_fraction: f64,
    pub layout: SnapshotLayout,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            max_missing_fraction: 0.2,
            layout: SnapshotLayout::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub test_fraction: f64,
    pub seed: u64,
    /// Candidates in declaration order; ties on AUC-ROC keep the earliest.
    pub candidates: Vec<CandidateSpec>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            candidates: CandidateSpec::default_roster(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplanationConfig {
    /// When false the rule-based explainer is always selected.
    pub attribution: bool,
    pub top_k: usize,
}

impl Default for ExplanationConfig {
    fn default() -> Self {
        Self {
            attribution: true,
            top_k: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub columns: ColumnRoles,
    pub snapshot: SnapshotConfig,
    pub training: TrainingConfig,
    pub explanation: ExplanationConfig,
}

impl PipelineConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction = self.training.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "training.test_fraction",
                reason: format!("must lie strictly between 0 and 1, got {fraction}"),
            });
        }
        if self.training.candidates.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "training.candidates",
                reason: "at least one candidate classifier is required".to_string(),
            });
        }
        if self.snapshot.lookback_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "snapshot.lookback_days",
                reason: "must be at least 1".to_string(),
            });
        }
        let missing = self.snapshot.max_missing_fraction;
        if !(0.0..=1.0).contains(&missing) {
            return Err(ConfigError::InvalidValue {
                field: "snapshot.max_missing_fraction",
                reason: format!("must lie in [0, 1], got {missing}"),
            });
        }
        if self.columns.rolling_windows.contains(&0) {
            return Err(ConfigError::InvalidValue {
                field: "columns.rolling_windows",
                reason: "window sizes must be positive".to_string(),
            });
        }
        if self.explanation.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "explanation.top_k",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
