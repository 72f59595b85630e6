//! The trained model, its diagnostics, and the schema-versioned bundle written to disk.

use crate::model::classifier::{Classifier, ClassifierKind};
use crate::model::explain::{Explainer, Explanation, ExplanationContext};
use crate::model::linear::StandardScaler;
use crate::model::metrics::{CalibrationCurve, EvaluationMetrics};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read or write the model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to serialize the model to TOML: {0}")]
    TomlSerializationError(#[from] toml::ser::Error),
    #[error("Failed to parse the model TOML: {0}")]
    TomlDeserializationError(#[from] toml::de::Error),
    #[error("Model bundle schema version {found} is not supported (expected {supported}).")]
    UnsupportedSchema { found: u32, supported: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Outcome of one candidate on the held-out split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub name: String,
    pub kind: ClassifierKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EvaluationMetrics>,
    /// Why the candidate was excluded, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDiagnostics {
    pub train_rows: usize,
    pub test_rows: usize,
    pub candidates: Vec<CandidateResult>,
    pub calibration: CalibrationCurve,
    /// Descending; empty unless the winner is a tree ensemble.
    pub feature_importance: Vec<FeatureImportance>,
}

/// A fitted winner with everything needed to score new patients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub name: String,
    pub kind: ClassifierKind,
    /// Authoritative input order for every feature vector.
    pub feature_order: Vec<String>,
    /// Training medians, used for features present but missing at inference.
    pub fill_values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaler: Option<StandardScaler>,
    pub metrics: EvaluationMetrics,
    pub diagnostics: ModelDiagnostics,
    pub explainer: Explainer,
    pub classifier: Classifier,
}

/// Probability and explanations for one feature map.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub probability: f64,
    pub explanations: Vec<Explanation>,
}

impl TrainedModel {
    /// Lays a patient's features out in `feature_order`. Features the patient
    /// lacks become 0; features present but missing take the training median.
    pub fn vectorize(&self, features: &BTreeMap<String, Option<f64>>) -> Vec<f64> {
        self.feature_order
            .iter()
            .zip(&self.fill_values)
            .map(|(name, &fill)| match features.get(name) {
                None => 0.0,
                Some(None) => fill,
                Some(Some(v)) if v.is_finite() => *v,
                Some(Some(_)) => fill,
            })
            .collect()
    }

    fn model_input(&self, raw: &[f64]) -> Array1<f64> {
        let row = Array1::from(raw.to_vec());
        match &self.scaler {
            Some(scaler) => scaler.transform_row(row.view()),
            None => row,
        }
    }

    pub fn score(&self, features: &BTreeMap<String, Option<f64>>) -> Scored {
        let raw = self.vectorize(features);
        let input = self.model_input(&raw);
        let probability = self.classifier.predict_row(input.view()).clamp(0.0, 1.0);

        let observed: BTreeMap<String, f64> = features
            .iter()
            .filter_map(|(k, v)| v.map(|v| (k.clone(), v)))
            .collect();
        let ctx = ExplanationContext {
            classifier: &self.classifier,
            feature_order: &self.feature_order,
            raw: &raw,
            model_input: input.view(),
            observed: &observed,
        };
        Scored {
            probability,
            explanations: self.explainer.explain(&ctx),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub schema_version: u32,
    pub model: TrainedModel,
}

#[derive(Deserialize)]
struct VersionHeader {
    schema_version: u32,
}

impl ModelBundle {
    pub fn new(model: TrainedModel) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            model,
        }
    }

    pub fn to_toml(&self) -> Result<String, StoreError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn from_toml(text: &str) -> Result<Self, StoreError> {
        let header: VersionHeader = toml::from_str(text)?;
        if header.schema_version != SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema {
                found: header.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(toml::from_str(text)?)
    }

    /// Saves the bundle in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let text = self.to_toml()?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(text.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::explain::{AttributionExplainer, RuleBasedExplainer};
    use crate::model::linear::LogisticRegression;
    use crate::model::metrics::ConfusionMatrix;
    use ndarray::array;
    use tempfile::NamedTempFile;

    fn linear_model(explainer: Explainer) -> TrainedModel {
        TrainedModel {
            name: "Logistic Regression".to_string(),
            kind: ClassifierKind::LogisticRegression,
            feature_order: vec!["age".to_string(), "glucose_mg_dl_latest".to_string()],
            fill_values: vec![60.0, 140.0],
            scaler: Some(StandardScaler {
                mean: array![60.0, 140.0],
                scale: array![10.0, 40.0],
            }),
            metrics: EvaluationMetrics {
                auc_roc: 0.8,
                auprc: 0.6,
                confusion_matrix: ConfusionMatrix::default(),
            },
            diagnostics: ModelDiagnostics::default(),
            explainer,
            classifier: Classifier::LogisticRegression(LogisticRegression {
                intercept: -1.0,
                coefficients: array![0.3, 0.9],
            }),
        }
    }

    #[test]
    fn absent_features_are_zero_and_missing_ones_take_the_median() {
        let model = linear_model(Explainer::RuleBased(RuleBasedExplainer::default()));
        let mut features = BTreeMap::new();
        features.insert("glucose_mg_dl_latest".to_string(), None);
        assert_eq!(model.vectorize(&features), vec![0.0, 140.0]);
    }

    #[test]
    fn bundle_round_trip_preserves_predictions() {
        let model = linear_model(Explainer::Attribution(AttributionExplainer { top_k: 5 }));
        let bundle = ModelBundle::new(model);
        let file = NamedTempFile::new().unwrap();
        bundle.save(file.path()).unwrap();
        let loaded = ModelBundle::load(file.path()).unwrap();
        assert_eq!(loaded, bundle);

        let mut features = BTreeMap::new();
        features.insert("age".to_string(), Some(72.0));
        features.insert("glucose_mg_dl_latest".to_string(), Some(210.0));
        let before = bundle.model.score(&features);
        let after = loaded.model.score(&features);
        assert_eq!(before, after);
        assert!(before.probability > 0.5);
    }

    #[test]
    fn unknown_schema_versions_are_rejected() {
        let mut text = ModelBundle::new(linear_model(Explainer::RuleBased(RuleBasedExplainer::default())))
            .to_toml()
            .unwrap();
        text = text.replacen("schema_version = 1", "schema_version = 2", 1);
        let err = ModelBundle::from_toml(&text).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSchema { found: 2, supported: 1 }));
    }
}
