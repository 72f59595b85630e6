//! Serializable summary of a trained model for reviewers.

use crate::model::artifact::{CandidateResult, FeatureImportance, TrainedModel};
use crate::model::metrics::CalibrationCurve;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reliability {
    Good,
    Moderate,
    Poor,
}

impl Reliability {
    pub fn from_auc(auc: f64) -> Self {
        if auc > 0.75 {
            Self::Good
        } else if auc > 0.65 {
            Self::Moderate
        } else {
            Self::Poor
        }
    }
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub best_model: String,
    pub auc_roc: f64,
    pub auprc: f64,
    /// `[[tn, fp], [fn, tp]]` at threshold 0.5.
    pub confusion_matrix: [[usize; 2]; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalInterpretation {
    pub model_reliability: Reliability,
    pub recommended_use: Vec<String>,
    pub clinical_value: Vec<String>,
    pub limitations: Vec<String>,
}

impl ClinicalInterpretation {
    pub fn from_auc(auc: f64) -> Self {
        let mut recommended_use = Vec::new();
        let mut clinical_value = Vec::new();
        let mut limitations = Vec::new();
        if auc > 0.8 {
            recommended_use.push("Suitable for clinical decision support".to_string());
            clinical_value.push("High discriminative ability for risk stratification".to_string());
        } else if auc > 0.7 {
            recommended_use.push("Useful for population health management".to_string());
            clinical_value.push("Moderate ability to identify high-risk patients".to_string());
        } else {
            recommended_use.push("Requires further development before clinical use".to_string());
            limitations.push("Limited discriminative ability".to_string());
        }
        limitations.extend(
            [
                "Not validated on real clinical data",
                "Performance may vary across different patient populations",
                "Should be used as a decision support tool, not replacement for clinical judgment",
            ]
            .map(str::to_string),
        );
        Self {
            model_reliability: Reliability::from_auc(auc),
            recommended_use,
            clinical_value,
            limitations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub model_performance: ModelPerformance,
    pub candidates: Vec<CandidateResult>,
    /// Empty unless the winner is a tree ensemble.
    pub feature_importance: Vec<FeatureImportance>,
    pub calibration: CalibrationCurve,
    pub clinical_interpretation: ClinicalInterpretation,
}

impl ModelReport {
    pub fn from_model(model: &TrainedModel) -> Self {
        Self {
            model_performance: ModelPerformance {
                best_model: model.name.clone(),
                auc_roc: model.metrics.auc_roc,
                auprc: model.metrics.auprc,
                confusion_matrix: model.metrics.confusion_matrix.as_rows(),
            },
            candidates: model.diagnostics.candidates.clone(),
            feature_importance: model.diagnostics.feature_importance.clone(),
            calibration: model.diagnostics.calibration.clone(),
            clinical_interpretation: ClinicalInterpretation::from_auc(model.metrics.auc_roc),
        }
    }
}
