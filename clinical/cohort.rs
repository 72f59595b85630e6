//! Population summary over per-patient predictions.

use crate::types::{PredictionResult, RiskCategory};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub const UNKNOWN_FACTOR: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortEntry {
    pub patient_id: String,
    pub risk_probability: f64,
    pub risk_category: RiskCategory,
    pub top_risk_factor: String,
}

impl From<&PredictionResult> for CohortEntry {
    fn from(result: &PredictionResult) -> Self {
        Self {
            patient_id: result.patient_id.clone(),
            risk_probability: result.risk_probability,
            risk_category: result.risk_category,
            top_risk_factor: result
                .explanations
                .first()
                .map_or_else(|| UNKNOWN_FACTOR.to_string(), |e| e.factor.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortSummary {
    pub total_patients: usize,
    pub low_risk_count: usize,
    pub medium_risk_count: usize,
    pub high_risk_count: usize,
    pub average_risk: f64,
    pub threshold: f64,
    pub at_or_above_threshold: usize,
    /// Failed patients are excluded and counted here.
    pub skipped: usize,
    /// Descending by risk.
    pub patient_risks: Vec<CohortEntry>,
    pub generated_at: DateTime<Utc>,
}

impl CohortSummary {
    /// Runs `predict` for every id in parallel. Failures are logged and skipped.
    pub fn aggregate<F, E>(patient_ids: &[String], threshold: f64, predict: F) -> Self
    where
        F: Fn(&str) -> Result<PredictionResult, E> + Sync,
        E: Display,
    {
        let outcomes: Vec<Option<CohortEntry>> = patient_ids
            .par_iter()
            .map(|id| match predict(id) {
                Ok(result) => Some(CohortEntry::from(&result)),
                Err(e) => {
                    log::warn!("Skipping patient {id} in cohort summary: {e}");
                    None
                }
            })
            .collect();
        let skipped = outcomes.iter().filter(|o| o.is_none()).count();
        let entries: Vec<CohortEntry> = outcomes.into_iter().flatten().collect();
        Self::from_entries(entries, threshold, skipped)
    }

    pub fn from_entries(mut entries: Vec<CohortEntry>, threshold: f64, skipped: usize) -> Self {
        entries.sort_by(|a, b| b.risk_probability.total_cmp(&a.risk_probability));
        let count = |category: RiskCategory| entries.iter().filter(|e| e.risk_category == category).count();
        let average_risk = if entries.is_empty() {
            0.0
        } else {
            entries.iter().map(|e| e.risk_probability).sum::<f64>() / entries.len() as f64
        };
        let summary = Self {
            total_patients: entries.len(),
            low_risk_count: count(RiskCategory::Low),
            medium_risk_count: count(RiskCategory::Medium),
            high_risk_count: count(RiskCategory::High),
            average_risk,
            threshold,
            at_or_above_threshold: entries
                .iter()
                .filter(|e| e.risk_probability >= threshold)
                .count(),
            skipped,
            patient_risks: entries,
            generated_at: Utc::now(),
        };
        log::info!(
            "Cohort: {} patients ({} high, {} medium, {} low), average risk {:.3}, {} skipped",
            summary.total_patients,
            summary.high_risk_count,
            summary.medium_risk_count,
            summary.low_risk_count,
            summary.average_risk,
            summary.skipped
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clinical::trends::Trends;
    use crate::model::explain::{Explanation, Impact};
    use approx::assert_abs_diff_eq;

    fn prediction(id: &str, p: f64, factor: Option<&str>) -> PredictionResult {
        PredictionResult {
            patient_id: id.to_string(),
            risk_probability: p,
            risk_category: RiskCategory::from_probability(p),
            risk_class: u8::from(p >= 0.5),
            explanations: factor
                .map(|f| Explanation {
                    factor: f.to_string(),
                    impact: Impact::IncreasesRisk,
                    magnitude: 0.5,
                    value: 1.0,
                })
                .into_iter()
                .collect(),
            trends: Trends::default(),
            recommendations: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn counts_sorting_and_skips() {
        let ids: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        let summary = CohortSummary::aggregate(&ids, 0.3, |id| match id {
            "A" => Ok(prediction(id, 0.2, Some("Age"))),
            "B" => Ok(prediction(id, 0.9, None)),
            "C" => Ok(prediction(id, 0.3, Some("Medication adherence"))),
            _ => Err("no rows"),
        });
        assert_eq!(summary.total_patients, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(
            (summary.low_risk_count, summary.medium_risk_count, summary.high_risk_count),
            (1, 1, 1)
        );
        assert_eq!(summary.at_or_above_threshold, 2);
        assert_abs_diff_eq!(summary.average_risk, (0.2 + 0.9 + 0.3) / 3.0, epsilon = 1e-12);
        let order: Vec<&str> = summary.patient_risks.iter().map(|e| e.patient_id.as_str()).collect();
        assert_eq!(order, vec!["B", "C", "A"]);
        assert_eq!(summary.patient_risks[0].top_risk_factor, UNKNOWN_FACTOR);
    }

    #[test]
    fn empty_cohort_has_zero_average() {
        let summary = CohortSummary::from_entries(Vec::new(), 0.5, 0);
        assert_eq!(summary.total_patients, 0);
        assert_eq!(summary.average_risk, 0.0);
    }
}
