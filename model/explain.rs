//! # Explanation Engine
//!
//! Turns one prediction into a short ranked list of contributing factors.
//! The explainer is fixed when the model is trained and stored with it:
//! `Attribution` decomposes the classifier's own output feature by feature,
//! `RuleBased` applies a small table of clinical thresholds. When attribution
//! cannot be trusted for a particular row the rule table answers instead and
//! a warning is logged; callers always receive a list.

use crate::model::classifier::Classifier;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_TOP_K: usize = 5;
const ADDITIVITY_TOLERANCE: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum ExplanationError {
    #[error("Row has {found} values but the classifier expects {expected}.")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Contributions contain non-finite values.")]
    NonFinite,
    #[error("Contributions sum to {sum} but the model output is {output}.")]
    NotAdditive { sum: f64, output: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Impact {
    #[serde(rename = "increases risk")]
    IncreasesRisk,
    #[serde(rename = "decreases risk")]
    DecreasesRisk,
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncreasesRisk => write!(f, "increases risk"),
            Self::DecreasesRisk => write!(f, "decreases risk"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub factor: String,
    pub impact: Impact,
    pub magnitude: f64,
    pub value: f64,
}

/// Clinician-facing label for a snapshot feature.
pub fn readable_label(feature: &str) -> String {
    let fixed = match feature {
        "glucose_mg_dl_latest" => "Recent glucose levels",
        "systolic_bp_latest" => "Recent blood pressure",
        "adherence_avg_latest" => "Medication adherence",
        "weight_kg_latest" => "Current weight",
        "hba1c_latest" => "Long-term glucose control (HbA1c)",
        "glucose_mean_30d" | "glucose_mg_dl_mean_30d" => "30-day average glucose",
        "glucose_std_30d" | "glucose_mg_dl_std_30d" => "Glucose variability (30 days)",
        "weight_change_7d" => "Recent weight change",
        "bp_controlled" => "Blood pressure control",
        "glucose_tir" => "Time in glucose target range",
        "age" => "Age",
        "comorbidity_count" => "Number of chronic conditions",
        "adherence_risk_score" => "Medication adherence pattern",
        "bp_risk_score" => "Blood pressure risk level",
        _ => return title_case(feature),
    };
    fixed.to_string()
}

/// Underscores become spaces; a letter is upper-cased when it follows a
/// non-letter and lower-cased otherwise (`weight_kg_slope_7d` -> `Weight Kg Slope 7D`).
fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut previous_alpha = false;
    for c in name.chars() {
        let c = if c == '_' { ' ' } else { c };
        if c.is_alphabetic() {
            if previous_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(c);
            previous_alpha = false;
        }
    }
    out
}

/// Everything an explainer may look at for one patient.
pub struct ExplanationContext<'a> {
    pub classifier: &'a Classifier,
    pub feature_order: &'a [String],
    /// Unscaled values in `feature_order`.
    pub raw: &'a [f64],
    /// The vector the classifier actually sees (scaled when the model requires it).
    pub model_input: ArrayView1<'a, f64>,
    /// Features the patient actually has, by name.
    pub observed: &'a BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Above,
    Below,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationRule {
    pub feature: String,
    pub label: String,
    pub comparison: Comparison,
    pub threshold: f64,
    pub magnitude: f64,
}

impl ExplanationRule {
    fn new(feature: &str, label: &str, comparison: Comparison, threshold: f64, magnitude: f64) -> Self {
        Self {
            feature: feature.to_string(),
            label: label.to_string(),
            comparison,
            threshold,
            magnitude,
        }
    }

    fn fires(&self, value: f64) -> bool {
        match self.comparison {
            Comparison::Above => value > self.threshold,
            Comparison::Below => value < self.threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBasedExplainer {
    pub top_k: usize,
    pub rules: Vec<ExplanationRule>,
}

impl Default for RuleBasedExplainer {
    fn default() -> Self {
        Self::with_top_k(DEFAULT_TOP_K)
    }
}

impl RuleBasedExplainer {
    pub fn with_top_k(top_k: usize) -> Self {
        Self {
            top_k,
            rules: vec![
                ExplanationRule::new("glucose_mg_dl_latest", "Recent glucose levels", Comparison::Above, 200.0, 0.8),
                ExplanationRule::new("systolic_bp_latest", "Blood pressure control", Comparison::Above, 150.0, 0.6),
                ExplanationRule::new("adherence_avg_latest", "Medication adherence", Comparison::Below, 0.8, 0.9),
                ExplanationRule::new("age", "Age", Comparison::Above, 70.0, 0.4),
            ],
        }
    }

    pub fn explain(&self, observed: &BTreeMap<String, f64>) -> Vec<Explanation> {
        let mut out: Vec<Explanation> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let value = *observed.get(&rule.feature)?;
                rule.fires(value).then(|| Explanation {
                    factor: rule.label.clone(),
                    impact: Impact::IncreasesRisk,
                    magnitude: rule.magnitude,
                    value,
                })
            })
            .collect();
        out.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
        out.truncate(self.top_k);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionExplainer {
    pub top_k: usize,
}

impl AttributionExplainer {
    /// Ranked contributions, or an error when they cannot be trusted for this row.
    pub fn explain(&self, ctx: &ExplanationContext<'_>) -> Result<Vec<Explanation>, ExplanationError> {
        let expected = ctx.classifier.n_features();
        for found in [ctx.model_input.len(), ctx.raw.len(), ctx.feature_order.len()] {
            if found != expected {
                return Err(ExplanationError::DimensionMismatch { expected, found });
            }
        }
        let contributions = checked_contributions(ctx.classifier, ctx.model_input)?;

        let mut order: Vec<usize> = (0..contributions.len()).collect();
        // Stable sort keeps feature order among equal magnitudes.
        order.sort_by(|&a, &b| contributions[b].abs().total_cmp(&contributions[a].abs()));
        Ok(order
            .into_iter()
            .take(self.top_k)
            .map(|j| Explanation {
                factor: readable_label(&ctx.feature_order[j]),
                impact: if contributions[j] > 0.0 {
                    Impact::IncreasesRisk
                } else {
                    Impact::DecreasesRisk
                },
                magnitude: contributions[j].abs(),
                value: ctx.raw[j],
            })
            .collect())
    }
}

/// Contributions that are finite and add back up to the decomposed output.
fn checked_contributions(classifier: &Classifier, row: ArrayView1<f64>) -> Result<Vec<f64>, ExplanationError> {
    let (base, contributions) = classifier.contributions(row);
    if !base.is_finite() || contributions.iter().any(|c| !c.is_finite()) {
        return Err(ExplanationError::NonFinite);
    }
    let sum = base + contributions.iter().sum::<f64>();
    let output = classifier.decomposed_output(row);
    if (sum - output).abs() > ADDITIVITY_TOLERANCE * output.abs().max(1.0) {
        return Err(ExplanationError::NotAdditive { sum, output });
    }
    Ok(contributions)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Explainer {
    Attribution(AttributionExplainer),
    RuleBased(RuleBasedExplainer),
}

impl Explainer {
    /// Chooses attribution when it is enabled and reproduces the model output
    /// on `reference`, a row of the training design.
    pub fn select(enabled: bool, top_k: usize, classifier: &Classifier, reference: ArrayView1<f64>) -> Self {
        if !enabled {
            log::info!("Attribution disabled; using rule-based explanations");
            return Self::RuleBased(RuleBasedExplainer::with_top_k(top_k));
        }
        match checked_contributions(classifier, reference) {
            Ok(_) => Self::Attribution(AttributionExplainer { top_k }),
            Err(e) => {
                log::warn!("Attribution self-check failed ({e}); using rule-based explanations");
                Self::RuleBased(RuleBasedExplainer::with_top_k(top_k))
            }
        }
    }

    pub fn explain(&self, ctx: &ExplanationContext<'_>) -> Vec<Explanation> {
        match self {
            Self::RuleBased(rules) => rules.explain(ctx.observed),
            Self::Attribution(attribution) => attribution.explain(ctx).unwrap_or_else(|e| {
                log::warn!("ExplanationDegraded: {e}; falling back to rule-based explanations");
                RuleBasedExplainer::with_top_k(attribution.top_k).explain(ctx.observed)
            }),
        }
    }
}
