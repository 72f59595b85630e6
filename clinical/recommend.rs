//! Rule table mapping a risk score, the patient's latest values and trends
//! to a prioritised list of clinical actions.

use crate::clinical::trends::{TrendDirection, Trends};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ASSESSMENT_RISK: f64 = 0.6;
pub const LIFESTYLE_RISK: f64 = 0.4;
/// kg per row.
pub const RAPID_WEIGHT_GAIN: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub action: String,
    pub rationale: String,
    pub timeframe: String,
}

impl Recommendation {
    fn new(priority: Priority, action: &str, rationale: String, timeframe: &str) -> Self {
        Self {
            priority,
            action: action.to_string(),
            rationale,
            timeframe: timeframe.to_string(),
        }
    }
}

fn latest(features: &BTreeMap<String, Option<f64>>, name: &str) -> Option<f64> {
    features.get(name).copied().flatten().filter(|v| v.is_finite())
}

/// Applies the rules in declaration order, then stably moves high priority first.
pub fn recommend(
    risk_probability: f64,
    features: &BTreeMap<String, Option<f64>>,
    trends: &Trends,
) -> Vec<Recommendation> {
    use Priority::{High, Medium};
    let mut out = Vec::new();

    if risk_probability > ASSESSMENT_RISK {
        out.push(Recommendation::new(
            High,
            "Schedule immediate clinical assessment",
            "High risk of deterioration in next 90 days".to_string(),
            "within 48 hours",
        ));
    }

    if let Some(glucose) = latest(features, "glucose_mg_dl_latest") {
        if glucose > 180.0 {
            out.push(Recommendation::new(
                High,
                "Review and adjust diabetes medications",
                format!("Recent glucose level {glucose:.0} mg/dL is above target"),
                "within 1 week",
            ));
        } else if glucose > 150.0 {
            out.push(Recommendation::new(
                Medium,
                "Increase glucose monitoring frequency",
                format!("Glucose level {glucose:.0} mg/dL trending above target"),
                "within 2 weeks",
            ));
        }
    }

    if let Some(adherence) = latest(features, "adherence_avg_latest") {
        let percent = adherence * 100.0;
        if adherence < 0.7 {
            out.push(Recommendation::new(
                High,
                "Medication adherence counseling and support",
                format!("Poor medication adherence ({percent:.1}%)"),
                "within 1 week",
            ));
        } else if adherence < 0.8 {
            out.push(Recommendation::new(
                Medium,
                "Review medication barriers and simplify regimen if possible",
                format!("Suboptimal adherence ({percent:.1}%)"),
                "within 2 weeks",
            ));
        }
    }

    if let Some(systolic) = latest(features, "systolic_bp_latest") {
        if systolic > 160.0 {
            out.push(Recommendation::new(
                High,
                "Urgent blood pressure management",
                format!("Systolic BP {systolic:.0} mmHg requires immediate attention"),
                "within 24 hours",
            ));
        } else if systolic > 140.0 {
            out.push(Recommendation::new(
                Medium,
                "Optimize antihypertensive therapy",
                format!("BP {systolic:.0} mmHg above target"),
                "within 1 week",
            ));
        }
    }

    if let Some(weight) = &trends.weight {
        if weight.direction == TrendDirection::Increasing && weight.magnitude > RAPID_WEIGHT_GAIN {
            out.push(Recommendation::new(
                High,
                "Evaluate for fluid retention and heart failure",
                "Rapid weight gain detected".to_string(),
                "within 48 hours",
            ));
        }
    }

    if let Some(hba1c) = latest(features, "hba1c_latest") {
        if hba1c > 8.0 {
            out.push(Recommendation::new(
                Medium,
                "Intensify diabetes management plan",
                format!("HbA1c {hba1c:.1}% above target"),
                "within 1 week",
            ));
        }
    }

    if risk_probability > LIFESTYLE_RISK {
        out.push(Recommendation::new(
            Medium,
            "Reinforce lifestyle modifications (diet, exercise, stress management)",
            "Elevated risk profile warrants comprehensive lifestyle review".to_string(),
            "within 2 weeks",
        ));
    }

    out.sort_by_key(|r| r.priority);
    out
}
