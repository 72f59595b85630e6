//! Patient-level aggregates and the composite risk scores derived from them.
//!
//! Aggregates are computed once per patient over the whole timeline. Only the
//! three composite scores are broadcast back onto the patient's rows.

use crate::features::frame::{Column, ColumnKind, LongitudinalFrame, PatientPartition};
use crate::features::indicators::{ADHERENCE, GLUCOSE, SYSTOLIC, WEIGHT};
use crate::stats;
use rayon::prelude::*;
use serde::Serialize;

pub const GLUCOSE_VARIABILITY_SCORE: &str = "glucose_variability_score";
pub const BP_RISK_SCORE: &str = "bp_risk_score";
pub const ADHERENCE_RISK_SCORE: &str = "adherence_risk_score";

/// Summary of one patient's timeline. Missing aggregates are 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatientAggregates {
    pub patient_id: String,
    pub age: f64,
    pub comorbidity_count: f64,
    pub bmi: f64,
    pub glucose_mean: f64,
    pub glucose_std: f64,
    pub glucose_max: f64,
    pub glucose_min: f64,
    pub systolic_mean: f64,
    pub systolic_std: f64,
    pub systolic_max: f64,
    pub weight_mean: f64,
    pub weight_std: f64,
    pub adherence_mean: f64,
    pub adherence_min: f64,
    pub steps_mean: f64,
    pub steps_std: f64,
    pub glucose_tir_rate: f64,
    pub bp_controlled_rate: f64,
}

impl PatientAggregates {
    pub fn compute(frame: &LongitudinalFrame, part: &PatientPartition) -> Self {
        let channel = |name: &str| -> Vec<f64> {
            frame
                .values(name)
                .map(|v| stats::present(&v[part.rows.clone()]))
                .unwrap_or_default()
        };
        let first = |name: &str| -> f64 {
            frame
                .values(name)
                .and_then(|v| v[part.rows.clone()].iter().flatten().next().copied())
                .unwrap_or(0.0)
        };
        let or_zero = |v: Option<f64>| v.unwrap_or(0.0);

        let glucose = channel(GLUCOSE);
        let systolic = channel(SYSTOLIC);
        let weight = channel(WEIGHT);
        let adherence = channel(ADHERENCE);
        let steps = channel("steps");

        Self {
            patient_id: part.patient_id.clone(),
            age: first("age"),
            comorbidity_count: first("comorbidity_count"),
            bmi: first("bmi"),
            glucose_mean: or_zero(stats::mean(&glucose)),
            glucose_std: or_zero(stats::sample_std(&glucose)),
            glucose_max: or_zero(stats::max(&glucose)),
            glucose_min: or_zero(stats::min(&glucose)),
            systolic_mean: or_zero(stats::mean(&systolic)),
            systolic_std: or_zero(stats::sample_std(&systolic)),
            systolic_max: or_zero(stats::max(&systolic)),
            weight_mean: or_zero(stats::mean(&weight)),
            weight_std: or_zero(stats::sample_std(&weight)),
            adherence_mean: or_zero(stats::mean(&adherence)),
            adherence_min: or_zero(stats::min(&adherence)),
            steps_mean: or_zero(stats::mean(&steps)),
            steps_std: or_zero(stats::sample_std(&steps)),
            glucose_tir_rate: or_zero(stats::mean(&channel("glucose_tir"))),
            bp_controlled_rate: or_zero(stats::mean(&channel("bp_controlled"))),
        }
    }

    pub fn glucose_variability_score(&self) -> f64 {
        if self.glucose_mean == 0.0 {
            0.0
        } else {
            self.glucose_std / self.glucose_mean
        }
    }

    pub fn bp_risk_score(&self) -> f64 {
        let high_mean = (self.systolic_mean > 140.0) as u8;
        let crisis_peak = (self.systolic_max > 180.0) as u8;
        f64::from(high_mean + crisis_peak)
    }

    /// A patient with no adherence readings scores 2.
    pub fn adherence_risk_score(&self) -> f64 {
        let low_mean = (self.adherence_mean < 0.8) as u8;
        let low_floor = (self.adherence_min < 0.6) as u8;
        f64::from(low_mean + low_floor)
    }
}

/// Computes aggregates for every patient in parallel and broadcasts the
/// composite scores. Returns the per-patient aggregates in patient order.
pub fn add_composite_scores(frame: &mut LongitudinalFrame) -> Vec<PatientAggregates> {
    let view: &LongitudinalFrame = frame;
    let aggregates: Vec<PatientAggregates> = view
        .partitions()
        .par_iter()
        .map(|part| PatientAggregates::compute(view, part))
        .collect();

    let n = frame.len();
    let mut variability = vec![None; n];
    let mut bp = vec![None; n];
    let mut adherence = vec![None; n];
    for (part, agg) in frame.partitions().iter().zip(&aggregates) {
        for r in part.rows.clone() {
            variability[r] = Some(agg.glucose_variability_score());
            bp[r] = Some(agg.bp_risk_score());
            adherence[r] = Some(agg.adherence_risk_score());
        }
    }
    frame.push_column(Column::new(GLUCOSE_VARIABILITY_SCORE, ColumnKind::Composite, variability));
    frame.push_column(Column::new(BP_RISK_SCORE, ColumnKind::Composite, bp));
    frame.push_column(Column::new(ADHERENCE_RISK_SCORE, ColumnKind::Composite, adherence));
    aggregates
}
