//! Feature engineering over the imputed longitudinal frame.

use crate::config::ColumnRoles;
use crate::features::aggregate::{self, PatientAggregates};
use crate::features::encode::{self, CategoryLevels};
use crate::features::frame::LongitudinalFrame;
use crate::features::impute;
use crate::features::indicators;
use crate::features::prune::{self, CORRELATION_THRESHOLD};
use crate::features::rolling;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineeringSummary {
    /// Lab and vital cells filled with the population median.
    pub population_filled: usize,
    pub added: Vec<String>,
    pub pruned: Vec<String>,
    pub category_levels: CategoryLevels,
}

pub struct FeatureEngineer<'a> {
    roles: &'a ColumnRoles,
    correlation_threshold: f64,
}

impl<'a> FeatureEngineer<'a> {
    pub fn new(roles: &'a ColumnRoles) -> Self {
        Self {
            roles,
            correlation_threshold: CORRELATION_THRESHOLD,
        }
    }

    /// Runs every stage in order. Returns the summary and the per-patient aggregates.
    pub fn engineer(&self, frame: &mut LongitudinalFrame) -> (EngineeringSummary, Vec<PatientAggregates>) {
        let mut summary = EngineeringSummary::default();

        for name in self.roles.labs.iter().chain(&self.roles.vitals) {
            summary.population_filled += impute::fill_with_population_median(frame, name);
        }

        summary.added.extend(indicators::add_clinical_flags(frame));
        summary.added.extend(indicators::add_calendar_features(frame));
        summary.added.extend(rolling::add_rolling_features(
            frame,
            &self.roles.rolling_channels,
            &self.roles.rolling_windows,
        ));
        let aggregates = aggregate::add_composite_scores(frame);
        summary.added.extend([
            aggregate::GLUCOSE_VARIABILITY_SCORE.to_string(),
            aggregate::BP_RISK_SCORE.to_string(),
            aggregate::ADHERENCE_RISK_SCORE.to_string(),
        ]);
        summary.category_levels = encode::encode_categoricals(frame, &self.roles.categorical);
        summary.added.extend(summary.category_levels.keys().cloned());

        summary.pruned = prune::prune_redundant(frame, self.correlation_threshold);
        summary.added.retain(|name| !summary.pruned.contains(name));

        log::info!(
            "Feature engineering added {} columns and pruned {} redundant columns ({} columns total)",
            summary.added.len(),
            summary.pruned.len(),
            frame.columns().len()
        );
        (summary, aggregates)
    }
}
