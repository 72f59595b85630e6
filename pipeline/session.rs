//! # Risk Pipeline Session
//!
//! `RiskPipeline` owns the loaded tables, the processed frame and the trained
//! model, and exposes the operations a service layer calls: load, preprocess,
//! snapshot, train, predict, cohort summary, report, and model persistence.
//!
//! Preprocessing always recomputes from the loaded tables, so calling it twice
//! gives the same frame. The trained model is immutable once stored and is
//! shared read-only by parallel cohort inference.

use crate::clinical::cohort::CohortSummary;
use crate::clinical::recommend;
use crate::clinical::trends::TrendAnalyzer;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::features::aggregate::PatientAggregates;
use crate::features::engineer::{EngineeringSummary, FeatureEngineer};
use crate::features::frame::{LongitudinalFrame, PatientPartition};
use crate::features::impute::{ImputationSummary, TemporalImputer};
use crate::features::snapshot::{Snapshot, SnapshotBuilder, SnapshotDiagnostics};
use crate::model::artifact::{ModelBundle, TrainedModel};
use crate::model::select::ModelSelector;
use crate::report::ModelReport;
use crate::types::{
    DATE_COLUMN, DemographicTable, EventTable, OUTCOME_COLUMN, ObservationTable, PATIENT_ID_COLUMN,
    PredictionResult, RiskCategory,
};
use ahash::AHashSet;
use chrono::{NaiveDate, Utc};
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// What `load` saw in the input tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadSummary {
    pub observation_rows: usize,
    pub event_rows: usize,
    pub demographic_rows: usize,
    pub patients: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub positive_rows: usize,
    pub negative_rows: usize,
    pub missing_cell_percent: f64,
    /// Events lacking a date or a type.
    pub incomplete_events: usize,
    /// Events whose patient has no observations.
    pub orphan_events: usize,
}

/// Summaries from the last `preprocess` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreprocessSummary {
    pub imputation: ImputationSummary,
    pub engineering: EngineeringSummary,
}

/// One processed row of a patient's timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRow {
    pub date: NaiveDate,
    pub values: BTreeMap<String, Option<f64>>,
    pub categories: BTreeMap<String, Option<String>>,
}

struct LoadedTables {
    observations: ObservationTable,
    demographics: DemographicTable,
}

pub struct RiskPipeline {
    config: PipelineConfig,
    tables: Option<LoadedTables>,
    frame: Option<LongitudinalFrame>,
    preprocess_summary: Option<PreprocessSummary>,
    aggregates: Vec<PatientAggregates>,
    /// Window used for inference; follows the last snapshot built.
    lookback_days: usize,
    model: Option<TrainedModel>,
}

fn require_column(columns: &[String], column: &str, table: &str) -> Result<(), PipelineError> {
    if columns.iter().any(|c| c == column) {
        Ok(())
    } else {
        Err(PipelineError::Schema(format!(
            "The {table} table is missing the required column '{column}'."
        )))
    }
}

impl RiskPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let lookback_days = config.snapshot.lookback_days;
        Ok(Self {
            config,
            tables: None,
            frame: None,
            preprocess_summary: None,
            aggregates: Vec::new(),
            lookback_days,
            model: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validates and stores the three input tables. Any processed frame from an
    /// earlier load is discarded; a trained or loaded model is kept.
    pub fn load(
        &mut self,
        observations: ObservationTable,
        events: EventTable,
        demographics: DemographicTable,
    ) -> Result<LoadSummary, PipelineError> {
        for column in [PATIENT_ID_COLUMN, DATE_COLUMN, OUTCOME_COLUMN] {
            require_column(&observations.columns, column, "observations")?;
        }
        require_column(&events.columns, PATIENT_ID_COLUMN, "events")?;
        require_column(&demographics.columns, PATIENT_ID_COLUMN, "demographics")?;
        if observations.rows.is_empty() {
            return Err(PipelineError::Validation(
                "The observations table has no rows.".to_string(),
            ));
        }

        let rows = &observations.rows;
        let (first_date, last_date) = match rows.iter().map(|r| r.date).minmax().into_option() {
            Some(range) => range,
            None => {
                return Err(PipelineError::Validation(
                    "The observations table has no rows.".to_string(),
                ));
            }
        };
        let outcomes: Vec<f64> = rows
            .iter()
            .filter_map(|r| r.numeric.get(OUTCOME_COLUMN).copied().flatten())
            .collect();
        let positive_rows = outcomes.iter().filter(|&&v| v != 0.0).count();
        let value_columns = observations.columns.len().saturating_sub(2);
        let total_cells = rows.len() * value_columns;
        let present_cells: usize = rows
            .iter()
            .map(|r| {
                r.numeric.values().filter(|v| v.is_some()).count()
                    + r.categorical.values().filter(|v| v.is_some()).count()
            })
            .sum();
        let missing_cell_percent = if total_cells == 0 {
            0.0
        } else {
            100.0 * total_cells.saturating_sub(present_cells) as f64 / total_cells as f64
        };
        let patient_set: AHashSet<&str> = rows.iter().map(|r| r.patient_id.as_str()).collect();
        let incomplete_events = events
            .rows
            .iter()
            .filter(|e| e.event_date.is_none() || e.event_type.is_none())
            .count();
        let orphan_events = events
            .rows
            .iter()
            .filter(|e| !patient_set.contains(e.patient_id.as_str()))
            .count();

        let summary = LoadSummary {
            observation_rows: rows.len(),
            event_rows: events.rows.len(),
            demographic_rows: demographics.rows.len(),
            patients: patient_set.len(),
            first_date,
            last_date,
            positive_rows,
            negative_rows: outcomes.len() - positive_rows,
            missing_cell_percent,
            incomplete_events,
            orphan_events,
        };
        log::info!(
            "Loaded {} observations for {} patients from {} to {}",
            summary.observation_rows,
            summary.patients,
            summary.first_date,
            summary.last_date
        );
        log::info!(
            "Outcome distribution: {} positive, {} negative rows; {:.1}% of cells missing",
            summary.positive_rows,
            summary.negative_rows,
            summary.missing_cell_percent
        );
        if incomplete_events > 0 || orphan_events > 0 {
            log::warn!(
                "{incomplete_events} events lack a date or type and {orphan_events} refer to patients without observations"
            );
        }

        self.tables = Some(LoadedTables {
            observations,
            demographics,
        });
        self.frame = None;
        self.preprocess_summary = None;
        self.aggregates.clear();
        Ok(summary)
    }

    /// Imputes and engineers a fresh frame from the loaded tables.
    pub fn preprocess(&mut self) -> Result<&LongitudinalFrame, PipelineError> {
        let tables = self.tables.as_ref().ok_or_else(|| {
            PipelineError::Validation("No data loaded. Call load first.".to_string())
        })?;
        let mut frame = LongitudinalFrame::from_tables(&tables.observations, &tables.demographics)?;
        let imputation = TemporalImputer::new(&self.config.columns).impute(&mut frame);
        let (engineering, aggregates) = FeatureEngineer::new(&self.config.columns).engineer(&mut frame);
        self.preprocess_summary = Some(PreprocessSummary {
            imputation,
            engineering,
        });
        self.aggregates = aggregates;
        Ok(self.frame.insert(frame))
    }

    pub fn preprocess_summary(&self) -> Option<&PreprocessSummary> {
        self.preprocess_summary.as_ref()
    }

    fn frame(&self) -> Result<&LongitudinalFrame, PipelineError> {
        self.frame.as_ref().ok_or_else(|| {
            PipelineError::Validation("Data not processed. Call preprocess first.".to_string())
        })
    }

    fn partition(&self, patient_id: &str) -> Result<&PatientPartition, PipelineError> {
        self.frame()?
            .partition(patient_id)
            .ok_or_else(|| PipelineError::NotFound(patient_id.to_string()))
    }

    /// Builds the training snapshot. Later predictions use the same lookback.
    pub fn build_snapshot(
        &mut self,
        lookback_days: usize,
    ) -> Result<(Snapshot, SnapshotDiagnostics), PipelineError> {
        if lookback_days == 0 {
            return Err(PipelineError::Validation(
                "lookback_days must be at least 1".to_string(),
            ));
        }
        let built = SnapshotBuilder::new(&self.config.snapshot).build(self.frame()?, lookback_days)?;
        self.lookback_days = lookback_days;
        Ok(built)
    }

    /// Selects and stores the best candidate. The returned model carries its
    /// held-out metrics and the per-candidate diagnostics.
    pub fn train(
        &mut self,
        snapshot: &Snapshot,
        test_fraction: f64,
        seed: u64,
    ) -> Result<&TrainedModel, PipelineError> {
        let model = ModelSelector::new(&self.config.training, &self.config.explanation)
            .select(snapshot, test_fraction, seed)?;
        Ok(self.model.insert(model))
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    fn trained(&self) -> Result<&TrainedModel, PipelineError> {
        self.model.as_ref().ok_or(PipelineError::NotTrained)
    }

    pub fn predict(&self, patient_id: &str) -> Result<PredictionResult, PipelineError> {
        let model = self.trained()?;
        let frame = self.frame()?;
        let part = self.partition(patient_id)?;

        let features = self
            .config
            .snapshot
            .layout
            .patient_features(frame, part, self.lookback_days);
        let scored = model.score(&features);
        let trends = TrendAnalyzer::analyze(frame, part);
        let recommendations = recommend::recommend(scored.probability, &features, &trends);
        log::debug!(
            "Patient {patient_id}: risk {:.3}, {} explanations, {} recommendations",
            scored.probability,
            scored.explanations.len(),
            recommendations.len()
        );

        Ok(PredictionResult {
            patient_id: patient_id.to_string(),
            risk_probability: scored.probability,
            risk_category: RiskCategory::from_probability(scored.probability),
            risk_class: u8::from(scored.probability >= 0.5),
            explanations: scored.explanations,
            trends,
            recommendations,
            last_updated: Utc::now(),
        })
    }

    /// Predicts every processed patient; failures are logged and skipped.
    pub fn cohort_summary(&self, threshold: f64) -> Result<CohortSummary, PipelineError> {
        self.trained()?;
        let ids = self.patients()?;
        Ok(CohortSummary::aggregate(&ids, threshold, |id| self.predict(id)))
    }

    pub fn report(&self) -> Result<ModelReport, PipelineError> {
        Ok(ModelReport::from_model(self.trained()?))
    }

    pub fn patients(&self) -> Result<Vec<String>, PipelineError> {
        Ok(self
            .frame()?
            .partitions()
            .iter()
            .map(|p| p.patient_id.clone())
            .collect())
    }

    /// The patient's most recent `limit` processed rows, oldest first.
    pub fn patient_history(
        &self,
        patient_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryRow>, PipelineError> {
        let frame = self.frame()?;
        let part = self.partition(patient_id)?;
        Ok(part
            .tail(limit)
            .map(|i| HistoryRow {
                date: frame.dates()[i],
                values: frame
                    .columns()
                    .iter()
                    .map(|c| (c.name.clone(), c.values[i]))
                    .collect(),
                categories: frame
                    .categoricals()
                    .iter()
                    .map(|c| (c.name.clone(), c.values[i].clone()))
                    .collect(),
            })
            .collect())
    }

    /// Timeline aggregates computed during preprocessing.
    pub fn patient_profile(&self, patient_id: &str) -> Result<&PatientAggregates, PipelineError> {
        self.frame()?;
        self.aggregates
            .iter()
            .find(|a| a.patient_id == patient_id)
            .ok_or_else(|| PipelineError::NotFound(patient_id.to_string()))
    }

    pub fn save_model(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        let path = path.as_ref();
        ModelBundle::new(self.trained()?.clone()).save(path)?;
        log::info!("Model saved to {}", path.display());
        Ok(())
    }

    pub fn load_model(&mut self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        let path = path.as_ref();
        let bundle = ModelBundle::load(path)?;
        log::info!(
            "Loaded model '{}' ({}) from {}",
            bundle.model.name,
            bundle.model.kind,
            path.display()
        );
        self.model = Some(bundle.model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{EventRow, ObservationRow};

    fn pipeline() -> RiskPipeline {
        RiskPipeline::new(PipelineConfig::default()).unwrap()
    }

    fn one_row() -> ObservationTable {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        ObservationTable::from_rows(vec![
            ObservationRow::new("P1", date)
                .with_value("glucose_mg_dl", 130.0)
                .with_value(OUTCOME_COLUMN, 0.0),
        ])
    }

    #[test]
    fn load_rejects_missing_outcome_column() {
        let mut table = one_row();
        table.columns.retain(|c| c != OUTCOME_COLUMN);
        let err = pipeline()
            .load(table, EventTable::default(), DemographicTable::from_rows(Vec::new()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn load_rejects_empty_observations() {
        let mut table = one_row();
        table.rows.clear();
        let err = pipeline()
            .load(
                table,
                EventTable::from_rows(Vec::new()),
                DemographicTable::from_rows(Vec::new()),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn load_summarises_the_tables() {
        let events = EventTable::from_rows(vec![EventRow {
            patient_id: "P7".to_string(),
            event_date: None,
            event_type: Some("hospitalization".to_string()),
        }]);
        let summary = pipeline()
            .load(one_row(), events, DemographicTable::from_rows(Vec::new()))
            .unwrap();
        assert_eq!(summary.patients, 1);
        assert_eq!(summary.negative_rows, 1);
        assert_eq!(summary.incomplete_events, 1);
        assert_eq!(summary.orphan_events, 1);
        assert_eq!(summary.missing_cell_percent, 0.0);
    }

    #[test]
    fn operations_before_training_report_not_trained() {
        let mut p = pipeline();
        p.load(
            one_row(),
            EventTable::from_rows(Vec::new()),
            DemographicTable::from_rows(Vec::new()),
        )
        .unwrap();
        p.preprocess().unwrap();
        assert_eq!(p.predict("P1").unwrap_err().kind(), ErrorKind::NotTrained);
        assert_eq!(p.report().unwrap_err().kind(), ErrorKind::NotTrained);
        assert_eq!(p.cohort_summary(0.3).unwrap_err().kind(), ErrorKind::NotTrained);
        assert_eq!(p.patient_history("P2", 10).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(p.patient_history("P1", 10).unwrap().len(), 1);
    }
}
