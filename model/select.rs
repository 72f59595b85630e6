//! # Model Selection
//!
//! Splits the snapshot into stratified train and test sets, fits every
//! configured candidate, keeps the one with the best held-out AUC-ROC, and
//! packages it with its diagnostics and explainer as a `TrainedModel`.

use crate::config::{ExplanationConfig, TrainingConfig};
use crate::features::snapshot::Snapshot;
use crate::model::artifact::{CandidateResult, FeatureImportance, ModelDiagnostics, TrainedModel};
use crate::model::classifier::{CandidateSpec, Classifier};
use crate::model::explain::Explainer;
use crate::model::linear::StandardScaler;
use crate::model::metrics::{CalibrationCurve, EvaluationMetrics};
use crate::stats;
use itertools::Itertools;
use ndarray::{Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

pub const CALIBRATION_BINS: usize = 10;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("The snapshot has no rows to train on.")]
    EmptySnapshot,
    #[error("Test fraction must lie strictly between 0 and 1, got {0}.")]
    InvalidTestFraction(f64),
    #[error("No trainable model: every candidate failed ({0}).")]
    NoTrainableModel(String),
}

/// Per-class shuffled split. Each class sends `round(n * test_fraction)` rows
/// to the test set, at least one when it has two or more members and never all of them.
/// Returns `(train, test)` with indices ascending.
pub fn stratified_split(y: &[u8], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [0u8, 1] {
        let mut members: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        members.shuffle(&mut rng);
        let n = members.len();
        let mut take = (n as f64 * test_fraction).round() as usize;
        if n >= 2 {
            take = take.clamp(1, n - 1);
        } else {
            take = take.min(n);
        }
        test.extend_from_slice(&members[..take]);
        train.extend_from_slice(&members[take..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

fn column_medians(x: ArrayView2<f64>) -> Vec<f64> {
    x.axis_iter(Axis(1))
        .map(|column| {
            let values: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
            stats::median(&values).unwrap_or(0.0)
        })
        .collect()
}

pub struct ModelSelector<'a> {
    training: &'a TrainingConfig,
    explanation: &'a ExplanationConfig,
}

impl<'a> ModelSelector<'a> {
    pub fn new(training: &'a TrainingConfig, explanation: &'a ExplanationConfig) -> Self {
        Self {
            training,
            explanation,
        }
    }

    pub fn select(
        &self,
        snapshot: &Snapshot,
        test_fraction: f64,
        seed: u64,
    ) -> Result<TrainedModel, SelectionError> {
        if snapshot.is_empty() {
            return Err(SelectionError::EmptySnapshot);
        }
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(SelectionError::InvalidTestFraction(test_fraction));
        }

        let (train_idx, test_idx) = stratified_split(&snapshot.target, test_fraction, seed);
        let x_train = snapshot.features.select(Axis(0), &train_idx);
        let x_test = snapshot.features.select(Axis(0), &test_idx);
        let y_train: Vec<u8> = train_idx.iter().map(|&i| snapshot.target[i]).collect();
        let y_test: Vec<u8> = test_idx.iter().map(|&i| snapshot.target[i]).collect();
        log::info!(
            "Training on {} rows ({} positive), evaluating on {} rows ({} positive)",
            y_train.len(),
            y_train.iter().filter(|&&t| t == 1).count(),
            y_test.len(),
            y_test.iter().filter(|&&t| t == 1).count()
        );

        let scaler = StandardScaler::fit(x_train.view());
        let x_train_scaled = scaler.transform(x_train.view());
        let x_test_scaled = scaler.transform(x_test.view());

        let mut results = Vec::with_capacity(self.training.candidates.len());
        let mut fitted: Vec<Option<(Classifier, Vec<f64>)>> = Vec::with_capacity(self.training.candidates.len());
        for spec in &self.training.candidates {
            let (train_view, test_view) = if spec.kind().requires_scaling() {
                (x_train_scaled.view(), x_test_scaled.view())
            } else {
                (x_train.view(), x_test.view())
            };
            match evaluate_candidate(spec, train_view, &y_train, test_view, &y_test, seed) {
                Ok((classifier, metrics, proba)) => {
                    log::info!(
                        "{}: AUC-ROC {:.4}, AUPRC {:.4}",
                        spec.name,
                        metrics.auc_roc,
                        metrics.auprc
                    );
                    results.push(CandidateResult {
                        name: spec.name.clone(),
                        kind: spec.kind(),
                        metrics: Some(metrics),
                        error: None,
                    });
                    fitted.push(Some((classifier, proba)));
                }
                Err(reason) => {
                    log::warn!("Skipping candidate '{}': {reason}", spec.name);
                    results.push(CandidateResult {
                        name: spec.name.clone(),
                        kind: spec.kind(),
                        metrics: None,
                        error: Some(reason),
                    });
                    fitted.push(None);
                }
            }
        }

        // Strictly greater keeps the earliest candidate on ties.
        let mut winner: Option<usize> = None;
        for (i, result) in results.iter().enumerate() {
            let Some(metrics) = &result.metrics else {
                continue;
            };
            let better = match winner.and_then(|w| results[w].metrics.as_ref()) {
                Some(best) => metrics.auc_roc > best.auc_roc,
                None => true,
            };
            if better {
                winner = Some(i);
            }
        }
        let Some(w) = winner else {
            let reasons = results
                .iter()
                .map(|r| format!("{}: {}", r.name, r.error.as_deref().unwrap_or("unknown")))
                .join("; ");
            return Err(SelectionError::NoTrainableModel(reasons));
        };
        let Some((classifier, proba)) = fitted[w].take() else {
            return Err(SelectionError::NoTrainableModel("winner was not retained".to_string()));
        };
        let spec = &self.training.candidates[w];
        let metrics = results[w].metrics.clone().ok_or_else(|| {
            SelectionError::NoTrainableModel("winner has no metrics".to_string())
        })?;
        log::info!("Selected '{}' with AUC-ROC {:.4}", spec.name, metrics.auc_roc);

        let calibration = CalibrationCurve::compute(&y_test, &proba, CALIBRATION_BINS);
        let feature_importance = ranked_importance(&classifier, &snapshot.feature_names);

        let kind = classifier.kind();
        let reference_design: &Array2<f64> = if kind.requires_scaling() {
            &x_train_scaled
        } else {
            &x_train
        };
        let explainer = Explainer::select(
            self.explanation.attribution,
            self.explanation.top_k,
            &classifier,
            reference_design.row(0),
        );

        Ok(TrainedModel {
            name: spec.name.clone(),
            kind,
            feature_order: snapshot.feature_names.clone(),
            fill_values: column_medians(x_train.view()),
            scaler: kind.requires_scaling().then_some(scaler),
            metrics,
            diagnostics: ModelDiagnostics {
                train_rows: y_train.len(),
                test_rows: y_test.len(),
                candidates: results,
                calibration,
                feature_importance,
            },
            explainer,
            classifier,
        })
    }
}

/// Fits one candidate and scores it on the test split.
fn evaluate_candidate(
    spec: &CandidateSpec,
    x_train: ArrayView2<f64>,
    y_train: &[u8],
    x_test: ArrayView2<f64>,
    y_test: &[u8],
    seed: u64,
) -> Result<(Classifier, EvaluationMetrics, Vec<f64>), String> {
    log::debug!("Fitting candidate '{}' ({})", spec.name, spec.kind());
    let classifier = Classifier::fit(&spec.model, x_train, y_train, seed).map_err(|e| e.to_string())?;
    let proba = classifier.predict_proba(x_test).to_vec();
    let metrics = EvaluationMetrics::evaluate(y_test, &proba)
        .ok_or_else(|| "held-out metrics are undefined (single-class test split or non-finite scores)".to_string())?;
    Ok((classifier, metrics, proba))
}

fn ranked_importance(classifier: &Classifier, names: &[String]) -> Vec<FeatureImportance> {
    let Some(importances) = classifier.importances() else {
        return Vec::new();
    };
    names
        .iter()
        .zip(importances)
        .map(|(name, &importance)| FeatureImportance {
            feature: name.clone(),
            importance,
        })
        .sorted_by(|a, b| b.importance.total_cmp(&a.importance))
        .collect()
}
