mod common;

use common::{patient_rows, quick_config, synthetic_cohort};
use rand::SeedableRng;
use rand::rngs::StdRng;
use riskwatch::clinical::recommend::{Priority, recommend};
use riskwatch::clinical::trends::Trends;
use riskwatch::types::RiskCategory;
use riskwatch::{ErrorKind, RiskPipeline};
use std::collections::BTreeMap;

const ASSESSMENT_ACTION: &str = "Schedule immediate clinical assessment";

fn prepared(patients: usize, days: usize, seed: u64) -> (RiskPipeline, common::Cohort) {
    let cohort = synthetic_cohort(patients, days, seed);
    let mut pipeline = RiskPipeline::new(quick_config()).unwrap();
    pipeline
        .load(
            cohort.observations.clone(),
            cohort.events.clone(),
            cohort.demographics.clone(),
        )
        .unwrap();
    pipeline.preprocess().unwrap();
    (pipeline, cohort)
}

fn trained(patients: usize, seed: u64) -> (RiskPipeline, common::Cohort) {
    let (mut pipeline, cohort) = prepared(patients, 40, seed);
    let (snapshot, _) = pipeline.build_snapshot(30).unwrap();
    let returned = pipeline.train(&snapshot, 0.25, 42).unwrap().clone();
    assert_eq!(pipeline.model(), Some(&returned));
    (pipeline, cohort)
}

#[test]
fn labs_have_no_gaps_after_preprocessing() {
    let (mut pipeline, _) = prepared(8, 25, 1);
    let frame = pipeline.preprocess().unwrap();
    let hba1c = frame.values("hba1c").unwrap();
    for part in frame.partitions() {
        assert!(hba1c[part.rows.clone()].iter().all(|v| v.is_some()));
    }
}

#[test]
fn preprocessing_is_idempotent() {
    let (mut pipeline, _) = prepared(6, 20, 2);
    let first: Vec<String> = pipeline
        .preprocess()
        .unwrap()
        .column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let second: Vec<String> = pipeline
        .preprocess()
        .unwrap()
        .column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(first, second);
}

#[test]
fn snapshot_excludes_short_histories_and_uses_the_last_outcome() {
    let mut cohort = synthetic_cohort(20, 35, 3);
    let mut rng = StdRng::seed_from_u64(99);
    cohort
        .observations
        .rows
        .extend(patient_rows("SHORT", 10, 0.9, 1, &mut rng));
    let mut pipeline = RiskPipeline::new(quick_config()).unwrap();
    pipeline
        .load(cohort.observations, cohort.events, cohort.demographics)
        .unwrap();
    pipeline.preprocess().unwrap();

    let (snapshot, diagnostics) = pipeline.build_snapshot(30).unwrap();
    assert_eq!(diagnostics.patients_considered, 21);
    assert_eq!(diagnostics.excluded_short_history, 1);
    assert!(!snapshot.patient_ids.iter().any(|id| id == "SHORT"));
    for (id, &target) in snapshot.patient_ids.iter().zip(&snapshot.target) {
        assert_eq!(target, cohort.labels[id]);
    }
    assert!(snapshot.features.iter().all(|v| v.is_finite()));
    assert!(snapshot.feature_names.iter().any(|n| n == "glucose_mg_dl_latest"));
}

#[test]
fn an_empty_snapshot_is_a_validation_error() {
    let (mut pipeline, _) = prepared(5, 12, 4);
    let err = pipeline.build_snapshot(30).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn training_selects_the_best_candidate_and_predicts() {
    let (pipeline, _) = trained(60, 5);
    let model = pipeline.model().unwrap();
    for candidate in &model.diagnostics.candidates {
        if let Some(metrics) = &candidate.metrics {
            assert!(model.metrics.auc_roc >= metrics.auc_roc);
        }
    }
    assert!(model.metrics.auc_roc > 0.6);

    let result = pipeline.predict("P000").unwrap();
    assert!((0.0..=1.0).contains(&result.risk_probability));
    assert_eq!(
        result.risk_category,
        RiskCategory::from_probability(result.risk_probability)
    );
    assert_eq!(result.risk_class, u8::from(result.risk_probability >= 0.5));
    assert!(result.explanations.len() <= 5);
    assert!(
        result
            .recommendations
            .windows(2)
            .all(|w| w[0].priority <= w[1].priority)
    );
    assert!(result.trends.glucose.is_some());
}

#[test]
fn unknown_patients_are_not_found() {
    let (pipeline, _) = trained(40, 6);
    assert_eq!(pipeline.predict("NOBODY").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        pipeline.patient_profile("NOBODY").unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn predict_before_training_is_not_trained() {
    let (pipeline, _) = prepared(4, 10, 7);
    assert_eq!(pipeline.predict("P000").unwrap_err().kind(), ErrorKind::NotTrained);
}

#[test]
fn cohort_summary_covers_every_patient() {
    let (pipeline, _) = trained(40, 8);
    let summary = pipeline.cohort_summary(0.3).unwrap();
    assert_eq!(summary.total_patients + summary.skipped, 40);
    assert_eq!(
        summary.low_risk_count + summary.medium_risk_count + summary.high_risk_count,
        summary.total_patients
    );
    assert!(
        summary
            .patient_risks
            .windows(2)
            .all(|w| w[0].risk_probability >= w[1].risk_probability)
    );
    let flagged = summary
        .patient_risks
        .iter()
        .filter(|e| e.risk_probability >= 0.3)
        .count();
    assert_eq!(summary.at_or_above_threshold, flagged);
}

#[test]
fn report_mirrors_the_trained_model() {
    let (pipeline, _) = trained(40, 9);
    let report = pipeline.report().unwrap();
    let model = pipeline.model().unwrap();
    assert_eq!(report.model_performance.best_model, model.name);
    assert_eq!(report.candidates.len(), 3);
    let [[tn, fp], [fn_, tp]] = report.model_performance.confusion_matrix;
    assert_eq!(tn + fp + fn_ + tp, model.diagnostics.test_rows);
    if model.kind.is_tree_ensemble() {
        assert!(!report.feature_importance.is_empty());
    }
}

#[test]
fn high_risk_recommendations_put_assessment_first() {
    let features: BTreeMap<String, Option<f64>> = [
        ("glucose_mg_dl_latest", 210.0),
        ("systolic_bp_latest", 165.0),
        ("adherence_avg_latest", 0.65),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), Some(v)))
    .collect();
    let recommendations = recommend(0.72, &features, &Trends::default());
    assert_eq!(RiskCategory::from_probability(0.72), RiskCategory::High);
    assert_eq!(recommendations.len(), 5);
    assert_eq!(recommendations[0].action, ASSESSMENT_ACTION);
    assert!(recommendations[..4].iter().all(|r| r.priority == Priority::High));
    assert_eq!(recommendations[4].priority, Priority::Medium);

    let (pipeline, _) = trained(60, 10);
    for id in pipeline.patients().unwrap() {
        let result = pipeline.predict(&id).unwrap();
        let assessed = result
            .recommendations
            .iter()
            .position(|r| r.action == ASSESSMENT_ACTION);
        if result.risk_probability > 0.6 {
            assert_eq!(assessed, Some(0));
            assert_eq!(result.recommendations[0].priority, Priority::High);
        } else {
            assert_eq!(assessed, None);
        }
        assert!(
            result
                .recommendations
                .windows(2)
                .all(|w| w[0].priority <= w[1].priority)
        );
    }
}

#[test]
fn patient_history_returns_the_latest_rows() {
    let (pipeline, _) = prepared(3, 15, 11);
    let history = pipeline.patient_history("P001", 5).unwrap();
    assert_eq!(history.len(), 5);
    assert!(history.windows(2).all(|w| w[0].date < w[1].date));
    assert!(history[0].values.contains_key("glucose_mg_dl"));
    assert_eq!(pipeline.patients().unwrap().len(), 3);
}
