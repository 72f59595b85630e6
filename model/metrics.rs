//! Held-out evaluation: ranking metrics, the confusion matrix and calibration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    pub fn at_threshold(y: &[u8], proba: &[f64], threshold: f64) -> Self {
        let mut m = Self::default();
        for (&t, &p) in y.iter().zip(proba) {
            match (t == 1, p >= threshold) {
                (false, false) => m.true_negative += 1,
                (false, true) => m.false_positive += 1,
                (true, false) => m.false_negative += 1,
                (true, true) => m.true_positive += 1,
            }
        }
        m
    }

    /// `[[tn, fp], [fn, tp]]`
    pub fn as_rows(&self) -> [[usize; 2]; 2] {
        [
            [self.true_negative, self.false_positive],
            [self.false_negative, self.true_positive],
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub auc_roc: f64,
    pub auprc: f64,
    pub confusion_matrix: ConfusionMatrix,
}

impl EvaluationMetrics {
    /// `None` when either metric is undefined, e.g. a single-class test split.
    pub fn evaluate(y: &[u8], proba: &[f64]) -> Option<Self> {
        if proba.iter().any(|p| !p.is_finite()) {
            return None;
        }
        Some(Self {
            auc_roc: auc_roc(y, proba)?,
            auprc: average_precision(y, proba)?,
            confusion_matrix: ConfusionMatrix::at_threshold(y, proba, 0.5),
        })
    }
}

/// Area under the ROC curve via the rank statistic; tied scores share their mean rank.
pub fn auc_roc(y: &[u8], proba: &[f64]) -> Option<f64> {
    let positives = y.iter().filter(|&&t| t == 1).count();
    let negatives = y.len() - positives;
    if positives == 0 || negatives == 0 || y.len() != proba.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..proba.len()).collect();
    order.sort_by(|&a, &b| proba[a].total_cmp(&proba[b]));
    let mut ranks = vec![0.0; proba.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && proba[order[j + 1]] == proba[order[i]] {
            j += 1;
        }
        // Ranks are 1-based.
        let shared = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = shared;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = y
        .iter()
        .zip(&ranks)
        .filter(|(t, _)| **t == 1)
        .map(|(_, r)| r)
        .sum();
    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Step-wise average precision: `sum_k (R_k - R_{k-1}) * P_k` over distinct thresholds.
pub fn average_precision(y: &[u8], proba: &[f64]) -> Option<f64> {
    let positives = y.iter().filter(|&&t| t == 1).count();
    if positives == 0 || y.len() != proba.len() {
        return None;
    }
    let mut order: Vec<usize> = (0..proba.len()).collect();
    order.sort_by(|&a, &b| proba[b].total_cmp(&proba[a]));

    let mut ap = 0.0;
    let mut tp = 0usize;
    let mut seen = 0usize;
    let mut last_recall = 0.0;
    let mut i = 0;
    while i < order.len() {
        let threshold = proba[order[i]];
        while i < order.len() && proba[order[i]] == threshold {
            tp += usize::from(y[order[i]] == 1);
            seen += 1;
            i += 1;
        }
        let recall = tp as f64 / positives as f64;
        let precision = tp as f64 / seen as f64;
        ap += (recall - last_recall) * precision;
        last_recall = recall;
    }
    Some(ap)
}

/// Reliability curve over uniform bins; only non-empty bins are reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCurve {
    pub mean_predicted: Vec<f64>,
    pub fraction_positive: Vec<f64>,
}

impl CalibrationCurve {
    pub fn compute(y: &[u8], proba: &[f64], bins: usize) -> Self {
        let bins = bins.max(1);
        let mut sums = vec![0.0; bins];
        let mut hits = vec![0.0; bins];
        let mut counts = vec![0usize; bins];
        for (&t, &p) in y.iter().zip(proba) {
            // Number of interior edges strictly below p.
            let bin = (1..bins)
                .filter(|&k| (k as f64 / bins as f64) < p)
                .count();
            sums[bin] += p;
            hits[bin] += f64::from(t);
            counts[bin] += 1;
        }

        let mut curve = Self::default();
        for b in 0..bins {
            if counts[b] > 0 {
                let c = counts[b] as f64;
                curve.mean_predicted.push(sums[b] / c);
                curve.fraction_positive.push(hits[b] / c);
            }
        }
        curve
    }
}
