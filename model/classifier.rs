//! # Classifier Zoo
//!
//! A closed set of binary classifiers behind one enum. Every kind offers the
//! same capabilities: fit, class-1 probabilities, hard predictions, and a
//! per-feature additive decomposition of its output. Model selection only
//! needs to ask whether a kind wants standardised inputs.

use crate::model::ensemble::{
    BoostingParams, FeatureSampling, ForestParams, GradientBoosting, RandomForest, sigmoid,
};
use crate::model::linear::{LogisticParams, LogisticRegression};
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Training data has {found} labels for {expected} rows.")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Training data is empty.")]
    EmptyTrainingSet,
    #[error("Training data contains non-finite values.")]
    NonFiniteInput,
    #[error("Training labels contain a single class.")]
    SingleClass,
    #[error("Invalid hyperparameter: {0}")]
    InvalidParameter(String),
    #[error("Cholesky solve of the Newton system failed: {0}")]
    NewtonSolve(#[from] ndarray_linalg::error::LinalgError),
    #[error("Coefficient updates became non-finite.")]
    Diverged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassifierKind {
    GradientBoosting,
    RandomForest,
    LogisticRegression,
}

impl ClassifierKind {
    pub fn requires_scaling(self) -> bool {
        matches!(self, Self::LogisticRegression)
    }

    pub fn is_tree_ensemble(self) -> bool {
        matches!(self, Self::GradientBoosting | Self::RandomForest)
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GradientBoosting => write!(f, "GradientBoosting"),
            Self::RandomForest => write!(f, "RandomForest"),
            Self::LogisticRegression => write!(f, "LogisticRegression"),
        }
    }
}

/// Hyperparameters tagged by classifier kind, e.g. `kind = "RandomForest"` in TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ModelParams {
    GradientBoosting(BoostingParams),
    RandomForest(ForestParams),
    LogisticRegression(LogisticParams),
}

impl ModelParams {
    pub fn kind(&self) -> ClassifierKind {
        match self {
            Self::GradientBoosting(_) => ClassifierKind::GradientBoosting,
            Self::RandomForest(_) => ClassifierKind::RandomForest,
            Self::LogisticRegression(_) => ClassifierKind::LogisticRegression,
        }
    }
}

/// A named candidate for model selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    pub model: ModelParams,
}

impl CandidateSpec {
    pub fn new(name: impl Into<String>, model: ModelParams) -> Self {
        Self {
            name: name.into(),
            model,
        }
    }

    pub fn kind(&self) -> ClassifierKind {
        self.model.kind()
    }

    /// The four default candidates in declaration order.
    pub fn default_roster() -> Vec<Self> {
        vec![
            Self::new(
                "Subsampled Boosting",
                ModelParams::GradientBoosting(BoostingParams {
                    n_rounds: 500,
                    learning_rate: 0.05,
                    max_depth: 6,
                    min_samples_split: 2,
                    min_samples_leaf: 20,
                    subsample: 0.8,
                    colsample: 0.8,
                }),
            ),
            Self::new(
                "Random Forest",
                ModelParams::RandomForest(ForestParams {
                    n_trees: 300,
                    max_depth: 8,
                    min_samples_split: 10,
                    min_samples_leaf: 5,
                    max_features: FeatureSampling::Sqrt,
                    bootstrap: true,
                }),
            ),
            Self::new(
                "Gradient Boosting",
                ModelParams::GradientBoosting(BoostingParams {
                    n_rounds: 200,
                    learning_rate: 0.1,
                    max_depth: 6,
                    ..Default::default()
                }),
            ),
            Self::new(
                "Logistic Regression",
                ModelParams::LogisticRegression(LogisticParams {
                    c: 1.0,
                    max_iterations: 100,
                    ..Default::default()
                }),
            ),
        ]
    }
}

/// A fitted classifier. Inputs are expected already scaled when the kind requires it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Classifier {
    GradientBoosting(GradientBoosting),
    RandomForest(RandomForest),
    LogisticRegression(LogisticRegression),
}

impl Classifier {
    pub fn fit(
        params: &ModelParams,
        x: ArrayView2<f64>,
        y: &[u8],
        seed: u64,
    ) -> Result<Self, ClassifierError> {
        Ok(match params {
            ModelParams::GradientBoosting(p) => Self::GradientBoosting(GradientBoosting::fit(x, y, p, seed)?),
            ModelParams::RandomForest(p) => Self::RandomForest(RandomForest::fit(x, y, p, seed)?),
            ModelParams::LogisticRegression(p) => {
                Self::LogisticRegression(LogisticRegression::fit(x, y, p)?)
            }
        })
    }

    pub fn kind(&self) -> ClassifierKind {
        match self {
            Self::GradientBoosting(_) => ClassifierKind::GradientBoosting,
            Self::RandomForest(_) => ClassifierKind::RandomForest,
            Self::LogisticRegression(_) => ClassifierKind::LogisticRegression,
        }
    }

    /// Number of input features the classifier was fitted on.
    pub fn n_features(&self) -> usize {
        match self {
            Self::GradientBoosting(m) => m.importances.len(),
            Self::RandomForest(m) => m.importances.len(),
            Self::LogisticRegression(m) => m.coefficients.len(),
        }
    }

    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        match self {
            Self::GradientBoosting(m) => m.predict_proba(x),
            Self::RandomForest(m) => m.predict_proba(x),
            Self::LogisticRegression(m) => m.predict_proba(x),
        }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            Self::GradientBoosting(m) => sigmoid(m.margin(row)),
            Self::RandomForest(m) => m.probability(row),
            Self::LogisticRegression(m) => sigmoid(m.margin(row)),
        }
    }

    /// Hard labels at the 0.5 threshold.
    pub fn predict(&self, x: ArrayView2<f64>) -> Vec<u8> {
        self.predict_proba(x)
            .iter()
            .map(|&p| u8::from(p >= 0.5))
            .collect()
    }

    /// The output the contributions decompose: log-odds for boosting and the
    /// linear model, probability for the forest.
    pub fn decomposed_output(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            Self::GradientBoosting(m) => m.margin(row),
            Self::RandomForest(m) => m.probability(row),
            Self::LogisticRegression(m) => m.margin(row),
        }
    }

    /// Base value and signed per-feature contributions for one row.
    pub fn contributions(&self, row: ArrayView1<f64>) -> (f64, Vec<f64>) {
        match self {
            Self::GradientBoosting(m) => m.contributions(row),
            Self::RandomForest(m) => m.contributions(row),
            Self::LogisticRegression(m) => m.contributions(row),
        }
    }

    /// Normalised impurity-decrease importances for tree ensembles.
    pub fn importances(&self) -> Option<&[f64]> {
        match self {
            Self::GradientBoosting(m) => Some(&m.importances),
            Self::RandomForest(m) => Some(&m.importances),
            Self::LogisticRegression(_) => None,
        }
    }
}
