//! Tree ensembles: gradient boosting on the logistic loss and a bagged random forest.

use crate::model::classifier::ClassifierError;
use crate::model::tree::{self, RegressionTree, TreeParams};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Hyperparameters for gradient boosting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Fraction of training rows drawn without replacement for each round.
    pub subsample: f64,
    /// Fraction of features available to each round's tree.
    pub colsample: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_rounds: 200,
            learning_rate: 0.1,
            max_depth: 6,
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            colsample: 1.0,
        }
    }
}

/// How many features a forest split may consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSampling {
    All,
    Sqrt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: FeatureSampling,
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 300,
            max_depth: 8,
            min_samples_split: 10,
            min_samples_leaf: 5,
            max_features: FeatureSampling::Sqrt,
            bootstrap: true,
        }
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z.clamp(-700.0, 700.0)).exp())
}

fn validate_training_set(x: ArrayView2<f64>, y: &[u8]) -> Result<usize, ClassifierError> {
    if x.nrows() != y.len() {
        return Err(ClassifierError::DimensionMismatch {
            expected: x.nrows(),
            found: y.len(),
        });
    }
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(ClassifierError::EmptyTrainingSet);
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(ClassifierError::NonFiniteInput);
    }
    let positives = y.iter().filter(|&&t| t == 1).count();
    if positives == 0 || positives == y.len() {
        return Err(ClassifierError::SingleClass);
    }
    Ok(positives)
}

/// Mixes the run seed with a per-tree index so each tree has its own stream.
fn tree_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Boosted regression trees on the log-odds scale with Newton leaf values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    /// Log-odds of the training prevalence.
    pub init: f64,
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
    pub importances: Vec<f64>,
}

impl GradientBoosting {
    pub fn fit(
        x: ArrayView2<f64>,
        y: &[u8],
        params: &BoostingParams,
        seed: u64,
    ) -> Result<Self, ClassifierError> {
        let positives = validate_training_set(x, y)?;
        if !(params.learning_rate > 0.0) || params.n_rounds == 0 {
            return Err(ClassifierError::InvalidParameter(
                "boosting needs a positive learning rate and at least one round".to_string(),
            ));
        }
        let (n, p) = x.dim();
        let prevalence = positives as f64 / n as f64;
        let init = (prevalence / (1.0 - prevalence)).ln();
        let labels: Vec<f64> = y.iter().map(|&t| f64::from(t)).collect();

        let row_take = ((n as f64 * params.subsample.clamp(0.0, 1.0)).round() as usize).clamp(1, n);
        let col_take = ((p as f64 * params.colsample.clamp(0.0, 1.0)).round() as usize).clamp(1, p);
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: None,
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let mut margin = vec![init; n];
        let mut trees = Vec::with_capacity(params.n_rounds);
        let mut importances = vec![0.0; p];
        let all_rows: Vec<usize> = (0..n).collect();
        let all_cols: Vec<usize> = (0..p).collect();

        for round in 0..params.n_rounds {
            let prob: Vec<f64> = margin.iter().map(|&m| sigmoid(m)).collect();
            let residual: Vec<f64> = labels.iter().zip(&prob).map(|(t, q)| t - q).collect();

            let mut rows = all_rows.clone();
            if row_take < n {
                rows.shuffle(&mut rng);
                rows.truncate(row_take);
                rows.sort_unstable();
            }
            let mut pool = all_cols.clone();
            if col_take < p {
                pool.shuffle(&mut rng);
                pool.truncate(col_take);
                pool.sort_unstable();
            }

            let newton = |leaf_rows: &[usize]| {
                let numerator: f64 = leaf_rows.iter().map(|&r| residual[r]).sum();
                let denominator: f64 = leaf_rows.iter().map(|&r| prob[r] * (1.0 - prob[r])).sum();
                if denominator < 1e-12 {
                    0.0
                } else {
                    numerator / denominator
                }
            };
            let (tree, gains) =
                RegressionTree::fit(x, &residual, &rows, &pool, &tree_params, newton, &mut rng);

            for (r, m) in margin.iter_mut().enumerate() {
                *m += params.learning_rate * tree.predict_row(x.row(r));
            }
            let mut gains = gains;
            tree::normalize(&mut gains);
            for (total, g) in importances.iter_mut().zip(&gains) {
                *total += g;
            }
            trees.push(tree);

            if round % 50 == 49 {
                log::debug!("Boosting round {} of {}", round + 1, params.n_rounds);
            }
        }
        tree::normalize(&mut importances);

        Ok(Self {
            init,
            learning_rate: params.learning_rate,
            trees,
            importances,
        })
    }

    /// Log-odds for one row.
    pub fn margin(&self, row: ArrayView1<f64>) -> f64 {
        self.init
            + self.learning_rate * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }

    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.rows().into_iter().map(|row| sigmoid(self.margin(row))).collect()
    }

    /// Per-feature log-odds contributions and the base value they add to.
    pub fn contributions(&self, row: ArrayView1<f64>) -> (f64, Vec<f64>) {
        let mut shares = vec![0.0; row.len()];
        let mut roots = 0.0;
        for tree in &self.trees {
            roots += tree.contributions(row, &mut shares);
        }
        for s in shares.iter_mut() {
            *s *= self.learning_rate;
        }
        (self.init + self.learning_rate * roots, shares)
    }
}

/// Bagged classification trees; the probability is the mean leaf frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub trees: Vec<RegressionTree>,
    pub importances: Vec<f64>,
}

impl RandomForest {
    pub fn fit(
        x: ArrayView2<f64>,
        y: &[u8],
        params: &ForestParams,
        seed: u64,
    ) -> Result<Self, ClassifierError> {
        validate_training_set(x, y)?;
        if params.n_trees == 0 {
            return Err(ClassifierError::InvalidParameter(
                "a forest needs at least one tree".to_string(),
            ));
        }
        let (n, p) = x.dim();
        let labels: Vec<f64> = y.iter().map(|&t| f64::from(t)).collect();
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: match params.max_features {
                FeatureSampling::All => None,
                FeatureSampling::Sqrt => Some(((p as f64).sqrt() as usize).max(1)),
            },
        };
        let pool: Vec<usize> = (0..p).collect();

        let grown: Vec<(RegressionTree, Vec<f64>)> = (0..params.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(tree_seed(seed, i));
                let mut rows: Vec<usize> = if params.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                rows.sort_unstable();
                let frequency = |leaf_rows: &[usize]| {
                    leaf_rows.iter().map(|&r| labels[r]).sum::<f64>() / leaf_rows.len() as f64
                };
                let (tree, mut gains) =
                    RegressionTree::fit(x, &labels, &rows, &pool, &tree_params, frequency, &mut rng);
                tree::normalize(&mut gains);
                (tree, gains)
            })
            .collect();

        let mut importances = vec![0.0; p];
        let mut trees = Vec::with_capacity(grown.len());
        for (tree, gains) in grown {
            for (total, g) in importances.iter_mut().zip(&gains) {
                *total += g;
            }
            trees.push(tree);
        }
        tree::normalize(&mut importances);
        Ok(Self { trees, importances })
    }

    pub fn probability(&self, row: ArrayView1<f64>) -> f64 {
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.rows().into_iter().map(|row| self.probability(row)).collect()
    }

    /// Per-feature probability contributions averaged over trees.
    pub fn contributions(&self, row: ArrayView1<f64>) -> (f64, Vec<f64>) {
        let mut shares = vec![0.0; row.len()];
        let mut roots = 0.0;
        for tree in &self.trees {
            roots += tree.contributions(row, &mut shares);
        }
        let count = self.trees.len() as f64;
        for s in shares.iter_mut() {
            *s /= count;
        }
        (roots / count, shares)
    }
}
