//! # Regression Tree
//!
//! A CART-style regression tree shared by the boosting and forest
//! classifiers. Splits minimise the squared error of a per-row target
//! (residuals for boosting, labels for forests); node values come from a
//! caller-supplied rule so boosting can use Newton steps while forests use
//! class frequencies.
//!
//! Every node, internal or leaf, stores the value its rows would receive.
//! That makes the path decomposition of a prediction exact: the root value
//! plus the change in value at each step down the path equals the leaf value.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Node sizes below this are split on the current thread.
const PARALLEL_SPLIT_ROWS: usize = 2048;
const MIN_GAIN: f64 = 1e-12;

/// Flat node record. Leaves have `is_leaf` set and ignore the split fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: usize,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    pub value: f64,
    pub is_leaf: bool,
}

impl TreeNode {
    fn leaf(value: f64) -> Self {
        Self {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value,
            is_leaf: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn at random for each split; `None` considers the whole pool.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Grower<'a, 'x, F> {
    x: ArrayView2<'x, f64>,
    targets: &'a [f64],
    pool: &'a [usize],
    params: &'a TreeParams,
    leaf_value: F,
    nodes: Vec<TreeNode>,
    importances: Vec<f64>,
}

impl<'a, 'x, F> Grower<'a, 'x, F>
where
    F: Fn(&[usize]) -> f64,
{
    fn grow(&mut self, rows: &[usize], depth: usize, rng: &mut StdRng) -> usize {
        let id = self.nodes.len();
        self.nodes.push(TreeNode::leaf((self.leaf_value)(rows)));

        if depth >= self.params.max_depth
            || rows.len() < self.params.min_samples_split
            || rows.len() < 2 * self.params.min_samples_leaf
        {
            return id;
        }

        let candidates: Vec<usize> = match self.params.max_features {
            Some(k) if k < self.pool.len() => {
                let mut drawn: Vec<usize> = self.pool.to_vec();
                drawn.shuffle(rng);
                drawn.truncate(k.max(1));
                drawn.sort_unstable();
                drawn
            }
            _ => self.pool.to_vec(),
        };

        let Some(split) = self.best_split(rows, &candidates) else {
            return id;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| self.x[[r, split.feature]] <= split.threshold);
        self.importances[split.feature] += split.gain;

        let left = self.grow(&left_rows, depth + 1, rng);
        let right = self.grow(&right_rows, depth + 1, rng);
        let node = &mut self.nodes[id];
        node.feature = split.feature;
        node.threshold = split.threshold;
        node.left = left;
        node.right = right;
        node.is_leaf = false;
        id
    }

    fn best_split(&self, rows: &[usize], candidates: &[usize]) -> Option<Split> {
        let (x, targets, min_leaf) = (self.x, self.targets, self.params.min_samples_leaf);
        let search = |&feature: &usize| best_split_on(x, targets, rows, feature, min_leaf);
        let found: Vec<Option<Split>> = if rows.len() >= PARALLEL_SPLIT_ROWS {
            candidates.par_iter().map(search).collect()
        } else {
            candidates.iter().map(search).collect()
        };
        // Candidates are in ascending feature order; ties keep the lowest feature.
        found
            .into_iter()
            .flatten()
            .fold(None, |best: Option<Split>, s| match best {
                Some(b) if b.gain >= s.gain => Some(b),
                _ => Some(s),
            })
    }
}

/// Threshold between two distinct sorted values that keeps `b` on the right.
/// Adjacent floats can round their midpoint up to `b`; `a` is used then.
fn midpoint(a: f64, b: f64) -> f64 {
    let mid = 0.5 * (a + b);
    if mid < b { mid } else { a }
}

/// Best squared-error split of `rows` on one feature, thresholds at midpoints
/// between consecutive distinct values.
fn best_split_on(
    x: ArrayView2<f64>,
    targets: &[f64],
    rows: &[usize],
    feature: usize,
    min_leaf: usize,
) -> Option<Split> {
    let mut order: Vec<(f64, f64)> = rows.iter().map(|&r| (x[[r, feature]], targets[r])).collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n = order.len();
    if n < 2 {
        return None;
    }
    let total: f64 = order.iter().map(|p| p.1).sum();
    let parent_score = total * total / n as f64;
    let min_leaf = min_leaf.max(1);

    let mut best: Option<Split> = None;
    let mut left_sum = 0.0;
    for i in 0..n - 1 {
        left_sum += order[i].1;
        let left_n = i + 1;
        let right_n = n - left_n;
        if left_n < min_leaf {
            continue;
        }
        if right_n < min_leaf {
            break;
        }
        if order[i].0 == order[i + 1].0 {
            continue;
        }
        let right_sum = total - left_sum;
        let gain = left_sum * left_sum / left_n as f64 + right_sum * right_sum / right_n as f64 - parent_score;
        if gain > MIN_GAIN && best.is_none_or(|b| gain > b.gain) {
            best = Some(Split {
                feature,
                threshold: midpoint(order[i].0, order[i + 1].0),
                gain,
            });
        }
    }
    best
}

impl RegressionTree {
    /// Grows a tree on `rows`, splitting only on features in `pool`.
    ///
    /// Returns the tree and its unnormalised impurity decrease per feature.
    pub fn fit<F>(
        x: ArrayView2<f64>,
        targets: &[f64],
        rows: &[usize],
        pool: &[usize],
        params: &TreeParams,
        leaf_value: F,
        rng: &mut StdRng,
    ) -> (Self, Vec<f64>)
    where
        F: Fn(&[usize]) -> f64,
    {
        let mut grower = Grower {
            x,
            targets,
            pool,
            params,
            leaf_value,
            nodes: Vec::new(),
            importances: vec![0.0; x.ncols()],
        };
        grower.grow(rows, 0, rng);
        (Self { nodes: grower.nodes }, grower.importances)
    }

    fn leaf_index(&self, row: ArrayView1<f64>) -> usize {
        let mut id = 0;
        while !self.nodes[id].is_leaf {
            let node = &self.nodes[id];
            id = if row[node.feature] <= node.threshold {
                node.left
            } else {
                node.right
            };
        }
        id
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.nodes[self.leaf_index(row)].value
    }

    /// Adds each feature's share of this tree's prediction to `out` and returns
    /// the root value. Root value plus all shares equals `predict_row`.
    pub fn contributions(&self, row: ArrayView1<f64>, out: &mut [f64]) -> f64 {
        let mut id = 0;
        while !self.nodes[id].is_leaf {
            let node = &self.nodes[id];
            let next = if row[node.feature] <= node.threshold {
                node.left
            } else {
                node.right
            };
            out[node.feature] += self.nodes[next].value - node.value;
            id = next;
        }
        self.nodes[0].value
    }
}

/// Scales a raw impurity vector to sum to one; all-zero vectors are left as is.
pub fn normalize(importances: &mut [f64]) {
    let total: f64 = importances.iter().sum();
    if total > 0.0 {
        for v in importances.iter_mut() {
            *v /= total;
        }
    }
}
