//! Standardisation and L2-penalised logistic regression fitted by Newton/IRLS.

use crate::model::classifier::ClassifierError;
use crate::model::ensemble::sigmoid;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Column-wise centring and scaling learned on the training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    /// Population standard deviation; zero-variance columns use 1.
    pub scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<f64>) -> Self {
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|sd| if sd > 0.0 && sd.is_finite() { sd } else { 1.0 });
        Self { mean, scale }
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        (&x - &self.mean) / &self.scale
    }

    pub fn transform_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        (&row - &self.mean) / &self.scale
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    /// Inverse regularisation strength.
    pub c: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
}

impl LogisticRegression {
    /// Minimises `0.5 * |w|^2 + C * sum(logloss)`; the intercept is not penalised.
    pub fn fit(x: ArrayView2<f64>, y: &[u8], params: &LogisticParams) -> Result<Self, ClassifierError> {
        if x.nrows() != y.len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: x.nrows(),
                found: y.len(),
            });
        }
        if x.nrows() == 0 {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        if !(params.c > 0.0) {
            return Err(ClassifierError::InvalidParameter(format!(
                "C must be positive, got {}",
                params.c
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ClassifierError::NonFiniteInput);
        }
        let positives = y.iter().filter(|&&t| t == 1).count();
        if positives == 0 || positives == y.len() {
            return Err(ClassifierError::SingleClass);
        }

        let (n, p) = x.dim();
        // Column 0 is the intercept.
        let mut design = Array2::ones((n, p + 1));
        design.slice_mut(ndarray::s![.., 1..]).assign(&x);
        let labels = Array1::from_iter(y.iter().map(|&t| f64::from(t)));
        let mut beta = Array1::<f64>::zeros(p + 1);

        let mut converged = false;
        for iteration in 0..params.max_iterations {
            let eta = design.dot(&beta);
            let mu = eta.mapv(sigmoid);
            let weights = mu.mapv(|m| (m * (1.0 - m)).max(1e-12));

            let mut gradient = design.t().dot(&(&mu - &labels)) * params.c;
            let weighted = &design * &weights.view().insert_axis(Axis(1));
            let mut hessian = design.t().dot(&weighted) * params.c;
            for j in 1..=p {
                gradient[j] += beta[j];
                hessian[[j, j]] += 1.0;
            }

            let step = newton_step(&hessian, &gradient)?;
            beta -= &step;
            let largest = step.iter().fold(0.0_f64, |acc, s| acc.max(s.abs()));
            log::trace!("IRLS iteration {iteration}: max |step| = {largest:.3e}");
            if !largest.is_finite() {
                return Err(ClassifierError::Diverged);
            }
            if largest < params.tolerance {
                converged = true;
                break;
            }
        }
        if !converged {
            log::warn!(
                "Logistic regression did not converge within {} iterations",
                params.max_iterations
            );
        }

        Ok(Self {
            intercept: beta[0],
            coefficients: beta.slice(ndarray::s![1..]).to_owned(),
        })
    }

    /// Log-odds for one already-scaled row.
    pub fn margin(&self, row: ArrayView1<f64>) -> f64 {
        self.intercept + self.coefficients.dot(&row)
    }

    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        (x.dot(&self.coefficients) + self.intercept).mapv(sigmoid)
    }

    /// Coefficient times scaled value, with the intercept as the base value.
    pub fn contributions(&self, row: ArrayView1<f64>) -> (f64, Vec<f64>) {
        let shares = (&self.coefficients * &row).to_vec();
        (self.intercept, shares)
    }
}

/// Newton step `H^-1 g` through a Cholesky factorisation of the penalised Hessian.
fn newton_step(hessian: &Array2<f64>, gradient: &Array1<f64>) -> Result<Array1<f64>, ClassifierError> {
    use ndarray_linalg::SolveC;
    Ok(hessian.solvec(gradient)?)
}
