//! RBF kernel ridge regression

use super::{column_scaling, ensure_finite, Regressor, SavedModel, TrainingSet};
use crate::error::{AppError, Result};
use ndarray::{s, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

const NAME: &str = "KernelRidge";

/// Kernel ridge parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelParams {
    /// Ridge penalty on the standardized target
    pub alpha: f64,
    /// RBF width; None = 1 / n_features
    pub gamma: Option<f64>,
    /// Only the most recent samples are kept for the dense solve
    pub max_samples: usize,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            gamma: None,
            max_samples: 400,
        }
    }
}

/// Kernel ridge regressor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelRidge {
    params: KernelParams,
    support: Array2<f64>,
    dual: Array1<f64>,
    mean: Array1<f64>,
    scale: Array1<f64>,
    y_mean: f64,
    y_scale: f64,
    gamma: f64,
}

impl KernelRidge {
    pub fn new(params: KernelParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    fn kernel(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        let d2: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
        (-self.gamma * d2).exp()
    }
}

impl Regressor for KernelRidge {
    fn snapshot(&self) -> Option<SavedModel> {
        Some(SavedModel::KernelRidge(self.clone()))
    }

    fn fit(&mut self, data: &TrainingSet) -> Result<()> {
        let n_all = data.n_samples();
        if n_all < 2 {
            return Err(AppError::model_fit(NAME, "too few samples"));
        }
        let start = n_all.saturating_sub(self.params.max_samples.max(2));
        let x = data.x.slice(s![start.., ..]).to_owned();
        let y = data.y.slice(s![start..]).to_owned();
        let n = y.len();

        let (mean, scale) = column_scaling(&x);
        self.support = (&x - &mean) / &scale;
        self.mean = mean;
        self.scale = scale;
        self.gamma = self
            .params
            .gamma
            .unwrap_or(1.0 / x.ncols().max(1) as f64);

        self.y_mean = y.mean().unwrap_or(0.0);
        let y_var = y.iter().map(|v| (v - self.y_mean).powi(2)).sum::<f64>() / n as f64;
        self.y_scale = if y_var > 1e-24 { y_var.sqrt() } else { 1.0 };
        let target = y.mapv(|v| (v - self.y_mean) / self.y_scale);

        let mut gram = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..=i {
                let k = self.kernel(self.support.row(i), self.support.row(j));
                gram[[i, j]] = k;
                gram[[j, i]] = k;
            }
            gram[[i, i]] += self.params.alpha;
        }

        self.dual = cholesky_solve(gram, &target)
            .ok_or_else(|| AppError::model_fit(NAME, "kernel matrix not positive definite"))?;
        Ok(())
    }

    fn predict(&self, features: ArrayView1<f64>) -> Result<f64> {
        if self.dual.is_empty() {
            return Err(AppError::model_fit(NAME, "not fitted"));
        }
        let z = (&features - &self.mean) / &self.scale;
        let score: f64 = self
            .support
            .rows()
            .into_iter()
            .zip(self.dual.iter())
            .map(|(row, a)| a * self.kernel(row, z.view()))
            .sum();
        ensure_finite(NAME, self.y_mean + self.y_scale * score)
    }
}

/// Solve `a x = b` for symmetric positive definite `a`
fn cholesky_solve(a: Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let dot: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let d = a[[i, i]] - dot;
                if d <= 0.0 || !d.is_finite() {
                    return None;
                }
                l[[i, i]] = d.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - dot) / l[[j, j]];
            }
        }
    }

    // Forward then back substitution
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let dot: f64 = (0..i).map(|k| l[[i, k]] * z[k]).sum();
        z[i] = (b[i] - dot) / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let dot: f64 = ((i + 1)..n).map(|k| l[[k, i]] * x[k]).sum();
        x[i] = (z[i] - dot) / l[[i, i]];
    }
    Some(x)
}
