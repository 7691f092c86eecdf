//! Gradient-boosted trees under squared loss
//!
//! Two growth policies: `GradientBoosting` grows ordinary depth-wise trees,
//! `ObliviousBoosting` grows symmetric trees where every node on a level shares
//! one split condition.

use super::tree::{RegressionTree, TreeConfig};
use super::{ensure_finite, Regressor, SavedModel, TrainingSet};
use crate::error::{AppError, Result};
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Boosting hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub seed: u64,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            seed: 42,
        }
    }
}

// ========== Depth-wise ==========

const GBM_NAME: &str = "GradientBoosting";

/// Boosted CART trees
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradientBoosting {
    params: BoostParams,
    init: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn new(params: BoostParams) -> Self {
        Self {
            params,
            init: 0.0,
            trees: Vec::new(),
        }
    }
}

impl Regressor for GradientBoosting {
    fn snapshot(&self) -> Option<SavedModel> {
        Some(SavedModel::GradientBoosting(self.clone()))
    }

    fn fit(&mut self, data: &TrainingSet) -> Result<()> {
        let n = data.n_samples();
        if n < 2 {
            return Err(AppError::model_fit(GBM_NAME, "too few samples"));
        }

        let config = TreeConfig {
            max_depth: self.params.max_depth,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        };
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let all: Vec<usize> = (0..n).collect();

        self.init = data.y.mean().unwrap_or(0.0);
        let mut current = vec![self.init; n];
        self.trees.clear();

        for _ in 0..self.params.n_estimators {
            let residuals: Vec<f64> = data.y.iter().zip(&current).map(|(t, p)| t - p).collect();
            let tree = RegressionTree::fit(&data.x, &residuals, &all, &config, &mut rng);
            for (i, row) in data.x.rows().into_iter().enumerate() {
                current[i] += self.params.learning_rate * tree.predict(row);
            }
            self.trees.push(tree);
        }

        if current.iter().any(|v| !v.is_finite()) {
            return Err(AppError::model_fit(GBM_NAME, "diverged"));
        }
        Ok(())
    }

    fn predict(&self, features: ArrayView1<f64>) -> Result<f64> {
        if self.trees.is_empty() {
            return Err(AppError::model_fit(GBM_NAME, "not fitted"));
        }
        let boost: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        ensure_finite(GBM_NAME, self.init + self.params.learning_rate * boost)
    }
}

// ========== Oblivious ==========

const OBLIVIOUS_NAME: &str = "ObliviousBoosting";

/// Candidate thresholds per feature
const BORDER_COUNT: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObliviousTree {
    splits: Vec<(usize, f64)>,
    leaves: Vec<f64>,
}

impl ObliviousTree {
    fn leaf_index(&self, features: ArrayView1<f64>) -> usize {
        self.splits
            .iter()
            .enumerate()
            .fold(0, |idx, (level, &(f, t))| {
                if features[f] > t {
                    idx | (1 << level)
                } else {
                    idx
                }
            })
    }

    fn predict(&self, features: ArrayView1<f64>) -> f64 {
        self.leaves[self.leaf_index(features)]
    }
}

/// Boosted symmetric trees over quantile borders
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObliviousBoosting {
    params: BoostParams,
    init: f64,
    trees: Vec<ObliviousTree>,
}

impl ObliviousBoosting {
    pub fn new(params: BoostParams) -> Self {
        Self {
            params,
            init: 0.0,
            trees: Vec::new(),
        }
    }

    fn effective_depth(&self) -> usize {
        // Default params carry depth 3; symmetric trees go one deeper
        (self.params.max_depth + 1).clamp(1, 8)
    }
}

/// Quantile borders for each column
fn borders(x: &Array2<f64>) -> Vec<Vec<f64>> {
    x.columns()
        .into_iter()
        .map(|col| {
            let mut values = col.to_vec();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mut out: Vec<f64> = (1..BORDER_COUNT)
                .map(|k| values[k * (values.len() - 1) / BORDER_COUNT])
                .collect();
            out.dedup();
            out
        })
        .collect()
}

fn grow_oblivious(
    x: &Array2<f64>,
    residuals: &[f64],
    borders: &[Vec<f64>],
    depth: usize,
) -> ObliviousTree {
    let n = residuals.len();
    let mut leaf_of = vec![0usize; n];
    let mut splits = Vec::with_capacity(depth);

    for level in 0..depth {
        let n_leaves = 1 << level;
        let mut best: Option<(f64, usize, f64)> = None;

        for (f, cands) in borders.iter().enumerate() {
            for &t in cands {
                // (sum, count) per child leaf
                let mut sums = vec![0.0; n_leaves * 2];
                let mut counts = vec![0usize; n_leaves * 2];
                for i in 0..n {
                    let child = leaf_of[i] * 2 + usize::from(x[[i, f]] > t);
                    sums[child] += residuals[i];
                    counts[child] += 1;
                }
                // Minimizing SSE is maximizing sum^2 / count
                let score: f64 = sums
                    .iter()
                    .zip(&counts)
                    .filter(|(_, c)| **c > 0)
                    .map(|(s, &c)| s * s / c as f64)
                    .sum();
                if best.map_or(true, |(b, _, _)| score > b) {
                    best = Some((score, f, t));
                }
            }
        }

        let Some((_, f, t)) = best else { break };
        for i in 0..n {
            if x[[i, f]] > t {
                leaf_of[i] |= 1 << level;
            }
        }
        splits.push((f, t));
    }

    let n_leaves = 1 << splits.len();
    let mut sums = vec![0.0; n_leaves];
    let mut counts = vec![0usize; n_leaves];
    for i in 0..n {
        sums[leaf_of[i]] += residuals[i];
        counts[leaf_of[i]] += 1;
    }
    let leaves = sums
        .iter()
        .zip(&counts)
        .map(|(s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect();

    ObliviousTree { splits, leaves }
}

impl Regressor for ObliviousBoosting {
    fn snapshot(&self) -> Option<SavedModel> {
        Some(SavedModel::ObliviousBoosting(self.clone()))
    }

    fn fit(&mut self, data: &TrainingSet) -> Result<()> {
        let n = data.n_samples();
        if n < 2 {
            return Err(AppError::model_fit(OBLIVIOUS_NAME, "too few samples"));
        }

        let borders = borders(&data.x);
        let depth = self.effective_depth();
        self.init = data.y.mean().unwrap_or(0.0);
        let mut current = vec![self.init; n];
        self.trees.clear();

        for _ in 0..self.params.n_estimators {
            let residuals: Vec<f64> = data.y.iter().zip(&current).map(|(t, p)| t - p).collect();
            let tree = grow_oblivious(&data.x, &residuals, &borders, depth);
            for (i, row) in data.x.rows().into_iter().enumerate() {
                current[i] += self.params.learning_rate * tree.predict(row);
            }
            self.trees.push(tree);
        }

        if current.iter().any(|v| !v.is_finite()) {
            return Err(AppError::model_fit(OBLIVIOUS_NAME, "diverged"));
        }
        Ok(())
    }

    fn predict(&self, features: ArrayView1<f64>) -> Result<f64> {
        if self.trees.is_empty() {
            return Err(AppError::model_fit(OBLIVIOUS_NAME, "not fitted"));
        }
        let boost: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        ensure_finite(OBLIVIOUS_NAME, self.init + self.params.learning_rate * boost)
    }
}
