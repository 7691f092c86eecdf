//! Bootstrap-bagged regression trees

use super::tree::{RegressionTree, TreeConfig};
use super::{ensure_finite, Regressor, SavedModel, TrainingSet};
use crate::error::{AppError, Result};
use ndarray::ArrayView1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const NAME: &str = "RandomForest";

/// Random forest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub tree: TreeConfig,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 60,
            tree: TreeConfig {
                max_depth: 8,
                min_samples_split: 4,
                min_samples_leaf: 2,
                max_features: Some(3),
            },
            seed: 42,
        }
    }
}

/// Random forest regressor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RandomForest {
    config: ForestConfig,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
        }
    }
}

impl Regressor for RandomForest {
    fn snapshot(&self) -> Option<SavedModel> {
        Some(SavedModel::RandomForest(self.clone()))
    }

    fn fit(&mut self, data: &TrainingSet) -> Result<()> {
        let n = data.n_samples();
        if n < 2 {
            return Err(AppError::model_fit(NAME, "too few samples"));
        }
        let y = data.y.to_vec();

        // Seeded per fit so identical inputs grow identical forests
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.trees = (0..self.config.n_trees.max(1))
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(&data.x, &y, &sample, &self.config.tree, &mut rng)
            })
            .collect();
        Ok(())
    }

    fn predict(&self, features: ArrayView1<f64>) -> Result<f64> {
        if self.trees.is_empty() {
            return Err(AppError::model_fit(NAME, "not fitted"));
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        ensure_finite(NAME, sum / self.trees.len() as f64)
    }
}
