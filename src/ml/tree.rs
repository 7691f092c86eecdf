//! CART regression tree shared by the forest and depth-wise boosting

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Tree growth limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features sampled per split (None = all)
    pub max_features: Option<usize>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_samples_split: 4,
            min_samples_leaf: 2,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Fitted regression tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    root: Node,
}

struct Split {
    feature: usize,
    threshold: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl RegressionTree {
    /// Grow a tree on the rows named by `indices` (repeats allowed)
    pub fn fit(
        x: &Array2<f64>,
        y: &[f64],
        indices: &[usize],
        config: &TreeConfig,
        rng: &mut StdRng,
    ) -> Self {
        Self {
            root: grow(x, y, indices, 0, config, rng),
        }
    }

    pub fn predict(&self, features: ArrayView1<f64>) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if features[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

fn mean_of(y: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64
}

fn grow(
    x: &Array2<f64>,
    y: &[f64],
    indices: &[usize],
    depth: usize,
    config: &TreeConfig,
    rng: &mut StdRng,
) -> Node {
    let value = mean_of(y, indices);
    if depth >= config.max_depth || indices.len() < config.min_samples_split {
        return Node::Leaf(value);
    }

    match best_split(x, y, indices, config, rng) {
        Some(split) => Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(grow(x, y, &split.left, depth + 1, config, rng)),
            right: Box::new(grow(x, y, &split.right, depth + 1, config, rng)),
        },
        None => Node::Leaf(value),
    }
}

/// Variance-reduction split found by one sorted sweep per candidate feature
fn best_split(
    x: &Array2<f64>,
    y: &[f64],
    indices: &[usize],
    config: &TreeConfig,
    rng: &mut StdRng,
) -> Option<Split> {
    let n = indices.len();
    let total: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total * total / n as f64;
    if parent_sse < 1e-12 {
        return None;
    }

    let mut features: Vec<usize> = (0..x.ncols()).collect();
    if let Some(k) = config.max_features {
        features.shuffle(rng);
        features.truncate(k.clamp(1, x.ncols()));
    }

    let min_leaf = config.min_samples_leaf.max(1);
    let mut best: Option<(f64, usize, f64)> = None;

    for &feature in &features {
        let mut order = indices.to_vec();
        order.sort_by(|&a, &b| {
            x[[a, feature]]
                .partial_cmp(&x[[b, feature]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 0..n - 1 {
            let yi = y[order[k]];
            left_sum += yi;
            left_sq += yi * yi;

            let n_left = k + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }
            let here = x[[order[k], feature]];
            let next = x[[order[k + 1], feature]];
            if next <= here {
                continue;
            }

            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / n_left as f64)
                + (right_sq - right_sum * right_sum / n_right as f64);

            if best.map_or(true, |(b, _, _)| sse < b) {
                best = Some((sse, feature, (here + next) / 2.0));
            }
        }
    }

    let (sse, feature, threshold) = best?;
    if sse >= parent_sse {
        return None;
    }
    let (left, right): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .partition(|&&i| x[[i, feature]] <= threshold);

    Some(Split {
        feature,
        threshold,
        left,
        right,
    })
}
