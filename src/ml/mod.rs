//! Regression models used by the ensemble
//!
//! Every model implements [`Regressor`]. The roster is a fixed, ordered list of
//! [`ModelSpec`]s built once and handed to the trainer; nothing is discovered
//! at runtime.

pub mod boosting;
pub mod cache;
pub mod forest;
pub mod holt_winters;
pub mod kernel;
pub mod linear;
pub mod metrics;
pub mod persist;
pub mod tree;

use crate::error::{AppError, Result};
use crate::features::{FeatureRow, MODEL_FEATURES};
use ndarray::{Array1, Array2, ArrayView1};
use std::sync::Arc;

pub use boosting::{GradientBoosting, ObliviousBoosting};
pub use cache::{CachedModel, ModelCache};
pub use forest::RandomForest;
pub use holt_winters::HoltWinters;
pub use kernel::KernelRidge;
pub use linear::LinearRegression;
pub use persist::SavedModel;

/// Supervised view of a feature table
///
/// Row `t` of `x` holds the features of session `t` and `y[t]` the close of
/// session `t + 1`. The final session has no target and becomes `query`.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub query: Array1<f64>,
    /// Close series through the query session, for time-series models
    pub closes: Vec<f64>,
}

/// Feature rows needed for two samples plus a query row
pub const MIN_TRAINING_ROWS: usize = 3;

impl TrainingSet {
    /// Fails with `InsufficientHistory` below [`MIN_TRAINING_ROWS`]
    pub fn from_rows(rows: &[FeatureRow]) -> Result<Self> {
        if rows.len() < MIN_TRAINING_ROWS {
            return Err(AppError::InsufficientHistory {
                symbol: rows.first().map(|r| r.symbol.clone()).unwrap_or_default(),
                available: rows.len(),
                required: MIN_TRAINING_ROWS,
            });
        }

        let n = rows.len() - 1;
        let width = MODEL_FEATURES.len();
        let mut x = Array2::<f64>::zeros((n, width));
        for (i, row) in rows[..n].iter().enumerate() {
            for (j, v) in row.model_inputs().iter().enumerate() {
                x[[i, j]] = *v;
            }
        }
        let y = Array1::from_iter(rows[1..].iter().map(|r| r.close));
        let query = Array1::from_iter(rows[n].model_inputs());
        let closes = rows.iter().map(|r| r.close).collect();

        Ok(Self { x, y, query, closes })
    }

    pub fn n_samples(&self) -> usize {
        self.y.len()
    }

    pub fn last_close(&self) -> f64 {
        self.closes.last().copied().unwrap_or(0.0)
    }
}

/// Common fit/predict capability
pub trait Regressor: Send + Sync {
    /// Fit on the supervised table
    fn fit(&mut self, data: &TrainingSet) -> Result<()>;

    /// Predict the next close for one feature vector
    fn predict(&self, features: ArrayView1<f64>) -> Result<f64>;

    /// In-sample predictions aligned with `data.y`
    fn fitted_values(&self, data: &TrainingSet) -> Result<Vec<f64>> {
        data.x.rows().into_iter().map(|row| self.predict(row)).collect()
    }

    /// Fitted parameters for the model store; None when not persistable
    fn snapshot(&self) -> Option<SavedModel> {
        None
    }
}

type ModelFactory = dyn Fn() -> Box<dyn Regressor> + Send + Sync;

/// A named model constructor in the roster
#[derive(Clone)]
pub struct ModelSpec {
    pub name: String,
    factory: Arc<ModelFactory>,
}

impl ModelSpec {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Regressor> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }

    /// Fresh, unfitted instance
    pub fn build(&self) -> Box<dyn Regressor> {
        (self.factory)()
    }
}

impl std::fmt::Debug for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSpec").field("name", &self.name).finish()
    }
}

/// The production roster, in vote order
pub fn default_roster() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new("LinearRegression", || Box::new(LinearRegression::default())),
        ModelSpec::new("RandomForest", || Box::new(RandomForest::default())),
        ModelSpec::new("GradientBoosting", || Box::new(GradientBoosting::default())),
        ModelSpec::new("ObliviousBoosting", || Box::new(ObliviousBoosting::default())),
        ModelSpec::new("KernelRidge", || Box::new(KernelRidge::default())),
        ModelSpec::new("HoltWinters", || Box::new(HoltWinters::default())),
    ]
}

/// Reject NaN/inf outputs as a fit failure of `model`
pub(crate) fn ensure_finite(model: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AppError::model_fit(model, format!("non-finite output {}", value)))
    }
}

/// Column means and standard deviations; constant columns get a scale of 1
pub(crate) fn column_scaling(x: &Array2<f64>) -> (Array1<f64>, Array1<f64>) {
    let n = x.nrows().max(1) as f64;
    let mean = x.sum_axis(ndarray::Axis(0)) / n;
    let mut scale = Array1::<f64>::ones(x.ncols());
    for (j, col) in x.columns().into_iter().enumerate() {
        let var = col.iter().map(|v| (v - mean[j]).powi(2)).sum::<f64>() / n;
        if var > 1e-24 {
            scale[j] = var.sqrt();
        }
    }
    (mean, scale)
}
