//! Ordinary least squares

use super::{column_scaling, ensure_finite, Regressor, SavedModel, TrainingSet};
use crate::error::{AppError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

const NAME: &str = "LinearRegression";

/// OLS on standardized inputs with an intercept
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearRegression {
    mean: Array1<f64>,
    scale: Array1<f64>,
    coef: Array1<f64>,
    intercept: f64,
    fitted: bool,
}

impl Regressor for LinearRegression {
    fn snapshot(&self) -> Option<SavedModel> {
        Some(SavedModel::LinearRegression(self.clone()))
    }

    fn fit(&mut self, data: &TrainingSet) -> Result<()> {
        let (mean, scale) = column_scaling(&data.x);
        let z = (&data.x - &mean) / &scale;
        let y_mean = data.y.mean().unwrap_or(0.0);
        let yc = &data.y - y_mean;

        // Normal equations on centered data; the intercept is y_mean
        let xtx = z.t().dot(&z);
        let xty = z.t().dot(&yc);
        let coef = solve(xtx, xty).ok_or_else(|| {
            AppError::model_fit(NAME, "singular design matrix")
        })?;

        self.mean = mean;
        self.scale = scale;
        self.coef = coef;
        self.intercept = y_mean;
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, features: ArrayView1<f64>) -> Result<f64> {
        if !self.fitted {
            return Err(AppError::model_fit(NAME, "not fitted"));
        }
        let z = (&features - &self.mean) / &self.scale;
        ensure_finite(NAME, self.intercept + z.dot(&self.coef))
    }
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting
///
/// A tiny ridge term keeps collinear columns (the moving averages) solvable.
pub(crate) fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let trace = (0..n).map(|i| a[[i, i]]).sum::<f64>().max(1.0);
    for i in 0..n {
        a[[i, i]] += 1e-10 * trace;
    }

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[[i, col]]
                .abs()
                .partial_cmp(&a[[j, col]].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[[pivot, col]].abs() < 1e-14 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }

        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::test_support;
    use ndarray::array;

    #[test]
    fn test_solve_small_system() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![3.0, 5.0];
        let x = solve(a, b).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-6);
        assert!((x[1] - 1.4).abs() < 1e-6);
    }

    #[test]
    fn test_recovers_linear_target() {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| (i * (j + 1)) as f64 + (i % 3) as f64);
        let y = x.column(0).mapv(|v| 2.0 * v) + &x.column(1).mapv(|v| -0.5 * v) + 7.0;
        let data = TrainingSet {
            query: x.row(0).to_owned(),
            x,
            y: y.clone(),
            closes: vec![1.0],
        };

        let mut model = LinearRegression::default();
        model.fit(&data).unwrap();
        let pred = model.predict(data.x.row(5)).unwrap();
        assert!((pred - y[5]).abs() < 1e-4);
    }

    #[test]
    fn test_unfitted_is_model_error() {
        let model = LinearRegression::default();
        let err = model.predict(array![1.0].view()).unwrap_err();
        assert!(err.is_per_date());
    }

    #[test]
    fn test_learns_synthetic_series() {
        test_support::assert_learns(&mut LinearRegression::default());
    }
}
