//! Additive Holt-Winters smoothing over the close series
//!
//! Ignores the feature columns: it reads `TrainingSet::closes` and forecasts
//! one session past the last close it was fitted on.

use super::{ensure_finite, Regressor, SavedModel, TrainingSet};
use crate::error::{AppError, Result};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

const NAME: &str = "HoltWinters";

const ALPHAS: [f64; 4] = [0.1, 0.3, 0.5, 0.8];
const BETAS: [f64; 3] = [0.01, 0.05, 0.2];
const GAMMAS: [f64; 2] = [0.05, 0.2];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Smoothing {
    alpha: f64,
    beta: f64,
    gamma: f64,
}

#[derive(Debug, Clone)]
struct Run {
    sse: f64,
    /// Forecast of close[t + 1] made after observing close[t]
    forecasts: Vec<f64>,
    next: f64,
}

/// Additive seasonal exponential smoothing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoltWinters {
    season: usize,
    smoothing: Option<Smoothing>,
    next: f64,
}

impl Default for HoltWinters {
    fn default() -> Self {
        // Five sessions per trading week
        Self::new(5)
    }
}

impl HoltWinters {
    pub fn new(season: usize) -> Self {
        Self {
            season: season.max(1),
            smoothing: None,
            next: 0.0,
        }
    }

    fn run(&self, closes: &[f64], s: Smoothing) -> Run {
        let m = self.season;
        let first: f64 = closes[..m].iter().sum::<f64>() / m as f64;
        let second: f64 = closes[m..2 * m].iter().sum::<f64>() / m as f64;

        // Level and trend anchored one step before the first close, seasonal
        // offsets taken against the detrended first season
        let mut trend = (second - first) / m as f64;
        let center = (m as f64 - 1.0) / 2.0;
        let mut level = first - trend * (center + 1.0);
        let mut seasonal: Vec<f64> = closes[..m]
            .iter()
            .enumerate()
            .map(|(i, c)| c - (first + trend * (i as f64 - center)))
            .collect();

        let mut forecasts = Vec::with_capacity(closes.len());
        let mut sse = 0.0;
        for (t, &obs) in closes.iter().enumerate() {
            let forecast = level + trend + seasonal[t % m];
            if t > 0 {
                sse += (obs - forecast).powi(2);
            }
            forecasts.push(forecast);

            let prev_level = level;
            level = s.alpha * (obs - seasonal[t % m]) + (1.0 - s.alpha) * (level + trend);
            trend = s.beta * (level - prev_level) + (1.0 - s.beta) * trend;
            seasonal[t % m] = s.gamma * (obs - level) + (1.0 - s.gamma) * seasonal[t % m];
        }

        let next = level + trend + seasonal[closes.len() % m];
        // forecasts[t] was made before observing close[t]; shift so index t
        // holds the forecast of close[t + 1]
        forecasts.remove(0);

        Run {
            sse,
            forecasts,
            next,
        }
    }
}

impl Regressor for HoltWinters {
    fn snapshot(&self) -> Option<SavedModel> {
        Some(SavedModel::HoltWinters(self.clone()))
    }

    fn fit(&mut self, data: &TrainingSet) -> Result<()> {
        if data.closes.len() < 2 * self.season {
            return Err(AppError::model_fit(
                NAME,
                format!("need {} closes, got {}", 2 * self.season, data.closes.len()),
            ));
        }

        let mut best: Option<(Smoothing, Run)> = None;
        for &alpha in &ALPHAS {
            for &beta in &BETAS {
                for &gamma in &GAMMAS {
                    let s = Smoothing { alpha, beta, gamma };
                    let run = self.run(&data.closes, s);
                    if run.sse.is_finite()
                        && best.as_ref().map_or(true, |(_, b)| run.sse < b.sse)
                    {
                        best = Some((s, run));
                    }
                }
            }
        }

        let (smoothing, run) = best.ok_or_else(|| AppError::model_fit(NAME, "no finite fit"))?;
        self.smoothing = Some(smoothing);
        self.next = ensure_finite(NAME, run.next)?;
        Ok(())
    }

    fn predict(&self, _features: ArrayView1<f64>) -> Result<f64> {
        if self.smoothing.is_none() {
            return Err(AppError::model_fit(NAME, "not fitted"));
        }
        Ok(self.next)
    }

    fn fitted_values(&self, data: &TrainingSet) -> Result<Vec<f64>> {
        let smoothing = self
            .smoothing
            .ok_or_else(|| AppError::model_fit(NAME, "not fitted"))?;
        if data.closes.len() < 2 * self.season {
            return Err(AppError::model_fit(NAME, "series shorter than two seasons"));
        }
        Ok(self.run(&data.closes, smoothing).forecasts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::test_support;
    use ndarray::{array, Array1, Array2};

    fn closes_only(closes: Vec<f64>) -> TrainingSet {
        let n = closes.len() - 1;
        TrainingSet {
            x: Array2::zeros((n, 1)),
            y: Array1::from_iter(closes[1..].iter().copied()),
            query: array![0.0],
            closes,
        }
    }

    #[test]
    fn test_tracks_linear_trend() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let mut model = HoltWinters::default();
        model.fit(&closes_only(closes)).unwrap();
        let next = model.predict(array![0.0].view()).unwrap();
        assert!((next - 160.0).abs() < 1.0, "forecast {}", next);
    }

    #[test]
    fn test_fitted_values_align_with_targets() {
        let data = test_support::training_set(120);
        let mut model = HoltWinters::default();
        model.fit(&data).unwrap();
        assert_eq!(model.fitted_values(&data).unwrap().len(), data.y.len());
    }

    #[test]
    fn test_short_series_fails() {
        let mut model = HoltWinters::default();
        let err = model.fit(&closes_only(vec![1.0, 2.0, 3.0])).unwrap_err();
        assert!(err.is_per_date());
    }

    #[test]
    fn test_learns_synthetic_series() {
        test_support::assert_learns(&mut HoltWinters::default());
    }
}
