//! Evaluation Service
//!
//! Aggregates validated predictions into per-model performance figures,
//! replays stored runs as a directional backtest, and turns the figures into
//! retraining recommendations.

use crate::db::sqlite::models::{PipelineSettings, PredictionRecord};
use crate::db::sqlite::SqliteDb;
use crate::error::{AppError, Result};
use crate::services::ensemble_service::ENSEMBLE_MODEL;
use crate::services::validation_service::{
    realized_direction, score_model, ClassMetrics, ConfusionMatrix, DirectionMetrics,
};
use crate::voting;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Window used by [`EvaluationService::should_retrain`]
pub const RETRAIN_LOOKBACK_DAYS: i64 = 7;
/// Minimum validated rows per model inside the retrain window
pub const RETRAIN_MIN_PREDICTIONS: usize = 2;
/// Number of flagged models that triggers a retrain on its own
pub const RETRAIN_MODEL_COUNT: usize = 3;

/// Voters a stored run needs before its replayed vote is scored
pub const BACKTEST_MIN_MODELS: usize = 3;

/// Error statistics for one model over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub model_name: String,
    pub n_predictions: usize,
    pub mae: f64,
    pub rmse: f64,
    pub best_error: f64,
    pub worst_error: f64,
    /// Sample standard deviation; None with a single prediction
    pub std_error: Option<f64>,
    /// Percent of BUY calls where the realized value beat the prediction
    pub buy_accuracy: Option<f64>,
    /// Percent of SELL calls where the realized value fell short
    pub sell_accuracy: Option<f64>,
    pub needs_retrain: bool,
    pub retrain_reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: i64,
    /// Ascending by MAE
    pub models: Vec<ModelPerformance>,
    pub best_model: Option<String>,
    pub models_to_retrain: Vec<String>,
    pub avg_mae: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainAdvice {
    pub symbol: String,
    pub should_retrain: bool,
    pub reasons: Vec<String>,
    pub avg_mae: Option<f64>,
    pub models_to_retrain: Vec<String>,
    pub report: PerformanceReport,
}

/// One validated prediction next to the realized move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub symbol: String,
    pub prediction_date: NaiveDate,
    pub model_name: String,
    pub predicted_value: Option<f64>,
    pub predicted_signal: Option<i8>,
    pub true_value: f64,
    pub previous_close: Option<f64>,
    pub real_return: Option<f64>,
    pub direction_real: Option<i8>,
    pub direction_pred: Option<i8>,
    pub hit: bool,
}

/// Directional record of one model over a backtest window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBacktest {
    #[serde(flatten)]
    pub metrics: DirectionMetrics,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

/// Majority vote replayed over every stored run in the window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleBacktest {
    pub min_models: usize,
    /// Runs with enough voters and a realized direction
    pub scored: usize,
    /// Runs with fewer than `min_models` voters
    pub skipped: usize,
    pub accuracy: f64,
    pub up: ClassMetrics,
    pub down: ClassMetrics,
    pub confusion: ConfusionMatrix,
    /// Mean share of voters behind the winning signal
    pub avg_confidence: f64,
    /// Accuracy with each call weighted by its confidence
    pub weighted_accuracy: f64,
    pub avg_models_per_prediction: f64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// By model name; the stored aggregate rows are not a model
    pub models: Vec<ModelBacktest>,
    pub ensemble: EnsembleBacktest,
    pub best_model: Option<String>,
    pub best_accuracy: Option<f64>,
    /// Ensemble accuracy minus the best single model's
    pub ensemble_improvement: Option<f64>,
}

/// Re-vote each (prediction date, run date) group of model signals
fn replay_ensemble(
    runs: &BTreeMap<(NaiveDate, NaiveDate), Vec<i8>>,
    directions: &BTreeMap<NaiveDate, Option<i8>>,
    min_models: usize,
) -> EnsembleBacktest {
    let mut confusion = ConfusionMatrix::default();
    let mut skipped = 0;
    let mut confidence_sum = 0.0;
    let mut weighted_correct = 0.0;
    let mut voters = 0;
    let mut dates = Vec::new();

    for ((prediction_date, _), signals) in runs {
        if signals.len() < min_models {
            skipped += 1;
            continue;
        }
        let Some(actual) = directions.get(prediction_date).copied().flatten() else {
            continue;
        };

        let vote = voting::aggregate(signals.iter().map(|s| ("", *s)));
        confusion.record(actual, vote.final_signal);
        confidence_sum += vote.consensus;
        if vote.final_signal == actual {
            weighted_correct += vote.consensus;
        }
        voters += signals.len();
        dates.push(*prediction_date);
    }

    let scored = confusion.total();
    let mean = |sum: f64| if scored == 0 { 0.0 } else { sum / scored as f64 };
    EnsembleBacktest {
        min_models,
        scored,
        skipped,
        accuracy: mean(confusion.correct() as f64),
        up: confusion.class_metrics(1),
        down: confusion.class_metrics(-1),
        avg_confidence: mean(confidence_sum),
        weighted_accuracy: if confidence_sum > 0.0 {
            weighted_correct / confidence_sum
        } else {
            0.0
        },
        avg_models_per_prediction: mean(voters as f64),
        first_date: dates.first().copied(),
        last_date: dates.last().copied(),
        confusion,
    }
}

fn signal_accuracy(rows: &[&PredictionRecord], signal: i8) -> Option<f64> {
    let calls: Vec<_> = rows
        .iter()
        .filter(|r| r.predicted_signal == Some(signal))
        .filter_map(|r| Some((r.predicted_value?, r.true_value?)))
        .collect();
    if calls.is_empty() {
        return None;
    }
    let correct = calls
        .iter()
        .filter(|(predicted, actual)| match signal {
            1 => predicted < actual,
            _ => predicted > actual,
        })
        .count();
    Some(correct as f64 / calls.len() as f64 * 100.0)
}

/// Summarize one model; None when it has no scored error
pub fn model_performance(
    model_name: &str,
    rows: &[&PredictionRecord],
    settings: &PipelineSettings,
) -> Option<ModelPerformance> {
    let errors: Vec<f64> = rows.iter().filter_map(|r| r.absolute_error).collect();
    if errors.is_empty() {
        return None;
    }

    let n = errors.len() as f64;
    let mae = errors.iter().sum::<f64>() / n;
    let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt();
    let best_error = errors.iter().cloned().fold(f64::INFINITY, f64::min);
    let worst_error = errors.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let std_error = if errors.len() > 1 {
        let var = errors.iter().map(|e| (e - mae).powi(2)).sum::<f64>() / (n - 1.0);
        Some(var.sqrt())
    } else {
        None
    };

    let buy_accuracy = signal_accuracy(rows, 1);
    let sell_accuracy = signal_accuracy(rows, -1);

    let mut retrain_reasons = Vec::new();
    if mae > settings.mae_retrain_threshold {
        retrain_reasons.push(format!(
            "MAE {:.2} above {}",
            mae, settings.mae_retrain_threshold
        ));
    }
    if let Some(std) = std_error.filter(|s| *s > settings.std_retrain_threshold) {
        retrain_reasons.push(format!(
            "Inconsistent errors (std {:.2} above {})",
            std, settings.std_retrain_threshold
        ));
    }
    if let Some(acc) = buy_accuracy.filter(|a| *a < settings.buy_accuracy_retrain_threshold) {
        retrain_reasons.push(format!(
            "Buy accuracy {:.1}% below {}%",
            acc, settings.buy_accuracy_retrain_threshold
        ));
    }

    Some(ModelPerformance {
        model_name: model_name.to_string(),
        n_predictions: errors.len(),
        mae,
        rmse,
        best_error,
        worst_error,
        std_error,
        buy_accuracy,
        sell_accuracy,
        needs_retrain: !retrain_reasons.is_empty(),
        retrain_reasons,
    })
}

/// Evaluation service for business logic
pub struct EvaluationService;

impl EvaluationService {
    /// Per-model performance over validated rows with prediction dates in
    /// `[start, end]`; models with fewer than `min_predictions` rows are left out
    pub fn performance_report(
        db: &SqliteDb,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        min_predictions: usize,
    ) -> Result<PerformanceReport> {
        if start > end {
            return Err(AppError::Validation(format!(
                "start {} is after end {}",
                start, end
            )));
        }

        let settings = db.get_settings()?;
        let rows = db.validated_between(Some(symbol), Some(start), Some(end))?;

        let mut by_model: BTreeMap<&str, Vec<&PredictionRecord>> = BTreeMap::new();
        for row in &rows {
            by_model.entry(row.model_name.as_str()).or_default().push(row);
        }

        let mut models: Vec<ModelPerformance> = by_model
            .iter()
            .filter_map(|(name, rows)| model_performance(name, rows, &settings))
            .filter(|m| m.n_predictions >= min_predictions)
            .collect();
        models.sort_by(|a, b| a.mae.total_cmp(&b.mae));

        let best_model = models.first().map(|m| m.model_name.clone());
        let models_to_retrain: Vec<String> = models
            .iter()
            .filter(|m| m.needs_retrain)
            .map(|m| m.model_name.clone())
            .collect();
        let avg_mae = if models.is_empty() {
            None
        } else {
            Some(models.iter().map(|m| m.mae).sum::<f64>() / models.len() as f64)
        };

        info!(
            "EvaluationService::performance_report - {} models={} best={:?} retrain={}",
            symbol,
            models.len(),
            best_model,
            models_to_retrain.len()
        );

        Ok(PerformanceReport {
            symbol: symbol.to_string(),
            start,
            end,
            days: (end - start).num_days() + 1,
            models,
            best_model,
            models_to_retrain,
            avg_mae,
        })
    }

    /// Directional backtest of validated predictions with prediction dates in
    /// `[start, end]`, per model and for a replayed majority vote
    pub fn backtest(
        db: &SqliteDb,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        min_models: usize,
    ) -> Result<BacktestReport> {
        if start > end {
            return Err(AppError::Validation(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        info!(
            "EvaluationService::backtest - {} {}..{} min_models={}",
            symbol, start, end, min_models
        );

        let rows = db.validated_between(Some(symbol), Some(start), Some(end))?;

        let mut directions: BTreeMap<NaiveDate, Option<i8>> = BTreeMap::new();
        for row in &rows {
            if directions.contains_key(&row.prediction_date) {
                continue;
            }
            let previous = db.previous_close(symbol, row.prediction_date)?;
            let direction = match (row.true_value, previous) {
                (Some(close), Some(prev)) => Some(realized_direction(close, prev)),
                _ => None,
            };
            directions.insert(row.prediction_date, direction);
        }

        let mut by_model: BTreeMap<&str, Vec<&PredictionRecord>> = BTreeMap::new();
        let mut runs: BTreeMap<(NaiveDate, NaiveDate), Vec<i8>> = BTreeMap::new();
        for row in rows.iter().filter(|r| r.model_name != ENSEMBLE_MODEL) {
            by_model.entry(row.model_name.as_str()).or_default().push(row);
            if let Some(signal) = row.predicted_signal {
                runs.entry((row.prediction_date, row.run_date))
                    .or_default()
                    .push(signal);
            }
        }

        let direction_of =
            |row: &PredictionRecord| directions.get(&row.prediction_date).copied().flatten();
        // Rows arrive ordered by prediction date
        let models: Vec<ModelBacktest> = by_model
            .iter()
            .map(|(name, rows)| ModelBacktest {
                metrics: score_model(name, rows, direction_of),
                first_date: rows[0].prediction_date,
                last_date: rows[rows.len() - 1].prediction_date,
            })
            .collect();

        let ensemble = replay_ensemble(&runs, &directions, min_models);

        let best = models
            .iter()
            .filter(|m| m.metrics.scored > 0)
            .fold(None::<&ModelBacktest>, |best, m| match best {
                Some(b) if b.metrics.accuracy >= m.metrics.accuracy => Some(b),
                _ => Some(m),
            });
        let best_model = best.map(|m| m.metrics.model_name.clone());
        let best_accuracy = best.map(|m| m.metrics.accuracy);
        let ensemble_improvement = best_accuracy
            .filter(|_| ensemble.scored > 0)
            .map(|acc| ensemble.accuracy - acc);

        info!(
            "EvaluationService::backtest - {} models={} ensemble_runs={} best={:?}",
            symbol,
            models.len(),
            ensemble.scored,
            best_model
        );

        Ok(BacktestReport {
            symbol: symbol.to_string(),
            start,
            end,
            models,
            ensemble,
            best_model,
            best_accuracy,
            ensemble_improvement,
        })
    }

    /// Retraining advice from the last week of validated predictions
    pub fn should_retrain(db: &SqliteDb, symbol: &str, today: NaiveDate) -> Result<RetrainAdvice> {
        let settings = db.get_settings()?;
        let report = Self::performance_report(
            db,
            symbol,
            today - Duration::days(RETRAIN_LOOKBACK_DAYS),
            today,
            RETRAIN_MIN_PREDICTIONS,
        )?;

        let mut reasons = Vec::new();
        if report.models.is_empty() {
            reasons.push("Not enough validated predictions in the last 7 days".to_string());
        }
        if let Some(avg) = report.avg_mae.filter(|a| *a > settings.mae_retrain_threshold) {
            reasons.push(format!(
                "Average MAE {:.2} above {}",
                avg, settings.mae_retrain_threshold
            ));
        }
        if report.models_to_retrain.len() >= RETRAIN_MODEL_COUNT {
            reasons.push(format!(
                "{} models underperforming",
                report.models_to_retrain.len()
            ));
        }

        let should_retrain = !report.models.is_empty() && !reasons.is_empty();
        info!(
            "EvaluationService::should_retrain - {} -> {}",
            symbol, should_retrain
        );

        Ok(RetrainAdvice {
            symbol: symbol.to_string(),
            should_retrain,
            reasons,
            avg_mae: report.avg_mae,
            models_to_retrain: report.models_to_retrain.clone(),
            report,
        })
    }

    /// Validated rows with the realized move against the prior session
    pub fn validation_dataset(db: &SqliteDb, symbol: Option<&str>) -> Result<Vec<DatasetRow>> {
        let rows = db.validated_between(symbol, None, None)?;
        let mut previous: BTreeMap<(String, NaiveDate), Option<f64>> = BTreeMap::new();
        let mut out = Vec::with_capacity(rows.len());

        for row in rows {
            let Some(true_value) = row.true_value else {
                continue;
            };
            let key = (row.symbol.clone(), row.prediction_date);
            let previous_close = match previous.get(&key) {
                Some(p) => *p,
                None => {
                    let p = db.previous_close(&row.symbol, row.prediction_date)?;
                    previous.insert(key, p);
                    p
                }
            };

            let real_return = previous_close
                .filter(|p| *p != 0.0)
                .map(|p| (true_value - p) / p);
            let direction_real = previous_close.map(|p| realized_direction(true_value, p));
            let direction_pred = row.predicted_signal;

            out.push(DatasetRow {
                hit: direction_real.is_some() && direction_real == direction_pred,
                symbol: row.symbol,
                prediction_date: row.prediction_date,
                model_name: row.model_name,
                predicted_value: row.predicted_value,
                predicted_signal: row.predicted_signal,
                true_value,
                previous_close,
                real_return,
                direction_real,
                direction_pred,
            });
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::models::{NewPrediction, PricePoint};
    use crate::services::validation_service::ValidationService;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn bar(date: NaiveDate, close: f64) -> PricePoint {
        PricePoint {
            symbol: "^IBEX".to_string(),
            date,
            open: close,
            high: close,
            low: close,
            close,
            adjusted_close: close,
            volume: 0,
        }
    }

    fn pred(model: &str, value: f64, signal: i8) -> NewPrediction {
        NewPrediction {
            model_name: model.to_string(),
            predicted_value: Some(value),
            predicted_signal: signal,
        }
    }

    /// Two validated sessions: 6th closes 100, 7th closes 110, 8th closes 105
    fn seeded() -> SqliteDb {
        let db = SqliteDb::open_in_memory().unwrap();
        db.upsert_prices(&[bar(d(6), 100.0), bar(d(7), 110.0), bar(d(8), 105.0)])
            .unwrap();
        db.insert_predictions(
            "^IBEX",
            d(7),
            d(6),
            Some(d(6)),
            &[pred("Good", 108.0, 1), pred("Bad", 400.0, 1)],
        )
        .unwrap();
        db.insert_predictions(
            "^IBEX",
            d(8),
            d(7),
            Some(d(7)),
            &[pred("Good", 106.0, -1), pred("Bad", 700.0, -1)],
        )
        .unwrap();
        ValidationService::validate(&db, d(7), None).unwrap();
        ValidationService::validate(&db, d(8), None).unwrap();
        db
    }

    #[test]
    fn test_report_sorted_by_mae() {
        let db = seeded();
        let report = EvaluationService::performance_report(&db, "^IBEX", d(1), d(10), 2).unwrap();

        assert_eq!(report.days, 10);
        assert_eq!(report.best_model.as_deref(), Some("Good"));
        assert_eq!(report.models.len(), 2);

        let good = &report.models[0];
        assert!((good.mae - 1.5).abs() < 1e-9);
        assert!((good.rmse - (2.5f64).sqrt()).abs() < 1e-9);
        assert_eq!(good.best_error, 1.0);
        assert_eq!(good.worst_error, 2.0);
        assert_eq!(good.buy_accuracy, Some(100.0));
        assert_eq!(good.sell_accuracy, Some(100.0));
        assert!(!good.needs_retrain);

        let bad = &report.models[1];
        assert!(bad.needs_retrain);
        assert_eq!(bad.buy_accuracy, Some(0.0));
        assert!(bad.retrain_reasons.len() >= 2);
        assert_eq!(report.models_to_retrain, vec!["Bad".to_string()]);
    }

    #[test]
    fn test_min_predictions_filters_models() {
        let db = seeded();
        let report = EvaluationService::performance_report(&db, "^IBEX", d(7), d(7), 2).unwrap();
        assert!(report.models.is_empty());
        assert!(report.best_model.is_none());
        assert!(report.avg_mae.is_none());

        let err = EvaluationService::performance_report(&db, "^IBEX", d(8), d(7), 1).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_should_retrain_on_average_mae() {
        let db = seeded();
        let advice = EvaluationService::should_retrain(&db, "^IBEX", d(9)).unwrap();
        // (1.5 + 442.5) / 2 is above the default 200 threshold
        assert!(advice.should_retrain);
        assert!(advice.avg_mae.unwrap() > 200.0);

        let empty = EvaluationService::should_retrain(&db, "^GSPC", d(9)).unwrap();
        assert!(!empty.should_retrain);
        assert_eq!(empty.reasons.len(), 1);
    }

    #[test]
    fn test_validation_dataset() {
        let db = seeded();
        let rows = EvaluationService::validation_dataset(&db, Some("^IBEX")).unwrap();
        assert_eq!(rows.len(), 4);

        let good_up = rows
            .iter()
            .find(|r| r.model_name == "Good" && r.prediction_date == d(7))
            .unwrap();
        assert_eq!(good_up.previous_close, Some(100.0));
        assert!((good_up.real_return.unwrap() - 0.1).abs() < 1e-12);
        assert_eq!(good_up.direction_real, Some(1));
        assert!(good_up.hit);

        let good_down = rows
            .iter()
            .find(|r| r.model_name == "Good" && r.prediction_date == d(8))
            .unwrap();
        assert_eq!(good_down.direction_real, Some(-1));
        assert!(good_down.hit);

        assert!(rows.iter().filter(|r| r.hit).count() == 4);
    }

    /// Three voters on the 7th and 8th, four on the 9th
    fn seeded_runs() -> SqliteDb {
        let db = SqliteDb::open_in_memory().unwrap();
        db.upsert_prices(&[
            bar(d(6), 100.0),
            bar(d(7), 110.0),
            bar(d(8), 105.0),
            bar(d(9), 106.0),
        ])
        .unwrap();
        let runs = [
            (d(7), vec![pred("A", 101.0, 1), pred("B", 101.0, 1), pred("C", 99.0, -1)]),
            (d(8), vec![pred("A", 111.0, 1), pred("B", 111.0, 1), pred("C", 109.0, -1)]),
            (
                d(9),
                vec![
                    pred("A", 106.0, 1),
                    pred("B", 104.0, -1),
                    pred("C", 106.0, 1),
                    pred("D", 106.0, 1),
                ],
            ),
        ];
        for (date, mut batch) in runs {
            batch.push(pred(ENSEMBLE_MODEL, 0.0, -1));
            db.insert_predictions("^IBEX", date, date - Duration::days(1), Some(date), &batch)
                .unwrap();
            ValidationService::validate(&db, date, None).unwrap();
        }
        db
    }

    #[test]
    fn test_backtest_by_model() {
        let db = seeded_runs();
        let report = EvaluationService::backtest(&db, "^IBEX", d(1), d(10), 3).unwrap();

        let names: Vec<&str> = report
            .models
            .iter()
            .map(|m| m.metrics.model_name.as_str())
            .collect();
        assert_eq!(names, vec!["A", "B", "C", "D"]);

        let a = &report.models[0];
        assert_eq!(a.metrics.scored, 3);
        assert!((a.metrics.accuracy - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(a.first_date, d(7));
        assert_eq!(a.last_date, d(9));
        assert!((report.models[1].metrics.accuracy - 1.0 / 3.0).abs() < 1e-12);

        let dm = &report.models[3];
        assert_eq!(dm.metrics.scored, 1);
        assert_eq!(dm.first_date, d(9));
        assert_eq!(report.best_model.as_deref(), Some("D"));
        assert_eq!(report.best_accuracy, Some(1.0));
    }

    #[test]
    fn test_backtest_ensemble_vote() {
        let db = seeded_runs();
        let report = EvaluationService::backtest(&db, "^IBEX", d(1), d(10), 3).unwrap();
        let e = &report.ensemble;

        assert_eq!(e.scored, 3);
        assert_eq!(e.skipped, 0);
        // BUY on all three sessions; the 8th fell
        assert_eq!(e.confusion.get(1, 1), 2);
        assert_eq!(e.confusion.get(-1, 1), 1);
        assert!((e.accuracy - 2.0 / 3.0).abs() < 1e-12);
        assert!((e.avg_confidence - 25.0 / 36.0).abs() < 1e-12);
        assert!((e.weighted_accuracy - 17.0 / 25.0).abs() < 1e-12);
        assert!((e.avg_models_per_prediction - 10.0 / 3.0).abs() < 1e-12);
        assert_eq!(e.first_date, Some(d(7)));
        assert_eq!(e.last_date, Some(d(9)));
        assert!((report.ensemble_improvement.unwrap() + 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_backtest_min_models() {
        let db = seeded_runs();
        let report = EvaluationService::backtest(&db, "^IBEX", d(1), d(10), 4).unwrap();
        assert_eq!(report.ensemble.scored, 1);
        assert_eq!(report.ensemble.skipped, 2);
        assert_eq!(report.ensemble.accuracy, 1.0);
        assert_eq!(report.ensemble.avg_models_per_prediction, 4.0);

        let none = EvaluationService::backtest(&db, "^IBEX", d(1), d(10), 5).unwrap();
        assert_eq!(none.ensemble.scored, 0);
        assert!(none.ensemble_improvement.is_none());

        let err = EvaluationService::backtest(&db, "^IBEX", d(9), d(7), 3).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
