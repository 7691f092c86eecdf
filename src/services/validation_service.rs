//! Validation Service
//!
//! Writes realized closes into stored predictions once they are known and
//! scores the directional calls per model and for the ensemble.

use crate::db::sqlite::models::PredictionRecord;
use crate::db::sqlite::SqliteDb;
use crate::error::Result;
use crate::services::ensemble_service::ENSEMBLE_MODEL;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// Precision/recall/F1 for one direction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Realized moves in this direction
    pub support: usize,
}

/// Counts indexed `[actual][predicted]`, classes ordered down, flat, up
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 3]; 3],
}

impl ConfusionMatrix {
    fn index(direction: i8) -> usize {
        (direction.signum() + 1) as usize
    }

    pub fn record(&mut self, actual: i8, predicted: i8) {
        self.counts[Self::index(actual)][Self::index(predicted)] += 1;
    }

    pub fn get(&self, actual: i8, predicted: i8) -> usize {
        self.counts[Self::index(actual)][Self::index(predicted)]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..3).map(|i| self.counts[i][i]).sum()
    }

    /// One-vs-rest metrics for `direction`
    pub fn class_metrics(&self, direction: i8) -> ClassMetrics {
        let k = Self::index(direction);
        let tp = self.counts[k][k];
        let predicted: usize = (0..3).map(|a| self.counts[a][k]).sum();
        let actual: usize = self.counts[k].iter().sum();

        let precision = ratio(tp, predicted);
        let recall = ratio(tp, actual);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        ClassMetrics {
            precision,
            recall,
            f1,
            support: actual,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Directional and error metrics for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionMetrics {
    pub model_name: String,
    /// Rows with a realized value
    pub validated: usize,
    /// Rows with both a predicted and a realized direction
    pub scored: usize,
    pub accuracy: f64,
    pub up: ClassMetrics,
    pub down: ClassMetrics,
    pub confusion: ConfusionMatrix,
    pub mae: Option<f64>,
}

/// Realized move of one symbol on the validated date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealizedMove {
    pub symbol: String,
    pub close: f64,
    pub previous_close: Option<f64>,
    pub direction: Option<i8>,
}

/// Validation result for one date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub date: NaiveDate,
    pub symbols_with_price: Vec<String>,
    pub rows_updated: usize,
    pub rows_validated: usize,
    pub realized: Vec<RealizedMove>,
    pub models: Vec<DirectionMetrics>,
    pub ensemble: Option<DirectionMetrics>,
}

/// sign(close - previous_close)
pub fn realized_direction(close: f64, previous_close: f64) -> i8 {
    if close > previous_close {
        1
    } else if close < previous_close {
        -1
    } else {
        0
    }
}

/// Score rows of a single model against realized directions per symbol/date
pub fn score_model<F>(model_name: &str, rows: &[&PredictionRecord], direction_of: F) -> DirectionMetrics
where
    F: Fn(&PredictionRecord) -> Option<i8>,
{
    let mut confusion = ConfusionMatrix::default();
    let mut errors = Vec::new();

    for row in rows {
        if let Some(err) = row.absolute_error {
            errors.push(err);
        }
        if let (Some(predicted), Some(actual)) = (row.predicted_signal, direction_of(*row)) {
            confusion.record(actual, predicted);
        }
    }

    let scored = confusion.total();
    DirectionMetrics {
        model_name: model_name.to_string(),
        validated: rows.len(),
        scored,
        accuracy: ratio(confusion.correct(), scored),
        up: confusion.class_metrics(1),
        down: confusion.class_metrics(-1),
        confusion,
        mae: if errors.is_empty() {
            None
        } else {
            Some(errors.iter().sum::<f64>() / errors.len() as f64)
        },
    }
}

/// Validation service for business logic
pub struct ValidationService;

impl ValidationService {
    /// Fill realized values for predictions targeting `date` and score every
    /// validated prediction for that date
    ///
    /// Dates without prices or predictions give an empty report.
    pub fn validate(db: &SqliteDb, date: NaiveDate, symbol: Option<&str>) -> Result<ValidationReport> {
        info!("ValidationService::validate - {} symbol={:?}", date, symbol);

        let closes: HashMap<String, f64> = db
            .closes_on(date)?
            .into_iter()
            .filter(|(s, _)| symbol.map_or(true, |wanted| wanted == s.as_str()))
            .collect();

        let mut rows_updated = 0;
        for pending in db.pending_predictions(date, symbol)? {
            match closes.get(&pending.symbol) {
                Some(close) => {
                    if db.set_prediction_outcome(pending.id, *close)? {
                        rows_updated += 1;
                    }
                }
                None => warn!("No close for {} on {}", pending.symbol, date),
            }
        }

        let mut realized = Vec::with_capacity(closes.len());
        let mut directions: HashMap<String, i8> = HashMap::new();
        let mut symbols_with_price: Vec<String> = closes.keys().cloned().collect();
        symbols_with_price.sort();
        for s in &symbols_with_price {
            let close = closes[s];
            let previous_close = db.previous_close(s, date)?;
            let direction = previous_close.map(|prev| realized_direction(close, prev));
            if let Some(d) = direction {
                directions.insert(s.clone(), d);
            }
            realized.push(RealizedMove {
                symbol: s.clone(),
                close,
                previous_close,
                direction,
            });
        }

        let validated = db.validated_predictions(date, symbol)?;
        let mut by_model: BTreeMap<&str, Vec<&PredictionRecord>> = BTreeMap::new();
        for row in &validated {
            by_model.entry(row.model_name.as_str()).or_default().push(row);
        }

        let direction_of = |row: &PredictionRecord| directions.get(&row.symbol).copied();
        let mut models = Vec::new();
        let mut ensemble = None;
        for (name, rows) in &by_model {
            let metrics = score_model(name, rows, direction_of);
            if *name == ENSEMBLE_MODEL {
                ensemble = Some(metrics);
            } else {
                models.push(metrics);
            }
        }

        info!(
            "ValidationService::validate - {} updated={} validated={}",
            date,
            rows_updated,
            validated.len()
        );

        Ok(ValidationReport {
            date,
            symbols_with_price,
            rows_updated,
            rows_validated: validated.len(),
            realized,
            models,
            ensemble,
        })
    }

    /// Validate the calendar day before `today`
    pub fn validate_yesterday(db: &SqliteDb, today: NaiveDate) -> Result<ValidationReport> {
        Self::validate(db, today - Duration::days(1), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::models::{NewPrediction, PricePoint};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn bar(symbol: &str, date: NaiveDate, close: f64) -> PricePoint {
        PricePoint {
            symbol: symbol.to_string(),
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

    #[test]
    fn test_validation_writes_error_and_scores_direction() {
        let db = SqliteDb::open_in_memory().unwrap();
        db.upsert_prices(&[bar("^IBEX", d(6), 98.0), bar("^IBEX", d(7), 99.0)])
            .unwrap();
        db.insert_predictions(
            "^IBEX",
            d(7),
            d(6),
            Some(d(6)),
            &[
                pred("LinearRegression", 100.5, 1),
                pred("RandomForest", 97.0, -1),
                pred(ENSEMBLE_MODEL, 98.75, 0),
            ],
        )
        .unwrap();

        let report = ValidationService::validate(&db, d(7), None).unwrap();
        assert_eq!(report.rows_updated, 3);
        assert_eq!(report.rows_validated, 3);
        assert_eq!(report.realized[0].direction, Some(1));

        let rows = db.validated_predictions(d(7), Some("^IBEX")).unwrap();
        let lr = rows.iter().find(|r| r.model_name == "LinearRegression").unwrap();
        assert_eq!(lr.true_value, Some(99.0));
        assert!((lr.absolute_error.unwrap() - 1.5).abs() < 1e-12);

        let lr_metrics = report
            .models
            .iter()
            .find(|m| m.model_name == "LinearRegression")
            .unwrap();
        assert_eq!(lr_metrics.accuracy, 1.0);
        assert_eq!(lr_metrics.confusion.get(1, 1), 1);
        assert_eq!(lr_metrics.up.precision, 1.0);

        let rf_metrics = report
            .models
            .iter()
            .find(|m| m.model_name == "RandomForest")
            .unwrap();
        assert_eq!(rf_metrics.accuracy, 0.0);
        assert_eq!(rf_metrics.confusion.get(1, -1), 1);

        let ensemble = report.ensemble.unwrap();
        assert_eq!(ensemble.accuracy, 0.0);
        assert_eq!(ensemble.confusion.get(1, 0), 1);
    }

    #[test]
    fn test_second_validation_does_not_rewrite() {
        let db = SqliteDb::open_in_memory().unwrap();
        db.upsert_prices(&[bar("^IBEX", d(6), 98.0), bar("^IBEX", d(7), 99.0)])
            .unwrap();
        db.insert_predictions("^IBEX", d(7), d(6), None, &[pred("LinearRegression", 100.5, 1)])
            .unwrap();

        ValidationService::validate(&db, d(7), None).unwrap();
        let again = ValidationService::validate(&db, d(7), None).unwrap();
        assert_eq!(again.rows_updated, 0);
        assert_eq!(again.rows_validated, 1);
    }

    #[test]
    fn test_no_rows_is_empty_report() {
        let db = SqliteDb::open_in_memory().unwrap();
        let report = ValidationService::validate(&db, d(7), None).unwrap();
        assert_eq!(report.rows_updated, 0);
        assert_eq!(report.rows_validated, 0);
        assert!(report.models.is_empty());
        assert!(report.ensemble.is_none());
    }

    #[test]
    fn test_validate_yesterday() {
        let db = SqliteDb::open_in_memory().unwrap();
        db.upsert_prices(&[bar("^GSPC", d(6), 10.0), bar("^GSPC", d(7), 9.0)])
            .unwrap();
        db.insert_predictions("^GSPC", d(7), d(6), None, &[pred("HoltWinters", 9.5, -1)])
            .unwrap();

        let report = ValidationService::validate_yesterday(&db, d(8)).unwrap();
        assert_eq!(report.date, d(7));
        assert_eq!(report.rows_updated, 1);
        assert_eq!(report.models[0].down.recall, 1.0);
    }

    #[test]
    fn test_class_metrics() {
        let mut cm = ConfusionMatrix::default();
        cm.record(1, 1);
        cm.record(1, -1);
        cm.record(-1, 1);
        cm.record(-1, -1);
        cm.record(0, 1);

        let up = cm.class_metrics(1);
        assert!((up.precision - 1.0 / 3.0).abs() < 1e-12);
        assert!((up.recall - 0.5).abs() < 1e-12);
        assert!((up.f1 - 0.4).abs() < 1e-12);
        assert_eq!(up.support, 2);
        assert_eq!(cm.total(), 5);
        assert_eq!(cm.correct(), 2);
    }
}
