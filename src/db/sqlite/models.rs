//! SQLite database models

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily OHLCV bar, unique per (symbol, date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjusted_close: f64,
    pub volume: i64,
}

/// Persisted indicator row (read by downstream consumers, not by the
/// feature accessor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub symbol: String,
    pub date: NaiveDate,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub vol_20: Option<f64>,
    pub rsi_14: Option<f64>,
}

/// One session of the `advanced_indicators` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancedIndicatorRow {
    pub symbol: String,
    pub date: NaiveDate,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_width: Option<f64>,
    pub bb_percent: Option<f64>,
    pub adx: Option<f64>,
    pub plus_di: Option<f64>,
    pub minus_di: Option<f64>,
    pub atr: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub obv: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub ema_200: Option<f64>,
}

/// Rule-based signal row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub symbol: String,
    pub date: NaiveDate,
    pub signal_simple: i8,
    pub signal_ensemble: i8,
    pub model_best: Option<String>,
}

/// A prediction as it is written at prediction time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPrediction {
    pub model_name: String,
    pub predicted_value: Option<f64>,
    pub predicted_signal: i8,
}

/// One row of `ml_predictions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: i64,
    pub symbol: String,
    pub prediction_date: NaiveDate,
    pub run_date: NaiveDate,
    pub as_of_date: Option<NaiveDate>,
    pub model_name: String,
    pub predicted_value: Option<f64>,
    pub predicted_signal: Option<i8>,
    pub true_value: Option<f64>,
    pub absolute_error: Option<f64>,
    pub created_at: String,
}

/// Pipeline settings (singleton row)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Minimum fully-formed feature rows before models are trained
    pub min_history: usize,
    /// Relative move below which a prediction is a HOLD
    pub neutral_band: f64,
    /// Default provider period for price refreshes
    pub default_period: String,
    pub mae_retrain_threshold: f64,
    pub std_retrain_threshold: f64,
    /// Percent
    pub buy_accuracy_retrain_threshold: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_history: 60,
            neutral_band: 0.001,
            default_period: "1mo".to_string(),
            mae_retrain_threshold: 200.0,
            std_retrain_threshold: 150.0,
            buy_accuracy_retrain_threshold: 40.0,
        }
    }
}

/// Partial update for [`PipelineSettings`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub min_history: Option<usize>,
    pub neutral_band: Option<f64>,
    pub default_period: Option<String>,
    pub mae_retrain_threshold: Option<f64>,
    pub std_retrain_threshold: Option<f64>,
    pub buy_accuracy_retrain_threshold: Option<f64>,
}

/// One saved version of a fitted model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredModel {
    pub symbol: String,
    pub model_name: String,
    pub training_date: NaiveDate,
    pub n_samples: usize,
    pub mae: f64,
    pub rmse: f64,
    /// JSON snapshot of the fitted parameters
    pub payload: String,
}

/// Metadata recorded when a live model is fitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRegistryEntry {
    pub symbol: String,
    pub model_name: String,
    pub training_date: NaiveDate,
    pub n_samples: usize,
    pub mae: f64,
    pub rmse: f64,
    pub saved_at: String,
}
