//! Signal Service
//!
//! Indicator rules that label every stored session. They are informational
//! and never take part in the model vote.

use crate::db::sqlite::models::SignalRow;
use crate::db::sqlite::SqliteDb;
use crate::error::{AppError, Result};
use crate::features::{build_feature_rows, FeatureRow};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const RULES_MODEL: &str = "rules_ensemble";

/// Mean rule vote needed to call a direction
const RULE_VOTE_THRESHOLD: f64 = 0.2;

/// Inputs the rules read; any may be undefined
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleInputs {
    pub close: Option<f64>,
    pub sma_20: Option<f64>,
    pub vol_20: Option<f64>,
    pub rsi_14: Option<f64>,
}

impl From<&FeatureRow> for RuleInputs {
    fn from(row: &FeatureRow) -> Self {
        Self {
            close: Some(row.close),
            sma_20: Some(row.sma_20),
            vol_20: Some(row.vol_20),
            rsi_14: Some(row.rsi_14),
        }
    }
}

/// Close vs SMA 20 confirmed by a non-extreme RSI
pub fn trend_rule(x: &RuleInputs) -> i8 {
    let (Some(close), Some(sma), Some(rsi)) = (x.close, x.sma_20, x.rsi_14) else {
        return 0;
    };
    if close > sma && (40.0..=70.0).contains(&rsi) {
        1
    } else if close < sma && (30.0..=60.0).contains(&rsi) {
        -1
    } else {
        0
    }
}

/// Trend that only buys in calm markets
pub fn volatility_rule(x: &RuleInputs) -> i8 {
    let (Some(close), Some(sma), Some(rsi)) = (x.close, x.sma_20, x.rsi_14) else {
        return 0;
    };
    let vol = x.vol_20.unwrap_or(0.01);
    if close > sma && vol < 0.01 && rsi < 65.0 {
        1
    } else if close < sma && (vol > 0.015 || rsi > 75.0) {
        -1
    } else {
        0
    }
}

/// Oversold buys, overbought sells
pub fn contrarian_rule(x: &RuleInputs) -> i8 {
    match x.rsi_14 {
        Some(rsi) if rsi < 30.0 => 1,
        Some(rsi) if rsi > 70.0 => -1,
        _ => 0,
    }
}

/// All three rules, in order trend, volatility, contrarian
pub fn rule_signals(x: &RuleInputs) -> [i8; 3] {
    [trend_rule(x), volatility_rule(x), contrarian_rule(x)]
}

/// Mean of the rule votes thresholded at +/-0.2
pub fn combine_rules(signals: &[i8]) -> i8 {
    if signals.is_empty() {
        return 0;
    }
    let mean = signals.iter().map(|s| *s as f64).sum::<f64>() / signals.len() as f64;
    if mean > RULE_VOTE_THRESHOLD {
        1
    } else if mean < -RULE_VOTE_THRESHOLD {
        -1
    } else {
        0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSummary {
    pub symbol: String,
    pub rows_written: usize,
    pub latest: Option<SignalRow>,
}

/// Signal service for business logic
pub struct SignalService;

impl SignalService {
    /// Label every fully-formed session of `symbol` and upsert the rows
    pub fn compute_for_symbol(db: &SqliteDb, symbol: &str) -> Result<SignalSummary> {
        let prices = db.load_prices(symbol, None)?;
        if prices.is_empty() {
            return Err(AppError::NotFound(format!("No prices stored for {}", symbol)));
        }

        let rows: Vec<SignalRow> = build_feature_rows(&prices)
            .iter()
            .map(|row| {
                let signals = rule_signals(&RuleInputs::from(row));
                SignalRow {
                    symbol: row.symbol.clone(),
                    date: row.date,
                    signal_simple: signals[0],
                    signal_ensemble: combine_rules(&signals),
                    model_best: Some(RULES_MODEL.to_string()),
                }
            })
            .collect();

        let rows_written = db.upsert_signals(&rows)?;
        info!(
            "SignalService::compute_for_symbol - {} rows={}",
            symbol, rows_written
        );

        Ok(SignalSummary {
            symbol: symbol.to_string(),
            rows_written,
            latest: rows.last().cloned(),
        })
    }
}
