//! Feature construction
//!
//! Turns an ascending series of price bars into fully-formed feature rows.
//! Indicators are computed over exactly the bars passed in, so truncating the
//! input at an as-of date truncates every indicator window with it.

pub mod indicators;

use crate::db::sqlite::models::{AdvancedIndicatorRow, IndicatorRow, PricePoint};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Columns fed to the regressors, in order
pub const MODEL_FEATURES: [&str; 6] = ["sma_20", "sma_50", "ema_10", "ema_50", "momentum", "volatility"];

/// Bars needed before the slowest indicator (SMA 50) is defined
pub const WARMUP_SESSIONS: usize = 50;

/// One session of OHLCV plus derived indicators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjusted_close: f64,
    pub volume: i64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub ema_10: f64,
    pub ema_50: f64,
    /// Stdev of daily returns over 20 sessions
    pub vol_20: f64,
    pub rsi_14: f64,
    /// Close minus close 5 sessions earlier
    pub momentum: f64,
    /// Stdev of close over 20 sessions
    pub volatility: f64,
}

impl FeatureRow {
    /// Regressor inputs in [`MODEL_FEATURES`] order
    pub fn model_inputs(&self) -> [f64; 6] {
        [
            self.sma_20,
            self.sma_50,
            self.ema_10,
            self.ema_50,
            self.momentum,
            self.volatility,
        ]
    }
}

/// Raw indicator columns aligned with the input bars
struct IndicatorColumns {
    sma_20: Vec<Option<f64>>,
    sma_50: Vec<Option<f64>>,
    ema_10: Vec<Option<f64>>,
    ema_50: Vec<Option<f64>>,
    vol_20: Vec<Option<f64>>,
    rsi_14: Vec<Option<f64>>,
    momentum: Vec<Option<f64>>,
    volatility: Vec<Option<f64>>,
}

fn compute_columns(prices: &[PricePoint]) -> IndicatorColumns {
    let close: Vec<f64> = prices.iter().map(|p| p.close).collect();
    let close_opt: Vec<Option<f64>> = close.iter().map(|c| Some(*c)).collect();

    IndicatorColumns {
        sma_20: indicators::sma(&close, 20),
        sma_50: indicators::sma(&close, 50),
        ema_10: indicators::ema(&close, 10),
        ema_50: indicators::ema(&close, 50),
        vol_20: indicators::rolling_std(&indicators::pct_change(&close), 20),
        rsi_14: indicators::rsi(&close, 14),
        momentum: indicators::momentum(&close, 5),
        volatility: indicators::rolling_std(&close_opt, 20),
    }
}

/// Build feature rows from ascending bars, dropping rows still in warm-up
pub fn build_feature_rows(prices: &[PricePoint]) -> Vec<FeatureRow> {
    let cols = compute_columns(prices);

    prices
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            Some(FeatureRow {
                symbol: p.symbol.clone(),
                date: p.date,
                open: p.open,
                high: p.high,
                low: p.low,
                close: p.close,
                adjusted_close: p.adjusted_close,
                volume: p.volume,
                sma_20: cols.sma_20[i]?,
                sma_50: cols.sma_50[i]?,
                ema_10: cols.ema_10[i]?,
                ema_50: cols.ema_50[i]?,
                vol_20: cols.vol_20[i]?,
                rsi_14: cols.rsi_14[i]?,
                momentum: cols.momentum[i]?,
                volatility: cols.volatility[i]?,
            })
        })
        .collect()
}

/// Rows for the persisted `indicators` table; rows with every column
/// undefined are skipped
pub fn build_indicator_rows(prices: &[PricePoint]) -> Vec<IndicatorRow> {
    let cols = compute_columns(prices);

    prices
        .iter()
        .enumerate()
        .map(|(i, p)| IndicatorRow {
            symbol: p.symbol.clone(),
            date: p.date,
            sma_20: cols.sma_20[i],
            sma_50: cols.sma_50[i],
            vol_20: cols.vol_20[i],
            rsi_14: cols.rsi_14[i],
        })
        .filter(|r| {
            r.sma_20.is_some() || r.sma_50.is_some() || r.vol_20.is_some() || r.rsi_14.is_some()
        })
        .collect()
}

/// Rows for the `advanced_indicators` table, one per bar
///
/// MACD, OBV and the EMAs are defined from the first bar, so no row is
/// ever empty.
pub fn build_advanced_indicator_rows(prices: &[PricePoint]) -> Vec<AdvancedIndicatorRow> {
    let close: Vec<f64> = prices.iter().map(|p| p.close).collect();
    let high: Vec<f64> = prices.iter().map(|p| p.high).collect();
    let low: Vec<f64> = prices.iter().map(|p| p.low).collect();
    let volume: Vec<i64> = prices.iter().map(|p| p.volume).collect();

    let macd = indicators::macd(&close, 12, 26, 9);
    let bands = indicators::bollinger(&close, 20, 2.0);
    let adx = indicators::adx(&high, &low, &close, 14);
    let atr = indicators::atr(&high, &low, &close, 14);
    let stoch = indicators::stochastic(&high, &low, &close, 14, 3);
    let obv = indicators::obv(&close, &volume);
    let ema_12 = indicators::ema(&close, 12);
    let ema_26 = indicators::ema(&close, 26);
    let ema_200 = indicators::ema(&close, 200);

    prices
        .iter()
        .enumerate()
        .map(|(i, p)| AdvancedIndicatorRow {
            symbol: p.symbol.clone(),
            date: p.date,
            macd: macd.macd[i],
            macd_signal: macd.signal[i],
            macd_histogram: macd.histogram[i],
            bb_middle: bands.middle[i],
            bb_upper: bands.upper[i],
            bb_lower: bands.lower[i],
            bb_width: bands.width[i],
            bb_percent: bands.percent[i],
            adx: adx.adx[i],
            plus_di: adx.plus_di[i],
            minus_di: adx.minus_di[i],
            atr: atr[i],
            stoch_k: stoch.k[i],
            stoch_d: stoch.d[i],
            obv: obv[i],
            ema_12: ema_12[i],
            ema_26: ema_26[i],
            ema_200: ema_200[i],
        })
        .collect()
}

/// Deterministic synthetic bars for tests
#[cfg(test)]
pub(crate) fn synthetic_prices(symbol: &str, start: NaiveDate, n: usize) -> Vec<PricePoint> {
    use chrono::{Datelike, Duration, Weekday};

    let mut out = Vec::with_capacity(n);
    let mut date = start;
    let mut i = 0usize;
    while out.len() < n {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            let t = i as f64;
            let close = 100.0 + 0.15 * t + 3.0 * (t / 4.0).sin() + 1.5 * (t / 1.7).cos();
            out.push(PricePoint {
                symbol: symbol.to_string(),
                date,
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                adjusted_close: close,
                volume: 1_000 + (i as i64 % 7) * 100,
            });
            i += 1;
        }
        date += Duration::days(1);
    }
    out
}
