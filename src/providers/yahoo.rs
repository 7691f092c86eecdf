//! Yahoo Finance chart API

use super::{check_period, PriceProvider};
use crate::db::sqlite::models::PricePoint;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance daily bars
pub struct YahooProvider {
    client: Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .user_agent("Mozilla/5.0 (market-ensemble)")
                .build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    exchange_timezone_name: Option<String>,
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<QuoteColumns>,
    #[serde(default)]
    adjclose: Option<Vec<AdjCloseColumn>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteColumns {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseColumn {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

fn column<T: Copy>(values: &[Option<T>], i: usize) -> Option<T> {
    values.get(i).copied().flatten()
}

fn session_date(ts: i64, tz: Option<Tz>, gmtoffset: i64) -> Option<NaiveDate> {
    match tz {
        Some(tz) => tz.timestamp_opt(ts, 0).single().map(|dt| dt.date_naive()),
        None => DateTime::from_timestamp(ts + gmtoffset, 0).map(|dt| dt.date_naive()),
    }
}

/// Parse a chart response body into bars
///
/// Sessions without a close are skipped. Missing volume is 0 and a missing
/// adjusted close falls back to the close.
pub(crate) fn parse_chart(symbol: &str, body: &str) -> Result<Vec<PricePoint>> {
    let envelope: ChartEnvelope = serde_json::from_str(body)?;

    if let Some(err) = envelope.chart.error {
        return Err(AppError::Provider(format!(
            "{}: {} ({})",
            symbol, err.description, err.code
        )));
    }

    let result = envelope
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| AppError::Provider(format!("{}: empty chart result", symbol)))?;

    let tz = result
        .meta
        .exchange_timezone_name
        .as_deref()
        .and_then(|name| name.parse::<Tz>().ok());
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adjclose = result
        .indicators
        .adjclose
        .and_then(|a| a.into_iter().next())
        .map(|a| a.adjclose)
        .unwrap_or_default();

    let mut bars: Vec<PricePoint> = Vec::with_capacity(result.timestamp.len());
    for (i, ts) in result.timestamp.iter().enumerate() {
        let Some(close) = column(&quote.close, i) else {
            continue;
        };
        let Some(date) = session_date(*ts, tz, result.meta.gmtoffset) else {
            continue;
        };

        let bar = PricePoint {
            symbol: symbol.to_string(),
            date,
            open: column(&quote.open, i).unwrap_or(close),
            high: column(&quote.high, i).unwrap_or(close),
            low: column(&quote.low, i).unwrap_or(close),
            close,
            adjusted_close: column(&adjclose, i).unwrap_or(close),
            volume: column(&quote.volume, i).unwrap_or(0),
        };

        // Intraday snapshot of the current session can repeat the last date
        match bars.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => bars.push(bar),
        }
    }

    Ok(bars)
}

#[async_trait]
impl PriceProvider for YahooProvider {
    fn id(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch(&self, symbol: &str, period: &str) -> Result<Vec<PricePoint>> {
        check_period(period)?;
        info!("YahooProvider::fetch - {} ({})", symbol, period);

        let response = self
            .client
            .get(format!("{}/{}", self.base_url, symbol))
            .query(&[("range", period), ("interval", "1d"), ("events", "history")])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() && !body.contains("\"chart\"") {
            return Err(AppError::Provider(format!("{}: HTTP {}", symbol, status)));
        }

        let bars = parse_chart(symbol, &body)?;
        debug!("YahooProvider::fetch - {} bars for {}", bars.len(), symbol);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"currency": "EUR", "exchangeTimezoneName": "Europe/Madrid", "gmtoffset": 3600},
                "timestamp": [1704182400, 1704268800, 1704355200, 1704441600],
                "indicators": {
                    "quote": [{
                        "open":   [10000.0, 10050.0, null, 10100.0],
                        "high":   [10100.0, 10120.0, null, 10150.0],
                        "low":    [ 9950.0,  9990.0, null, 10020.0],
                        "close":  [10080.0, 10010.0, null, 10120.5],
                        "volume": [1200, null, null, 900]
                    }],
                    "adjclose": [{"adjclose": [10080.0, 10010.0, null, null]}]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_chart() {
        let bars = parse_chart("^IBEX", BODY).unwrap();
        assert_eq!(bars.len(), 3);

        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[0].volume, 1200);
        assert_eq!(bars[1].volume, 0);

        let last = &bars[2];
        assert_eq!(last.date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(last.adjusted_close, 10120.5);
        assert!(bars.iter().all(|b| b.symbol == "^IBEX"));
    }

    #[test]
    fn test_parse_chart_error() {
        let body = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let err = parse_chart("NOPE", body).unwrap_err();
        assert!(matches!(err, AppError::Provider(_)));
    }

    #[test]
    fn test_parse_chart_without_adjclose() {
        let body = r#"{"chart": {"result": [{
            "meta": {"gmtoffset": 0},
            "timestamp": [1704182400],
            "indicators": {"quote": [{"close": [5.0]}]}
        }], "error": null}}"#;
        let bars = parse_chart("X", body).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].adjusted_close, 5.0);
        assert_eq!(bars[0].open, 5.0);
    }
}
