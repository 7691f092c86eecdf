//! Indicator Service
//!
//! Persists the indicator columns, and the advanced set (MACD, Bollinger,
//! ADX, ATR, stochastic, OBV), for downstream readers. Feature loading never
//! reads these tables; it recomputes from prices.

use crate::db::sqlite::SqliteDb;
use crate::error::{AppError, Result};
use crate::features::{build_advanced_indicator_rows, build_indicator_rows};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Rows written by a full refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorCounts {
    pub indicators: usize,
    pub advanced: usize,
}

/// Indicator service for business logic
pub struct IndicatorService;

impl IndicatorService {
    /// Recompute indicators over the full stored series and upsert them
    pub fn refresh(db: &SqliteDb, symbol: &str) -> Result<usize> {
        let prices = db.load_prices(symbol, None)?;
        if prices.is_empty() {
            return Err(AppError::NotFound(format!("No prices stored for {}", symbol)));
        }

        let rows = build_indicator_rows(&prices);
        let written = db.upsert_indicators(&rows)?;
        info!(
            "IndicatorService::refresh - {} bars={} rows={}",
            symbol,
            prices.len(),
            written
        );
        Ok(written)
    }

    /// Recompute the advanced indicator set and upsert it
    pub fn refresh_advanced(db: &SqliteDb, symbol: &str) -> Result<usize> {
        let prices = db.load_prices(symbol, None)?;
        if prices.is_empty() {
            return Err(AppError::NotFound(format!("No prices stored for {}", symbol)));
        }

        let written = db.upsert_advanced_indicators(&build_advanced_indicator_rows(&prices))?;
        info!(
            "IndicatorService::refresh_advanced - {} rows={}",
            symbol, written
        );
        Ok(written)
    }

    /// Both indicator tables
    pub fn refresh_all(db: &SqliteDb, symbol: &str) -> Result<IndicatorCounts> {
        Ok(IndicatorCounts {
            indicators: Self::refresh(db, symbol)?,
            advanced: Self::refresh_advanced(db, symbol)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::synthetic_prices;
    use chrono::NaiveDate;

    #[test]
    fn test_refresh_skips_empty_rows() {
        let db = SqliteDb::open_in_memory().unwrap();
        let prices = synthetic_prices("^GSPC", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 60);
        db.upsert_prices(&prices).unwrap();

        // RSI 14 is the first column defined, on the 15th bar
        assert_eq!(IndicatorService::refresh(&db, "^GSPC").unwrap(), 46);

        let rows = db.load_indicators("^GSPC").unwrap();
        assert_eq!(rows.len(), 46);
        assert_eq!(rows[0].date, prices[14].date);
        assert!(rows[0].rsi_14.is_some());
        assert!(rows[0].sma_20.is_none());
        assert!(rows[5].sma_20.is_some());
        assert!(rows.last().unwrap().sma_50.is_some());

        // Re-running upserts in place
        IndicatorService::refresh(&db, "^GSPC").unwrap();
        assert_eq!(db.load_indicators("^GSPC").unwrap().len(), 46);
    }

    #[test]
    fn test_refresh_unknown_symbol() {
        let db = SqliteDb::open_in_memory().unwrap();
        assert!(matches!(
            IndicatorService::refresh(&db, "NOPE"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_refresh_all_writes_advanced_table() {
        let db = SqliteDb::open_in_memory().unwrap();
        let prices = synthetic_prices("^GSPC", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 60);
        db.upsert_prices(&prices).unwrap();

        let counts = IndicatorService::refresh_all(&db, "^GSPC").unwrap();
        assert_eq!(
            counts,
            IndicatorCounts {
                indicators: 46,
                advanced: 60
            }
        );

        let rows = db.load_advanced_indicators("^GSPC").unwrap();
        assert_eq!(rows.len(), 60);
        assert_eq!(rows[0].date, prices[0].date);
        assert!(rows[0].bb_middle.is_none());
        assert!(rows[59].adx.is_some());
        assert!(rows[59].stoch_k.unwrap() >= 0.0 && rows[59].stoch_k.unwrap() <= 100.0);

        IndicatorService::refresh_advanced(&db, "^GSPC").unwrap();
        assert_eq!(db.load_advanced_indicators("^GSPC").unwrap().len(), 60);
        assert!(matches!(
            IndicatorService::refresh_advanced(&db, "NOPE"),
            Err(AppError::NotFound(_))
        ));
    }
}
