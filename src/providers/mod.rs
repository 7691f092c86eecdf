//! Market data providers

pub mod yahoo;

use crate::db::sqlite::models::PricePoint;
use crate::error::{AppError, Result};
use async_trait::async_trait;

pub use yahoo::YahooProvider;

/// Lookback windows a provider accepts
pub const PERIODS: [&str; 10] = ["1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "max"];

/// Reject periods outside [`PERIODS`]
pub fn check_period(period: &str) -> Result<()> {
    if PERIODS.contains(&period) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Unsupported period '{}', expected one of {}",
            period,
            PERIODS.join(",")
        )))
    }
}

/// Source of daily OHLCV bars
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Provider ID (e.g., "yahoo")
    fn id(&self) -> &'static str;

    /// Daily bars for `symbol` over `period`, ascending by date
    async fn fetch(&self, symbol: &str, period: &str) -> Result<Vec<PricePoint>>;
}
