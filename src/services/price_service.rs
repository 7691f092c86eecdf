//! Price Service
//!
//! Pulls daily bars from a provider into the price store.

use crate::db::sqlite::SqliteDb;
use crate::error::Result;
use crate::providers::{check_period, PriceProvider};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Result of one refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdateResult {
    pub symbol: String,
    pub period: String,
    pub provider: String,
    pub rows_upserted: usize,
    pub first_date: Option<chrono::NaiveDate>,
    pub last_date: Option<chrono::NaiveDate>,
}

/// Price service for business logic
pub struct PriceService;

impl PriceService {
    /// Fetch `period` of bars for `symbol` and upsert them
    ///
    /// Existing sessions are overwritten with the provider's latest values.
    pub async fn update_prices(
        db: &SqliteDb,
        provider: &dyn PriceProvider,
        symbol: &str,
        period: &str,
    ) -> Result<PriceUpdateResult> {
        check_period(period)?;
        info!(
            "PriceService::update_prices - {} ({}) via {}",
            symbol,
            period,
            provider.id()
        );

        let bars = provider.fetch(symbol, period).await?;
        if bars.is_empty() {
            warn!("No bars returned for {} ({})", symbol, period);
        }

        let rows_upserted = db.upsert_prices(&bars)?;

        Ok(PriceUpdateResult {
            symbol: symbol.to_string(),
            period: period.to_string(),
            provider: provider.id().to_string(),
            rows_upserted,
            first_date: bars.first().map(|b| b.date),
            last_date: bars.last().map(|b| b.date),
        })
    }
}
