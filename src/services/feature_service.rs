//! Feature Service
//!
//! Read-only accessor from the price store to feature rows. With an as-of
//! date the SQL query itself stops at that date, so no indicator window can
//! see a later bar.

use crate::db::sqlite::SqliteDb;
use crate::error::{AppError, Result};
use crate::features::{build_feature_rows, FeatureRow};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

/// Anything that can produce the feature table for a symbol
pub trait FeatureSource: Send + Sync {
    fn load_features(&self, symbol: &str, as_of_date: Option<NaiveDate>) -> Result<Vec<FeatureRow>>;
}

/// Feature service for business logic
pub struct FeatureService;

impl FeatureService {
    /// Load fully-formed feature rows, ascending by date
    ///
    /// Fails with `InsufficientHistory` when fewer than `min_history` rows
    /// survive warm-up, and with `NotFound` when the symbol has no prices.
    pub fn load_features(
        db: &SqliteDb,
        symbol: &str,
        as_of_date: Option<NaiveDate>,
        min_history: usize,
    ) -> Result<Vec<FeatureRow>> {
        let prices = db.load_prices(symbol, as_of_date)?;
        if prices.is_empty() && db.count_prices(symbol)? == 0 {
            return Err(AppError::NotFound(format!("No prices stored for {}", symbol)));
        }

        let rows = build_feature_rows(&prices);
        debug!(
            "FeatureService::load_features - {} as_of={:?} bars={} rows={}",
            symbol,
            as_of_date,
            prices.len(),
            rows.len()
        );

        if rows.len() < min_history {
            return Err(AppError::InsufficientHistory {
                symbol: symbol.to_string(),
                available: rows.len(),
                required: min_history,
            });
        }
        Ok(rows)
    }
}

/// [`FeatureSource`] backed by one store connection
pub struct StoreFeatureSource {
    db: Arc<SqliteDb>,
    min_history: usize,
}

impl StoreFeatureSource {
    pub fn new(db: Arc<SqliteDb>, min_history: usize) -> Self {
        Self { db, min_history }
    }
}

impl FeatureSource for StoreFeatureSource {
    fn load_features(&self, symbol: &str, as_of_date: Option<NaiveDate>) -> Result<Vec<FeatureRow>> {
        FeatureService::load_features(&self.db, symbol, as_of_date, self.min_history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::synthetic_prices;

    fn seeded_db(n: usize) -> (SqliteDb, Vec<crate::db::sqlite::models::PricePoint>) {
        let db = SqliteDb::open_in_memory().unwrap();
        let prices = synthetic_prices("^IBEX", NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(), n);
        db.upsert_prices(&prices).unwrap();
        (db, prices)
    }

    #[test]
    fn test_as_of_isolation() {
        let (db, prices) = seeded_db(150);
        let as_of = prices[129].date;

        let before = FeatureService::load_features(&db, "^IBEX", Some(as_of), 60).unwrap();

        // Append future bars and revise nothing before the cutoff
        let later = synthetic_prices("^IBEX", NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(), 200);
        db.upsert_prices(&later[150..]).unwrap();

        let after = FeatureService::load_features(&db, "^IBEX", Some(as_of), 60).unwrap();
        assert_eq!(
            serde_json::to_vec(&before).unwrap(),
            serde_json::to_vec(&after).unwrap()
        );
        assert_eq!(after.last().unwrap().date, as_of);
    }

    #[test]
    fn test_full_history_without_as_of() {
        let (db, prices) = seeded_db(120);
        let rows = FeatureService::load_features(&db, "^IBEX", None, 60).unwrap();
        assert_eq!(rows.last().unwrap().date, prices[119].date);
        assert!(rows.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_insufficient_history() {
        let (db, prices) = seeded_db(100);
        let err = FeatureService::load_features(&db, "^IBEX", Some(prices[80].date), 60).unwrap_err();
        match err {
            AppError::InsufficientHistory {
                available, required, ..
            } => {
                assert_eq!(available, 81 - 49);
                assert_eq!(required, 60);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unknown_symbol() {
        let (db, _) = seeded_db(10);
        let err = FeatureService::load_features(&db, "NOPE", None, 60).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
