//! SQLite database module

pub mod models;
mod connection;
mod migrations;
mod prices;
mod indicators;
mod predictions;
mod registry;
mod settings;

use crate::error::Result;
use chrono::NaiveDate;
use models::*;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// SQLite database wrapper
///
/// Each instance owns exactly one connection. Workers that run in parallel
/// open their own instance against the same file.
pub struct SqliteDb {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteDb {
    /// Create new SQLite database connection
    pub fn new(path: &Path) -> Result<Self> {
        let conn = connection::create_connection(path)?;

        let db = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };

        // Run migrations
        db.run_migrations()?;

        Ok(db)
    }

    /// Private in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// File path, if this database is file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        migrations::run_migrations(&conn)
    }

    // ========== Price Methods ==========

    /// Upsert price bars
    pub fn upsert_prices(&self, prices: &[PricePoint]) -> Result<usize> {
        let mut conn = self.conn.lock();
        prices::upsert_prices(&mut conn, prices)
    }

    /// Load bars for a symbol, cut at `as_of` when given
    pub fn load_prices(&self, symbol: &str, as_of: Option<NaiveDate>) -> Result<Vec<PricePoint>> {
        let conn = self.conn.lock();
        prices::load_prices(&conn, symbol, as_of)
    }

    /// Stored trading sessions within [start, end]
    pub fn session_dates(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        let conn = self.conn.lock();
        prices::session_dates(&conn, symbol, start, end)
    }

    /// Number of stored bars for a symbol
    pub fn count_prices(&self, symbol: &str) -> Result<i64> {
        let conn = self.conn.lock();
        prices::count_prices(&conn, symbol)
    }

    /// Close of every symbol on a date
    pub fn closes_on(&self, date: NaiveDate) -> Result<Vec<(String, f64)>> {
        let conn = self.conn.lock();
        prices::closes_on(&conn, date)
    }

    /// Latest close strictly before a date
    pub fn previous_close(&self, symbol: &str, date: NaiveDate) -> Result<Option<f64>> {
        let conn = self.conn.lock();
        prices::previous_close(&conn, symbol, date)
    }

    /// Symbols with stored prices
    pub fn list_symbols(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        prices::list_symbols(&conn)
    }

    // ========== Indicator / Signal Methods ==========

    /// Upsert indicator rows
    pub fn upsert_indicators(&self, rows: &[IndicatorRow]) -> Result<usize> {
        let mut conn = self.conn.lock();
        indicators::upsert_indicators(&mut conn, rows)
    }

    /// Load stored indicator rows
    pub fn load_indicators(&self, symbol: &str) -> Result<Vec<IndicatorRow>> {
        let conn = self.conn.lock();
        indicators::load_indicators(&conn, symbol)
    }

    /// Upsert advanced indicator rows
    pub fn upsert_advanced_indicators(&self, rows: &[AdvancedIndicatorRow]) -> Result<usize> {
        let mut conn = self.conn.lock();
        indicators::upsert_advanced_indicators(&mut conn, rows)
    }

    /// Load stored advanced indicator rows
    pub fn load_advanced_indicators(&self, symbol: &str) -> Result<Vec<AdvancedIndicatorRow>> {
        let conn = self.conn.lock();
        indicators::load_advanced_indicators(&conn, symbol)
    }

    /// Upsert rule-signal rows
    pub fn upsert_signals(&self, rows: &[SignalRow]) -> Result<usize> {
        let mut conn = self.conn.lock();
        indicators::upsert_signals(&mut conn, rows)
    }

    /// Latest rule signal
    pub fn latest_signal(&self, symbol: &str) -> Result<Option<SignalRow>> {
        let conn = self.conn.lock();
        indicators::latest_signal(&conn, symbol)
    }

    // ========== Prediction Methods ==========

    /// Insert one atomic batch of predictions
    pub fn insert_predictions(
        &self,
        symbol: &str,
        prediction_date: NaiveDate,
        run_date: NaiveDate,
        as_of_date: Option<NaiveDate>,
        predictions: &[NewPrediction],
    ) -> Result<usize> {
        let mut conn = self.conn.lock();
        predictions::insert_predictions(
            &mut conn,
            symbol,
            prediction_date,
            run_date,
            as_of_date,
            predictions,
        )
    }

    /// Unvalidated predictions for a date
    pub fn pending_predictions(
        &self,
        date: NaiveDate,
        symbol: Option<&str>,
    ) -> Result<Vec<PredictionRecord>> {
        let conn = self.conn.lock();
        predictions::pending_for_date(&conn, date, symbol)
    }

    /// Write the realized value for one prediction
    pub fn set_prediction_outcome(&self, id: i64, true_value: f64) -> Result<bool> {
        let conn = self.conn.lock();
        predictions::set_outcome(&conn, id, true_value)
    }

    /// Validated predictions for a date
    pub fn validated_predictions(
        &self,
        date: NaiveDate,
        symbol: Option<&str>,
    ) -> Result<Vec<PredictionRecord>> {
        let conn = self.conn.lock();
        predictions::validated_for_date(&conn, date, symbol)
    }

    /// Validated predictions within a date range
    pub fn validated_between(
        &self,
        symbol: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<PredictionRecord>> {
        let conn = self.conn.lock();
        predictions::validated_between(&conn, symbol, start, end)
    }

    /// Most recent predictions for a symbol
    pub fn list_predictions(&self, symbol: &str, limit: usize) -> Result<Vec<PredictionRecord>> {
        let conn = self.conn.lock();
        predictions::list_for_symbol(&conn, symbol, limit)
    }

    /// Prediction row count for a symbol
    pub fn count_predictions(&self, symbol: &str) -> Result<i64> {
        let conn = self.conn.lock();
        predictions::count_for_symbol(&conn, symbol)
    }

    // ========== Model Registry Methods ==========

    /// Record fit metadata
    pub fn record_model_fit(&self, entry: &ModelRegistryEntry) -> Result<()> {
        let conn = self.conn.lock();
        registry::record_fit(&conn, entry)
    }

    /// Fit metadata for a symbol
    pub fn list_model_fits(&self, symbol: &str) -> Result<Vec<ModelRegistryEntry>> {
        let conn = self.conn.lock();
        registry::list_fits(&conn, symbol)
    }

    /// Save a fitted model version
    pub fn save_model(&self, model: &StoredModel) -> Result<()> {
        let conn = self.conn.lock();
        registry::save_model(&conn, model)
    }

    /// Newest saved version of a model
    pub fn load_latest_model(&self, symbol: &str, model_name: &str) -> Result<Option<StoredModel>> {
        let conn = self.conn.lock();
        registry::load_latest_model(&conn, symbol, model_name)
    }

    /// Keep the `keep` newest versions of each model of a symbol
    pub fn prune_models(&self, symbol: &str, keep: usize) -> Result<usize> {
        let conn = self.conn.lock();
        registry::prune_models(&conn, symbol, keep)
    }

    /// Drop every saved model of a symbol
    pub fn delete_models(&self, symbol: &str) -> Result<usize> {
        let conn = self.conn.lock();
        registry::delete_models(&conn, symbol)
    }

    // ========== Settings Methods ==========

    /// Get settings
    pub fn get_settings(&self) -> Result<PipelineSettings> {
        let conn = self.conn.lock();
        settings::get_settings(&conn)
    }

    /// Update settings
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<PipelineSettings> {
        let conn = self.conn.lock();
        settings::update_settings(&conn, update)
    }
}
