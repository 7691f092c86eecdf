//! SQLite database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Run all database migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    // Create migrations table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    // Run each migration
    run_migration(conn, "001_prices", CREATE_PRICES_TABLE)?;
    run_migration(conn, "002_indicators", CREATE_INDICATORS_TABLE)?;
    run_migration(conn, "003_signals", CREATE_SIGNALS_TABLE)?;
    run_migration(conn, "004_ml_predictions", CREATE_ML_PREDICTIONS_TABLE)?;
    run_migration(conn, "005_settings", CREATE_SETTINGS_TABLE)?;
    run_migration(conn, "006_model_registry", CREATE_MODEL_REGISTRY_TABLE)?;
    run_migration(conn, "007_retrain_thresholds", ADD_RETRAIN_THRESHOLDS)?;
    run_migration(conn, "008_model_store", CREATE_MODEL_STORE_TABLE)?;
    run_migration(conn, "009_advanced_indicators", CREATE_ADVANCED_INDICATORS_TABLE)?;

    tracing::debug!("Database migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    // Check if migration already applied
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("Running migration: {}", name);
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    }

    Ok(())
}

const CREATE_PRICES_TABLE: &str = r#"
CREATE TABLE prices (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    adjusted_close REAL NOT NULL,
    volume INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (symbol, date)
);
CREATE INDEX IF NOT EXISTS idx_prices_date ON prices(date);
"#;

const CREATE_INDICATORS_TABLE: &str = r#"
CREATE TABLE indicators (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    sma_20 REAL,
    sma_50 REAL,
    vol_20 REAL,
    rsi_14 REAL,
    PRIMARY KEY (symbol, date)
);
"#;

const CREATE_SIGNALS_TABLE: &str = r#"
CREATE TABLE signals (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    signal_simple INTEGER NOT NULL,
    signal_ensemble INTEGER NOT NULL,
    model_best TEXT,
    PRIMARY KEY (symbol, date)
);
"#;

/// The UNIQUE key is the only guard against duplicate prediction rows under
/// retries; writers rely on it failing rather than checking first.
const CREATE_ML_PREDICTIONS_TABLE: &str = r#"
CREATE TABLE ml_predictions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    prediction_date TEXT NOT NULL,
    run_date TEXT NOT NULL,
    as_of_date TEXT,
    model_name TEXT NOT NULL,
    predicted_value REAL,
    predicted_signal INTEGER,
    true_value REAL,
    absolute_error REAL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (symbol, prediction_date, model_name, run_date)
);
CREATE INDEX IF NOT EXISTS idx_ml_predictions_date ON ml_predictions(prediction_date);
CREATE INDEX IF NOT EXISTS idx_ml_predictions_symbol ON ml_predictions(symbol, prediction_date);
"#;

const CREATE_SETTINGS_TABLE: &str = r#"
CREATE TABLE settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    min_history INTEGER NOT NULL DEFAULT 60,
    neutral_band REAL NOT NULL DEFAULT 0.001,
    default_period TEXT NOT NULL DEFAULT '1mo',
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
INSERT OR IGNORE INTO settings (id) VALUES (1);
"#;

const CREATE_MODEL_REGISTRY_TABLE: &str = r#"
CREATE TABLE model_registry (
    symbol TEXT NOT NULL,
    model_name TEXT NOT NULL,
    training_date TEXT NOT NULL,
    n_samples INTEGER NOT NULL,
    mae REAL NOT NULL,
    rmse REAL NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (symbol, model_name)
);
"#;

/// Thresholds used by the model performance report
const ADD_RETRAIN_THRESHOLDS: &str = r#"
ALTER TABLE settings ADD COLUMN mae_retrain_threshold REAL NOT NULL DEFAULT 200.0;
ALTER TABLE settings ADD COLUMN std_retrain_threshold REAL NOT NULL DEFAULT 150.0;
ALTER TABLE settings ADD COLUMN buy_accuracy_retrain_threshold REAL NOT NULL DEFAULT 40.0;
"#;

/// Fitted model versions, one per (symbol, model, training date)
const CREATE_MODEL_STORE_TABLE: &str = r#"
CREATE TABLE model_store (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    model_name TEXT NOT NULL,
    training_date TEXT NOT NULL,
    n_samples INTEGER NOT NULL,
    mae REAL NOT NULL,
    rmse REAL NOT NULL,
    payload TEXT NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (symbol, model_name, training_date)
);
"#;

const CREATE_ADVANCED_INDICATORS_TABLE: &str = r#"
CREATE TABLE advanced_indicators (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    macd REAL,
    macd_signal REAL,
    macd_histogram REAL,
    bb_middle REAL,
    bb_upper REAL,
    bb_lower REAL,
    bb_width REAL,
    bb_percent REAL,
    adx REAL,
    plus_di REAL,
    minus_di REAL,
    atr REAL,
    stoch_k REAL,
    stoch_d REAL,
    obv REAL,
    ema_12 REAL,
    ema_26 REAL,
    ema_200 REAL,
    PRIMARY KEY (symbol, date)
);
"#;
