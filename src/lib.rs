//! Market Ensemble - daily market data pipeline
//!
//! Ingests OHLCV bars, derives indicators, trains an ensemble of regressors
//! that vote on the next session's direction, backfills historical
//! predictions without look-ahead, and validates them once prices are known.

pub mod assets;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ml;
pub mod providers;
pub mod services;
pub mod state;
pub mod voting;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
///
/// `RUST_LOG` overrides the default filter. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_ensemble=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
