//! Process configuration
//!
//! Read once from the environment. Pipeline tunables live in the `settings`
//! table instead.

use crate::error::{AppError, Result};
use chrono::NaiveDate;
use chrono_tz::Tz;
use std::path::PathBuf;

pub const ENV_DATA_DIR: &str = "MARKET_ENSEMBLE_DATA_DIR";
pub const ENV_DB: &str = "MARKET_ENSEMBLE_DB";
pub const ENV_TZ: &str = "MARKET_ENSEMBLE_TZ";

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_DB_FILE: &str = "market_ensemble.db";
const DEFAULT_TZ: Tz = chrono_tz::Europe::Madrid;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    /// Timezone that decides what "today" is
    pub market_tz: Tz,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = get(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let db_path = get(ENV_DB)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(DEFAULT_DB_FILE));
        let market_tz = match get(ENV_TZ) {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|e| AppError::Config(format!("{}={}: {}", ENV_TZ, name, e)))?,
            None => DEFAULT_TZ,
        };

        Ok(Self {
            data_dir,
            db_path,
            market_tz,
        })
    }

    /// Current calendar date in the market timezone
    pub fn today(&self) -> NaiveDate {
        chrono::Utc::now().with_timezone(&self.market_tz).date_naive()
    }
}
