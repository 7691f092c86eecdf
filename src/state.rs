//! Application state management

use crate::config::AppConfig;
use crate::db::sqlite::SqliteDb;
use crate::error::Result;
use crate::ml::{default_roster, ModelCache};
use crate::services::ensemble_service::EnsembleTrainer;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Application state shared by every command
pub struct AppState {
    /// SQLite database connection
    pub sqlite: Arc<SqliteDb>,

    /// Fitted live models keyed by (symbol, model)
    pub cache: Arc<ModelCache>,

    pub config: AppConfig,

    /// Set to stop long runs between dates
    cancel: Arc<AtomicBool>,
}

impl AppState {
    /// Create new application state
    pub fn new(config: AppConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Database: {:?}", config.db_path);
        let sqlite = Arc::new(SqliteDb::new(&config.db_path)?);

        Ok(Self::with_db(sqlite, config))
    }

    /// State over an already-open database
    pub fn with_db(sqlite: Arc<SqliteDb>, config: AppConfig) -> Self {
        Self {
            sqlite,
            cache: Arc::new(ModelCache::new()),
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trainer over the default roster sharing this state's model cache and
    /// the database model store
    pub fn trainer(&self, neutral_band: f64) -> EnsembleTrainer {
        EnsembleTrainer::new(default_roster(), self.cache.clone(), neutral_band)
            .with_store(self.sqlite.clone())
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Ask running backfills to stop after their current date
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Request cancellation once `signal` completes
    pub async fn cancel_on(&self, signal: impl Future<Output = ()>) {
        signal.await;
        tracing::warn!("Interrupt received, stopping after the current date");
        self.request_cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::from_lookup(|key| match key {
            crate::config::ENV_DATA_DIR => Some(dir.path().join("nested").display().to_string()),
            _ => None,
        })
        .unwrap();

        let state = AppState::new(config).unwrap();
        assert!(state.sqlite.path().unwrap().exists());
        assert_eq!(state.trainer(0.001).model_names().len(), 6);

        let flag = state.cancel_flag();
        state.request_cancel();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_on_signal() {
        let db = Arc::new(SqliteDb::open_in_memory().unwrap());
        let config = AppConfig::from_lookup(|_| None).unwrap();
        let state = AppState::with_db(db, config);
        let flag = state.cancel_flag();
        assert!(!flag.load(Ordering::SeqCst));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let waiter = {
            let flag = flag.clone();
            async move {
                state
                    .cancel_on(async {
                        let _ = rx.await;
                    })
                    .await;
                flag.load(Ordering::SeqCst)
            }
        };
        let handle = tokio::spawn(waiter);

        tokio::task::yield_now().await;
        assert!(!flag.load(Ordering::SeqCst));
        tx.send(()).unwrap();
        assert!(handle.await.unwrap());
    }
}
