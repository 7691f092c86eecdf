//! Live-mode fitted model cache

use super::Regressor;
use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::Arc;

/// A fitted model plus the metadata recorded at fit time
#[derive(Clone)]
pub struct CachedModel {
    pub model: Arc<dyn Regressor>,
    pub training_date: NaiveDate,
    pub n_samples: usize,
    pub mae: f64,
    pub rmse: f64,
}

/// Fitted models keyed by (symbol, model_name)
///
/// Only consulted when no as-of date is given.
#[derive(Default)]
pub struct ModelCache {
    entries: DashMap<(String, String), CachedModel>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str, model_name: &str) -> Option<CachedModel> {
        self.entries
            .get(&(symbol.to_string(), model_name.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn insert(&self, symbol: &str, model_name: &str, model: CachedModel) {
        self.entries
            .insert((symbol.to_string(), model_name.to_string()), model);
    }

    /// Drop every cached model of a symbol
    pub fn invalidate(&self, symbol: &str) {
        self.entries.retain(|(s, _), _| s != symbol);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
