//! Ensemble Service
//!
//! Trains the model roster on a feature table and turns each model's
//! next-session forecast into a directional signal. Live predictions reuse
//! cached fits, or the newest version in the model store when the process
//! cache is cold; as-of predictions always fit from scratch.

use crate::db::sqlite::models::{ModelRegistryEntry, NewPrediction, StoredModel};
use crate::db::sqlite::SqliteDb;
use crate::error::{AppError, Result};
use crate::features::FeatureRow;
use crate::ml::{metrics, CachedModel, ModelCache, ModelSpec, Regressor, SavedModel, TrainingSet};
use crate::services::feature_service::FeatureService;
use crate::state::AppState;
use crate::voting::{self, EnsembleVote};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Model name of the aggregate row
pub const ENSEMBLE_MODEL: &str = "ensemble";

/// Saved versions kept per (symbol, model)
pub const KEEP_MODEL_VERSIONS: usize = 5;

/// One model's forecast for the next session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOutcome {
    pub model_name: String,
    pub predicted_value: f64,
    pub predicted_signal: i8,
    pub from_cache: bool,
}

/// A model left out of the vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelExclusion {
    pub model_name: String,
    pub reason: String,
}

/// Metadata of a fit performed during this call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitSummary {
    pub model_name: String,
    pub n_samples: usize,
    pub mae: f64,
    pub rmse: f64,
}

/// Output of one training/prediction pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub symbol: String,
    pub as_of_date: Option<NaiveDate>,
    /// Last session in the feature table
    pub session_date: NaiveDate,
    pub last_close: f64,
    pub predictions: Vec<ModelOutcome>,
    pub excluded: Vec<ModelExclusion>,
    pub fits: Vec<FitSummary>,
}

impl EnsemblePrediction {
    /// Majority vote over the surviving models
    pub fn vote(&self) -> EnsembleVote {
        voting::aggregate(
            self.predictions
                .iter()
                .map(|p| (p.model_name.as_str(), p.predicted_signal)),
        )
    }

    /// Mean forecast of the surviving models
    pub fn mean_prediction(&self) -> Option<f64> {
        if self.predictions.is_empty() {
            return None;
        }
        let sum: f64 = self.predictions.iter().map(|p| p.predicted_value).sum();
        Some(sum / self.predictions.len() as f64)
    }

    /// Per-model rows plus the aggregate row, ready to persist
    pub fn to_records(&self, vote: &EnsembleVote) -> Vec<NewPrediction> {
        let mut rows: Vec<NewPrediction> = self
            .predictions
            .iter()
            .map(|p| NewPrediction {
                model_name: p.model_name.clone(),
                predicted_value: Some(p.predicted_value),
                predicted_signal: p.predicted_signal,
            })
            .collect();
        rows.push(NewPrediction {
            model_name: ENSEMBLE_MODEL.to_string(),
            predicted_value: self.mean_prediction(),
            predicted_signal: vote.final_signal,
        });
        rows
    }
}

/// Map a forecast to {+1, 0, -1} against the last close
///
/// Moves within `neutral_band * last_close` of the last close are a HOLD.
pub fn quantize(predicted: f64, last_close: f64, neutral_band: f64) -> i8 {
    let band = neutral_band.abs() * last_close.abs();
    let diff = predicted - last_close;
    if diff > band {
        1
    } else if diff < -band {
        -1
    } else {
        0
    }
}

/// First weekday after `date`
pub fn next_session(date: NaiveDate) -> NaiveDate {
    let mut next = date + Duration::days(1);
    while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
        next += Duration::days(1);
    }
    next
}

/// Fits the roster and predicts the session after the last feature row
pub struct EnsembleTrainer {
    roster: Vec<ModelSpec>,
    cache: Arc<ModelCache>,
    /// Second cache level that outlives the process
    store: Option<Arc<SqliteDb>>,
    neutral_band: f64,
}

impl EnsembleTrainer {
    pub fn new(roster: Vec<ModelSpec>, cache: Arc<ModelCache>, neutral_band: f64) -> Self {
        Self {
            roster,
            cache,
            store: None,
            neutral_band,
        }
    }

    /// Load live fits from, and save them to, the database model store
    pub fn with_store(mut self, db: Arc<SqliteDb>) -> Self {
        self.store = Some(db);
        self
    }

    pub fn model_names(&self) -> Vec<String> {
        self.roster.iter().map(|s| s.name.clone()).collect()
    }

    /// Train (or reuse) every model and predict the next session
    ///
    /// With `as_of_date` set the cache is neither read nor written. Without it
    /// a cached fit is reused unless `force_retrain` is set.
    pub fn train_and_predict(
        &self,
        feature_rows: &[FeatureRow],
        as_of_date: Option<NaiveDate>,
        force_retrain: bool,
    ) -> Result<EnsemblePrediction> {
        let last = feature_rows
            .last()
            .ok_or_else(|| AppError::Validation("empty feature table".to_string()))?;
        let symbol = last.symbol.clone();
        let data = TrainingSet::from_rows(feature_rows)?;
        let live = as_of_date.is_none();

        let mut predictions = Vec::with_capacity(self.roster.len());
        let mut excluded = Vec::new();
        let mut fits = Vec::new();

        for spec in &self.roster {
            let cached = if live && !force_retrain {
                self.reusable_fit(&symbol, &spec.name)
            } else {
                None
            };

            let outcome = match cached {
                Some(entry) => entry
                    .model
                    .predict(data.query.view())
                    .map(|value| (value, true)),
                None => self
                    .fit_one(&symbol, spec, &data, live, last.date)
                    .map(|(value, fit)| {
                        if let Some(fit) = fit {
                            fits.push(fit);
                        }
                        (value, false)
                    }),
            };

            match outcome {
                Ok((value, from_cache)) => {
                    let signal = quantize(value, data.last_close(), self.neutral_band);
                    debug!(
                        "{} {} -> {:.4} (signal {}, cached {})",
                        symbol, spec.name, value, signal, from_cache
                    );
                    predictions.push(ModelOutcome {
                        model_name: spec.name.clone(),
                        predicted_value: value,
                        predicted_signal: signal,
                        from_cache,
                    });
                }
                Err(e) if e.is_per_date() => {
                    warn!("Excluding {} for {}: {}", spec.name, symbol, e);
                    excluded.push(ModelExclusion {
                        model_name: spec.name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(EnsemblePrediction {
            symbol,
            as_of_date,
            session_date: last.date,
            last_close: data.last_close(),
            predictions,
            excluded,
            fits,
        })
    }

    /// Cached fit, falling back to the newest stored version
    fn reusable_fit(&self, symbol: &str, model_name: &str) -> Option<CachedModel> {
        if let Some(entry) = self.cache.get(symbol, model_name) {
            return Some(entry);
        }
        let store = self.store.as_ref()?;

        let stored = match store.load_latest_model(symbol, model_name) {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                warn!("Model store lookup failed for {} {}: {}", symbol, model_name, e);
                return None;
            }
        };
        let model = match SavedModel::from_json(&stored.payload) {
            Ok(saved) => saved.into_regressor(),
            Err(e) => {
                warn!("Unreadable stored {} for {}: {}", model_name, symbol, e);
                return None;
            }
        };

        debug!(
            "Loaded {} for {} trained {}",
            model_name, symbol, stored.training_date
        );
        let entry = CachedModel {
            model,
            training_date: stored.training_date,
            n_samples: stored.n_samples,
            mae: stored.mae,
            rmse: stored.rmse,
        };
        self.cache.insert(symbol, model_name, entry.clone());
        Some(entry)
    }

    /// Write a live fit to the store and drop old versions
    ///
    /// Failures are logged; the in-process fit is still used.
    fn save_fit(
        &self,
        symbol: &str,
        model_name: &str,
        model: &dyn Regressor,
        training_date: NaiveDate,
        summary: &FitSummary,
    ) {
        let (Some(store), Some(saved)) = (self.store.as_ref(), model.snapshot()) else {
            return;
        };
        let result = saved.to_json().and_then(|payload| {
            store.save_model(&StoredModel {
                symbol: symbol.to_string(),
                model_name: model_name.to_string(),
                training_date,
                n_samples: summary.n_samples,
                mae: summary.mae,
                rmse: summary.rmse,
                payload,
            })?;
            store.prune_models(symbol, KEEP_MODEL_VERSIONS)
        });
        match result {
            Ok(pruned) if pruned > 0 => {
                debug!("Pruned {} old model versions for {}", pruned, symbol)
            }
            Ok(_) => {}
            Err(e) => warn!("Could not save {} for {}: {}", model_name, symbol, e),
        }
    }

    /// Fit a fresh instance; in live mode also score it in-sample and cache it
    fn fit_one(
        &self,
        symbol: &str,
        spec: &ModelSpec,
        data: &TrainingSet,
        live: bool,
        training_date: NaiveDate,
    ) -> Result<(f64, Option<FitSummary>)> {
        let mut model: Box<dyn Regressor> = spec.build();
        model.fit(data)?;
        let value = model.predict(data.query.view())?;

        if !live {
            return Ok((value, None));
        }

        let fitted = model.fitted_values(data)?;
        let y = data.y.to_vec();
        let summary = FitSummary {
            model_name: spec.name.clone(),
            n_samples: data.n_samples(),
            mae: metrics::mae(&y, &fitted),
            rmse: metrics::rmse(&y, &fitted),
        };

        self.save_fit(symbol, &spec.name, model.as_ref(), training_date, &summary);
        self.cache.insert(
            symbol,
            &spec.name,
            CachedModel {
                model: Arc::from(model),
                training_date,
                n_samples: summary.n_samples,
                mae: summary.mae,
                rmse: summary.rmse,
            },
        );
        Ok((value, Some(summary)))
    }
}

/// Result of a live prediction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePredictionResult {
    pub symbol: String,
    pub run_date: NaiveDate,
    pub prediction_date: NaiveDate,
    pub last_close: f64,
    pub vote: EnsembleVote,
    pub prediction: EnsemblePrediction,
    pub rows_written: usize,
}

/// Ensemble service for business logic
pub struct EnsembleService;

impl EnsembleService {
    /// Predict the next session from full history and persist it under
    /// today's run date
    pub fn predict_live(
        state: &AppState,
        symbol: &str,
        force_retrain: bool,
    ) -> Result<LivePredictionResult> {
        info!(
            "EnsembleService::predict_live - {} force_retrain={}",
            symbol, force_retrain
        );

        let settings = state.sqlite.get_settings()?;
        let rows = FeatureService::load_features(&state.sqlite, symbol, None, settings.min_history)?;
        let trainer = state.trainer(settings.neutral_band);
        let prediction = trainer.train_and_predict(&rows, None, force_retrain)?;

        for fit in &prediction.fits {
            state.sqlite.record_model_fit(&ModelRegistryEntry {
                symbol: symbol.to_string(),
                model_name: fit.model_name.clone(),
                training_date: prediction.session_date,
                n_samples: fit.n_samples,
                mae: fit.mae,
                rmse: fit.rmse,
                saved_at: String::new(),
            })?;
        }

        let vote = prediction.vote();
        let run_date = state.config.today();
        let prediction_date = next_session(prediction.session_date);
        let rows_written = state.sqlite.insert_predictions(
            symbol,
            prediction_date,
            run_date,
            None,
            &prediction.to_records(&vote),
        )?;

        info!(
            "EnsembleService::predict_live - {} {} signal={} consensus={:.2}",
            symbol, prediction_date, vote.final_signal, vote.consensus
        );

        Ok(LivePredictionResult {
            symbol: symbol.to_string(),
            run_date,
            prediction_date,
            last_close: prediction.last_close,
            vote,
            prediction,
            rows_written,
        })
    }

    /// Latest fit metadata for every model of a symbol
    pub fn model_info(state: &AppState, symbol: &str) -> Result<Vec<ModelRegistryEntry>> {
        info!("EnsembleService::model_info - {}", symbol);
        state.sqlite.list_model_fits(symbol)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::{build_feature_rows, synthetic_prices};
    use crate::ml::default_roster;
    use ndarray::ArrayView1;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Predicts the last close plus a fixed offset and counts fits
    pub struct CountingModel {
        pub fits: Arc<AtomicUsize>,
        pub offset: f64,
        last_close: f64,
    }

    impl Regressor for CountingModel {
        fn fit(&mut self, data: &TrainingSet) -> Result<()> {
            self.fits.fetch_add(1, Ordering::SeqCst);
            self.last_close = data.last_close();
            Ok(())
        }

        fn predict(&self, _features: ArrayView1<f64>) -> Result<f64> {
            Ok(self.last_close + self.offset)
        }
    }

    /// Always fails to fit
    pub struct BrokenModel;

    impl Regressor for BrokenModel {
        fn fit(&mut self, _data: &TrainingSet) -> Result<()> {
            Err(AppError::model_fit("Broken", "did not converge"))
        }

        fn predict(&self, _features: ArrayView1<f64>) -> Result<f64> {
            Err(AppError::model_fit("Broken", "not fitted"))
        }
    }

    pub fn counting_spec(name: &str, offset: f64, fits: Arc<AtomicUsize>) -> ModelSpec {
        ModelSpec::new(name, move || {
            Box::new(CountingModel {
                fits: fits.clone(),
                offset,
                last_close: 0.0,
            })
        })
    }

    fn rows() -> Vec<FeatureRow> {
        let prices = synthetic_prices("^IBEX", NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(), 130);
        build_feature_rows(&prices)
    }

    #[test]
    fn test_quantize_band() {
        assert_eq!(quantize(100.05, 100.0, 0.001), 0);
        assert_eq!(quantize(100.2, 100.0, 0.001), 1);
        assert_eq!(quantize(99.8, 100.0, 0.001), -1);
        assert_eq!(quantize(100.1, 100.0, 0.001), 0);
    }

    #[test]
    fn test_next_session_skips_weekend() {
        let friday = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
        assert_eq!(next_session(friday), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        let monday = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        assert_eq!(next_session(monday), NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
    }

    #[test]
    fn test_as_of_always_refits() {
        let fits = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(ModelCache::new());
        let trainer = EnsembleTrainer::new(
            vec![counting_spec("Counter", 1.0, fits.clone())],
            cache.clone(),
            0.001,
        );
        let rows = rows();
        let as_of = rows.last().unwrap().date;

        // Warm the cache in live mode first
        trainer.train_and_predict(&rows, None, false).unwrap();
        assert_eq!(fits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        trainer.train_and_predict(&rows, Some(as_of), false).unwrap();
        trainer.train_and_predict(&rows, Some(as_of), false).unwrap();
        assert_eq!(fits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_live_reuses_cache_unless_forced() {
        let fits = Arc::new(AtomicUsize::new(0));
        let trainer = EnsembleTrainer::new(
            vec![counting_spec("Counter", 1.0, fits.clone())],
            Arc::new(ModelCache::new()),
            0.001,
        );
        let rows = rows();

        let first = trainer.train_and_predict(&rows, None, false).unwrap();
        let second = trainer.train_and_predict(&rows, None, false).unwrap();
        assert_eq!(fits.load(Ordering::SeqCst), 1);
        assert!(!first.predictions[0].from_cache);
        assert!(second.predictions[0].from_cache);
        assert_eq!(first.fits.len(), 1);
        assert!(second.fits.is_empty());

        trainer.train_and_predict(&rows, None, true).unwrap();
        assert_eq!(fits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failing_model_is_excluded() {
        let fits = Arc::new(AtomicUsize::new(0));
        let trainer = EnsembleTrainer::new(
            vec![
                counting_spec("Up", 5.0, fits.clone()),
                ModelSpec::new("Broken", || Box::new(BrokenModel)),
                counting_spec("Down", -5.0, fits.clone()),
            ],
            Arc::new(ModelCache::new()),
            0.001,
        );
        let rows = rows();

        let result = trainer
            .train_and_predict(&rows, Some(rows.last().unwrap().date), false)
            .unwrap();
        assert_eq!(result.predictions.len(), 2);
        assert_eq!(result.excluded.len(), 1);
        assert_eq!(result.excluded[0].model_name, "Broken");
        assert_eq!(result.predictions[0].predicted_signal, 1);
        assert_eq!(result.predictions[1].predicted_signal, -1);

        let vote = result.vote();
        assert_eq!(vote.final_signal, 0);
        let records = result.to_records(&vote);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].model_name, ENSEMBLE_MODEL);
        assert!((records[2].predicted_value.unwrap() - result.last_close).abs() < 1e-9);
    }

    #[test]
    fn test_default_roster_predicts() {
        let trainer = EnsembleTrainer::new(
            default_roster(),
            Arc::new(ModelCache::new()),
            0.001,
        );
        let rows = rows();
        let result = trainer
            .train_and_predict(&rows, Some(rows.last().unwrap().date), false)
            .unwrap();
        assert_eq!(result.predictions.len() + result.excluded.len(), 6);
        assert!(result.predictions.iter().all(|p| p.predicted_value.is_finite()));
    }

    #[test]
    fn test_cold_cache_reuses_stored_fits() {
        let db = Arc::new(crate::db::sqlite::SqliteDb::open_in_memory().unwrap());
        let rows = rows();

        let first = EnsembleTrainer::new(default_roster(), Arc::new(ModelCache::new()), 0.001)
            .with_store(db.clone());
        let fitted = first.train_and_predict(&rows, None, false).unwrap();
        assert!(!fitted.predictions.is_empty());
        assert!(fitted.predictions.iter().all(|p| !p.from_cache));

        // A new process starts with an empty cache over the same database
        let second = EnsembleTrainer::new(default_roster(), Arc::new(ModelCache::new()), 0.001)
            .with_store(db.clone());
        let reused = second.train_and_predict(&rows, None, false).unwrap();
        assert!(reused.fits.is_empty());
        assert_eq!(reused.predictions.len(), fitted.predictions.len());
        for (a, b) in fitted.predictions.iter().zip(&reused.predictions) {
            assert!(b.from_cache, "{} was refitted", b.model_name);
            assert_eq!(a.model_name, b.model_name);
            assert!((a.predicted_value - b.predicted_value).abs() <= 1e-9 * a.predicted_value.abs());
        }

        let forced = second.train_and_predict(&rows, None, true).unwrap();
        assert!(forced.predictions.iter().all(|p| !p.from_cache));
    }

    #[test]
    fn test_as_of_fits_are_not_stored() {
        let db = Arc::new(crate::db::sqlite::SqliteDb::open_in_memory().unwrap());
        let rows = rows();
        let as_of = rows.last().unwrap().date;
        let trainer = EnsembleTrainer::new(default_roster(), Arc::new(ModelCache::new()), 0.001)
            .with_store(db.clone());

        trainer.train_and_predict(&rows, Some(as_of), false).unwrap();
        for name in trainer.model_names() {
            assert!(db.load_latest_model("^IBEX", &name).unwrap().is_none());
        }
    }

    #[test]
    fn test_unreadable_stored_model_is_refitted() {
        let db = Arc::new(crate::db::sqlite::SqliteDb::open_in_memory().unwrap());
        let rows = rows();
        db.save_model(&StoredModel {
            symbol: "^IBEX".to_string(),
            model_name: "LinearRegression".to_string(),
            training_date: rows.last().unwrap().date,
            n_samples: 1,
            mae: 0.0,
            rmse: 0.0,
            payload: "not json".to_string(),
        })
        .unwrap();

        let trainer = EnsembleTrainer::new(
            vec![ModelSpec::new("LinearRegression", || {
                Box::new(crate::ml::LinearRegression::default())
            })],
            Arc::new(ModelCache::new()),
            0.001,
        )
        .with_store(db.clone());
        let prediction = trainer.train_and_predict(&rows, None, false).unwrap();

        assert!(!prediction.predictions[0].from_cache);
        let saved = db.load_latest_model("^IBEX", "LinearRegression").unwrap().unwrap();
        assert!(SavedModel::from_json(&saved.payload).is_ok());
    }

    fn live_state(n: usize) -> AppState {
        let db = Arc::new(crate::db::sqlite::SqliteDb::open_in_memory().unwrap());
        let prices = synthetic_prices("^IBEX", NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(), n);
        db.upsert_prices(&prices).unwrap();
        let config = crate::config::AppConfig::from_lookup(|_| None).unwrap();
        AppState::with_db(db, config)
    }

    #[test]
    fn test_predict_live_persists_and_registers() {
        let state = live_state(130);
        let result = EnsembleService::predict_live(&state, "^IBEX", false).unwrap();

        assert_eq!(result.rows_written, result.prediction.predictions.len() + 1);
        assert_eq!(result.run_date, state.config.today());
        assert!(result.prediction.as_of_date.is_none());
        assert_eq!(result.prediction_date, next_session(result.prediction.session_date));

        let stored = state.sqlite.list_predictions("^IBEX", 100).unwrap();
        assert_eq!(stored.len(), result.rows_written);
        assert!(stored.iter().all(|r| r.as_of_date.is_none()));
        assert!(stored.iter().any(|r| r.model_name == ENSEMBLE_MODEL));

        let info = EnsembleService::model_info(&state, "^IBEX").unwrap();
        assert_eq!(info.len(), result.prediction.fits.len());
        assert!(info.iter().all(|e| e.n_samples == 80));

        // Same run date again collides
        let err = EnsembleService::predict_live(&state, "^IBEX", false).unwrap_err();
        assert!(matches!(err, AppError::PersistenceConflict(_)));
    }

    #[test]
    fn test_predict_live_short_history() {
        let state = live_state(90);
        let err = EnsembleService::predict_live(&state, "^IBEX", false).unwrap_err();
        assert!(matches!(err, AppError::InsufficientHistory { .. }));
    }
}
