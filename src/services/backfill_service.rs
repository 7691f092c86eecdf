//! Backfill Service
//!
//! Replays historical sessions one at a time under as-of discipline: for each
//! session D the features stop at D, every model is refitted on them, and the
//! resulting votes are stored as predictions for the session after D.

use crate::db::sqlite::SqliteDb;
use crate::error::{AppError, Result};
use crate::services::ensemble_service::{next_session, EnsembleTrainer, ModelExclusion};
use crate::services::feature_service::{FeatureSource, StoreFeatureSource};
use crate::state::AppState;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-date progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum BackfillState {
    Pending(NaiveDate),
    FeaturesLoaded(NaiveDate),
    Predicted(NaiveDate),
    Persisted(NaiveDate),
    Failed(NaiveDate, String),
}

impl BackfillState {
    pub fn date(&self) -> NaiveDate {
        match self {
            BackfillState::Pending(d)
            | BackfillState::FeaturesLoaded(d)
            | BackfillState::Predicted(d)
            | BackfillState::Persisted(d)
            | BackfillState::Failed(d, _) => *d,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BackfillState::Persisted(_) | BackfillState::Failed(..))
    }
}

/// Terminal outcome of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateOutcome {
    pub as_of_date: NaiveDate,
    pub prediction_date: NaiveDate,
    pub state: BackfillState,
    pub rows_written: usize,
    pub final_signal: Option<i8>,
    pub consensus: Option<f64>,
    pub excluded: Vec<ModelExclusion>,
}

/// Summary of one backfill run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillSummary {
    /// Correlates log lines of one run
    pub run_id: Uuid,
    pub symbol: String,
    pub run_date: NaiveDate,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub sessions: usize,
    pub persisted: usize,
    pub failed: usize,
    pub rows_written: usize,
    pub cancelled: bool,
    pub outcomes: Vec<DateOutcome>,
}

/// Sequential per-symbol driver
pub struct BackfillDriver<'a> {
    db: &'a SqliteDb,
    source: &'a dyn FeatureSource,
    trainer: &'a EnsembleTrainer,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> BackfillDriver<'a> {
    pub fn new(db: &'a SqliteDb, source: &'a dyn FeatureSource, trainer: &'a EnsembleTrainer) -> Self {
        Self {
            db,
            source,
            trainer,
            cancel: None,
        }
    }

    /// Stop between dates once the flag is set
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::SeqCst))
    }

    /// Backfill every stored session in `[start, end]`
    ///
    /// Per-date history and model failures are recorded and skipped. Storage
    /// conflicts, database errors and bad arguments are returned.
    pub fn backfill(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        run_date: NaiveDate,
    ) -> Result<BackfillSummary> {
        if start > end {
            return Err(AppError::Validation(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        if self.db.count_prices(symbol)? == 0 {
            return Err(AppError::NotFound(format!("No prices stored for {}", symbol)));
        }

        let sessions = self.db.session_dates(symbol, start, end)?;
        let run_id = Uuid::new_v4();
        info!(
            "Backfill [{}] {} {}..{} run_date={} sessions={}",
            run_id,
            symbol,
            start,
            end,
            run_date,
            sessions.len()
        );

        let mut summary = BackfillSummary {
            run_id,
            symbol: symbol.to_string(),
            run_date,
            start,
            end,
            sessions: sessions.len(),
            persisted: 0,
            failed: 0,
            rows_written: 0,
            cancelled: false,
            outcomes: Vec::with_capacity(sessions.len()),
        };

        for date in sessions {
            if self.cancelled() {
                warn!("Backfill {} cancelled before {}", symbol, date);
                summary.cancelled = true;
                break;
            }

            let outcome = self.run_date(symbol, date, run_date)?;
            match &outcome.state {
                BackfillState::Persisted(_) => {
                    summary.persisted += 1;
                    summary.rows_written += outcome.rows_written;
                }
                BackfillState::Failed(d, reason) => {
                    warn!("Backfill {} {} failed: {}", symbol, d, reason);
                    summary.failed += 1;
                }
                other => {
                    return Err(AppError::Internal(format!(
                        "date {} ended in non-terminal state {:?}",
                        date, other
                    )))
                }
            }
            summary.outcomes.push(outcome);
        }

        info!(
            "Backfill [{}] {} done: persisted={} failed={} rows={}",
            run_id, symbol, summary.persisted, summary.failed, summary.rows_written
        );
        Ok(summary)
    }

    /// Drive one date to a terminal state
    fn run_date(&self, symbol: &str, date: NaiveDate, run_date: NaiveDate) -> Result<DateOutcome> {
        let prediction_date = next_session(date);
        let mut outcome = DateOutcome {
            as_of_date: date,
            prediction_date,
            state: BackfillState::Pending(date),
            rows_written: 0,
            final_signal: None,
            consensus: None,
            excluded: Vec::new(),
        };

        let rows = match self.source.load_features(symbol, Some(date)) {
            Ok(rows) => rows,
            Err(e) if e.is_per_date() => {
                outcome.state = BackfillState::Failed(date, e.to_string());
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        };
        outcome.state = BackfillState::FeaturesLoaded(date);
        debug!("{} {} features loaded ({} rows)", symbol, date, rows.len());

        let prediction = match self.trainer.train_and_predict(&rows, Some(date), true) {
            Ok(p) => p,
            Err(e) if e.is_per_date() => {
                outcome.state = BackfillState::Failed(date, e.to_string());
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        };
        outcome.excluded = prediction.excluded.clone();

        if prediction.predictions.is_empty() {
            outcome.state = BackfillState::Failed(date, "every model was excluded".to_string());
            return Ok(outcome);
        }

        let vote = prediction.vote();
        outcome.final_signal = Some(vote.final_signal);
        outcome.consensus = Some(vote.consensus);
        outcome.state = BackfillState::Predicted(date);
        debug!(
            "{} {} predicted signal={} consensus={:.2}",
            symbol, date, vote.final_signal, vote.consensus
        );

        outcome.rows_written = self.db.insert_predictions(
            symbol,
            prediction_date,
            run_date,
            Some(date),
            &prediction.to_records(&vote),
        )?;
        outcome.state = BackfillState::Persisted(date);
        Ok(outcome)
    }
}

/// Backfill service for business logic
pub struct BackfillService;

impl BackfillService {
    /// Backfill one symbol on the shared connection
    pub fn run(
        state: &AppState,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        run_date: Option<NaiveDate>,
    ) -> Result<BackfillSummary> {
        let run_date = run_date.unwrap_or_else(|| state.config.today());
        info!(
            "BackfillService::run - {} {}..{} run_date={}",
            symbol, start, end, run_date
        );

        let settings = state.sqlite.get_settings()?;
        let source = StoreFeatureSource::new(state.sqlite.clone(), settings.min_history);
        let trainer = state.trainer(settings.neutral_band);

        BackfillDriver::new(&state.sqlite, &source, &trainer)
            .with_cancel(state.cancel_flag())
            .backfill(symbol, start, end, run_date)
    }

    /// Backfill several symbols in parallel, one thread and one connection
    /// per symbol
    pub fn run_many(
        state: &AppState,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        run_date: Option<NaiveDate>,
    ) -> Result<Vec<(String, Result<BackfillSummary>)>> {
        let run_date = run_date.unwrap_or_else(|| state.config.today());
        let db_path = state
            .sqlite
            .path()
            .map(Path::to_path_buf)
            .ok_or_else(|| AppError::Config("parallel backfill needs a file database".to_string()))?;
        let settings = state.sqlite.get_settings()?;
        let cancel = state.cancel_flag();

        info!(
            "BackfillService::run_many - {} symbols {}..{} run_date={}",
            symbols.len(),
            start,
            end,
            run_date
        );

        let results = std::thread::scope(|scope| {
            let handles: Vec<_> = symbols
                .iter()
                .map(|symbol| {
                    let db_path = db_path.clone();
                    let cancel = cancel.clone();
                    let settings = &settings;
                    let handle = scope.spawn(move || -> Result<BackfillSummary> {
                        let db = Arc::new(SqliteDb::new(&db_path)?);
                        let source = StoreFeatureSource::new(db.clone(), settings.min_history);
                        let trainer = state.trainer(settings.neutral_band);
                        BackfillDriver::new(&db, &source, &trainer)
                            .with_cancel(cancel)
                            .backfill(symbol, start, end, run_date)
                    });
                    (symbol.clone(), handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(symbol, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        error!("Backfill worker for {} panicked", symbol);
                        Err(AppError::Internal(format!("worker for {} panicked", symbol)))
                    });
                    (symbol, result)
                })
                .collect::<Vec<_>>()
        });

        Ok(results)
    }
}
