//! market-ensemble command line

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use market_ensemble::assets::{resolve_list, DEFAULT_SYMBOLS};
use market_ensemble::config::AppConfig;
use market_ensemble::db::sqlite::models::SettingsUpdate;
use market_ensemble::providers::YahooProvider;
use market_ensemble::services::evaluation_service::BACKTEST_MIN_MODELS;
use market_ensemble::services::{
    BackfillService, EnsembleService, EvaluationService, IndicatorService, PriceService,
    SignalService, ValidationService,
};
use market_ensemble::state::AppState;
use serde::Serialize;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "market-ensemble", version, about = "Ensemble market signals with as-of backfill")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download daily bars from Yahoo Finance
    Fetch {
        /// Comma-separated symbols or aliases (IBEX35,SP500,...)
        #[arg(long)]
        symbols: Option<String>,
        /// 1d,5d,1mo,3mo,6mo,1y,2y,5y,10y,max; defaults to the stored setting
        #[arg(long)]
        period: Option<String>,
    },
    /// Recompute and store indicator columns and the advanced set
    Indicators {
        #[arg(long)]
        symbols: Option<String>,
    },
    /// Recompute rule-based signals
    Signals {
        #[arg(long)]
        symbols: Option<String>,
    },
    /// Predict the next session with the model ensemble
    Predict {
        #[arg(long)]
        symbols: Option<String>,
        #[arg(long)]
        force_retrain: bool,
    },
    /// Re-run the ensemble as of each stored session in a range
    Backfill {
        #[arg(long)]
        symbols: Option<String>,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Defaults to today in the market timezone
        #[arg(long)]
        run_date: Option<NaiveDate>,
    },
    /// Fill realized values for a prediction date (yesterday by default)
    Validate {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Per-model performance report
    Report {
        #[arg(long)]
        symbol: String,
        /// Defaults to 30 days before `end`
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long, default_value_t = 3)]
        min_predictions: usize,
        /// Retraining advice over the last week instead of the report
        #[arg(long)]
        retrain: bool,
    },
    /// Directional backtest of stored predictions with a replayed vote
    Backtest {
        #[arg(long)]
        symbol: String,
        /// Defaults to 90 days before `end`
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Voters a run needs before its vote is scored
        #[arg(long, default_value_t = BACKTEST_MIN_MODELS)]
        min_models: usize,
    },
    /// Validated predictions joined with realized moves
    Dataset {
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Fit metadata of the live models, optionally dropping saved fits
    Models {
        #[arg(long)]
        symbol: String,
        /// Delete stored model versions so the next prediction refits
        #[arg(long)]
        clear: bool,
    },
    /// Show or update pipeline settings
    Settings {
        #[arg(long)]
        min_history: Option<usize>,
        #[arg(long)]
        neutral_band: Option<f64>,
        #[arg(long)]
        default_period: Option<String>,
        #[arg(long)]
        mae_retrain_threshold: Option<f64>,
        #[arg(long)]
        std_retrain_threshold: Option<f64>,
        #[arg(long)]
        buy_accuracy_retrain_threshold: Option<f64>,
    },
}

fn symbols_or_default(symbols: Option<&str>) -> Vec<String> {
    match symbols {
        Some(list) => resolve_list(list),
        None => DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
    }
}

/// Explicit list, else every symbol with stored prices, else the defaults
fn stored_symbols_or_default(state: &AppState, symbols: Option<&str>) -> Result<Vec<String>> {
    if symbols.is_some() {
        return Ok(symbols_or_default(symbols));
    }
    let stored = state.sqlite.list_symbols()?;
    Ok(if stored.is_empty() {
        symbols_or_default(None)
    } else {
        stored
    })
}

/// First Ctrl-C stops backfills between dates, a second one exits
fn spawn_interrupt_handler(state: Arc<AppState>) {
    tokio::spawn(async move {
        state
            .cancel_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            })
            .await;
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Per-symbol outcome where one failure does not stop the others
#[derive(Serialize)]
struct SymbolResult<T: Serialize> {
    symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<market_ensemble::error::AppError>,
}

impl<T: Serialize> SymbolResult<T> {
    fn from_result(symbol: &str, result: market_ensemble::error::Result<T>) -> Self {
        match result {
            Ok(value) => Self {
                symbol: symbol.to_string(),
                result: Some(value),
                error: None,
            },
            Err(e) => {
                tracing::error!("{}: {}", symbol, e);
                Self {
                    symbol: symbol.to_string(),
                    result: None,
                    error: Some(e),
                }
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::from_env().context("reading configuration")?;
    let state = Arc::new(AppState::new(config).context("opening database")?);
    spawn_interrupt_handler(state.clone());

    match cli.command {
        Command::Fetch { symbols, period } => {
            let period = match period {
                Some(p) => p,
                None => state.sqlite.get_settings()?.default_period,
            };
            let provider = YahooProvider::new()?;
            let mut out = Vec::new();
            for symbol in symbols_or_default(symbols.as_deref()) {
                let result =
                    PriceService::update_prices(&state.sqlite, &provider, &symbol, &period).await;
                out.push(SymbolResult::from_result(&symbol, result));
            }
            print_json(&out)
        }
        Command::Indicators { symbols } => {
            let out: Vec<_> = stored_symbols_or_default(&state, symbols.as_deref())?
                .iter()
                .map(|s| {
                    SymbolResult::from_result(s, IndicatorService::refresh_all(&state.sqlite, s))
                })
                .collect();
            print_json(&out)
        }
        Command::Signals { symbols } => {
            let out: Vec<_> = stored_symbols_or_default(&state, symbols.as_deref())?
                .iter()
                .map(|s| {
                    SymbolResult::from_result(s, SignalService::compute_for_symbol(&state.sqlite, s))
                })
                .collect();
            print_json(&out)
        }
        Command::Predict {
            symbols,
            force_retrain,
        } => {
            let symbols = stored_symbols_or_default(&state, symbols.as_deref())?;
            let state = state.clone();
            let out = tokio::task::spawn_blocking(move || {
                symbols
                    .iter()
                    .map(|s| {
                        SymbolResult::from_result(
                            s,
                            EnsembleService::predict_live(&state, s, force_retrain),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .await?;
            print_json(&out)
        }
        Command::Backfill {
            symbols,
            start,
            end,
            run_date,
        } => {
            let symbols = stored_symbols_or_default(&state, symbols.as_deref())?;
            let state = state.clone();
            let results = tokio::task::spawn_blocking(move || match symbols.as_slice() {
                [symbol] => Ok(vec![(
                    symbol.clone(),
                    BackfillService::run(&state, symbol, start, end, run_date),
                )]),
                _ => BackfillService::run_many(&state, &symbols, start, end, run_date),
            })
            .await??;
            let out: Vec<_> = results
                .into_iter()
                .map(|(s, r)| SymbolResult::from_result(&s, r))
                .collect();
            print_json(&out)
        }
        Command::Validate { date, symbol } => {
            let symbol = symbol.map(|s| market_ensemble::assets::resolve_symbol(&s));
            let report = match date {
                Some(d) => ValidationService::validate(&state.sqlite, d, symbol.as_deref())?,
                None => ValidationService::validate_yesterday(&state.sqlite, state.config.today())?,
            };
            print_json(&report)
        }
        Command::Report {
            symbol,
            start,
            end,
            min_predictions,
            retrain,
        } => {
            let symbol = market_ensemble::assets::resolve_symbol(&symbol);
            let end = end.unwrap_or_else(|| state.config.today());
            if retrain {
                print_json(&EvaluationService::should_retrain(&state.sqlite, &symbol, end)?)
            } else {
                let start = start.unwrap_or(end - Duration::days(30));
                print_json(&EvaluationService::performance_report(
                    &state.sqlite,
                    &symbol,
                    start,
                    end,
                    min_predictions,
                )?)
            }
        }
        Command::Backtest {
            symbol,
            start,
            end,
            min_models,
        } => {
            let symbol = market_ensemble::assets::resolve_symbol(&symbol);
            let end = end.unwrap_or_else(|| state.config.today());
            let start = start.unwrap_or(end - Duration::days(90));
            print_json(&EvaluationService::backtest(
                &state.sqlite,
                &symbol,
                start,
                end,
                min_models,
            )?)
        }
        Command::Dataset { symbol } => {
            let symbol = symbol.map(|s| market_ensemble::assets::resolve_symbol(&s));
            print_json(&EvaluationService::validation_dataset(
                &state.sqlite,
                symbol.as_deref(),
            )?)
        }
        Command::Models { symbol, clear } => {
            let symbol = market_ensemble::assets::resolve_symbol(&symbol);
            if clear {
                state.cache.invalidate(&symbol);
                let deleted = state.sqlite.delete_models(&symbol)?;
                tracing::info!("Deleted {} stored model versions for {}", deleted, symbol);
            }
            print_json(&EnsembleService::model_info(&state, &symbol)?)
        }
        Command::Settings {
            min_history,
            neutral_band,
            default_period,
            mae_retrain_threshold,
            std_retrain_threshold,
            buy_accuracy_retrain_threshold,
        } => {
            let update = SettingsUpdate {
                min_history,
                neutral_band,
                default_period,
                mae_retrain_threshold,
                std_retrain_threshold,
                buy_accuracy_retrain_threshold,
            };
            print_json(&state.sqlite.update_settings(update)?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    market_ensemble::init_tracing();
    run(Cli::parse()).await
}
