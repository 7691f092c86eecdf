//! Services Layer
//!
//! Business logic shared by the CLI and library callers. Services own the
//! pipeline steps and talk to the store and providers; commands only parse
//! arguments and print results.
//!
//! # Architecture
//!
//! ```text
//! Provider --> PriceService --> prices ──> FeatureService ──> EnsembleService ──> ml_predictions
//!                                  │                      └─> BackfillService ─┘        │
//!                                  ├─> IndicatorService                                 v
//!                                  └─> SignalService                ValidationService / EvaluationService
//! ```
//!
//! # Services
//!
//! - `PriceService` - Refresh daily bars from a provider
//! - `IndicatorService` - Persist indicator columns and the advanced set
//! - `SignalService` - Rule-based signals
//! - `FeatureService` - As-of feature rows
//! - `EnsembleService` - Train, vote, persist live predictions
//! - `BackfillService` - Historical as-of predictions
//! - `ValidationService` - Realized values and directional scoring
//! - `EvaluationService` - Performance reports, range backtests and retrain advice

pub mod price_service;
pub mod indicator_service;
pub mod signal_service;
pub mod feature_service;
pub mod ensemble_service;
pub mod backfill_service;
pub mod validation_service;
pub mod evaluation_service;

// Re-export commonly used types and services
pub use price_service::{PriceService, PriceUpdateResult};
pub use indicator_service::{IndicatorCounts, IndicatorService};
pub use signal_service::{SignalService, SignalSummary};
pub use feature_service::{FeatureService, FeatureSource, StoreFeatureSource};
pub use ensemble_service::{EnsemblePrediction, EnsembleService, EnsembleTrainer, LivePredictionResult};
pub use backfill_service::{BackfillDriver, BackfillService, BackfillState, BackfillSummary};
pub use validation_service::{ValidationReport, ValidationService};
pub use evaluation_service::{
    BacktestReport, DatasetRow, EvaluationService, PerformanceReport, RetrainAdvice,
};
