//! Application error types

use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Insufficient history for {symbol}: {available} rows, {required} required")]
    InsufficientHistory {
        symbol: String,
        available: usize,
        required: usize,
    },

    #[error("Model {model} failed: {reason}")]
    ModelFit { model: String, reason: String },

    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for a single model's fit/predict failure
    pub fn model_fit(model: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::ModelFit {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Errors a backfill run records against one date and then moves past.
    pub fn is_per_date(&self) -> bool {
        matches!(
            self,
            AppError::InsufficientHistory { .. } | AppError::ModelFit { .. }
        )
    }

    /// Map a UNIQUE violation on write to a persistence conflict.
    pub fn from_write(err: rusqlite::Error, context: &str) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                AppError::PersistenceConflict(format!("{}: {}", context, err))
            }
            _ => AppError::Database(err),
        }
    }
}

/// Serializable error response for callers that emit structured summaries
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let code = match err {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Http(_) => "HTTP_ERROR",
            AppError::InsufficientHistory { .. } => "INSUFFICIENT_HISTORY",
            AppError::ModelFit { .. } => "MODEL_FIT_ERROR",
            AppError::PersistenceConflict(_) => "PERSISTENCE_CONFLICT",
            AppError::Provider(_) => "PROVIDER_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        ErrorResponse::from(self).serialize(serializer)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_date_classification() {
        let insufficient = AppError::InsufficientHistory {
            symbol: "^IBEX".to_string(),
            available: 10,
            required: 60,
        };
        assert!(insufficient.is_per_date());
        assert!(AppError::model_fit("SVR", "diverged").is_per_date());
        assert!(!AppError::PersistenceConflict("dup".to_string()).is_per_date());
        assert!(!AppError::Validation("bad range".to_string()).is_per_date());
    }

    #[test]
    fn test_error_response_code() {
        let err = AppError::PersistenceConflict("run collision".to_string());
        let response = ErrorResponse::from(&err);
        assert_eq!(response.code, "PERSISTENCE_CONFLICT");
        assert!(response.message.contains("run collision"));
    }

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT NOT NULL UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err();
        let mapped = AppError::from_write(err, "insert t");
        assert!(matches!(mapped, AppError::PersistenceConflict(_)));
    }

    #[test]
    fn test_other_constraints_stay_database_errors() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT NOT NULL UNIQUE, n INTEGER CHECK (n > 0));")
            .unwrap();

        let not_null = conn
            .execute("INSERT INTO t (k, n) VALUES (NULL, 1)", [])
            .unwrap_err();
        assert!(matches!(
            AppError::from_write(not_null, "insert t"),
            AppError::Database(_)
        ));

        let check = conn
            .execute("INSERT INTO t (k, n) VALUES ('b', 0)", [])
            .unwrap_err();
        assert!(matches!(
            AppError::from_write(check, "insert t"),
            AppError::Database(_)
        ));
    }
}
