//! ML prediction records
//!
//! Rows are append-only per run date. The only mutation is the one-time
//! write of `true_value`/`absolute_error` by the validator.

use crate::db::sqlite::models::{NewPrediction, PredictionRecord};
use crate::error::{AppError, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};

const RECORD_COLUMNS: &str = "id, symbol, prediction_date, run_date, as_of_date, model_name,
     predicted_value, predicted_signal, true_value, absolute_error, created_at";

fn map_record(row: &Row<'_>) -> rusqlite::Result<PredictionRecord> {
    Ok(PredictionRecord {
        id: row.get(0)?,
        symbol: row.get(1)?,
        prediction_date: row.get(2)?,
        run_date: row.get(3)?,
        as_of_date: row.get(4)?,
        model_name: row.get(5)?,
        predicted_value: row.get(6)?,
        predicted_signal: row.get(7)?,
        true_value: row.get(8)?,
        absolute_error: row.get(9)?,
        created_at: row.get(10)?,
    })
}

/// Insert one batch of predictions atomically
///
/// A key collision on (symbol, prediction_date, model_name, run_date) rolls
/// back the whole batch and surfaces as [`AppError::PersistenceConflict`].
pub fn insert_predictions(
    conn: &mut Connection,
    symbol: &str,
    prediction_date: NaiveDate,
    run_date: NaiveDate,
    as_of_date: Option<NaiveDate>,
    predictions: &[NewPrediction],
) -> Result<usize> {
    let tx = conn.transaction()?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO ml_predictions (
                symbol, prediction_date, run_date, as_of_date, model_name,
                predicted_value, predicted_signal, true_value, absolute_error
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL)",
        )?;

        for p in predictions {
            stmt.execute(params![
                symbol,
                prediction_date,
                run_date,
                as_of_date,
                p.model_name,
                p.predicted_value,
                p.predicted_signal,
            ])
            .map_err(|e| {
                AppError::from_write(
                    e,
                    &format!(
                        "{} {} {} run {}",
                        symbol, prediction_date, p.model_name, run_date
                    ),
                )
            })?;
        }
    }

    tx.commit()?;

    tracing::debug!(
        "Stored {} predictions for {} on {} (run {})",
        predictions.len(),
        symbol,
        prediction_date,
        run_date
    );

    Ok(predictions.len())
}

/// Unvalidated rows for a prediction date, optionally for one symbol
pub fn pending_for_date(
    conn: &Connection,
    date: NaiveDate,
    symbol: Option<&str>,
) -> Result<Vec<PredictionRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ml_predictions
         WHERE prediction_date = ?1 AND true_value IS NULL
           AND (?2 IS NULL OR symbol = ?2)
         ORDER BY symbol, model_name, run_date",
        RECORD_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![date, symbol], map_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Record the realized value for one prediction
///
/// Returns false when the row was already validated.
pub fn set_outcome(conn: &Connection, id: i64, true_value: f64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE ml_predictions
         SET true_value = ?1,
             absolute_error = ABS(predicted_value - ?1)
         WHERE id = ?2 AND true_value IS NULL",
        params![true_value, id],
    )?;
    Ok(updated > 0)
}

/// Validated rows for a prediction date, optionally for one symbol
pub fn validated_for_date(
    conn: &Connection,
    date: NaiveDate,
    symbol: Option<&str>,
) -> Result<Vec<PredictionRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ml_predictions
         WHERE prediction_date = ?1 AND true_value IS NOT NULL
           AND (?2 IS NULL OR symbol = ?2)
         ORDER BY symbol, model_name, run_date",
        RECORD_COLUMNS
    ))?;

    let rows = stmt
        .query_map(params![date, symbol], map_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Validated rows for a symbol within [start, end]; all symbols when `symbol` is None
pub fn validated_between(
    conn: &Connection,
    symbol: Option<&str>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<PredictionRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ml_predictions
         WHERE true_value IS NOT NULL
           AND (?1 IS NULL OR symbol = ?1)
           AND (?2 IS NULL OR prediction_date >= ?2)
           AND (?3 IS NULL OR prediction_date <= ?3)
         ORDER BY symbol, prediction_date, model_name",
        RECORD_COLUMNS
    ))?;

    let rows = stmt
        .query_map(params![symbol, start, end], map_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// All rows for a symbol, newest prediction date first
pub fn list_for_symbol(conn: &Connection, symbol: &str, limit: usize) -> Result<Vec<PredictionRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ml_predictions
         WHERE symbol = ?1
         ORDER BY prediction_date DESC, run_date DESC, model_name
         LIMIT ?2",
        RECORD_COLUMNS
    ))?;

    let rows = stmt
        .query_map(params![symbol, limit as i64], map_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Row count for a symbol
pub fn count_for_symbol(conn: &Connection, symbol: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM ml_predictions WHERE symbol = ?1",
        params![symbol],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::migrations::run_migrations;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn batch() -> Vec<NewPrediction> {
        vec![
            NewPrediction {
                model_name: "LinearRegression".to_string(),
                predicted_value: Some(100.5),
                predicted_signal: 1,
            },
            NewPrediction {
                model_name: "ensemble".to_string(),
                predicted_value: Some(100.5),
                predicted_signal: 1,
            },
        ]
    }

    #[test]
    fn test_insert_and_pending() {
        let mut conn = create_test_db();
        let n = insert_predictions(
            &mut conn,
            "^IBEX",
            date("2024-01-03"),
            date("2024-01-02"),
            Some(date("2024-01-02")),
            &batch(),
        )
        .unwrap();
        assert_eq!(n, 2);

        let pending = pending_for_date(&conn, date("2024-01-03"), None).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|r| r.true_value.is_none()));
        assert_eq!(pending[0].as_of_date, Some(date("2024-01-02")));

        let other = pending_for_date(&conn, date("2024-01-03"), Some("^GSPC")).unwrap();
        assert!(other.is_empty());
        let same = pending_for_date(&conn, date("2024-01-03"), Some("^IBEX")).unwrap();
        assert_eq!(same.len(), 2);
    }

    #[test]
    fn test_same_run_date_conflicts_and_rolls_back() {
        let mut conn = create_test_db();
        let args = (date("2024-01-03"), date("2024-01-02"));
        insert_predictions(&mut conn, "^IBEX", args.0, args.1, None, &batch()).unwrap();

        let err = insert_predictions(&mut conn, "^IBEX", args.0, args.1, None, &batch()).unwrap_err();
        assert!(matches!(err, AppError::PersistenceConflict(_)));
        assert_eq!(count_for_symbol(&conn, "^IBEX").unwrap(), 2);

        // A new run date is always safe
        insert_predictions(&mut conn, "^IBEX", args.0, date("2024-02-01"), None, &batch()).unwrap();
        assert_eq!(count_for_symbol(&conn, "^IBEX").unwrap(), 4);
    }

    #[test]
    fn test_outcome_written_once() {
        let mut conn = create_test_db();
        insert_predictions(
            &mut conn,
            "^IBEX",
            date("2024-01-03"),
            date("2024-01-02"),
            None,
            &batch(),
        )
        .unwrap();

        let pending = pending_for_date(&conn, date("2024-01-03"), None).unwrap();
        assert!(set_outcome(&conn, pending[0].id, 99.0).unwrap());
        assert!(!set_outcome(&conn, pending[0].id, 42.0).unwrap());

        let validated = validated_for_date(&conn, date("2024-01-03"), Some("^IBEX")).unwrap();
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].true_value, Some(99.0));
        assert!((validated[0].absolute_error.unwrap() - 1.5).abs() < 1e-9);

        let between = validated_between(&conn, Some("^IBEX"), None, None).unwrap();
        assert_eq!(between.len(), 1);
    }
}
