//! Fitted-model metadata and saved model versions

use crate::db::sqlite::models::{ModelRegistryEntry, StoredModel};
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Record (or replace) the latest fit for a (symbol, model) pair
pub fn record_fit(conn: &Connection, entry: &ModelRegistryEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO model_registry (symbol, model_name, training_date, n_samples, mae, rmse)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (symbol, model_name) DO UPDATE SET
           training_date = excluded.training_date, n_samples = excluded.n_samples,
           mae = excluded.mae, rmse = excluded.rmse, saved_at = datetime('now')",
        params![
            entry.symbol,
            entry.model_name,
            entry.training_date,
            entry.n_samples as i64,
            entry.mae,
            entry.rmse
        ],
    )?;
    Ok(())
}

/// Latest fit metadata for every model of a symbol
pub fn list_fits(conn: &Connection, symbol: &str) -> Result<Vec<ModelRegistryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT symbol, model_name, training_date, n_samples, mae, rmse, saved_at
         FROM model_registry WHERE symbol = ?1 ORDER BY saved_at DESC, model_name",
    )?;

    let rows = stmt
        .query_map(params![symbol], |row| {
            Ok(ModelRegistryEntry {
                symbol: row.get(0)?,
                model_name: row.get(1)?,
                training_date: row.get(2)?,
                n_samples: row.get::<_, i64>(3)? as usize,
                mae: row.get(4)?,
                rmse: row.get(5)?,
                saved_at: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Save a fitted model version, replacing one with the same training date
pub fn save_model(conn: &Connection, model: &StoredModel) -> Result<()> {
    conn.execute(
        "INSERT INTO model_store (symbol, model_name, training_date, n_samples, mae, rmse, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (symbol, model_name, training_date) DO UPDATE SET
           n_samples = excluded.n_samples, mae = excluded.mae, rmse = excluded.rmse,
           payload = excluded.payload, saved_at = datetime('now')",
        params![
            model.symbol,
            model.model_name,
            model.training_date,
            model.n_samples as i64,
            model.mae,
            model.rmse,
            model.payload
        ],
    )?;
    Ok(())
}

/// Most recently trained version of a model
pub fn load_latest_model(
    conn: &Connection,
    symbol: &str,
    model_name: &str,
) -> Result<Option<StoredModel>> {
    conn.query_row(
        "SELECT symbol, model_name, training_date, n_samples, mae, rmse, payload
         FROM model_store WHERE symbol = ?1 AND model_name = ?2
         ORDER BY training_date DESC LIMIT 1",
        params![symbol, model_name],
        |row| {
            Ok(StoredModel {
                symbol: row.get(0)?,
                model_name: row.get(1)?,
                training_date: row.get(2)?,
                n_samples: row.get::<_, i64>(3)? as usize,
                mae: row.get(4)?,
                rmse: row.get(5)?,
                payload: row.get(6)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// Delete all but the `keep` newest versions of each model of a symbol
pub fn prune_models(conn: &Connection, symbol: &str, keep: usize) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM model_store WHERE id IN (
             SELECT id FROM (
                 SELECT id, ROW_NUMBER() OVER (
                     PARTITION BY model_name ORDER BY training_date DESC
                 ) AS rank
                 FROM model_store WHERE symbol = ?1
             ) WHERE rank > ?2
         )",
        params![symbol, keep as i64],
    )?;
    Ok(deleted)
}

/// Drop every saved version for a symbol
pub fn delete_models(conn: &Connection, symbol: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM model_store WHERE symbol = ?1", params![symbol])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::migrations::run_migrations;
    use chrono::{Duration, NaiveDate};

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn version(model_name: &str, day: i64) -> StoredModel {
        StoredModel {
            symbol: "^IBEX".to_string(),
            model_name: model_name.to_string(),
            training_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + Duration::days(day),
            n_samples: 100 + day as usize,
            mae: 1.0,
            rmse: 2.0,
            payload: format!("{{\"day\":{}}}", day),
        }
    }

    #[test]
    fn test_load_latest_version() {
        let conn = create_test_db();
        assert!(load_latest_model(&conn, "^IBEX", "RandomForest").unwrap().is_none());

        save_model(&conn, &version("RandomForest", 2)).unwrap();
        save_model(&conn, &version("RandomForest", 5)).unwrap();
        save_model(&conn, &version("RandomForest", 3)).unwrap();

        let latest = load_latest_model(&conn, "^IBEX", "RandomForest").unwrap().unwrap();
        assert_eq!(latest, version("RandomForest", 5));
        assert!(load_latest_model(&conn, "^GSPC", "RandomForest").unwrap().is_none());
    }

    #[test]
    fn test_same_training_date_replaces_payload() {
        let conn = create_test_db();
        save_model(&conn, &version("KernelRidge", 1)).unwrap();
        let mut refit = version("KernelRidge", 1);
        refit.payload = "{}".to_string();
        save_model(&conn, &refit).unwrap();

        let latest = load_latest_model(&conn, "^IBEX", "KernelRidge").unwrap().unwrap();
        assert_eq!(latest.payload, "{}");
    }

    #[test]
    fn test_prune_keeps_newest_per_model() {
        let conn = create_test_db();
        for day in 0..7 {
            save_model(&conn, &version("RandomForest", day)).unwrap();
        }
        for day in 0..2 {
            save_model(&conn, &version("HoltWinters", day)).unwrap();
        }

        let deleted = prune_models(&conn, "^IBEX", 5).unwrap();
        assert_eq!(deleted, 2);

        let oldest: NaiveDate = conn
            .query_row(
                "SELECT MIN(training_date) FROM model_store WHERE model_name = 'RandomForest'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(oldest, version("RandomForest", 2).training_date);
        assert!(load_latest_model(&conn, "^IBEX", "HoltWinters").unwrap().is_some());

        assert_eq!(delete_models(&conn, "^IBEX").unwrap(), 7);
    }
}
