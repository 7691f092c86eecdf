//! Settings management

use crate::db::sqlite::models::{PipelineSettings, SettingsUpdate};
use crate::error::{AppError, Result};
use crate::ml::MIN_TRAINING_ROWS;
use rusqlite::Connection;

/// Get settings
pub fn get_settings(conn: &Connection) -> Result<PipelineSettings> {
    let settings = conn.query_row(
        "SELECT min_history, neutral_band, default_period, mae_retrain_threshold,
                std_retrain_threshold, buy_accuracy_retrain_threshold
         FROM settings WHERE id = 1",
        [],
        |row| {
            Ok(PipelineSettings {
                min_history: row.get::<_, i64>(0)? as usize,
                neutral_band: row.get(1)?,
                default_period: row.get(2)?,
                mae_retrain_threshold: row.get(3)?,
                std_retrain_threshold: row.get(4)?,
                buy_accuracy_retrain_threshold: row.get(5)?,
            })
        },
    )?;

    Ok(settings)
}

/// Update settings
pub fn update_settings(conn: &Connection, update: SettingsUpdate) -> Result<PipelineSettings> {
    let mut updates = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(m) = update.min_history {
        if m < MIN_TRAINING_ROWS {
            return Err(AppError::Validation(format!(
                "min_history must be at least {}",
                MIN_TRAINING_ROWS
            )));
        }
        updates.push("min_history = ?");
        params.push(Box::new(m as i64));
    }
    if let Some(b) = update.neutral_band {
        if !(0.0..1.0).contains(&b) {
            return Err(AppError::Validation(
                "neutral_band must be in [0, 1)".to_string(),
            ));
        }
        updates.push("neutral_band = ?");
        params.push(Box::new(b));
    }
    if let Some(p) = update.default_period {
        updates.push("default_period = ?");
        params.push(Box::new(p));
    }
    if let Some(t) = update.mae_retrain_threshold {
        updates.push("mae_retrain_threshold = ?");
        params.push(Box::new(t));
    }
    if let Some(t) = update.std_retrain_threshold {
        updates.push("std_retrain_threshold = ?");
        params.push(Box::new(t));
    }
    if let Some(t) = update.buy_accuracy_retrain_threshold {
        updates.push("buy_accuracy_retrain_threshold = ?");
        params.push(Box::new(t));
    }

    if !updates.is_empty() {
        updates.push("updated_at = datetime('now')");

        let sql = format!("UPDATE settings SET {} WHERE id = 1", updates.join(", "));

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        conn.execute(&sql, params_refs.as_slice())?;
    }

    get_settings(conn)
}
