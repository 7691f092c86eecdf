//! Persisted indicator and rule-signal tables

use crate::db::sqlite::models::{AdvancedIndicatorRow, IndicatorRow, SignalRow};
use crate::error::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection};

/// Upsert indicator rows keyed by (symbol, date)
pub fn upsert_indicators(conn: &mut Connection, rows: &[IndicatorRow]) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO indicators (symbol, date, sma_20, sma_50, vol_20, rsi_14)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (symbol, date) DO UPDATE SET
               sma_20 = excluded.sma_20, sma_50 = excluded.sma_50,
               vol_20 = excluded.vol_20, rsi_14 = excluded.rsi_14",
        )?;

        for r in rows {
            stmt.execute(params![r.symbol, r.date, r.sma_20, r.sma_50, r.vol_20, r.rsi_14])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

/// Stored indicators for a symbol, ascending
pub fn load_indicators(conn: &Connection, symbol: &str) -> Result<Vec<IndicatorRow>> {
    let mut stmt = conn.prepare(
        "SELECT symbol, date, sma_20, sma_50, vol_20, rsi_14
         FROM indicators WHERE symbol = ?1 ORDER BY date ASC",
    )?;

    let rows = stmt
        .query_map(params![symbol], |row| {
            Ok(IndicatorRow {
                symbol: row.get(0)?,
                date: row.get(1)?,
                sma_20: row.get(2)?,
                sma_50: row.get(3)?,
                vol_20: row.get(4)?,
                rsi_14: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

const ADVANCED_COLUMNS: &str = "symbol, date, macd, macd_signal, macd_histogram, \
     bb_middle, bb_upper, bb_lower, bb_width, bb_percent, adx, plus_di, minus_di, atr, \
     stoch_k, stoch_d, obv, ema_12, ema_26, ema_200";

/// Upsert advanced indicator rows keyed by (symbol, date)
pub fn upsert_advanced_indicators(
    conn: &mut Connection,
    rows: &[AdvancedIndicatorRow],
) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO advanced_indicators ({})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
             ON CONFLICT (symbol, date) DO UPDATE SET
               macd = excluded.macd, macd_signal = excluded.macd_signal,
               macd_histogram = excluded.macd_histogram,
               bb_middle = excluded.bb_middle, bb_upper = excluded.bb_upper,
               bb_lower = excluded.bb_lower, bb_width = excluded.bb_width,
               bb_percent = excluded.bb_percent,
               adx = excluded.adx, plus_di = excluded.plus_di, minus_di = excluded.minus_di,
               atr = excluded.atr, stoch_k = excluded.stoch_k, stoch_d = excluded.stoch_d,
               obv = excluded.obv, ema_12 = excluded.ema_12, ema_26 = excluded.ema_26,
               ema_200 = excluded.ema_200",
            ADVANCED_COLUMNS
        ))?;

        for r in rows {
            stmt.execute(params![
                r.symbol,
                r.date,
                r.macd,
                r.macd_signal,
                r.macd_histogram,
                r.bb_middle,
                r.bb_upper,
                r.bb_lower,
                r.bb_width,
                r.bb_percent,
                r.adx,
                r.plus_di,
                r.minus_di,
                r.atr,
                r.stoch_k,
                r.stoch_d,
                r.obv,
                r.ema_12,
                r.ema_26,
                r.ema_200
            ])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

/// Stored advanced indicators for a symbol, ascending
pub fn load_advanced_indicators(
    conn: &Connection,
    symbol: &str,
) -> Result<Vec<AdvancedIndicatorRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM advanced_indicators WHERE symbol = ?1 ORDER BY date ASC",
        ADVANCED_COLUMNS
    ))?;

    let rows = stmt
        .query_map(params![symbol], |row| {
            Ok(AdvancedIndicatorRow {
                symbol: row.get(0)?,
                date: row.get(1)?,
                macd: row.get(2)?,
                macd_signal: row.get(3)?,
                macd_histogram: row.get(4)?,
                bb_middle: row.get(5)?,
                bb_upper: row.get(6)?,
                bb_lower: row.get(7)?,
                bb_width: row.get(8)?,
                bb_percent: row.get(9)?,
                adx: row.get(10)?,
                plus_di: row.get(11)?,
                minus_di: row.get(12)?,
                atr: row.get(13)?,
                stoch_k: row.get(14)?,
                stoch_d: row.get(15)?,
                obv: row.get(16)?,
                ema_12: row.get(17)?,
                ema_26: row.get(18)?,
                ema_200: row.get(19)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Upsert rule-signal rows keyed by (symbol, date)
pub fn upsert_signals(conn: &mut Connection, rows: &[SignalRow]) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO signals (symbol, date, signal_simple, signal_ensemble, model_best)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (symbol, date) DO UPDATE SET
               signal_simple = excluded.signal_simple,
               signal_ensemble = excluded.signal_ensemble,
               model_best = excluded.model_best",
        )?;

        for r in rows {
            stmt.execute(params![
                r.symbol,
                r.date,
                r.signal_simple,
                r.signal_ensemble,
                r.model_best
            ])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

/// Latest rule signal for a symbol
pub fn latest_signal(conn: &Connection, symbol: &str) -> Result<Option<SignalRow>> {
    let mut stmt = conn.prepare(
        "SELECT symbol, date, signal_simple, signal_ensemble, model_best
         FROM signals WHERE symbol = ?1 ORDER BY date DESC LIMIT 1",
    )?;

    let mut rows = stmt.query_map(params![symbol], |row| {
        Ok(SignalRow {
            symbol: row.get(0)?,
            date: row.get::<_, NaiveDate>(1)?,
            signal_simple: row.get(2)?,
            signal_ensemble: row.get(3)?,
            model_best: row.get(4)?,
        })
    })?;

    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}
