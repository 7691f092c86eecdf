//! Price history storage

use crate::db::sqlite::models::PricePoint;
use crate::error::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

const PRICE_COLUMNS: &str = "symbol, date, open, high, low, close, adjusted_close, volume";

fn map_price(row: &Row<'_>) -> rusqlite::Result<PricePoint> {
    Ok(PricePoint {
        symbol: row.get(0)?,
        date: row.get(1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        adjusted_close: row.get(6)?,
        volume: row.get(7)?,
    })
}

/// Insert or update price bars keyed by (symbol, date)
pub fn upsert_prices(conn: &mut Connection, prices: &[PricePoint]) -> Result<usize> {
    let tx = conn.transaction()?;

    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO prices (symbol, date, open, high, low, close, adjusted_close, volume)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (symbol, date) DO UPDATE SET
               open = excluded.open, high = excluded.high, low = excluded.low,
               close = excluded.close, adjusted_close = excluded.adjusted_close,
               volume = excluded.volume",
        )?;

        for p in prices {
            stmt.execute(params![
                p.symbol,
                p.date,
                p.open,
                p.high,
                p.low,
                p.close,
                p.adjusted_close,
                p.volume,
            ])?;
            count += 1;
        }
    }

    tx.commit()?;

    tracing::debug!("Upserted {} price rows", count);
    Ok(count)
}

/// Load a symbol's bars in ascending date order, optionally cut at `as_of`
///
/// The cutoff is part of the query so rows after `as_of` never leave the
/// database.
pub fn load_prices(
    conn: &Connection,
    symbol: &str,
    as_of: Option<NaiveDate>,
) -> Result<Vec<PricePoint>> {
    let rows = match as_of {
        Some(cutoff) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM prices WHERE symbol = ?1 AND date <= ?2 ORDER BY date ASC",
                PRICE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![symbol, cutoff], map_price)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM prices WHERE symbol = ?1 ORDER BY date ASC",
                PRICE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![symbol], map_price)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };

    Ok(rows)
}

/// Trading sessions stored for a symbol within [start, end]
pub fn session_dates(
    conn: &Connection,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<NaiveDate>> {
    let mut stmt = conn.prepare(
        "SELECT date FROM prices WHERE symbol = ?1 AND date >= ?2 AND date <= ?3 ORDER BY date ASC",
    )?;

    let dates = stmt
        .query_map(params![symbol, start, end], |row| row.get(0))?
        .collect::<std::result::Result<Vec<NaiveDate>, _>>()?;

    Ok(dates)
}

/// Number of bars stored for a symbol
pub fn count_prices(conn: &Connection, symbol: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM prices WHERE symbol = ?1",
        params![symbol],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Close for every symbol that has a bar on `date`
pub fn closes_on(conn: &Connection, date: NaiveDate) -> Result<Vec<(String, f64)>> {
    let mut stmt =
        conn.prepare("SELECT symbol, close FROM prices WHERE date = ?1 ORDER BY symbol")?;

    let closes = stmt
        .query_map(params![date], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(closes)
}

/// Latest close strictly before `date`
pub fn previous_close(conn: &Connection, symbol: &str, date: NaiveDate) -> Result<Option<f64>> {
    let close = conn
        .query_row(
            "SELECT close FROM prices WHERE symbol = ?1 AND date < ?2 ORDER BY date DESC LIMIT 1",
            params![symbol, date],
            |row| row.get(0),
        )
        .optional()?;
    Ok(close)
}

/// Distinct symbols with stored prices
pub fn list_symbols(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT symbol FROM prices ORDER BY symbol")?;
    let symbols = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(symbols)
}
