//! SQLite connection utilities

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Open a file-backed connection configured for several processes sharing it
pub fn create_connection(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;

    // WAL lets the live pipeline, backfill workers and validator read while
    // one of them writes
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    conn.busy_timeout(Duration::from_secs(10))?;

    Ok(conn)
}
