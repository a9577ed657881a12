//! Database connection management
//!
//! Opens SQLite connections that are handed to `SqliteParticipant`.
//! Connections are owned by whoever constructs the participant; nothing
//! here is process-global.

use crate::errors::{from_rusqlite, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// How long a statement waits on another writer before reporting busy
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a SQLite database at the given path
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    Connection::open(path).map_err(|e| from_rusqlite("open", e))
}

/// Open an in-memory SQLite database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory().map_err(|e| from_rusqlite("open", e))
}

/// Configure a connection with the settings participants expect
pub fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| from_rusqlite("configure", e))?;

    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| from_rusqlite("configure", e))?;

    Ok(())
}
