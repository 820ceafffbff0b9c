//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// No connection became idle within the busy timeout.
    #[error("Timed out after {0}ms waiting for a database connection")]
    PoolTimeout(u64),

    /// The connection pool was torn down.
    #[error("Database connection pool closed")]
    PoolClosed,

    /// A write-once column already holds a different value.
    #[error("{column} of {table} {id} is already set")]
    AlreadySet {
        table: &'static str,
        column: &'static str,
        id: i64,
    },
}
