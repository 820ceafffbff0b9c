//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite) behind a small bounded pool. Every connection is
//! opened up front; idle ones wait in a bounded channel and a checkout
//! blocks until one is returned. In-memory databases use a single
//! connection since separate in-memory connections do not share data.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rusqlite::Connection;

use crate::config::DatabaseConfig;

pub mod error;
pub mod migrations;
pub mod video_repo;
pub mod work_repo;

pub use error::DatabaseError;

struct Pool {
    idle_tx: Sender<Connection>,
    idle_rx: Receiver<Connection>,
    size: usize,
    checkout_timeout: Duration,
}

/// Thread-safe database handle. Cloning is cheap (inner `Arc`).
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool>,
}

/// A connection checked out of the pool; returned on drop.
pub struct PooledConnection<'a> {
    conn: Option<Connection>,
    pool: &'a Pool,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // The channel holds exactly `size` slots, so this never blocks.
            let _ = self.pool.idle_tx.send(conn);
        }
    }
}

impl Database {
    /// Opens (or creates) the database file, runs pending migrations and
    /// fills the pool with `max_open` connections.
    pub fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let path = config.path.as_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let size = config.max_open.max(1);
        let mut conns = Vec::with_capacity(size);

        let first = open_file_connection(path, busy_timeout)?;
        first.execute_batch("PRAGMA journal_mode=WAL;")?;
        migrations::run_all(&first)?;
        conns.push(first);

        for _ in 1..size {
            conns.push(open_file_connection(path, busy_timeout)?);
        }

        log::info!(
            "Database opened at {} ({} connections)",
            path.display(),
            size
        );

        Ok(Self::from_connections(conns, busy_timeout))
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;

        Ok(Self::from_connections(vec![conn], Duration::from_secs(5)))
    }

    fn from_connections(conns: Vec<Connection>, checkout_timeout: Duration) -> Self {
        let size = conns.len();
        let (idle_tx, idle_rx) = bounded(size);
        for conn in conns {
            let _ = idle_tx.send(conn);
        }
        Self {
            pool: Arc::new(Pool {
                idle_tx,
                idle_rx,
                size,
                checkout_timeout,
            }),
        }
    }

    /// Number of connections the pool was opened with.
    pub fn max_open(&self) -> usize {
        self.pool.size
    }

    /// Number of connections currently idle.
    pub fn idle(&self) -> usize {
        self.pool.idle_rx.len()
    }

    /// Checks a connection out of the pool, waiting up to the busy timeout.
    pub fn get(&self) -> Result<PooledConnection<'_>, DatabaseError> {
        match self.pool.idle_rx.recv_timeout(self.pool.checkout_timeout) {
            Ok(conn) => Ok(PooledConnection {
                conn: Some(conn),
                pool: &self.pool,
            }),
            Err(RecvTimeoutError::Timeout) => Err(DatabaseError::PoolTimeout(
                self.pool.checkout_timeout.as_millis() as u64,
            )),
            Err(RecvTimeoutError::Disconnected) => Err(DatabaseError::PoolClosed),
        }
    }

    /// Runs `f` with a pooled connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.get()?;
        f(&mut conn)
    }
}

fn open_file_connection(path: &Path, busy_timeout: Duration) -> Result<Connection, DatabaseError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Returns the canonical database path: `~/.splatforge/data/splatforge.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".splatforge").join("data").join("splatforge.db"))
}

/// Current time in the RFC 3339 form stored in timestamp columns.
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_config(path: &Path, max_open: usize) -> DatabaseConfig {
        DatabaseConfig {
            path: path.to_path_buf(),
            max_open,
            busy_timeout_ms: 2_000,
        }
    }

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
        assert_eq!(db.max_open(), 1);
    }

    #[test]
    fn test_open_file_db_fills_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::open(&file_config(&path, 3)).unwrap();
        assert!(path.exists());
        assert_eq!(db.max_open(), 3);
        assert_eq!(db.idle(), 3);
    }

    #[test]
    fn test_checkout_returns_connection_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&file_config(&dir.path().join("t.db"), 2)).unwrap();

        let first = db.get().unwrap();
        let second = db.get().unwrap();
        assert_eq!(db.idle(), 0);
        drop(first);
        assert_eq!(db.idle(), 1);
        drop(second);
        assert_eq!(db.idle(), 2);
    }

    #[test]
    fn test_checkout_times_out_when_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = file_config(&dir.path().join("t.db"), 1);
        config.busy_timeout_ms = 50;
        let db = Database::open(&config).unwrap();

        let _held = db.get().unwrap();
        let err = db.get().err().unwrap();
        assert!(matches!(err, DatabaseError::PoolTimeout(50)));
    }

    #[test]
    fn test_database_is_clone() {
        let db = Database::open_in_memory().unwrap();
        let db2 = db.clone();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO videos (user_id, title, filename, created_at, updated_at)
                 VALUES (1, 't', 'clip.mp4', '2026-01-01', '2026-01-01')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        db2.with_conn(|conn| {
            let count: u32 = conn.query_row("SELECT COUNT(*) FROM videos", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_default_database_path() {
        if let Some(path) = default_database_path() {
            assert!(path.ends_with("splatforge.db"));
            assert!(path.to_string_lossy().contains(".splatforge"));
        }
    }
}
