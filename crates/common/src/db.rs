//! SQLite database for Peergate state persistence
//!
//! Tables:
//! - pool_counter: single row holding the last allocated pool id
//! - peers: provisioned tunnel peers
//! - enrollment_tokens: single-use, time-limited credentials (hashed)

use crate::Result;
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Expose the underlying connection for stores that manage their own
    /// queries within the shared state DB.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // WAL so the CLI can read while the server writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Pool counter (singleton row)
            CREATE TABLE IF NOT EXISTS pool_counter (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_allocated_id INTEGER NOT NULL CHECK (last_allocated_id >= 0),
                updated_at INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO pool_counter (id, last_allocated_id, updated_at)
                VALUES (1, 0, strftime('%s', 'now'));

            -- Peers
            CREATE TABLE IF NOT EXISTS peers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                public_key TEXT NOT NULL UNIQUE,
                address TEXT NOT NULL UNIQUE,
                pool_id INTEGER NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );

            -- Enrollment tokens (never deleted; audit trail)
            CREATE TABLE IF NOT EXISTS enrollment_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token_hash TEXT NOT NULL UNIQUE,
                expires_at INTEGER NOT NULL,
                used INTEGER NOT NULL DEFAULT 0,
                used_at INTEGER,
                created_by TEXT NOT NULL,
                note TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_enrollment_tokens_expires ON enrollment_tokens(expires_at);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so concurrent writers (including
    /// other processes sharing the file) are serialized for the whole
    /// closure. The transaction commits only if `f` returns `Ok`.
    pub fn with_immediate_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Current time as unix seconds
pub fn now_epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_schema_seeds_counter_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let db = Database::open(&path).unwrap();
            let conn = db.connection();
            let conn = conn.lock();
            conn.execute("UPDATE pool_counter SET last_allocated_id = 7 WHERE id = 1", [])
                .unwrap();
        }

        // Reopening must not reset the counter
        let db = Database::open(&path).unwrap();
        let conn = db.connection();
        let conn = conn.lock();
        let last: i64 = conn
            .query_row("SELECT last_allocated_id FROM pool_counter WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(last, 7);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_memory().unwrap();

        let result: Result<()> = db.with_immediate_transaction(|tx| {
            tx.execute("UPDATE pool_counter SET last_allocated_id = 99 WHERE id = 1", [])?;
            Err(Error::Internal("abort".to_string()))
        });
        assert!(result.is_err());

        let conn = db.connection();
        let conn = conn.lock();
        let last: i64 = conn
            .query_row("SELECT last_allocated_id FROM pool_counter", [], |row| row.get(0))
            .unwrap();
        assert_eq!(last, 0);
    }
}
