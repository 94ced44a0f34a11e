// ABOUTME: Shared SQLite handle, schema migrations, and the atomic transaction helper.
// ABOUTME: Snapshot store and transaction log share one connection so one transaction spans both.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::Mutex;
use ulid::Ulid;

/// Errors from the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stored value: {0}")]
    Decode(String),
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS snapshots (
    snapshot_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    thread_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    state_data BLOB NOT NULL,
    serialization_format TEXT NOT NULL,
    checkpoint_type TEXT NOT NULL,
    agent_phase TEXT,
    execution_context TEXT NOT NULL,
    is_recovery_point INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_run_created
    ON snapshots (run_id, created_at DESC);

CREATE TABLE IF NOT EXISTS transactions (
    transaction_id TEXT PRIMARY KEY,
    snapshot_id TEXT,
    run_id TEXT NOT NULL,
    operation_type TEXT NOT NULL,
    triggered_by TEXT NOT NULL,
    execution_phase TEXT,
    status TEXT NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    metadata TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_run ON transactions (run_id);
CREATE INDEX IF NOT EXISTS idx_transactions_snapshot ON transactions (snapshot_id);
CREATE INDEX IF NOT EXISTS idx_transactions_recovery_id
    ON transactions (json_extract(metadata, '$.recovery_id'));";

/// Handle to the durable store: a single SQLite connection behind an async
/// mutex. Cloning shares the connection.
///
/// Recovery transactions are completed by the correlation id inside their
/// metadata rather than by primary key, so the schema carries an expression
/// index on `json_extract(metadata, '$.recovery_id')`.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// An in-memory database, used by tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside one native SQLite transaction. Commits when `f`
    /// returns Ok; any Err rolls the whole unit back.
    pub(crate) async fn transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` against the shared connection with autocommit semantics.
    pub(crate) async fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().await;
        f(&conn)
    }
}

pub(crate) fn parse_ulid(s: &str) -> Result<Ulid, StoreError> {
    s.parse()
        .map_err(|_| StoreError::Decode(format!("not a ULID: {}", s)))
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::Decode(format!("not an RFC 3339 timestamp: {}", s)))
}
