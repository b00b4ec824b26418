//! SQLite database handle and schema bootstrap.
//!
//! Storage is append-only: chunks and features are inserted once and never
//! updated. The handle is cloned into each store at construction so no
//! component reaches for ambient/global connection state.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid feature row: {0}")]
    InvalidFeature(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe database connection wrapper.
///
/// Cloning is cheap; all clones share one underlying connection.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at the given path and bootstrap the
    /// schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. Used by tests and the one-shot CLI paths
    /// that do not need durability.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migration_v1(conn)?;
        conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [1])?;
    }

    Ok(())
}

fn migration_v1(conn: &Connection) -> StoreResult<()> {
    // Signal chunks: one row per ingested segment. Timestamps are RFC3339
    // UTC strings, which order lexicographically; samples are a JSON array.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS signal_chunks (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            sampling_rate_hz REAL NOT NULL,
            t_start TEXT NOT NULL,
            t_end TEXT NOT NULL,
            values_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chunks_patient_channel_tstart
         ON signal_chunks(patient_id, channel, t_start)",
        [],
    )?;

    // Features: append-only, one row per named statistic. Identity is
    // (patient_id, window_start, window_end, name, method); no UNIQUE
    // constraint, recomputation adds rows.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS features (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            window_start TEXT NOT NULL,
            window_end TEXT NOT NULL,
            name TEXT NOT NULL,
            value REAL NOT NULL,
            method TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_features_patient_window
         ON features(patient_id, window_start, window_end)",
        [],
    )?;

    Ok(())
}
