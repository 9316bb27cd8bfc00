#![forbid(unsafe_code)]

mod cache;
mod contracts;
mod error;
mod locks;
mod modules;
mod queue;
mod roots;
mod tracking;

pub use error::StoreError;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_FILE: &str = "sift.db";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    /// Open (creating and migrating as needed) the store under the given
    /// directory. Every worker or processor opens its own handle; handles
    /// on the same directory share one coordination domain.
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join(DB_FILE);
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        install_schema(&conn)?;

        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS locks (
          key TEXT PRIMARY KEY,
          lock_id TEXT NOT NULL,
          expires_at_ms INTEGER NOT NULL,
          acquired_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS modules (
          name TEXT PRIMARY KEY,
          version TEXT NOT NULL,
          module_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS work_queues (
          name TEXT PRIMARY KEY,
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS requests (
          id TEXT PRIMARY KEY,
          root_id TEXT NOT NULL,
          queue TEXT,
          cache_key TEXT,
          status TEXT NOT NULL,
          owner TEXT,
          claim_expires_at_ms INTEGER,
          request_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_requests_queue_status
          ON requests(queue, status, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_requests_cache_key
          ON requests(cache_key);

        CREATE TABLE IF NOT EXISTS cache (
          cache_key TEXT PRIMARY KEY,
          analysis_json TEXT NOT NULL,
          expires_at_ms INTEGER,
          cached_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS roots (
          id TEXT PRIMARY KEY,
          root_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );
        "#,
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        rusqlite::params!["schema_version", "v1"],
    )?;
    Ok(())
}

pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return 0,
    };

    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
