// crates/db/src/lib.rs
//! Durable local store for sessions and blink samples.
//!
//! SQLite is the single source of truth while offline. Every mutating call
//! commits before it returns, so a successful return means the row is on disk.

mod migrations;
mod queries;

pub use queries::PendingCounts;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Failed to determine cache directory")]
    NoCacheDir,

    #[error("Failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),

    #[error("Corrupt {table} row {id}: {message}")]
    Corrupt {
        table: &'static str,
        id: i64,
        message: String,
    },
}

pub type DbResult<T> = Result<T, DbError>;

/// Main database handle wrapping a SQLite connection pool.
///
/// Cloning is cheap; clones share the pool and the write gate.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    db_path: PathBuf,
    /// Serializes writers issued through this handle (capture, timer, sync worker).
    write_gate: Arc<Mutex<()>>,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn new(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30))
            .log_slow_statements(
                tracing::log::LevelFilter::Warn,
                std::time::Duration::from_secs(5),
            );

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            db_path: path.to_owned(),
            write_gate: Arc::new(Mutex::new(())),
        };
        db.run_migrations().await?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    ///
    /// Pinned to a single connection that never idles out: an in-memory
    /// SQLite database lives exactly as long as its connection.
    pub async fn new_in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self {
            pool,
            db_path: PathBuf::new(),
            write_gate: Arc::new(Mutex::new(())),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all inline migrations.
    ///
    /// Uses a `_migrations` table to track which migrations have already been
    /// applied, so that non-idempotent statements (e.g. ALTER TABLE ADD COLUMN)
    /// are only executed once.
    async fn run_migrations(&self) -> DbResult<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS _migrations (version INTEGER PRIMARY KEY)")
            .execute(&self.pool)
            .await?;

        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM _migrations")
            .fetch_one(&self.pool)
            .await?;
        let current_version = row.0 as usize;

        for (i, migration) in migrations::MIGRATIONS.iter().enumerate() {
            let version = i + 1; // 1-based
            if version > current_version {
                match sqlx::query(migration).execute(&self.pool).await {
                    Ok(_) => {}
                    Err(e) if e.to_string().contains("duplicate column name") => {
                        // Databases written before version tracking already
                        // carry the column.
                    }
                    Err(e) => return Err(e.into()),
                }
                sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
                    .bind(version as i64)
                    .execute(&self.pool)
                    .await?;
            }
        }

        self.ensure_schema_columns().await?;

        Ok(())
    }

    /// Ensure the columns reconciliation depends on exist regardless of
    /// migration tracking. Older client builds created these tables without
    /// the soft-delete, remote-id and session link columns.
    async fn ensure_schema_columns(&self) -> DbResult<()> {
        let expected = &[
            ("sessions", "cloud_session_id", "INTEGER"),
            ("sessions", "deleted", "INTEGER NOT NULL DEFAULT 0"),
            ("local_blinks", "session_id", "INTEGER"),
        ];
        for (table, col, typedef) in expected {
            self.add_column_if_missing(table, col, typedef).await?;
        }
        Ok(())
    }

    /// Add a column to a table if it doesn't already exist.
    async fn add_column_if_missing(
        &self,
        table: &str,
        column: &str,
        typedef: &str,
    ) -> DbResult<()> {
        let columns: Vec<(String,)> =
            sqlx::query_as(&format!("SELECT name FROM pragma_table_info('{}')", table))
                .fetch_all(&self.pool)
                .await?;

        let has_column = columns.iter().any(|(name,)| name == column);
        if !has_column {
            let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, typedef);
            sqlx::query(&sql).execute(&self.pool).await?;
            info!("Schema reconciliation: added {}.{}", table, column);
        }

        Ok(())
    }

    /// Take the write gate. Held for the duration of one statement or
    /// transaction, never across unrelated awaits.
    pub(crate) async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.write_gate.lock().await
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the path to the database file.
    /// Returns an empty path for in-memory databases.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Close every pooled connection. Called last on shutdown, after the final flush.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Returns the default database path: `~/.cache/lumina/lumina.db`
pub fn default_db_path() -> DbResult<PathBuf> {
    lumina_core::paths::db_path().ok_or(DbError::NoCacheDir)
}
