//! SQLite pool for the local collection store
//!
//! Every push listener, the pull pass and the write gateway write through
//! the same pool at once. Writers therefore wait on SQLite's lock for up to
//! [`WRITER_BUSY_TIMEOUT`] instead of failing with `SQLITE_BUSY`.
//!
//! The schema is versioned with `PRAGMA user_version`. Opening a database
//! migrates it up to [`SCHEMA_VERSION`], refuses one written by a newer
//! build, and checks that the tables the store relies on have the expected
//! columns.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

use crate::CacheError;

/// Schema version this build reads and writes
pub const SCHEMA_VERSION: i64 = 1;

/// How long a writer waits for the database lock
pub const WRITER_BUSY_TIMEOUT: Duration = Duration::from_secs(15);

/// Connections for a file database: one per concurrent writer class plus a reader
const FILE_MAX_CONNECTIONS: u32 = 4;

const INITIAL_SCHEMA: &str = include_str!("migrations/20261019_initial.sql");

/// Tables the store needs, with the columns it reads and writes
const REQUIRED_TABLES: &[(&str, &[&str])] = &[
    ("records", &["collection", "position", "record_id", "body"]),
    ("sync_meta", &["key", "value", "updated_at"]),
];

/// Pool of SQLite connections holding the local collections
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (or creates) the database file at `db_path`
    ///
    /// The parent directory is created if needed. The database runs in WAL
    /// mode with `synchronous = NORMAL`.
    ///
    /// # Errors
    ///
    /// - `CacheError::ConnectionFailed` if the file cannot be opened
    /// - `CacheError::MigrationFailed` if the schema is newer than this
    ///   build or lacks a required table or column
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(WRITER_BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to open local store at {}: {e}",
                    db_path.display()
                ))
            })?;

        let migrated_from = prepare_schema(&pool).await?;
        info!(
            path = %db_path.display(),
            schema_version = SCHEMA_VERSION,
            migrated_from,
            "Local store opened"
        );

        Ok(Self { pool })
    }

    /// Opens a private in-memory database
    ///
    /// Limited to one connection, since every in-memory connection would
    /// otherwise see its own empty database.
    ///
    /// # Errors
    ///
    /// Same as [`DatabasePool::new`].
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Failed to open in-memory store: {e}"))
            })?;

        prepare_schema(&pool).await?;
        debug!("In-memory local store opened");

        Ok(Self { pool })
    }

    /// The underlying sqlx pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Schema version recorded in the database
    pub async fn schema_version(&self) -> Result<i64, CacheError> {
        read_user_version(&self.pool).await
    }

    /// Closes every connection, checkpointing the WAL
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Migrates to [`SCHEMA_VERSION`] and verifies the result
///
/// Returns the version found before migrating.
async fn prepare_schema(pool: &SqlitePool) -> Result<i64, CacheError> {
    let found = read_user_version(pool).await?;
    if found > SCHEMA_VERSION {
        return Err(CacheError::MigrationFailed(format!(
            "database schema version {found} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    if found < SCHEMA_VERSION {
        sqlx::raw_sql(INITIAL_SCHEMA)
            .execute(pool)
            .await
            .map_err(|e| CacheError::MigrationFailed(format!("Initial schema failed: {e}")))?;
        let bump = format!("PRAGMA user_version = {SCHEMA_VERSION};");
        sqlx::raw_sql(&bump)
            .execute(pool)
            .await
            .map_err(|e| CacheError::MigrationFailed(format!("Failed to record version: {e}")))?;
        debug!(from = found, to = SCHEMA_VERSION, "Schema migrated");
    }

    verify_schema(pool).await?;
    Ok(found)
}

async fn read_user_version(pool: &SqlitePool) -> Result<i64, CacheError> {
    sqlx::query_scalar::<_, i64>("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .map_err(|e| CacheError::QueryFailed(format!("Failed to read schema version: {e}")))
}

async fn verify_schema(pool: &SqlitePool) -> Result<(), CacheError> {
    for (table, columns) in REQUIRED_TABLES {
        let present: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
            .bind(*table)
            .fetch_all(pool)
            .await?;

        if present.is_empty() {
            return Err(CacheError::MigrationFailed(format!("table {table} is missing")));
        }
        let missing: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|column| !present.iter().any(|p| p == column))
            .collect();
        if !missing.is_empty() {
            return Err(CacheError::MigrationFailed(format!(
                "table {table} lacks column(s): {}",
                missing.join(", ")
            )));
        }
    }
    Ok(())
}
