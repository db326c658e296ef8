//! Tokosync Cache - Local collection persistence
//!
//! SQLite-based storage for:
//! - Every synchronized collection, as ordered JSON records
//! - The last-restore marker consulted by the restore guard
//!
//! ## Architecture
//!
//! This crate implements the `ICollectionStore` and `IRestoreMarkerStore`
//! ports from `tokosync-core` using SQLite as the storage backend. It is a
//! driven (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteCollectionStore`] - Implementation of both storage ports
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use tokosync_cache::{DatabasePool, SqliteCollectionStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/tokosync/tokosync.db")).await?;
//! let store = SqliteCollectionStore::new(pool.pool().clone());
//! // Use store as ICollectionStore and IRestoreMarkerStore...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteCollectionStore;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
