//! SQLite implementation of the storage ports
//!
//! This module provides the concrete SQLite-based implementation of the
//! `ICollectionStore` and `IRestoreMarkerStore` ports defined in
//! tokosync-core.
//!
//! ## Type Mapping
//!
//! | Domain Type    | SQL Type | Strategy                                   |
//! |----------------|----------|--------------------------------------------|
//! | Collection     | TEXT     | `Collection::as_str()`                     |
//! | Record         | TEXT     | serde_json object                          |
//! | RecordId       | TEXT     | `RecordId::as_str()`, NULL when absent     |
//! | DateTime<Utc>  | TEXT     | ISO 8601 via `to_rfc3339()`                |
//!
//! Every multi-row write runs in one transaction, so readers see either the
//! old or the new collection.

use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use tokosync_core::domain::{Collection, Record, RecordId};
use tokosync_core::ports::{ICollectionStore, IRestoreMarkerStore};

use crate::CacheError;

/// `sync_meta` key of the restore marker
const LAST_RESTORE_KEY: &str = "last_restore_at";

/// SQLite-based implementation of the local storage ports
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct SqliteCollectionStore {
    pool: SqlitePool,
}

impl SqliteCollectionStore {
    /// Creates a new store instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

fn encode_record(record: &Record) -> Result<String, CacheError> {
    serde_json::to_string(record)
        .map_err(|e| CacheError::SerializationError(format!("Failed to encode record: {}", e)))
}

fn decode_record(collection: Collection, body: &str) -> Result<Record, CacheError> {
    serde_json::from_str(body).map_err(|e| {
        CacheError::SerializationError(format!(
            "Failed to decode record in {}: {}",
            collection, e
        ))
    })
}

async fn next_position(
    tx: &mut Transaction<'_, Sqlite>,
    collection: Collection,
) -> Result<i64, CacheError> {
    let next: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM records WHERE collection = ?",
    )
    .bind(collection.as_str())
    .fetch_one(&mut **tx)
    .await?;
    Ok(next)
}

async fn insert_at(
    tx: &mut Transaction<'_, Sqlite>,
    collection: Collection,
    position: i64,
    record: &Record,
) -> Result<(), CacheError> {
    let body = encode_record(record)?;
    let record_id = record.id().map(String::from);

    sqlx::query(
        "INSERT INTO records (collection, position, record_id, body) VALUES (?, ?, ?, ?)",
    )
    .bind(collection.as_str())
    .bind(position)
    .bind(record_id)
    .bind(body)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ============================================================================
// ICollectionStore implementation
// ============================================================================

#[async_trait::async_trait]
impl ICollectionStore for SqliteCollectionStore {
    async fn read_all(&self, collection: Collection) -> anyhow::Result<Vec<Record>> {
        let rows = sqlx::query("SELECT body FROM records WHERE collection = ? ORDER BY position")
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await?;

        let records = rows
            .iter()
            .map(|row| {
                let body: String = row.try_get("body")?;
                Ok(decode_record(collection, &body)?)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(records)
    }

    async fn replace_all(&self, collection: Collection, records: &[Record]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(collection.as_str())
            .execute(&mut *tx)
            .await?;

        for (position, record) in records.iter().enumerate() {
            insert_at(&mut tx, collection, position as i64, record).await?;
        }

        tx.commit().await?;

        tracing::trace!(%collection, count = records.len(), "Replaced collection");
        Ok(())
    }

    async fn append(&self, collection: Collection, records: &[Record]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let start = next_position(&mut tx, collection).await?;

        for (offset, record) in records.iter().enumerate() {
            insert_at(&mut tx, collection, start + offset as i64, record).await?;
        }

        tx.commit().await?;

        tracing::trace!(%collection, count = records.len(), "Appended records");
        Ok(())
    }

    async fn upsert(&self, collection: Collection, record: &Record) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = match record.id() {
            Some(id) => {
                sqlx::query_scalar(
                    "SELECT position FROM records \
                     WHERE collection = ? AND record_id = ? \
                     ORDER BY position LIMIT 1",
                )
                .bind(collection.as_str())
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await?
            }
            None => None,
        };

        match existing {
            Some(position) => {
                sqlx::query("UPDATE records SET body = ? WHERE collection = ? AND position = ?")
                    .bind(encode_record(record)?)
                    .bind(collection.as_str())
                    .bind(position)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                let position = next_position(&mut tx, collection).await?;
                insert_at(&mut tx, collection, position, record).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remove(&self, collection: Collection, id: &RecordId) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND record_id = ?")
            .bind(collection.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, collection: Collection) -> anyhow::Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

// ============================================================================
// IRestoreMarkerStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IRestoreMarkerStore for SqliteCollectionStore {
    async fn load_last_restore(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM sync_meta WHERE key = ?")
            .bind(LAST_RESTORE_KEY)
            .fetch_optional(&self.pool)
            .await?;

        match value {
            Some(s) => {
                let at = DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| {
                        CacheError::SerializationError(format!(
                            "Invalid restore marker '{}': {}",
                            s, e
                        ))
                    })?
                    .with_timezone(&Utc);
                Ok(Some(at))
            }
            None => Ok(None),
        }
    }

    async fn save_last_restore(&self, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO sync_meta (key, value, updated_at) VALUES (?, ?, ?)",
        )
        .bind(LAST_RESTORE_KEY)
        .bind(at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(at = %at, "Saved restore marker");
        Ok(())
    }
}
