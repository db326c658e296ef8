//! Local collection store port (driven/secondary port)
//!
//! The local store is the single source of truth the application reads.
//! Each collection is an ordered list of records.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, in-memory) and don't need domain-level classification.
//! - `replace_all` must be atomic: readers observe either the old or the
//!   new collection, never a mix.
//! - The store performs no merging and no identity matching; callers
//!   decide what to write.

use crate::domain::{Collection, Record, RecordId};

/// Port trait for durable per-collection record storage
#[async_trait::async_trait]
pub trait ICollectionStore: Send + Sync {
    /// Returns every record of a collection, in stored order
    ///
    /// A collection that was never written reads as empty.
    async fn read_all(&self, collection: Collection) -> anyhow::Result<Vec<Record>>;

    /// Atomically replaces the whole collection
    async fn replace_all(&self, collection: Collection, records: &[Record]) -> anyhow::Result<()>;

    /// Appends records after the existing ones
    async fn append(&self, collection: Collection, records: &[Record]) -> anyhow::Result<()>;

    /// Replaces the record with the same id, or appends it if absent
    ///
    /// Records without an id are appended.
    async fn upsert(&self, collection: Collection, record: &Record) -> anyhow::Result<()>;

    /// Removes the record with the given id
    ///
    /// Returns `true` if a record was removed.
    async fn remove(&self, collection: Collection, id: &RecordId) -> anyhow::Result<bool>;

    /// Returns the number of records in a collection
    async fn count(&self, collection: Collection) -> anyhow::Result<usize> {
        Ok(self.read_all(collection).await?.len())
    }
}
