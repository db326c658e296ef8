//! Pull remote port (driven/secondary port)
//!
//! The pull remote is a relational store reachable only by request and
//! response. It has no change feed; the engine polls it.

use serde_json::Value;

use crate::domain::RecordId;

/// Options for a pull query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    /// Column to order by
    pub order_by: Option<String>,
    /// Order descending instead of ascending
    pub descending: bool,
    /// Maximum number of rows returned
    pub limit: Option<u32>,
}

impl QueryFilter {
    /// Creates an empty filter (every row, server order)
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders by a column, newest first
    pub fn newest_first(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self.descending = true;
        self
    }

    /// Caps the number of rows
    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }
}

/// Port trait for the query-only remote
#[async_trait::async_trait]
pub trait IPullRemote: Send + Sync {
    /// Returns rows of `table`
    async fn query(&self, table: &str, filter: &QueryFilter) -> anyhow::Result<Vec<Value>>;

    /// Inserts one row
    async fn insert(&self, table: &str, row: &Value) -> anyhow::Result<()>;

    /// Updates the row whose `id` equals `id`
    async fn update_where(&self, table: &str, id: &RecordId, patch: &Value) -> anyhow::Result<()>;

    /// Deletes the row whose `id` equals `id`
    async fn delete_where(&self, table: &str, id: &RecordId) -> anyhow::Result<()>;
}
