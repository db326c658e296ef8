//! Table store client (pull remote)
//!
//! Talks to a PostgREST-style row store at `{base_url}/rest/v1/{table}`.
//! The API key goes in both the `apikey` header and the bearer token.
//! Rows are matched by their `id` column (`?id=eq.{id}`).

use anyhow::Context;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use tokosync_core::domain::RecordId;
use tokosync_core::ports::{IPullRemote, QueryFilter};

use crate::retry::send_with_retry;
use crate::{check_status, RemoteError};

/// HTTP client for the table store
#[derive(Debug, Clone)]
pub struct TableStoreClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl TableStoreClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of `table`
    pub fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.table_url(table));
        match &self.api_key {
            Some(key) => builder.header("apikey", key).bearer_auth(key),
            None => builder,
        }
    }

    /// Query parameters for a select
    fn select_params(filter: &QueryFilter) -> Vec<(&'static str, String)> {
        let mut params = vec![("select", "*".to_string())];
        if let Some(column) = &filter.order_by {
            let direction = if filter.descending { "desc" } else { "asc" };
            params.push(("order", format!("{column}.{direction}")));
        }
        if let Some(limit) = filter.limit {
            params.push(("limit", limit.to_string()));
        }
        params
    }

    fn id_param(id: &RecordId) -> [(&'static str, String); 1] {
        [("id", format!("eq.{id}"))]
    }

    /// Reads rows of `table`
    pub async fn select(&self, table: &str, filter: &QueryFilter) -> Result<Vec<Value>, RemoteError> {
        let params = Self::select_params(filter);
        let response =
            send_with_retry(|| self.request(Method::GET, table).query(&params), table).await?;
        let response = check_status(response).await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        match body {
            Value::Array(rows) => {
                debug!(table, rows = rows.len(), "Selected rows");
                Ok(rows)
            }
            other => Err(RemoteError::InvalidResponse(format!(
                "expected an array of rows from {table}, got {}",
                kind_of(&other)
            ))),
        }
    }

    /// Inserts one row
    pub async fn insert_row(&self, table: &str, row: &Value) -> Result<(), RemoteError> {
        let response = send_with_retry(
            || {
                self.request(Method::POST, table)
                    .header("Prefer", "return=minimal")
                    .json(row)
            },
            table,
        )
        .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Updates the row with the given id
    pub async fn update_row(&self, table: &str, id: &RecordId, patch: &Value) -> Result<(), RemoteError> {
        let params = Self::id_param(id);
        let response = send_with_retry(
            || {
                self.request(Method::PATCH, table)
                    .query(&params)
                    .header("Prefer", "return=minimal")
                    .json(patch)
            },
            table,
        )
        .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Deletes the row with the given id
    pub async fn delete_row(&self, table: &str, id: &RecordId) -> Result<(), RemoteError> {
        let params = Self::id_param(id);
        let response =
            send_with_retry(|| self.request(Method::DELETE, table).query(&params), table).await?;
        check_status(response).await?;
        Ok(())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait::async_trait]
impl IPullRemote for TableStoreClient {
    async fn query(&self, table: &str, filter: &QueryFilter) -> anyhow::Result<Vec<Value>> {
        self.select(table, filter)
            .await
            .with_context(|| format!("Failed to query {table}"))
    }

    async fn insert(&self, table: &str, row: &Value) -> anyhow::Result<()> {
        self.insert_row(table, row)
            .await
            .with_context(|| format!("Failed to insert into {table}"))
    }

    async fn update_where(&self, table: &str, id: &RecordId, patch: &Value) -> anyhow::Result<()> {
        self.update_row(table, id, patch)
            .await
            .with_context(|| format!("Failed to update {table} row {id}"))
    }

    async fn delete_where(&self, table: &str, id: &RecordId) -> anyhow::Result<()> {
        self.delete_row(table, id)
            .await
            .with_context(|| format!("Failed to delete {table} row {id}"))
    }
}
