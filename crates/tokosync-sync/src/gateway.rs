//! Write-through gateway for local mutations
//!
//! Every create, update and delete is applied to the local store first and
//! recorded as a pending intent, then forwarded to whichever remotes the
//! collection is bound to. A remote failure never rolls the local change
//! back: the intent stays pending with its error until a later snapshot
//! shows the change landed.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use tokosync_core::domain::{Collection, CollectionDef, Record, RecordId, ID_FIELD};
use tokosync_core::ports::{IPullRemote, IPushRemote};

use crate::context::SyncContext;
use crate::pending::WriteKind;
use crate::SyncError;

/// How the remotes answered a forwarded write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Every bound remote accepted the write
    Confirmed,
    /// At least one bound remote failed; the intent stays pending
    Pending { errors: Vec<String> },
    /// No bound remote is configured; the write is local only
    LocalOnly,
}

/// Result of a gateway write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReceipt {
    /// Id of the record written
    pub id: RecordId,
    /// The record as stored locally; `None` after a delete
    pub record: Option<Record>,
    pub remote: RemoteOutcome,
}

/// One forwarded request
#[derive(Clone, Copy)]
enum Forward<'a> {
    Create(&'a Value),
    Update(&'a Value),
    Delete,
}

/// Applies local mutations and forwards them to the remotes
#[derive(Clone)]
pub struct WriteThroughGateway {
    ctx: SyncContext,
    push: Option<Arc<dyn IPushRemote>>,
    pull: Option<Arc<dyn IPullRemote>>,
}

impl WriteThroughGateway {
    pub fn new(
        ctx: SyncContext,
        push: Option<Arc<dyn IPushRemote>>,
        pull: Option<Arc<dyn IPullRemote>>,
    ) -> Self {
        Self { ctx, push, pull }
    }

    fn writable(&self, collection: Collection) -> Result<&CollectionDef, SyncError> {
        let def = self.ctx.def(collection)?;
        if !def.writes.is_writable() {
            return Err(SyncError::ReadOnlyCollection(collection));
        }
        Ok(def)
    }

    /// Creates a record
    ///
    /// An `id` is generated when the item carries none.
    ///
    /// # Errors
    /// - [`SyncError::ReadOnlyCollection`] for derived collections
    /// - [`SyncError::DomainError`] if the item is not an object or its id is invalid
    /// - [`SyncError::Store`] if the local write fails
    pub async fn create(
        &self,
        collection: Collection,
        item: Value,
    ) -> Result<WriteReceipt, SyncError> {
        let def = self.writable(collection)?;
        let mut record = Record::from_value(collection, item)?;

        let id = match record.get(ID_FIELD) {
            None => RecordId::generate(),
            Some(raw) => RecordId::from_json(raw).ok_or_else(|| {
                SyncError::InvalidPayload(format!("unusable id in {collection}: {raw}"))
            })?,
        };
        record.set_id(&id);

        self.ctx
            .store
            .upsert(collection, &record)
            .await
            .map_err(SyncError::Store)?;
        self.ctx.pending.record(
            collection,
            id.clone(),
            WriteKind::Create,
            record.as_map().clone(),
            self.ctx.clock.now(),
        );

        let body = record.to_value();
        let remote = self.forward(def, &id, Forward::Create(&body)).await;
        debug!(%collection, %id, ?remote, "Created record");

        Ok(WriteReceipt {
            id,
            record: Some(record),
            remote,
        })
    }

    /// Applies a partial update to an existing record
    ///
    /// # Errors
    /// - [`SyncError::InvalidPayload`] if the patch is not an object or changes the id
    /// - [`SyncError::RecordNotFound`] if no local record has the id
    pub async fn update(
        &self,
        collection: Collection,
        id: &RecordId,
        patch: Value,
    ) -> Result<WriteReceipt, SyncError> {
        let def = self.writable(collection)?;

        let Value::Object(mut fields) = patch else {
            return Err(SyncError::InvalidPayload(format!(
                "update of {collection}/{id} is not an object"
            )));
        };
        if let Some(raw) = fields.shift_remove(ID_FIELD) {
            if RecordId::from_json(&raw).as_ref() != Some(id) {
                return Err(SyncError::InvalidPayload(format!(
                    "update of {collection}/{id} tries to change the id"
                )));
            }
        }

        let mut record = self.find(collection, id).await?;
        record.apply_patch(&fields);

        self.ctx
            .store
            .upsert(collection, &record)
            .await
            .map_err(SyncError::Store)?;
        self.ctx.pending.record(
            collection,
            id.clone(),
            WriteKind::Update,
            fields.clone(),
            self.ctx.clock.now(),
        );

        let body = Value::Object(fields);
        let remote = self.forward(def, id, Forward::Update(&body)).await;
        debug!(%collection, %id, ?remote, "Updated record");

        Ok(WriteReceipt {
            id: id.clone(),
            record: Some(record),
            remote,
        })
    }

    /// Deletes a record
    ///
    /// # Errors
    /// - [`SyncError::RecordNotFound`] if no local record has the id
    pub async fn delete(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<WriteReceipt, SyncError> {
        let def = self.writable(collection)?;

        let removed = self
            .ctx
            .store
            .remove(collection, id)
            .await
            .map_err(SyncError::Store)?;
        if !removed {
            return Err(SyncError::RecordNotFound {
                collection,
                id: id.clone(),
            });
        }
        self.ctx.pending.record(
            collection,
            id.clone(),
            WriteKind::Delete,
            Map::new(),
            self.ctx.clock.now(),
        );

        let remote = self.forward(def, id, Forward::Delete).await;
        debug!(%collection, %id, ?remote, "Deleted record");

        Ok(WriteReceipt {
            id: id.clone(),
            record: None,
            remote,
        })
    }

    async fn find(&self, collection: Collection, id: &RecordId) -> Result<Record, SyncError> {
        self.ctx
            .store
            .read_all(collection)
            .await
            .map_err(SyncError::Store)?
            .into_iter()
            .find(|r| r.id().as_ref() == Some(id))
            .ok_or_else(|| SyncError::RecordNotFound {
                collection,
                id: id.clone(),
            })
    }

    /// Sends one write to every bound and configured remote
    async fn forward(&self, def: &CollectionDef, id: &RecordId, op: Forward<'_>) -> RemoteOutcome {
        let mut attempted = false;
        let mut errors = Vec::new();

        if let (true, Some(push)) = (def.writes.writes_push(), &self.push) {
            attempted = true;
            let path = def.record_path(id);
            let result = match op {
                Forward::Create(body) => push.write_full(&path, body).await,
                Forward::Update(body) => push.write_patch(&path, body).await,
                Forward::Delete => push.delete(&path).await,
            };
            if let Err(e) = result {
                warn!(path = %path, error = %e, "Push remote write failed, kept pending");
                errors.push(format!("push: {e}"));
            }
        }

        if let (true, Some(pull), Some(table)) = (def.writes.writes_pull(), &self.pull, def.pull_table)
        {
            attempted = true;
            let result = match op {
                Forward::Create(body) => pull.insert(table, body).await,
                Forward::Update(body) => pull.update_where(table, id, body).await,
                Forward::Delete => pull.delete_where(table, id).await,
            };
            if let Err(e) = result {
                warn!(table, %id, error = %e, "Pull remote write failed, kept pending");
                errors.push(format!("pull: {e}"));
            }
        }

        if !attempted {
            self.ctx.pending.confirm(def.collection, id);
            return RemoteOutcome::LocalOnly;
        }
        if errors.is_empty() {
            self.ctx.pending.confirm(def.collection, id);
            RemoteOutcome::Confirmed
        } else {
            self.ctx.pending.fail(def.collection, id, errors.join("; "));
            RemoteOutcome::Pending { errors }
        }
    }
}
