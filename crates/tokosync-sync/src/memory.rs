//! In-memory port implementations
//!
//! Compiled for the engine's own tests and, behind the `test-util`
//! feature, for downstream tests that need an engine without SQLite or
//! network access. Every double records what was asked of
//! it and can be told to fail.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::bail;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use tokosync_core::domain::{Collection, Record, RecordId, ID_FIELD};
use tokosync_core::identity::normalize_identity_value;
use tokosync_core::ports::{
    ICollectionStore, IPullRemote, IPushRemote, IRestoreMarkerStore, QueryFilter, Subscription,
    SubscriptionHandle,
};

use crate::restore_guard::Clock;

/// Capacity of each subscription channel
const SUBSCRIPTION_BUFFER: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// MemoryCollectionStore
// ============================================================================

/// [`ICollectionStore`] held in a `HashMap`
#[derive(Debug, Default)]
pub struct MemoryCollectionStore {
    collections: Mutex<HashMap<Collection, Vec<Record>>>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a collection's content without counting it as a write
    pub fn seed(&self, collection: Collection, records: Vec<Record>) {
        lock(&self.collections).insert(collection, records);
    }

    /// Current content of a collection
    pub fn snapshot(&self, collection: Collection) -> Vec<Record> {
        lock(&self.collections)
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of mutating calls served
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes every call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory store is failing");
        }
        Ok(())
    }

    fn check_write(&self) -> anyhow::Result<()> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ICollectionStore for MemoryCollectionStore {
    async fn read_all(&self, collection: Collection) -> anyhow::Result<Vec<Record>> {
        self.check()?;
        Ok(self.snapshot(collection))
    }

    async fn replace_all(&self, collection: Collection, records: &[Record]) -> anyhow::Result<()> {
        self.check_write()?;
        lock(&self.collections).insert(collection, records.to_vec());
        Ok(())
    }

    async fn append(&self, collection: Collection, records: &[Record]) -> anyhow::Result<()> {
        self.check_write()?;
        lock(&self.collections)
            .entry(collection)
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }

    async fn upsert(&self, collection: Collection, record: &Record) -> anyhow::Result<()> {
        self.check_write()?;
        let mut collections = lock(&self.collections);
        let records = collections.entry(collection).or_default();
        let existing = record
            .id()
            .and_then(|id| records.iter().position(|r| r.id().as_ref() == Some(&id)));
        match existing {
            Some(i) => records[i] = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn remove(&self, collection: Collection, id: &RecordId) -> anyhow::Result<bool> {
        self.check_write()?;
        let mut collections = lock(&self.collections);
        let records = collections.entry(collection).or_default();
        let before = records.len();
        records.retain(|r| r.id().as_ref() != Some(id));
        Ok(records.len() != before)
    }
}

// ============================================================================
// MemoryRestoreMarker
// ============================================================================

/// [`IRestoreMarkerStore`] held in memory
#[derive(Debug, Default)]
pub struct MemoryRestoreMarker {
    at: Mutex<Option<DateTime<Utc>>>,
    failing: AtomicBool,
}

impl MemoryRestoreMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a marker that already holds a restore time
    pub fn restored_at(at: DateTime<Utc>) -> Self {
        Self {
            at: Mutex::new(Some(at)),
            failing: AtomicBool::new(false),
        }
    }

    /// The stored value, bypassing the failure toggle
    pub fn stored(&self) -> Option<DateTime<Utc>> {
        *lock(&self.at)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl IRestoreMarkerStore for MemoryRestoreMarker {
    async fn load_last_restore(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("restore marker unavailable");
        }
        Ok(self.stored())
    }

    async fn save_last_restore(&self, at: DateTime<Utc>) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("restore marker unavailable");
        }
        *lock(&self.at) = Some(at);
        Ok(())
    }
}

// ============================================================================
// ManualClock
// ============================================================================

/// [`Clock`] that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or_default()
    }
}

// ============================================================================
// MemoryPushRemote
// ============================================================================

/// A write the push remote received
#[derive(Debug, Clone, PartialEq)]
pub enum PushWrite {
    Full { path: String, value: Value },
    Patch { path: String, value: Value },
    Delete { path: String },
}

impl PushWrite {
    pub fn path(&self) -> &str {
        match self {
            PushWrite::Full { path, .. }
            | PushWrite::Patch { path, .. }
            | PushWrite::Delete { path } => path,
        }
    }
}

#[derive(Debug, Default)]
struct PushState {
    tree: Map<String, Value>,
    subscribers: HashMap<String, Vec<(usize, mpsc::Sender<Option<Value>>)>>,
    failing_paths: HashSet<String>,
    writes: Vec<PushWrite>,
    next_subscriber: usize,
}

#[derive(Debug, Default)]
struct PushInner {
    state: Mutex<PushState>,
    fail_writes: AtomicBool,
    echo_writes: AtomicBool,
    opened: AtomicUsize,
    released: AtomicUsize,
}

/// [`IPushRemote`] over an in-memory JSON tree
///
/// Snapshots are delivered only when [`MemoryPushRemote::emit`] is called,
/// unless write echo is enabled, in which case every write re-delivers the
/// affected subscribed paths like the real store does.
#[derive(Debug, Clone, Default)]
pub struct MemoryPushRemote {
    inner: Arc<PushInner>,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn value_at<'a>(tree: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let segs = segments(path);
    let (first, rest) = segs.split_first()?;
    let mut node = tree.get(*first)?;
    for seg in rest {
        node = match node {
            Value::Object(map) => map.get(*seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

fn set_at(tree: &mut Map<String, Value>, path: &str, value: Option<Value>) {
    let segs = segments(path);
    let Some((last, parents)) = segs.split_last() else {
        return;
    };
    let mut node = tree;
    for seg in parents {
        let child = node
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        node = match child {
            Value::Object(map) => map,
            _ => return,
        };
    }
    match value {
        Some(v) if !v.is_null() => {
            node.insert(last.to_string(), v);
        }
        _ => {
            node.shift_remove(*last);
        }
    }
}

impl MemoryPushRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-delivers snapshots after every write
    pub fn with_echo(self) -> Self {
        self.inner.echo_writes.store(true, Ordering::SeqCst);
        self
    }

    /// Sets the content of `path` without notifying subscribers
    pub fn seed(&self, path: &str, value: Value) {
        set_at(&mut lock(&self.inner.state).tree, path, Some(value));
    }

    /// Sets the content of `path` and delivers it to every subscriber of `path`
    pub async fn emit(&self, path: &str, value: Option<Value>) {
        let senders = {
            let mut state = lock(&self.inner.state);
            set_at(&mut state.tree, path, value.clone());
            state
                .subscribers
                .get(path)
                .map(|subs| subs.iter().map(|(_, tx)| tx.clone()).collect::<Vec<_>>())
                .unwrap_or_default()
        };
        for tx in senders {
            let _ = tx.send(value.clone()).await;
        }
    }

    /// Content currently stored at `path`
    pub fn value(&self, path: &str) -> Option<Value> {
        value_at(&lock(&self.inner.state).tree, path).cloned()
    }

    /// Every write received, in order
    pub fn writes(&self) -> Vec<PushWrite> {
        lock(&self.inner.state).writes.clone()
    }

    /// Paths that received a delete
    pub fn deleted_paths(&self) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                PushWrite::Delete { path } => Some(path),
                _ => None,
            })
            .collect()
    }

    /// Makes every write fail
    pub fn set_fail_writes(&self, failing: bool) {
        self.inner.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Makes subscriptions to `path` fail
    pub fn fail_subscribe(&self, path: &str) {
        lock(&self.inner.state)
            .failing_paths
            .insert(path.to_string());
    }

    /// Subscriptions opened so far
    pub fn opened_count(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Subscriptions released so far
    pub fn released_count(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Subscriptions currently live
    pub fn live_count(&self) -> usize {
        lock(&self.inner.state)
            .subscribers
            .values()
            .map(Vec::len)
            .sum()
    }

    fn record_write(&self, write: PushWrite) -> anyhow::Result<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            bail!("push remote write failed: {}", write.path());
        }
        let mut state = lock(&self.inner.state);
        match &write {
            PushWrite::Full { path, value } => set_at(&mut state.tree, path, Some(value.clone())),
            PushWrite::Patch { path, value } => {
                let mut merged = value_at(&state.tree, path)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                if let Value::Object(patch) = value {
                    for (k, v) in patch {
                        merged.insert(k.clone(), v.clone());
                    }
                }
                set_at(&mut state.tree, path, Some(Value::Object(merged)));
            }
            PushWrite::Delete { path } => set_at(&mut state.tree, path, None),
        }
        state.writes.push(write);
        Ok(())
    }

    async fn echo(&self, written: &str) {
        if !self.inner.echo_writes.load(Ordering::SeqCst) {
            return;
        }
        let deliveries: Vec<_> = {
            let state = lock(&self.inner.state);
            state
                .subscribers
                .iter()
                .filter(|(path, _)| {
                    written == path.as_str() || written.starts_with(&format!("{path}/"))
                })
                .flat_map(|(path, subs)| {
                    let value = value_at(&state.tree, path).cloned();
                    subs.iter().map(move |(_, tx)| (tx.clone(), value.clone()))
                })
                .collect()
        };
        for (tx, value) in deliveries {
            let _ = tx.send(value).await;
        }
    }
}

#[async_trait::async_trait]
impl IPushRemote for MemoryPushRemote {
    async fn subscribe(&self, path: &str) -> anyhow::Result<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let (id, initial) = {
            let mut state = lock(&self.inner.state);
            if state.failing_paths.contains(path) {
                bail!("subscription to {path} refused");
            }
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            let initial = value_at(&state.tree, path).cloned();
            state
                .subscribers
                .entry(path.to_string())
                .or_default()
                .push((id, tx.clone()));
            (id, initial)
        };
        self.inner.opened.fetch_add(1, Ordering::SeqCst);

        // Buffer is empty, so the first snapshot always fits
        let _ = tx.try_send(initial);

        let inner = Arc::clone(&self.inner);
        let owned_path = path.to_string();
        let handle = SubscriptionHandle::new(path, move || {
            let mut state = lock(&inner.state);
            if let Some(subs) = state.subscribers.get_mut(&owned_path) {
                subs.retain(|(sub_id, _)| *sub_id != id);
            }
            inner.released.fetch_add(1, Ordering::SeqCst);
        });

        Ok(Subscription {
            path: path.to_string(),
            snapshots: rx,
            handle,
        })
    }

    async fn read_once(&self, path: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.value(path))
    }

    async fn write_full(&self, path: &str, value: &Value) -> anyhow::Result<()> {
        self.record_write(PushWrite::Full {
            path: path.to_string(),
            value: value.clone(),
        })?;
        self.echo(path).await;
        Ok(())
    }

    async fn write_patch(&self, path: &str, patch: &Value) -> anyhow::Result<()> {
        self.record_write(PushWrite::Patch {
            path: path.to_string(),
            value: patch.clone(),
        })?;
        self.echo(path).await;
        Ok(())
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        self.record_write(PushWrite::Delete {
            path: path.to_string(),
        })?;
        self.echo(path).await;
        Ok(())
    }
}

// ============================================================================
// MemoryPullRemote
// ============================================================================

/// A write the pull remote received
#[derive(Debug, Clone, PartialEq)]
pub enum PullWrite {
    Insert { table: String, row: Value },
    Update { table: String, id: String, patch: Value },
    Delete { table: String, id: String },
}

#[derive(Debug, Default)]
struct PullState {
    tables: HashMap<String, Vec<Value>>,
    failing_tables: HashSet<String>,
    writes: Vec<PullWrite>,
    queries: Vec<(String, QueryFilter)>,
    query_delay: Option<Duration>,
}

/// [`IPullRemote`] over in-memory tables
#[derive(Debug, Clone, Default)]
pub struct MemoryPullRemote {
    state: Arc<Mutex<PullState>>,
    fail_writes: Arc<AtomicBool>,
}

fn row_has_id(row: &Value, id: &RecordId) -> bool {
    row.get(ID_FIELD)
        .and_then(normalize_identity_value)
        .is_some_and(|v| v == id.as_str())
}

fn sort_key(row: &Value, column: &str) -> String {
    match row.get(column) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

impl MemoryPullRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a table's rows
    pub fn set_table(&self, table: &str, rows: Vec<Value>) {
        lock(&self.state).tables.insert(table.to_string(), rows);
    }

    /// Current rows of a table
    pub fn table(&self, table: &str) -> Vec<Value> {
        lock(&self.state)
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes queries against `table` fail
    pub fn fail_table(&self, table: &str) {
        lock(&self.state)
            .failing_tables
            .insert(table.to_string());
    }

    /// Makes every write fail
    pub fn set_fail_writes(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Delays every query, to keep a pass in flight
    pub fn set_query_delay(&self, delay: Option<Duration>) {
        lock(&self.state).query_delay = delay;
    }

    /// Every query served, in order
    pub fn queries(&self) -> Vec<(String, QueryFilter)> {
        lock(&self.state).queries.clone()
    }

    /// Every write received, in order
    pub fn writes(&self) -> Vec<PullWrite> {
        lock(&self.state).writes.clone()
    }

    fn check_write(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("pull remote write failed");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IPullRemote for MemoryPullRemote {
    async fn query(&self, table: &str, filter: &QueryFilter) -> anyhow::Result<Vec<Value>> {
        let delay = {
            let mut state = lock(&self.state);
            state.queries.push((table.to_string(), filter.clone()));
            state.query_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = lock(&self.state);
        if state.failing_tables.contains(table) {
            bail!("query on {table} failed");
        }
        let mut rows = state.tables.get(table).cloned().unwrap_or_default();
        if let Some(column) = &filter.order_by {
            rows.sort_by_key(|row| sort_key(row, column));
            if filter.descending {
                rows.reverse();
            }
        }
        if let Some(limit) = filter.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: &Value) -> anyhow::Result<()> {
        self.check_write()?;
        let mut state = lock(&self.state);
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        state.writes.push(PullWrite::Insert {
            table: table.to_string(),
            row: row.clone(),
        });
        Ok(())
    }

    async fn update_where(&self, table: &str, id: &RecordId, patch: &Value) -> anyhow::Result<()> {
        self.check_write()?;
        let mut state = lock(&self.state);
        if let (Some(rows), Value::Object(patch)) = (state.tables.get_mut(table), patch) {
            for row in rows.iter_mut().filter(|r| row_has_id(r, id)) {
                if let Value::Object(map) = row {
                    for (k, v) in patch {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        state.writes.push(PullWrite::Update {
            table: table.to_string(),
            id: id.to_string(),
            patch: patch.clone(),
        });
        Ok(())
    }

    async fn delete_where(&self, table: &str, id: &RecordId) -> anyhow::Result<()> {
        self.check_write()?;
        let mut state = lock(&self.state);
        if let Some(rows) = state.tables.get_mut(table) {
            rows.retain(|r| !row_has_id(r, id));
        }
        state.writes.push(PullWrite::Delete {
            table: table.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }
}
