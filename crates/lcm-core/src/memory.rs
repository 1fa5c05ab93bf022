//! Process-local stand-in for the hosted data service.
//!
//! Behaves like the remote tables, storage buckets and change feed closely
//! enough to drive the synchronizers in tests and in offline mode, and lets
//! callers inject failures per operation.

use crate::error::SyncError;
use crate::models::RecordKey;
use crate::service::{
    ChangeEvent, ChangeKind, OrderBy, Query, RemoteService, Subscription, SubscriptionGuard,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use uuid::Uuid;

/// Service operations, used to inject failures and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Query,
    Insert,
    Update,
    Delete,
    Upload,
    DeleteBlob,
    Subscribe,
}

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    content_type: Option<String>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<Value>>,
    serial_keys: HashSet<String>,
    next_serial: HashMap<String, i64>,
    buckets: HashMap<String, BTreeMap<String, StoredBlob>>,
    subscribers: HashMap<String, Vec<(u64, UnboundedSender<ChangeEvent>)>>,
    next_subscriber: u64,
    /// `None` lets a call through, so a failure can target a later call
    failures: HashMap<Operation, VecDeque<Option<SyncError>>>,
    query_delays: VecDeque<StdDuration>,
    calls: HashMap<Operation, usize>,
    last_created_at: Option<DateTime<Utc>>,
}

impl Inner {
    /// Count the call and hand out an injected failure if one is queued
    fn enter(&mut self, op: Operation) -> Result<(), SyncError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front).flatten() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_key(&mut self, collection: &str) -> Value {
        if self.serial_keys.contains(collection) {
            let next = self.next_serial.entry(collection.to_string()).or_insert(1);
            let key = *next;
            *next += 1;
            Value::from(key)
        } else {
            Value::String(Uuid::new_v4().to_string())
        }
    }

    /// Creation timestamps strictly increase so "newest first" is total
    fn next_created_at(&mut self) -> String {
        let now = Utc::now();
        let stamp = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(stamp);
        stamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn notify(&mut self, collection: &str, kind: ChangeKind, key: Option<RecordKey>) {
        if let Some(subscribers) = self.subscribers.get_mut(collection) {
            let event = ChangeEvent {
                collection: collection.to_string(),
                kind,
                key,
            };
            subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        }
    }
}

pub struct InMemoryService {
    inner: Arc<Mutex<Inner>>,
    base_url: String,
}

impl Default for InMemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            base_url: "memory://local".to_string(),
        }
    }

    /// Service with the site's tables: integer keys for FAQs and projects,
    /// uuid keys elsewhere
    pub fn for_site() -> Self {
        Self::new().with_serial_keys(&["faqs", "projects"])
    }

    pub fn with_serial_keys(self, collections: &[&str]) -> Self {
        {
            let mut inner = self.lock();
            inner
                .serial_keys
                .extend(collections.iter().map(|c| c.to_string()));
        }
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of `op` fail with `err`. Failures queue up in order.
    pub fn fail_next(&self, op: Operation, err: SyncError) {
        self.lock().failures.entry(op).or_default().push_back(Some(err));
    }

    /// Let the next queued call of `op` succeed, so a following `fail_next`
    /// hits the call after it
    pub fn pass_next(&self, op: Operation) {
        self.lock().failures.entry(op).or_default().push_back(None);
    }

    /// Hold the next query's rows for `delay` before returning them
    pub fn delay_next_query(&self, delay: StdDuration) {
        self.lock().query_delays.push_back(delay);
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Raw rows of a collection in insertion order
    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.lock()
            .tables
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn blob_keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .buckets
            .get(bucket)
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn blob(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|blobs| blobs.get(key))
            .map(|blob| blob.bytes.clone())
    }

    pub fn blob_content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|blobs| blobs.get(key))
            .and_then(|blob| blob.content_type.clone())
    }

    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.lock()
            .subscribers
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        // Nulls sort last, as the remote service does for ascending order
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn compare_rows(a: &Value, b: &Value, order: &[OrderBy]) -> Ordering {
    for term in order {
        let left = a.get(&term.column).unwrap_or(&Value::Null);
        let right = b.get(&term.column).unwrap_or(&Value::Null);
        let ordering = compare_values(left, right);
        let ordering = if term.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn into_object(fields: Value) -> Result<Map<String, Value>, SyncError> {
    match fields {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::validation(format!(
            "expected an object of fields, got {other}"
        ))),
    }
}

fn row_matches(row: &Value, key: &RecordKey) -> bool {
    RecordKey::from_row(row).as_ref() == Some(key)
}

#[async_trait]
impl RemoteService for InMemoryService {
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Value>, SyncError> {
        let (rows, delay) = {
            let mut inner = self.lock();
            inner.enter(Operation::Query)?;
            let mut rows: Vec<Value> = inner
                .tables
                .get(collection)
                .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
                .unwrap_or_default();
            rows.sort_by(|a, b| compare_rows(a, b, &query.order));
            (rows, inner.query_delays.pop_front())
        };
        // rows were read before the delay, like a slow response in flight
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(rows)
    }

    async fn insert(&self, collection: &str, fields: Value) -> Result<Value, SyncError> {
        let mut inner = self.lock();
        inner.enter(Operation::Insert)?;
        let mut row = into_object(fields)?;
        let id = inner.next_key(collection);
        row.insert("id".to_string(), id);
        if !row.contains_key("created_at") {
            let created_at = inner.next_created_at();
            row.insert("created_at".to_string(), Value::String(created_at));
        }
        let row = Value::Object(row);
        let key = RecordKey::from_row(&row);
        inner
            .tables
            .entry(collection.to_string())
            .or_default()
            .push(row.clone());
        inner.notify(collection, ChangeKind::Insert, key);
        Ok(row)
    }

    async fn update_by_key(
        &self,
        collection: &str,
        key: &RecordKey,
        fields: Value,
    ) -> Result<(), SyncError> {
        let mut inner = self.lock();
        inner.enter(Operation::Update)?;
        let patch = into_object(fields)?;
        let row = inner
            .tables
            .get_mut(collection)
            .and_then(|rows| rows.iter_mut().find(|r| row_matches(r, key)))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| SyncError::not_found(collection, key))?;
        for (column, value) in patch {
            // identity and creation time are immutable
            if column == "id" || column == "created_at" {
                continue;
            }
            row.insert(column, value);
        }
        inner.notify(collection, ChangeKind::Update, Some(key.clone()));
        Ok(())
    }

    async fn delete_by_key(&self, collection: &str, key: &RecordKey) -> Result<(), SyncError> {
        let mut inner = self.lock();
        inner.enter(Operation::Delete)?;
        let rows = inner
            .tables
            .get_mut(collection)
            .ok_or_else(|| SyncError::not_found(collection, key))?;
        let before = rows.len();
        rows.retain(|r| !row_matches(r, key));
        if rows.len() == before {
            return Err(SyncError::not_found(collection, key));
        }
        inner.notify(collection, ChangeKind::Delete, Some(key.clone()));
        Ok(())
    }

    async fn upload_blob(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), SyncError> {
        let mut inner = self.lock();
        inner.enter(Operation::Upload)?;
        let blobs = inner.buckets.entry(bucket.to_string()).or_default();
        if blobs.contains_key(key) {
            return Err(SyncError::Conflict(format!(
                "object {bucket}/{key} already exists"
            )));
        }
        blobs.insert(
            key.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{key}", self.base_url)
    }

    async fn delete_blob(&self, bucket: &str, key: &str) -> Result<(), SyncError> {
        let mut inner = self.lock();
        inner.enter(Operation::DeleteBlob)?;
        // Removing a missing object succeeds, like the storage API
        if let Some(blobs) = inner.buckets.get_mut(bucket) {
            blobs.remove(key);
        }
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<Subscription, SyncError> {
        let mut inner = self.lock();
        inner.enter(Operation::Subscribe)?;
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        let (tx, rx) = unbounded_channel();
        inner
            .subscribers
            .entry(collection.to_string())
            .or_default()
            .push((id, tx));

        let registry = Arc::clone(&self.inner);
        let collection = collection.to_string();
        let guard = SubscriptionGuard::new(move || {
            let mut inner = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(subscribers) = inner.subscribers.get_mut(&collection) {
                subscribers.retain(|(sub_id, _)| *sub_id != id);
            }
        });
        Ok(Subscription::new(rx, guard))
    }
}
