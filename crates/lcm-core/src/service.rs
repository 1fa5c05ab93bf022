use crate::error::SyncError;
use crate::models::RecordKey;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

/// Sort term of a collection query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: true,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: false,
        }
    }
}

/// Filter and ordering of a collection query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Equality filters, all of which must hold
    pub filters: Vec<(String, Value)>,
    pub order: Vec<OrderBy>,
}

impl Query {
    pub fn ordered(order: Vec<OrderBy>) -> Self {
        Self {
            filters: Vec::new(),
            order,
        }
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters
            .iter()
            .all(|(column, expected)| row.get(column).unwrap_or(&Value::Null) == expected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Notification that a collection changed remotely.
///
/// Synchronizers refetch on any event; `kind` and `key` are informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub collection: String,
    pub kind: ChangeKind,
    pub key: Option<RecordKey>,
}

type Cancel = Box<dyn FnOnce() + Send + Sync>;

/// Registration on a collection's change feed. Dropping it unsubscribes.
pub struct SubscriptionGuard {
    cancel: Option<Cancel>,
}

impl SubscriptionGuard {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Release the registration; later calls do nothing
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// A live change feed for one collection
pub struct Subscription {
    events: UnboundedReceiver<ChangeEvent>,
    guard: SubscriptionGuard,
}

impl Subscription {
    pub fn new(events: UnboundedReceiver<ChangeEvent>, guard: SubscriptionGuard) -> Self {
        Self { events, guard }
    }

    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(&mut self) {
        self.guard.unsubscribe();
    }

    /// Separate the event stream from the registration so they can live in
    /// different owners
    pub fn split(self) -> (UnboundedReceiver<ChangeEvent>, SubscriptionGuard) {
        (self.events, self.guard)
    }
}

/// Capabilities the synchronizers need from the hosted data service
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Value>, SyncError>;

    /// Insert one row and return it as stored, with its assigned identity
    async fn insert(&self, collection: &str, fields: Value) -> Result<Value, SyncError>;

    async fn update_by_key(
        &self,
        collection: &str,
        key: &RecordKey,
        fields: Value,
    ) -> Result<(), SyncError>;

    async fn delete_by_key(&self, collection: &str, key: &RecordKey) -> Result<(), SyncError>;

    /// Store a blob under a new key; an existing key is a conflict
    async fn upload_blob(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), SyncError>;

    fn public_url(&self, bucket: &str, key: &str) -> String;

    async fn delete_blob(&self, bucket: &str, key: &str) -> Result<(), SyncError>;

    async fn subscribe(&self, collection: &str) -> Result<Subscription, SyncError>;
}
