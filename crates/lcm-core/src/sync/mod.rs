//! Per-collection synchronizers.
//!
//! A `CollectionSync` mirrors one remote table into a local snapshot. It
//! loads on activation and reloads the whole collection whenever the change
//! feed reports anything; consumers read the snapshot or watch it.

mod applications;
mod faqs;

pub use applications::RemoveReport;
pub use faqs::{plan_move, Direction, OrderSwap};

use crate::error::SyncError;
use crate::models::{Application, Document, Entity, Faq, Project, RecordKey, Validate};
use crate::service::{Query, RemoteService, SubscriptionGuard};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type ApplicationSync = CollectionSync<Application>;
pub type DocumentSync = CollectionSync<Document>;
pub type FaqSync = CollectionSync<Faq>;
pub type ProjectSync = CollectionSync<Project>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Not activated, or deactivated
    Idle,
    Loading,
    Ready,
}

/// Read-only view of a synchronizer's state
#[derive(Debug, Clone)]
pub struct Snapshot<E> {
    /// Records in the collection's sort order
    pub records: Vec<E>,
    pub phase: SyncPhase,
    /// Error of the most recent fetch, cleared by the next successful one
    pub error: Option<SyncError>,
    /// Number of completed fetches, successful or not
    pub generation: u64,
}

impl<E> Default for Snapshot<E> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            phase: SyncPhase::Idle,
            error: None,
            generation: 0,
        }
    }
}

impl<E: Entity> Snapshot<E> {
    pub fn is_loading(&self) -> bool {
        self.phase == SyncPhase::Loading
    }

    pub fn find(&self, key: &RecordKey) -> Option<&E> {
        self.records.iter().find(|r| &r.key() == key)
    }
}

/// The snapshot channel and the sequence numbers of fetches feeding it
struct SharedState<E> {
    tx: watch::Sender<Snapshot<E>>,
    /// Sequence number of the most recently started fetch
    started: AtomicU64,
    /// Sequence number of the fetch the snapshot currently holds
    published: AtomicU64,
}

pub struct CollectionSync<E: Entity> {
    service: Arc<dyn RemoteService>,
    state: Arc<SharedState<E>>,
    guard: Option<SubscriptionGuard>,
    listener: Option<JoinHandle<()>>,
    active: bool,
}

impl<E: Entity> CollectionSync<E> {
    pub fn new(service: Arc<dyn RemoteService>) -> Self {
        let (tx, _) = watch::channel(Snapshot::default());
        Self {
            service,
            state: Arc::new(SharedState {
                tx,
                started: AtomicU64::new(0),
                published: AtomicU64::new(0),
            }),
            guard: None,
            listener: None,
            active: false,
        }
    }

    pub fn collection(&self) -> &'static str {
        E::COLLECTION
    }

    pub fn service(&self) -> &Arc<dyn RemoteService> {
        &self.service
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Subscribe to the change feed and load the collection.
    ///
    /// Fetch failures end up in the snapshot rather than being returned.
    /// Activating an active synchronizer does nothing.
    pub async fn activate(&mut self) {
        if self.active {
            return;
        }
        self.active = true;
        info!(collection = E::COLLECTION, "activating");
        self.state.tx.send_modify(|s| s.phase = SyncPhase::Loading);

        let subscription = match self.service.subscribe(E::COLLECTION).await {
            Ok(subscription) => Some(subscription),
            Err(err) => {
                warn!(
                    collection = E::COLLECTION,
                    "change feed unavailable, only explicit refreshes will update: {err}"
                );
                None
            }
        };

        load(self.service.as_ref(), &self.state).await;

        match subscription {
            Some(subscription) => {
                let (mut events, guard) = subscription.split();
                let service = Arc::clone(&self.service);
                let state = Arc::clone(&self.state);
                self.listener = Some(tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        debug!(
                            collection = E::COLLECTION,
                            kind = ?event.kind,
                            "change notification, refetching"
                        );
                        load(service.as_ref(), &state).await;
                    }
                    debug!(collection = E::COLLECTION, "change feed closed");
                }));
                self.guard = Some(guard);
            }
            None => {
                // keep a fetch error if there is one, it is more useful
                self.state.tx.send_modify(|s| {
                    if s.error.is_none() {
                        s.error = Some(SyncError::Network(format!(
                            "could not subscribe to {} changes",
                            E::COLLECTION
                        )));
                    }
                });
            }
        }
    }

    /// Release the subscription and stop the listener. Safe to call repeatedly.
    pub fn deactivate(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.unsubscribe();
        }
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if self.active {
            self.active = false;
            info!(collection = E::COLLECTION, "deactivated");
            self.state.tx.send_modify(|s| s.phase = SyncPhase::Idle);
        }
    }

    /// Refetch the whole collection
    pub async fn refresh(&self) {
        load(self.service.as_ref(), &self.state).await;
    }

    pub fn snapshot(&self) -> Snapshot<E> {
        self.state.tx.borrow().clone()
    }

    pub fn records(&self) -> Vec<E> {
        self.state.tx.borrow().records.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.tx.borrow().is_loading()
    }

    pub fn error(&self) -> Option<SyncError> {
        self.state.tx.borrow().error.clone()
    }

    /// Receiver that is notified of every snapshot change
    pub fn watch(&self) -> watch::Receiver<Snapshot<E>> {
        self.state.tx.subscribe()
    }

    /// Insert a record and return the key the service assigned.
    ///
    /// The snapshot picks the record up on the next refetch.
    pub async fn create(&self, fields: &E::New) -> Result<RecordKey, SyncError> {
        fields.validate()?;
        let payload = serde_json::to_value(fields)?;
        let row = self
            .service
            .insert(E::COLLECTION, payload)
            .await
            .map_err(|err| log_failure::<E>("create", err))?;
        RecordKey::from_row(&row).ok_or_else(|| {
            log_failure::<E>(
                "create",
                SyncError::Decode("inserted row has no id".to_string()),
            )
        })
    }

    pub async fn update(&self, key: &RecordKey, patch: &E::Patch) -> Result<(), SyncError> {
        patch.validate()?;
        let payload: Value = serde_json::to_value(patch)?;
        self.service
            .update_by_key(E::COLLECTION, key, payload)
            .await
            .map_err(|err| log_failure::<E>("update", err))
    }

    pub async fn delete(&self, key: &RecordKey) -> Result<(), SyncError> {
        self.service
            .delete_by_key(E::COLLECTION, key)
            .await
            .map_err(|err| log_failure::<E>("delete", err))
    }
}

impl<E: Entity> Drop for CollectionSync<E> {
    fn drop(&mut self) {
        self.deactivate();
    }
}

fn log_failure<E: Entity>(operation: &str, err: SyncError) -> SyncError {
    error!(collection = E::COLLECTION, operation, "mutation failed: {err}");
    err
}

/// Fetch the full collection and publish it.
///
/// A failed fetch keeps the previous records and records the error. A fetch
/// that completes after a newer one has published is dropped.
async fn load<E: Entity>(service: &dyn RemoteService, state: &SharedState<E>) {
    let seq = state.started.fetch_add(1, Ordering::SeqCst) + 1;
    state.tx.send_modify(|s| s.phase = SyncPhase::Loading);
    let query = Query::ordered(E::sort_order());
    let result = match service.query(E::COLLECTION, &query).await {
        Ok(rows) => decode_rows::<E>(rows),
        Err(err) => Err(err),
    };

    match &result {
        Ok(records) => debug!(
            collection = E::COLLECTION,
            count = records.len(),
            seq,
            "fetched snapshot"
        ),
        Err(err) => error!(collection = E::COLLECTION, seq, "fetch failed: {err}"),
    }

    // the channel's write lock orders publishers
    let published = state.tx.send_if_modified(|s| {
        if state.published.load(Ordering::SeqCst) > seq {
            return false;
        }
        state.published.store(seq, Ordering::SeqCst);
        match result {
            Ok(records) => {
                s.records = records;
                s.error = None;
            }
            Err(err) => s.error = Some(err),
        }
        s.phase = SyncPhase::Ready;
        s.generation += 1;
        true
    });
    if !published {
        debug!(collection = E::COLLECTION, seq, "dropping stale fetch");
    }
}

fn decode_rows<E: Entity>(rows: Vec<Value>) -> Result<Vec<E>, SyncError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(SyncError::from))
        .collect()
}
