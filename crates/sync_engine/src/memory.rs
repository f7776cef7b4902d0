//! In-process remote store.
//!
//! `MemoryGateway` keeps one collection per entity kind, assigns ids with a
//! per-kind prefix (`env-1`, `txn-1`, ...) and pushes the full matching
//! snapshot to every subscriber after each mutation. It is the sandbox
//! remote of the CLI and the remote of the integration tests, so it also
//! carries an offline switch, artificial latency and one-shot faults.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use api_types::{Document, EntityKind, Filter};
use async_trait::async_trait;

use crate::{
    ChangeHandler, GatewayError, GatewayResult, RemoteChange, RemoteGateway, Subscription,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Query,
    Subscribe,
    Probe,
}

struct Subscriber {
    id: u64,
    kind: EntityKind,
    filter: Filter,
    handler: ChangeHandler,
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<EntityKind, BTreeMap<String, Document>>,
    counters: HashMap<EntityKind, u64>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
    offline: bool,
    latency: Duration,
    faults: HashMap<Operation, VecDeque<GatewayError>>,
    calls: HashMap<Operation, usize>,
}

impl MemoryState {
    fn next_id(&mut self, kind: EntityKind) -> String {
        let counter = self.counters.entry(kind).or_default();
        *counter += 1;
        let prefix = match kind {
            EntityKind::Envelope => "env",
            EntityKind::Transaction => "txn",
            EntityKind::IncomeSource => "inc",
            EntityKind::Allocation => "alloc",
        };
        format!("{prefix}-{counter}")
    }

    fn matching(&self, kind: EntityKind, filter: &Filter) -> Vec<Document> {
        self.collections
            .get(&kind)
            .map(|docs| docs.values().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshots owed to the subscribers of `kind`, built under the lock and
    /// delivered after it is released.
    fn pending_notifications(&self, kind: EntityKind) -> Vec<(ChangeHandler, RemoteChange)> {
        self.subscribers
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| {
                let change = RemoteChange {
                    kind,
                    filter: s.filter.clone(),
                    documents: self.matching(kind, &s.filter),
                };
                (Arc::clone(&s.handler), change)
            })
            .collect()
    }
}

fn notify(notifications: Vec<(ChangeHandler, RemoteChange)>) {
    for (handler, change) in notifications {
        handler(change);
    }
}

/// Reject documents a real store would refuse.
fn validate(doc: &Document) -> GatewayResult<()> {
    let invalid = match doc {
        Document::Envelope(env) => env.name.trim().is_empty().then_some("empty envelope name"),
        Document::Transaction(tx) => (tx.amount_minor < 0).then_some("negative amount"),
        Document::IncomeSource(source) => {
            if source.name.trim().is_empty() {
                Some("empty income source name")
            } else {
                (source.amount_minor < 0).then_some("negative amount")
            }
        }
        Document::Allocation(alloc) => {
            (alloc.budgeted_amount_minor < 0).then_some("negative budgeted amount")
        }
    };
    match invalid {
        Some(reason) => Err(GatewayError::validation(reason)),
        None => Ok(()),
    }
}

#[derive(Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<MemoryState>>,
}

impl std::fmt::Debug for MemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryGateway")
            .field("offline", &state.offline)
            .field("subscribers", &state.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl MemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait the configured latency, then account for the call and apply the
    /// offline switch and injected faults.
    async fn enter(&self, op: Operation) -> GatewayResult<()> {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if state.offline {
            return Err(GatewayError::network("remote store unreachable"));
        }
        if let Some(err) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            tracing::debug!(?op, %err, "injected fault");
            return Err(err);
        }
        Ok(())
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Fail the next call of `op` with `err`. Faults queue up per operation.
    pub fn fail_next(&self, op: Operation, err: GatewayError) {
        self.lock().faults.entry(op).or_default().push_back(err);
    }

    #[must_use]
    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn documents(&self, kind: EntityKind) -> Vec<Document> {
        self.lock()
            .collections
            .get(&kind)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn document(&self, kind: EntityKind, id: &str) -> Option<Document> {
        self.lock().collections.get(&kind)?.get(id).cloned()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Store a document as if another device wrote it, notifying
    /// subscribers. A document without id gets a fresh one, which is
    /// returned.
    pub fn insert(&self, mut doc: Document) -> String {
        let kind = doc.kind();
        let (id, notifications) = {
            let mut state = self.lock();
            let id = match doc.id() {
                Some(id) => id.to_string(),
                None => state.next_id(kind),
            };
            doc.set_id(Some(id.clone()));
            state.collections.entry(kind).or_default().insert(id.clone(), doc);
            (id, state.pending_notifications(kind))
        };
        notify(notifications);
        id
    }

    /// Delete a document as if another device did, notifying subscribers.
    pub fn remove(&self, kind: EntityKind, id: &str) -> bool {
        let (removed, notifications) = {
            let mut state = self.lock();
            let removed = state
                .collections
                .get_mut(&kind)
                .and_then(|docs| docs.remove(id))
                .is_some();
            (removed, state.pending_notifications(kind))
        };
        notify(notifications);
        removed
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn create(&self, kind: EntityKind, doc: &Document) -> GatewayResult<String> {
        self.enter(Operation::Create).await?;
        validate(doc)?;
        let (id, notifications) = {
            let mut state = self.lock();
            let id = state.next_id(kind);
            let mut stored = doc.clone();
            stored.set_id(Some(id.clone()));
            state.collections.entry(kind).or_default().insert(id.clone(), stored);
            (id, state.pending_notifications(kind))
        };
        tracing::debug!(%kind, %id, "memory gateway created document");
        notify(notifications);
        Ok(id)
    }

    async fn update(&self, kind: EntityKind, id: &str, doc: &Document) -> GatewayResult<()> {
        self.enter(Operation::Update).await?;
        validate(doc)?;
        let notifications = {
            let mut state = self.lock();
            let stored = state
                .collections
                .get_mut(&kind)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| GatewayError::not_found(format!("{kind}/{id}")))?;
            let mut next = doc.clone();
            next.set_id(Some(id.to_string()));
            *stored = next;
            state.pending_notifications(kind)
        };
        notify(notifications);
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> GatewayResult<()> {
        self.enter(Operation::Delete).await?;
        let notifications = {
            let mut state = self.lock();
            state
                .collections
                .get_mut(&kind)
                .and_then(|docs| docs.remove(id))
                .ok_or_else(|| GatewayError::not_found(format!("{kind}/{id}")))?;
            state.pending_notifications(kind)
        };
        notify(notifications);
        Ok(())
    }

    async fn query(&self, kind: EntityKind, filter: &Filter) -> GatewayResult<Vec<Document>> {
        self.enter(Operation::Query).await?;
        Ok(self.lock().matching(kind, filter))
    }

    async fn subscribe(
        &self,
        kind: EntityKind,
        filter: Filter,
        handler: ChangeHandler,
    ) -> GatewayResult<Subscription> {
        self.enter(Operation::Subscribe).await?;
        let (id, initial) = {
            let mut state = self.lock();
            state.next_subscriber += 1;
            let id = state.next_subscriber;
            let initial = RemoteChange {
                kind,
                documents: state.matching(kind, &filter),
                filter: filter.clone(),
            };
            state.subscribers.push(Subscriber {
                id,
                kind,
                filter,
                handler: Arc::clone(&handler),
            });
            (id, initial)
        };
        handler(initial);

        let weak = Arc::downgrade(&self.state);
        Ok(Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .subscribers
                    .retain(|s| s.id != id);
            }
        }))
    }

    async fn probe(&self) -> GatewayResult<()> {
        self.enter(Operation::Probe).await
    }
}

#[cfg(test)]
mod tests {
    use api_types::envelope::EnvelopeDoc;
    use chrono::Utc;

    use super::*;
    use crate::ErrorKind;

    fn envelope(name: &str) -> Document {
        Document::Envelope(EnvelopeDoc {
            id: None,
            user_id: "user-1".to_string(),
            name: name.to_string(),
            is_active: true,
            order_index: 0,
            piggybank: None,
            created_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn assigns_prefixed_ids_per_kind() {
        let gateway = MemoryGateway::new();
        let first = gateway.create(EntityKind::Envelope, &envelope("Rent")).await.unwrap();
        let second = gateway.create(EntityKind::Envelope, &envelope("Food")).await.unwrap();
        assert_eq!(first, "env-1");
        assert_eq!(second, "env-2");
        assert_eq!(gateway.documents(EntityKind::Envelope).len(), 2);
    }

    #[tokio::test]
    async fn faults_fire_once() {
        let gateway = MemoryGateway::new();
        gateway.fail_next(Operation::Create, GatewayError::validation("nope"));
        let err = gateway
            .create(EntityKind::Envelope, &envelope("Rent"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(gateway.create(EntityKind::Envelope, &envelope("Rent")).await.is_ok());
        assert_eq!(gateway.calls(Operation::Create), 2);
    }

    #[tokio::test]
    async fn offline_calls_fail_with_network_errors() {
        let gateway = MemoryGateway::new();
        gateway.set_offline(true);
        assert!(gateway.probe().await.unwrap_err().is_network());
        gateway.set_offline(false);
        assert!(gateway.probe().await.is_ok());
    }

    #[tokio::test]
    async fn missing_documents_are_not_found() {
        let gateway = MemoryGateway::new();
        let err = gateway.delete(EntityKind::Envelope, "env-9").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn subscribers_receive_snapshots_until_dropped() {
        let gateway = MemoryGateway::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = gateway
            .subscribe(
                EntityKind::Envelope,
                Filter::user("user-1"),
                Arc::new(move |change: RemoteChange| {
                    sink.lock().unwrap().push(change.documents.len());
                }),
            )
            .await
            .unwrap();
        gateway.insert(envelope("Rent"));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);

        drop(subscription);
        assert_eq!(gateway.subscriber_count(), 0);
        gateway.insert(envelope("Food"));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rejects_empty_names() {
        let gateway = MemoryGateway::new();
        let err = gateway
            .create(EntityKind::Envelope, &envelope("  "))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}
