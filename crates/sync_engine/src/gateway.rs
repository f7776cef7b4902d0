//! Abstract interface to the remote document store.
//!
//! The engine never talks to a concrete backend: it is handed an
//! `Arc<dyn RemoteGateway>` at session construction. [`MemoryGateway`]
//! (crate::MemoryGateway) is the in-process implementation used by tests and
//! the CLI sandbox.

use std::{fmt, sync::Arc};

use api_types::{Document, EntityKind, Filter};
use async_trait::async_trait;

use crate::error::GatewayError;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Snapshot pushed by a subscription: every document currently matching the
/// subscription filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteChange {
    pub kind: EntityKind,
    pub filter: Filter,
    pub documents: Vec<Document>,
}

/// Callback invoked for every pushed snapshot.
pub type ChangeHandler = Arc<dyn Fn(RemoteChange) + Send + Sync>;

/// Live subscription. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Remote store operations.
///
/// Every call may fail with a [`GatewayError`]; the engine decides what to do
/// from its [`ErrorKind`](crate::ErrorKind). Deadlines are enforced by the
/// caller, implementations may block for as long as they like.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Persist a new document and return the id assigned by the store.
    async fn create(&self, kind: EntityKind, doc: &Document) -> GatewayResult<String>;

    /// Replace the document `id` with `doc`.
    async fn update(&self, kind: EntityKind, id: &str, doc: &Document) -> GatewayResult<()>;

    async fn delete(&self, kind: EntityKind, id: &str) -> GatewayResult<()>;

    /// Documents matching `filter`, ids populated.
    async fn query(&self, kind: EntityKind, filter: &Filter) -> GatewayResult<Vec<Document>>;

    /// Register `on_change`. Implementations push the current matching set
    /// right away and again after every change.
    async fn subscribe(
        &self,
        kind: EntityKind,
        filter: Filter,
        on_change: ChangeHandler,
    ) -> GatewayResult<Subscription>;

    /// Lightweight reachability check.
    async fn probe(&self) -> GatewayResult<()>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn dropping_a_subscription_cancels_it_once() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cancelled);
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&cancelled);
        Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unsubscribe();
        assert_eq!(cancelled.load(Ordering::SeqCst), 2);
    }
}
