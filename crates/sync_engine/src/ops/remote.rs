//! The remote write path shared by every operation.
//!
//! Local-first writes land in the store first, then one of `push_create`,
//! `push_update` or `push_delete` mirrors them remotely:
//!
//! - network failures (including elapsed deadlines) take the session offline
//!   and queue the operation, the caller sees success;
//! - permanent failures are returned so the caller can roll back.

use std::sync::{Arc, atomic::Ordering};

use api_types::EntityKind;
use futures::{FutureExt, future::BoxFuture, future::join_all};
use ledger::{EntityId, LedgerState};

use crate::{
    ErrorKind, GatewayError, ResultSync, SyncError,
    deadline::with_deadline,
    docs::{EntityRef, document_for, parent_of},
    queue::creation_rank,
    reconciler::{self, FollowUp},
};

use super::SessionInner;

/// Outcome of one queue flush.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub failed: usize,
    /// `pending_sync` was lowered at the end.
    pub settled: bool,
    /// Another flush was already running, or the session is offline.
    pub skipped: bool,
}

struct FlushGuard<'a>(&'a std::sync::atomic::AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Every temp-id entity in the store.
pub(crate) fn temp_entities(state: &LedgerState) -> Vec<EntityRef> {
    let envelopes = state
        .envelopes
        .keys()
        .filter(|id| id.is_temp())
        .cloned()
        .map(EntityRef::envelope);
    let sources = state
        .income_sources
        .keys()
        .filter(|id| id.is_temp())
        .cloned()
        .map(EntityRef::income_source);
    let transactions = state
        .transactions
        .keys()
        .filter(|id| id.is_temp())
        .cloned()
        .map(EntityRef::transaction);
    let allocations = state
        .allocations
        .keys()
        .filter(|id| id.is_temp())
        .cloned()
        .map(EntityRef::allocation);
    envelopes
        .chain(sources)
        .chain(transactions)
        .chain(allocations)
        .collect()
}

impl SessionInner {
    /// Convert a gateway failure, taking the session offline on network
    /// errors.
    pub(crate) fn classify(&self, err: GatewayError) -> SyncError {
        if err.is_network() {
            self.connectivity.report_network_error(&err.message);
        }
        err.into()
    }

    /// Lower `pending_sync` once no temp entity is left and nothing is
    /// queued or in flight.
    pub(crate) fn settle_if_synced(&self) -> bool {
        if self.store.read(|state| temp_entities(state).is_empty()) {
            return self.queue().settle();
        }
        false
    }

    /// Create `entity` remotely and reconcile its temp id.
    ///
    /// Returns the confirmed id, `None` when the create was deferred (parent
    /// unconfirmed, offline, timed out) or the entity no longer exists.
    pub(crate) fn push_create(
        self: &Arc<Self>,
        entity: EntityRef,
    ) -> BoxFuture<'static, ResultSync<Option<EntityId>>> {
        let inner = Arc::clone(self);
        async move { inner.create_and_reconcile(entity).await }.boxed()
    }

    async fn create_and_reconcile(
        self: &Arc<Self>,
        entity: EntityRef,
    ) -> ResultSync<Option<EntityId>> {
        let Some(parent) = self.store.read(|state| {
            document_for(state, &entity).map(|_| parent_of(state, &entity))
        }) else {
            self.queue().cancel_create(&entity);
            return Ok(None);
        };

        if parent.as_ref().is_some_and(EntityId::is_temp) {
            tracing::debug!(%entity, "parent not confirmed yet, create deferred");
            self.queue().set_pending_sync();
            return Ok(None);
        }
        if !self.connectivity.is_online() {
            self.queue().enqueue_create(entity);
            return Ok(None);
        }
        if !self.queue().begin_write(&entity.id) {
            return Ok(None);
        }
        // A concurrent create may have confirmed the id since the first read.
        let Some(doc) = self.store.read(|state| document_for(state, &entity)) else {
            let mut queue = self.queue();
            queue.end_write(&entity.id);
            queue.cancel_create(&entity);
            return Ok(None);
        };
        self.queue().cancel_create(&entity);

        let result = with_deadline(
            self.config.deadlines.mutation,
            "create",
            self.gateway.create(entity.kind, &doc),
        )
        .await;

        match result {
            Ok(remote_id) => {
                let real = EntityId::new(remote_id);
                let follow_ups = self
                    .store
                    .apply(|state| reconciler::confirm(state, &entity, &real, &doc));
                self.queue().end_write(&entity.id);
                self.run_follow_ups(follow_ups).await;
                self.settle_if_synced();
                Ok(Some(real))
            }
            Err(err) if err.is_network() => {
                self.queue().end_write(&entity.id);
                self.connectivity.report_network_error(&err.message);
                self.queue().enqueue_create(entity);
                Ok(None)
            }
            Err(err) => {
                self.queue().end_write(&entity.id);
                tracing::error!(%entity, %err, "create rejected, rolling back");
                self.rollback_create(&entity).await;
                Err(err.into())
            }
        }
    }

    /// Push the latest value of a confirmed entity.
    pub(crate) async fn push_update(self: &Arc<Self>, entity: EntityRef) -> ResultSync<()> {
        // A pending or in-flight create carries (or reconciles) the latest
        // value.
        if entity.id.is_temp() {
            return Ok(());
        }
        let mut raced = false;
        loop {
            let Some(doc) = self.store.read(|state| document_for(state, &entity)) else {
                return Ok(());
            };
            if !self.connectivity.is_online() {
                self.queue().enqueue_update(entity);
                return Ok(());
            }
            if !self.queue().begin_write(&entity.id) {
                self.queue().enqueue_update(entity);
                return Ok(());
            }

            let result = with_deadline(
                self.config.deadlines.mutation,
                "update",
                self.gateway.update(entity.kind, entity.id.as_str(), &doc),
            )
            .await;
            self.queue().end_write(&entity.id);

            match result {
                Ok(()) => {}
                Err(err) if err.is_network() => {
                    self.connectivity.report_network_error(&err.message);
                    self.queue().enqueue_update(entity);
                    return Ok(());
                }
                Err(err) if err.kind == ErrorKind::NotFound => {
                    tracing::warn!(%entity, %err, "remote document missing, keeping local value");
                    return Ok(());
                }
                Err(err) => {
                    tracing::error!(%entity, %err, "update rejected");
                    return Err(err.into());
                }
            }

            // Edits that raced the call were queued behind it.
            if !self.queue().take_update(&entity) {
                if raced {
                    self.queue().settle();
                }
                return Ok(());
            }
            raced = true;
        }
    }

    /// Delete a confirmed entity remotely. Already-absent documents count as
    /// deleted.
    pub(crate) async fn push_delete(self: &Arc<Self>, entity: EntityRef) -> ResultSync<()> {
        if entity.id.is_temp() {
            // Never created, or the reconciler will delete it on ack.
            self.queue().cancel_create(&entity);
            return Ok(());
        }
        if !self.connectivity.is_online() {
            self.queue().enqueue_delete(entity);
            return Ok(());
        }

        self.queue().begin_delete(&entity.id);
        let result = with_deadline(
            self.config.deadlines.mutation,
            "delete",
            self.gateway.delete(entity.kind, entity.id.as_str()),
        )
        .await;
        self.queue().end_delete(&entity.id);

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind == ErrorKind::NotFound => {
                tracing::debug!(%entity, "already deleted remotely");
                Ok(())
            }
            Err(err) if err.is_network() => {
                self.connectivity.report_network_error(&err.message);
                self.queue().enqueue_delete(entity);
                Ok(())
            }
            Err(err) => {
                tracing::error!(%entity, %err, "delete rejected");
                Err(err.into())
            }
        }
    }

    pub(crate) async fn run_follow_ups(self: &Arc<Self>, follow_ups: Vec<FollowUp>) {
        let mut creates = Vec::new();
        let mut others = Vec::new();
        for follow_up in follow_ups {
            match follow_up {
                FollowUp::Create(entity) => creates.push(self.push_create(entity)),
                other => others.push(other),
            }
        }
        for result in join_all(creates).await {
            if let Err(err) = result {
                tracing::error!(%err, "dependent create failed");
            }
        }
        for follow_up in others {
            let result = match &follow_up {
                FollowUp::Update(entity) => self.push_update(entity.clone()).await,
                FollowUp::Delete(entity) => self.push_delete(entity.clone()).await,
                FollowUp::Create(_) => Ok(()),
            };
            if let Err(err) = result {
                tracing::error!(?follow_up, %err, "follow-up failed");
            }
        }
    }

    /// Undo the optimistic insert of an entity whose create was rejected.
    async fn rollback_create(self: &Arc<Self>, entity: &EntityRef) {
        match entity.kind {
            EntityKind::Envelope => {
                if let Some(removed) = self.store.apply(|state| state.remove_envelope(&entity.id)) {
                    tracing::warn!(
                        %entity,
                        transactions = removed.transactions.len(),
                        allocations = removed.allocations.len(),
                        "rolled back envelope and dependents"
                    );
                }
            }
            EntityKind::Transaction => {
                let removed = self
                    .store
                    .apply(|state| state.remove_transaction(&entity.id));
                // A confirmed transfer partner must go too.
                let partners = removed
                    .into_iter()
                    .filter(|tx| !tx.id.is_temp())
                    .map(|tx| self.push_delete(EntityRef::transaction(tx.id)));
                for result in join_all(partners).await {
                    if let Err(err) = result {
                        tracing::error!(%err, "could not delete transfer partner");
                    }
                }
            }
            EntityKind::IncomeSource => {
                self.store
                    .apply(|state| state.remove_income_source(&entity.id));
            }
            EntityKind::Allocation => {
                let removed = self.store.apply(|state| state.remove_allocation(&entity.id));
                if let Some(allocation) = removed {
                    self.run_repair(allocation.month, Some(allocation.envelope_id))
                        .await;
                }
            }
        }
    }

    /// Drain the pending queue: deletes, then creates in dependency order,
    /// then updates. Temp-id entities nobody is sending are swept in with the
    /// creates.
    pub(crate) async fn flush(self: &Arc<Self>) -> FlushReport {
        if !self.connectivity.is_online() {
            return FlushReport {
                skipped: true,
                ..FlushReport::default()
            };
        }
        if self.flushing.swap(true, Ordering::SeqCst) {
            return FlushReport {
                skipped: true,
                ..FlushReport::default()
            };
        }
        let _guard = FlushGuard(&self.flushing);

        let mut batch = self.queue().take_flush_batch();
        let swept: Vec<EntityRef> = {
            let candidates = self.store.read(temp_entities);
            let queue = self.queue();
            candidates
                .into_iter()
                .filter(|e| !queue.is_in_flight(&e.id) && !batch.creates.contains(e))
                .collect()
        };
        batch.creates.extend(swept);
        batch.creates.sort_by_key(|e| creation_rank(e.kind));

        let mut report = FlushReport::default();
        tracing::info!(
            deletes = batch.deletes.len(),
            creates = batch.creates.len(),
            updates = batch.updates.len(),
            "flushing pending operations"
        );

        for entity in batch.deletes {
            report.attempted += 1;
            if let Err(err) = self.push_delete(entity.clone()).await {
                report.failed += 1;
                tracing::error!(%entity, %err, "queued delete failed");
            }
        }
        for entity in batch.creates {
            report.attempted += 1;
            if let Err(err) = self.push_create(entity.clone()).await {
                report.failed += 1;
                tracing::error!(%entity, %err, "queued create failed");
            }
        }
        for entity in batch.updates {
            report.attempted += 1;
            if let Err(err) = self.push_update(entity.clone()).await {
                report.failed += 1;
                tracing::error!(%entity, %err, "queued update failed");
            }
        }

        report.settled = self.queue().settle();
        tracing::info!(?report, "flush finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ledger::Envelope;

    use super::*;
    use crate::{AuthIdentity, MemoryGateway, SyncSession};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_of_one_entity_send_one_document() {
        let gateway = MemoryGateway::new();
        let session = SyncSession::builder(
            AuthIdentity::authenticated("alice"),
            Arc::new(gateway.clone()),
        )
        .build()
        .unwrap();
        let inner = &session.inner;

        for round in 0..50 {
            let id = EntityId::temp();
            let envelope = Envelope::new(
                id.clone(),
                "alice",
                &format!("Envelope {round}"),
                round,
                None,
                Utc::now(),
            )
            .unwrap();
            inner
                .store
                .try_apply(|state| state.insert_envelope(envelope))
                .unwrap();

            let entity = EntityRef::envelope(id);
            let first = tokio::spawn(inner.push_create(entity.clone()));
            let second = tokio::spawn(inner.push_create(entity));
            let results = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
            assert_eq!(results.iter().flatten().count(), 1, "round {round}");
        }

        assert_eq!(gateway.documents(EntityKind::Envelope).len(), 50);
        inner.store.read(|state| {
            assert_eq!(state.envelopes.len(), 50);
            assert!(temp_entities(state).is_empty());
        });
    }
}
