//! Operations waiting for the remote store.
//!
//! A timed-out or offline operation is never retried inline: the local store
//! keeps the optimistic result and a reference lands here. The queue is
//! drained on the offline to online transition in a fixed order: deletes,
//! then creates (envelopes before their dependents), then updates.

use std::{
    collections::{BTreeSet, HashSet},
    time::Duration,
};

use api_types::EntityKind;
use ledger::{EntityId, MergeGuard};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::docs::EntityRef;

#[derive(Debug, Default)]
pub struct PendingQueue {
    creates: BTreeSet<EntityRef>,
    updates: BTreeSet<EntityRef>,
    deletes: BTreeSet<EntityRef>,
    pending_sync: bool,
    pending_since: Option<Instant>,
    /// Creates and updates awaiting an answer.
    in_flight: HashSet<EntityId>,
    /// Deletes awaiting an answer.
    deleting: HashSet<EntityId>,
}

/// Work drained by one flush. `creates` is ordered by kind, so envelopes come
/// first.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FlushBatch {
    pub deletes: Vec<EntityRef>,
    pub creates: Vec<EntityRef>,
    pub updates: Vec<EntityRef>,
}

impl FlushBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.creates.is_empty() && self.updates.is_empty()
    }
}

/// Serializable part of the queue, persisted with the session snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSnapshot {
    pub creates: Vec<EntityRef>,
    pub updates: Vec<EntityRef>,
    pub deletes: Vec<EntityRef>,
}

impl PendingQueue {
    fn mark_pending(&mut self) {
        if !self.pending_sync {
            self.pending_sync = true;
            self.pending_since = Some(Instant::now());
        }
    }

    /// Flag local state as ahead of the remote store.
    pub fn set_pending_sync(&mut self) {
        self.mark_pending();
    }

    #[must_use]
    pub fn pending_sync(&self) -> bool {
        self.pending_sync
    }

    /// How long `pending_sync` has been raised.
    #[must_use]
    pub fn pending_age(&self, now: Instant) -> Option<Duration> {
        self.pending_since
            .filter(|_| self.pending_sync)
            .map(|since| now.saturating_duration_since(since))
    }

    pub fn enqueue_create(&mut self, entity: EntityRef) {
        tracing::debug!(%entity, "queued create");
        self.creates.insert(entity);
        self.mark_pending();
    }

    /// Queue an update. A pending create already carries the latest value,
    /// so the update is folded into it.
    pub fn enqueue_update(&mut self, entity: EntityRef) {
        if entity.id.is_temp() || self.creates.contains(&entity) {
            return;
        }
        tracing::debug!(%entity, "queued update");
        self.updates.insert(entity);
        self.mark_pending();
    }

    /// Queue a delete. Deleting something never created remotely just
    /// cancels its pending create.
    pub fn enqueue_delete(&mut self, entity: EntityRef) {
        self.updates.remove(&entity);
        if entity.id.is_temp() {
            self.cancel_create(&entity);
            return;
        }
        tracing::debug!(%entity, "queued delete");
        self.deletes.insert(entity);
        self.mark_pending();
    }

    /// Remove a queued update, returning whether there was one.
    pub fn take_update(&mut self, entity: &EntityRef) -> bool {
        self.updates.remove(entity)
    }

    pub fn cancel_create(&mut self, entity: &EntityRef) -> bool {
        self.creates.remove(entity)
    }

    #[must_use]
    pub fn has_create(&self, entity: &EntityRef) -> bool {
        self.creates.contains(entity)
    }

    /// Claim `id` for a create or update. `false` when another write on the
    /// same id is already in flight.
    pub fn begin_write(&mut self, id: &EntityId) -> bool {
        self.in_flight.insert(id.clone())
    }

    pub fn end_write(&mut self, id: &EntityId) {
        self.in_flight.remove(id);
    }

    #[must_use]
    pub fn is_in_flight(&self, id: &EntityId) -> bool {
        self.in_flight.contains(id)
    }

    /// Whether a create is waiting for its remote id.
    #[must_use]
    pub fn has_temp_in_flight(&self) -> bool {
        self.in_flight.iter().any(EntityId::is_temp)
    }

    pub fn begin_delete(&mut self, id: &EntityId) {
        self.deleting.insert(id.clone());
    }

    pub fn end_delete(&mut self, id: &EntityId) {
        self.deleting.remove(id);
    }

    /// Drain everything queued.
    pub fn take_flush_batch(&mut self) -> FlushBatch {
        FlushBatch {
            deletes: std::mem::take(&mut self.deletes).into_iter().collect(),
            creates: std::mem::take(&mut self.creates).into_iter().collect(),
            updates: std::mem::take(&mut self.updates).into_iter().collect(),
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.creates.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.in_flight.is_empty()
            && self.deleting.is_empty()
    }

    /// Lower `pending_sync` when nothing is left to send. Returns whether the
    /// flag is now clear.
    pub fn settle(&mut self) -> bool {
        if self.is_idle() {
            self.pending_sync = false;
            self.pending_since = None;
        }
        !self.pending_sync
    }

    /// Entities a remote merge must not overwrite or resurrect.
    #[must_use]
    pub fn merge_guard(&self) -> MergeGuard {
        let mut guard = MergeGuard::default();
        guard.keep_local.extend(self.in_flight.iter().cloned());
        guard
            .keep_local
            .extend(self.updates.iter().map(|e| e.id.clone()));
        guard
            .keep_local
            .extend(self.creates.iter().map(|e| e.id.clone()));
        guard.suppressed.extend(self.deleting.iter().cloned());
        guard
            .suppressed
            .extend(self.deletes.iter().map(|e| e.id.clone()));
        guard
    }

    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.creates.len(), self.updates.len(), self.deletes.len())
    }

    #[must_use]
    pub fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            creates: self.creates.iter().cloned().collect(),
            updates: self.updates.iter().cloned().collect(),
            deletes: self.deletes.iter().cloned().collect(),
        }
    }

    pub fn restore(&mut self, snapshot: PendingSnapshot) {
        *self = Self::default();
        self.creates.extend(snapshot.creates);
        self.updates.extend(snapshot.updates);
        self.deletes.extend(snapshot.deletes);
        if !self.is_idle() {
            self.mark_pending();
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Creates in dependency order: envelopes first.
pub fn creation_rank(kind: EntityKind) -> u8 {
    match kind {
        EntityKind::Envelope => 0,
        EntityKind::IncomeSource => 1,
        EntityKind::Transaction | EntityKind::Allocation => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(id: &str) -> EntityRef {
        EntityRef::transaction(EntityId::new(id))
    }

    #[test]
    fn flush_batch_puts_envelopes_first() {
        let mut queue = PendingQueue::default();
        queue.enqueue_create(EntityRef::allocation(EntityId::temp()));
        queue.enqueue_create(txn("temp-1-aaaaaaaaa"));
        queue.enqueue_create(EntityRef::envelope(EntityId::temp()));
        queue.enqueue_delete(txn("txn-9"));

        let batch = queue.take_flush_batch();
        assert_eq!(batch.deletes, vec![txn("txn-9")]);
        assert_eq!(batch.creates.len(), 3);
        assert_eq!(batch.creates[0].kind, EntityKind::Envelope);
        assert!(
            batch
                .creates
                .windows(2)
                .all(|w| creation_rank(w[0].kind) <= creation_rank(w[1].kind))
        );
    }

    #[test]
    fn deleting_a_temp_entity_cancels_its_create() {
        let mut queue = PendingQueue::default();
        let temp = txn("temp-1-aaaaaaaaa");
        queue.enqueue_create(temp.clone());
        queue.enqueue_delete(temp.clone());
        assert!(!queue.has_create(&temp));
        assert!(queue.take_flush_batch().is_empty());
    }

    #[test]
    fn updates_fold_into_pending_creates() {
        let mut queue = PendingQueue::default();
        queue.enqueue_update(txn("temp-1-aaaaaaaaa"));
        queue.enqueue_update(txn("txn-1"));
        queue.enqueue_delete(txn("txn-1"));
        let batch = queue.take_flush_batch();
        assert!(batch.updates.is_empty());
        assert_eq!(batch.deletes, vec![txn("txn-1")]);
    }

    #[test]
    fn pending_flag_settles_only_when_idle() {
        let mut queue = PendingQueue::default();
        queue.enqueue_delete(txn("txn-1"));
        assert!(queue.pending_sync());
        assert!(!queue.settle());

        let batch = queue.take_flush_batch();
        assert_eq!(batch.deletes.len(), 1);
        assert!(queue.begin_write(&EntityId::new("txn-2")));
        assert!(!queue.begin_write(&EntityId::new("txn-2")));
        assert!(!queue.settle());
        queue.end_write(&EntityId::new("txn-2"));
        assert!(queue.settle());
        assert!(queue.pending_age(Instant::now()).is_none());
    }

    #[test]
    fn only_temp_writes_count_as_creating() {
        let mut queue = PendingQueue::default();
        queue.begin_write(&EntityId::new("txn-1"));
        assert!(!queue.has_temp_in_flight());
        let temp = EntityId::temp();
        queue.begin_write(&temp);
        assert!(queue.has_temp_in_flight());
        queue.end_write(&temp);
        assert!(!queue.has_temp_in_flight());
    }

    #[test]
    fn merge_guard_protects_pending_work() {
        let mut queue = PendingQueue::default();
        queue.enqueue_update(txn("txn-1"));
        queue.enqueue_delete(txn("txn-2"));
        queue.begin_delete(&EntityId::new("txn-3"));
        queue.begin_write(&EntityId::new("txn-4"));

        let guard = queue.merge_guard();
        assert!(guard.keep_local.contains(&EntityId::new("txn-1")));
        assert!(guard.keep_local.contains(&EntityId::new("txn-4")));
        assert!(guard.suppressed.contains(&EntityId::new("txn-2")));
        assert!(guard.suppressed.contains(&EntityId::new("txn-3")));
    }
}
