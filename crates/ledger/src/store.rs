//! The single owner of the ledger state.
//!
//! Every mutation goes through [`LedgerStore::apply`] or
//! [`LedgerStore::try_apply`]: the closure runs under one lock, so concurrent
//! flows (background flushes, realtime pushes, fire-and-forget deletes) never
//! interleave a partial write, and observers only ever see whole revisions.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::LedgerState;

#[derive(Debug)]
pub struct LedgerStore {
    state: Mutex<LedgerState>,
    revision: watch::Sender<u64>,
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new(LedgerState::default())
    }
}

impl LedgerStore {
    #[must_use]
    pub fn new(state: LedgerState) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Mutex::new(state),
            revision,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Run `f` against the live state as one atomic write.
    pub fn apply<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        let result = {
            let mut guard = self.lock();
            f(&mut guard)
        };
        self.bump();
        result
    }

    /// Run `f` against a draft and commit it only on `Ok`.
    ///
    /// Use this for multi-step writes that may fail half way: the live state
    /// is untouched unless every step succeeds.
    pub fn try_apply<R, E>(
        &self,
        f: impl FnOnce(&mut LedgerState) -> Result<R, E>,
    ) -> Result<R, E> {
        let result = {
            let mut guard = self.lock();
            let mut draft = guard.clone();
            let value = f(&mut draft)?;
            *guard = draft;
            value
        };
        self.bump();
        Ok(result)
    }

    /// Read without mutating.
    pub fn read<R>(&self, f: impl FnOnce(&LedgerState) -> R) -> R {
        let guard = self.lock();
        f(&guard)
    }

    #[must_use]
    pub fn snapshot(&self) -> LedgerState {
        self.lock().clone()
    }

    /// Swap the whole state (hydration, logout).
    pub fn replace(&self, state: LedgerState) {
        *self.lock() = state;
        self.bump();
    }

    /// Receiver notified after every committed write.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{EntityId, Envelope, LedgerError};

    fn envelope(id: &str, name: &str) -> Envelope {
        Envelope::new(EntityId::new(id), "alice", name, 0, None, Utc::now()).unwrap()
    }

    #[test]
    fn try_apply_discards_failed_drafts() {
        let store = LedgerStore::default();
        let result: Result<(), LedgerError> = store.try_apply(|state| {
            state.insert_envelope(envelope("env-1", "Rent"))?;
            state.insert_envelope(envelope("env-2", "rent"))?;
            Ok(())
        });
        assert!(matches!(result, Err(LedgerError::ExistingKey(_))));
        assert!(store.read(LedgerState::is_empty));
        assert_eq!(store.revision(), 0);
    }

    #[tokio::test]
    async fn observers_are_notified_per_commit() {
        let store = LedgerStore::default();
        let mut rx = store.subscribe();
        store
            .apply(|state| state.insert_envelope(envelope("env-1", "Rent")))
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
        assert_eq!(store.read(|s| s.envelopes.len()), 1);
    }
}
