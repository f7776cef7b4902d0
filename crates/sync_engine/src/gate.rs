//! Gate in front of every realtime subscription.
//!
//! A pushed snapshot reaches the store only while the session is online,
//! nothing local is waiting for the remote store, no create is awaiting its
//! remote id, and no reset or import is running. Anything else is dropped: there is no replay, the next full
//! resync restores consistency.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

/// Inputs of one gate decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GateState {
    pub online: bool,
    pub pending_sync: bool,
    /// A create is in flight. Its echo would land next to the temp row.
    pub creating: bool,
    pub reset_pending: bool,
    pub importing: bool,
}

impl GateState {
    #[must_use]
    pub fn admits(self) -> bool {
        self.online
            && !self.pending_sync
            && !self.creating
            && !self.reset_pending
            && !self.importing
    }
}

#[derive(Debug, Default)]
pub struct RealtimeGate {
    reset_pending: AtomicBool,
    importing: AtomicBool,
    applied: AtomicU64,
    dropped: AtomicU64,
}

impl RealtimeGate {
    #[must_use]
    pub fn reset_pending(&self) -> bool {
        self.reset_pending.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn importing(&self) -> bool {
        self.importing.load(Ordering::SeqCst)
    }

    /// Record the decision for one push and return it.
    pub fn admit(&self, state: GateState) -> bool {
        let admitted = state.admits();
        if admitted {
            self.applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(?state, "dropped realtime push");
        }
        admitted
    }

    #[must_use]
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Hold `importing` until the guard drops.
    #[must_use]
    pub fn begin_import(self: &Arc<Self>) -> ImportGuard {
        self.importing.store(true, Ordering::SeqCst);
        tracing::info!("import started, realtime pushes paused");
        ImportGuard {
            gate: Arc::clone(self),
        }
    }

    /// Hold `reset_pending` until the guard drops.
    #[must_use]
    pub fn begin_reset(self: &Arc<Self>) -> ResetGuard {
        self.reset_pending.store(true, Ordering::SeqCst);
        ResetGuard {
            gate: Arc::clone(self),
        }
    }
}

#[derive(Debug)]
pub struct ImportGuard {
    gate: Arc<RealtimeGate>,
}

impl Drop for ImportGuard {
    fn drop(&mut self) {
        self.gate.importing.store(false, Ordering::SeqCst);
        tracing::info!("import finished, realtime pushes resumed");
    }
}

#[derive(Debug)]
pub struct ResetGuard {
    gate: Arc<RealtimeGate>,
}

impl Drop for ResetGuard {
    fn drop(&mut self) {
        self.gate.reset_pending.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online() -> GateState {
        GateState {
            online: true,
            ..GateState::default()
        }
    }

    #[test]
    fn only_a_quiet_online_session_admits_pushes() {
        assert!(online().admits());
        assert!(!GateState::default().admits());
        for blocked in [
            GateState {
                pending_sync: true,
                ..online()
            },
            GateState {
                creating: true,
                ..online()
            },
            GateState {
                reset_pending: true,
                ..online()
            },
            GateState {
                importing: true,
                ..online()
            },
        ] {
            assert!(!blocked.admits(), "{blocked:?}");
        }
    }

    #[test]
    fn guards_release_their_flag() {
        let gate = Arc::new(RealtimeGate::default());
        {
            let _import = gate.begin_import();
            let _reset = gate.begin_reset();
            assert!(gate.importing());
            assert!(gate.reset_pending());
        }
        assert!(!gate.importing());
        assert!(!gate.reset_pending());
    }

    #[test]
    fn decisions_are_counted() {
        let gate = RealtimeGate::default();
        assert!(gate.admit(online()));
        assert!(!gate.admit(GateState::default()));
        assert_eq!((gate.applied(), gate.dropped()), (1, 1));
    }
}
