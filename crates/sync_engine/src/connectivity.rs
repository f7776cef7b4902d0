//! Online / offline state machine.
//!
//! ```text
//! Online  --platform offline | network error-->  Offline
//! Offline --timer | platform online-->           Probing
//! Probing --probe ok-->                          Online   (flush follows)
//! Probing --probe failed-->                      Offline
//! ```
//!
//! At most one probe runs at a time.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
    Probing,
}

/// Connectivity hints from the host platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformSignal {
    Online,
    Offline,
}

#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<Connectivity>,
    probing: AtomicBool,
}

/// Proof that the caller owns the single probe slot.
#[derive(Debug)]
pub struct ProbeTicket<'a> {
    monitor: &'a ConnectivityMonitor,
}

impl Drop for ProbeTicket<'_> {
    fn drop(&mut self) {
        self.monitor.probing.store(false, Ordering::SeqCst);
    }
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(initial: Connectivity) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            probing: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.current() == Connectivity::Online
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    fn transition(&self, next: Connectivity, reason: &str) {
        let previous = self.state.send_replace(next);
        if previous != next {
            match next {
                Connectivity::Offline => tracing::warn!(?previous, reason, "connectivity: offline"),
                Connectivity::Online => tracing::info!(?previous, reason, "connectivity: online"),
                Connectivity::Probing => tracing::debug!(?previous, reason, "connectivity: probing"),
            }
        }
    }

    /// Any gateway network error takes the session offline.
    pub fn report_network_error(&self, context: &str) {
        self.transition(Connectivity::Offline, context);
    }

    /// Apply a platform hint. Returns `true` when a probe should follow.
    pub fn platform_signal(&self, signal: PlatformSignal) -> bool {
        match signal {
            PlatformSignal::Offline => {
                self.transition(Connectivity::Offline, "platform offline signal");
                false
            }
            PlatformSignal::Online => !self.is_online(),
        }
    }

    /// Claim the probe slot and move to `Probing`. `None` when already
    /// online or another probe is running.
    pub fn begin_probe(&self) -> Option<ProbeTicket<'_>> {
        if self.is_online() {
            return None;
        }
        if self
            .probing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        self.transition(Connectivity::Probing, "probe started");
        Some(ProbeTicket { monitor: self })
    }

    /// Settle a probe. Returns `true` when the session came back online.
    pub fn finish_probe(&self, ticket: ProbeTicket<'_>, reachable: bool) -> bool {
        let next = if reachable {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        self.transition(next, "probe finished");
        drop(ticket);
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_take_the_session_offline() {
        let monitor = ConnectivityMonitor::new(Connectivity::Online);
        assert!(monitor.begin_probe().is_none());
        monitor.report_network_error("create timed out");
        assert_eq!(monitor.current(), Connectivity::Offline);
    }

    #[test]
    fn one_probe_at_a_time() {
        let monitor = ConnectivityMonitor::new(Connectivity::Offline);
        let ticket = monitor.begin_probe().unwrap();
        assert_eq!(monitor.current(), Connectivity::Probing);
        assert!(monitor.begin_probe().is_none());

        assert!(!monitor.finish_probe(ticket, false));
        assert_eq!(monitor.current(), Connectivity::Offline);

        let ticket = monitor.begin_probe().unwrap();
        assert!(monitor.finish_probe(ticket, true));
        assert!(monitor.is_online());
    }

    #[test]
    fn platform_signals() {
        let monitor = ConnectivityMonitor::new(Connectivity::Online);
        assert!(!monitor.platform_signal(PlatformSignal::Online));
        assert!(!monitor.platform_signal(PlatformSignal::Offline));
        assert_eq!(monitor.current(), Connectivity::Offline);
        assert!(monitor.platform_signal(PlatformSignal::Online));
    }
}
