use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, atomic::AtomicBool, atomic::Ordering},
    time::Duration,
};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use ledger::{LedgerStore, MonthKey};
use tokio::{sync::watch, task::JoinSet};

use crate::{
    Connectivity, ConnectivityMonitor, Deadlines, RealtimeGate, RemoteGateway, ResultSync,
    SyncError, gateway::Subscription, queue::PendingQueue,
};

mod budget;
mod envelopes;
mod remote;
mod repair;
mod snapshot;
mod sync;
mod transactions;

pub use remote::FlushReport;
pub use repair::{RepairReport, RepairWorker};
pub use snapshot::{SNAPSHOT_VERSION, SessionSnapshot};
pub use sync::{ProbeOutcome, RefreshOutcome};
pub use transactions::TransferIds;

/// Stable identity handed over by the authentication collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthIdentity {
    pub user_id: String,
    pub authenticated: bool,
}

impl AuthIdentity {
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            authenticated: true,
        }
    }
}

/// Timing knobs of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub deadlines: Deadlines,
    /// Period of the background probe / staleness loop.
    pub probe_interval: Duration,
    /// Age after which a raised `pending_sync` forces a resync.
    pub max_pending_age: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            deadlines: Deadlines::default(),
            probe_interval: Duration::from_secs(30),
            max_pending_age: Duration::from_secs(300),
        }
    }
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Snapshot of the sync machinery, for status displays.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct SyncStatus {
    pub connectivity: Connectivity,
    pub pending_sync: bool,
    pub pending_creates: usize,
    pub pending_updates: usize,
    pub pending_deletes: usize,
    pub applied_pushes: u64,
    pub dropped_pushes: u64,
}

pub(crate) struct SessionInner {
    pub(crate) user_id: String,
    pub(crate) timezone: Tz,
    pub(crate) config: SyncConfig,
    pub(crate) gateway: Arc<dyn RemoteGateway>,
    pub(crate) store: Arc<LedgerStore>,
    pub(crate) gate: Arc<RealtimeGate>,
    pub(crate) connectivity: ConnectivityMonitor,
    pub(crate) repair: RepairWorker,
    pub(crate) flushing: AtomicBool,
    queue: Mutex<PendingQueue>,
    subscriptions: Mutex<Vec<Subscription>>,
    tasks: Mutex<JoinSet<()>>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    clock: Clock,
}

impl SessionInner {
    pub(crate) fn queue(&self) -> MutexGuard<'_, PendingQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Today in the user's timezone.
    pub(crate) fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.timezone).date_naive()
    }

    pub(crate) fn current_month(&self) -> MonthKey {
        MonthKey::current(self.now(), self.timezone)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn replace_subscriptions(&self, next: Vec<Subscription>) {
        let previous = std::mem::replace(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            next,
        );
        drop(previous);
    }

    pub(crate) fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn(task);
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// One authenticated session: owns the ledger store, the pending queue and
/// every remote subscription. Cheap to clone.
#[derive(Clone)]
pub struct SyncSession {
    pub(crate) inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("user_id", &self.inner.user_id)
            .field("connectivity", &self.inner.connectivity.current())
            .finish_non_exhaustive()
    }
}

impl SyncSession {
    /// Return a builder for `SyncSession`.
    pub fn builder(identity: AuthIdentity, gateway: Arc<dyn RemoteGateway>) -> SyncSessionBuilder {
        SyncSessionBuilder {
            identity,
            gateway,
            config: SyncConfig::default(),
            timezone: Tz::UTC,
            store: None,
            clock: None,
            online: true,
        }
    }

    pub(crate) fn ensure_open(&self) -> ResultSync<()> {
        if self.inner.is_closed() {
            return Err(SyncError::SessionClosed);
        }
        Ok(())
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// The store behind this session, for observers.
    #[must_use]
    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn current_month(&self) -> MonthKey {
        self.inner.current_month()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let queue = self.inner.queue();
        let (pending_creates, pending_updates, pending_deletes) = queue.counts();
        SyncStatus {
            connectivity: self.inner.connectivity.current(),
            pending_sync: queue.pending_sync(),
            pending_creates,
            pending_updates,
            pending_deletes,
            applied_pushes: self.inner.gate.applied(),
            dropped_pushes: self.inner.gate.dropped(),
        }
    }

    /// Discard all in-memory state and drop every subscription without
    /// flushing. The session is unusable afterwards.
    pub fn logout(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);
        self.inner.replace_subscriptions(Vec::new());
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
        self.inner.queue().clear();
        self.inner.store.replace(ledger::LedgerState::default());
        tracing::info!(user_id = %self.inner.user_id, "logged out, local state discarded");
    }
}

/// The builder for `SyncSession`
pub struct SyncSessionBuilder {
    identity: AuthIdentity,
    gateway: Arc<dyn RemoteGateway>,
    config: SyncConfig,
    timezone: Tz,
    store: Option<Arc<LedgerStore>>,
    clock: Option<Clock>,
    online: bool,
}

impl SyncSessionBuilder {
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// User timezone, decides the current month.
    pub fn timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Share an existing store instead of starting empty.
    pub fn store(mut self, store: Arc<LedgerStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Initial connectivity. Sessions start online unless told otherwise.
    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Construct `SyncSession`
    pub fn build(self) -> ResultSync<SyncSession> {
        if !self.identity.authenticated {
            return Err(SyncError::Unauthenticated);
        }
        let (shutdown, _) = watch::channel(false);
        let initial = if self.online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        tracing::info!(user_id = %self.identity.user_id, ?initial, "session started");
        Ok(SyncSession {
            inner: Arc::new(SessionInner {
                user_id: self.identity.user_id,
                timezone: self.timezone,
                config: self.config,
                gateway: self.gateway,
                store: self.store.unwrap_or_default(),
                gate: Arc::new(RealtimeGate::default()),
                connectivity: ConnectivityMonitor::new(initial),
                repair: RepairWorker::default(),
                flushing: AtomicBool::new(false),
                queue: Mutex::new(PendingQueue::default()),
                subscriptions: Mutex::new(Vec::new()),
                tasks: Mutex::new(JoinSet::new()),
                shutdown,
                closed: AtomicBool::new(false),
                clock: self.clock.unwrap_or_else(|| Arc::new(Utc::now)),
            }),
        })
    }
}
