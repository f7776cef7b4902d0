use std::sync::{Arc, Weak};

use api_types::{Document, EntityKind, Filter};
use futures::future::join_all;
use ledger::{
    Envelope, EnvelopeAllocation, IncomeSource, LedgerState, MergeGuard, MonthKey, Transaction,
};
use tokio::time::Instant;

use crate::{
    ChangeHandler, ErrorKind, GateState, ImportGuard, PlatformSignal, RemoteChange, ResultSync,
    SyncError, SyncSession,
    deadline::with_deadline,
    docs::decode_all,
};

use super::{FlushReport, RepairReport, SessionInner};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Another probe is running, or the session is already online.
    Skipped,
    /// Back online; the queue was flushed.
    Online(FlushReport),
    Offline,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed {
        envelopes: usize,
        transactions: usize,
        income_sources: usize,
        allocations: usize,
        repair: RepairReport,
    },
    /// The remote store could not be reached; the cached state is served.
    Cached,
}

/// Merge a remote view of one collection. `month` scopes the merge for
/// monthly collections.
fn merge_documents(
    state: &mut LedgerState,
    kind: EntityKind,
    documents: Vec<Document>,
    month: Option<MonthKey>,
    guard: &MergeGuard,
) -> usize {
    match kind {
        EntityKind::Envelope => state.merge_envelopes(decode_all::<Envelope>(documents), guard),
        EntityKind::Transaction => {
            state.merge_transactions(decode_all::<Transaction>(documents), month, guard)
        }
        EntityKind::IncomeSource => {
            state.merge_income_sources(decode_all::<IncomeSource>(documents), month, guard)
        }
        EntityKind::Allocation => {
            state.merge_allocations(decode_all::<EnvelopeAllocation>(documents), month, guard)
        }
    }
}

impl SessionInner {
    fn filter_for(&self, kind: EntityKind, month: MonthKey) -> Filter {
        let filter = Filter::user(self.user_id.clone());
        match kind {
            EntityKind::Envelope => filter,
            _ => filter.month(month.to_string()),
        }
    }

    fn gate_state(&self) -> GateState {
        let queue = self.queue();
        GateState {
            online: self.connectivity.is_online(),
            pending_sync: queue.pending_sync(),
            creating: queue.has_temp_in_flight(),
            reset_pending: self.gate.reset_pending(),
            importing: self.gate.importing(),
        }
    }

    /// Entry point of every subscription callback.
    pub(crate) fn on_remote_change(&self, change: RemoteChange) {
        if self.is_closed() || !self.gate.admit(self.gate_state()) {
            return;
        }
        let guard = self.queue().merge_guard();
        let month = change
            .filter
            .month
            .as_deref()
            .and_then(|m| m.parse::<MonthKey>().ok());
        let applied = self.store.apply(|state| {
            merge_documents(state, change.kind, change.documents, month, &guard)
        });
        tracing::debug!(kind = %change.kind, applied, "applied realtime push");
    }

    async fn fetch(&self, kind: EntityKind, month: MonthKey) -> ResultSync<Vec<Document>> {
        let filter = self.filter_for(kind, month);
        with_deadline(
            self.config.deadlines.fetch,
            "query",
            self.gateway.query(kind, &filter),
        )
        .await
        .map_err(|err| self.classify(err))
    }

    pub(crate) async fn refresh(self: &Arc<Self>, month: MonthKey) -> ResultSync<RefreshOutcome> {
        if !self.connectivity.is_online() {
            tracing::info!(%month, "offline, serving cached month");
            return Ok(RefreshOutcome::Cached);
        }
        let fetched = futures::try_join!(
            self.fetch(EntityKind::Envelope, month),
            self.fetch(EntityKind::Transaction, month),
            self.fetch(EntityKind::IncomeSource, month),
            self.fetch(EntityKind::Allocation, month),
        );
        let (envelopes, transactions, income_sources, allocations) = match fetched {
            Ok(fetched) => fetched,
            Err(SyncError::Network(reason)) => {
                tracing::warn!(%month, %reason, "resync failed, serving cached month");
                return Ok(RefreshOutcome::Cached);
            }
            Err(err) => return Err(err),
        };

        let guard = self.queue().merge_guard();
        let counts = self.store.apply(|state| {
            (
                merge_documents(state, EntityKind::Envelope, envelopes, None, &guard),
                merge_documents(state, EntityKind::Transaction, transactions, Some(month), &guard),
                merge_documents(
                    state,
                    EntityKind::IncomeSource,
                    income_sources,
                    Some(month),
                    &guard,
                ),
                merge_documents(state, EntityKind::Allocation, allocations, Some(month), &guard),
            )
        });
        self.queue().settle();
        tracing::info!(%month, ?counts, "month resynced");

        let repair = self.run_repair(month, None).await;
        Ok(RefreshOutcome::Refreshed {
            envelopes: counts.0,
            transactions: counts.1,
            income_sources: counts.2,
            allocations: counts.3,
            repair,
        })
    }

    pub(crate) async fn probe(self: &Arc<Self>) -> ProbeOutcome {
        let Some(ticket) = self.connectivity.begin_probe() else {
            return ProbeOutcome::Skipped;
        };
        let reachable = with_deadline(
            self.config.deadlines.mutation,
            "probe",
            self.gateway.probe(),
        )
        .await
        .is_ok();
        if self.connectivity.finish_probe(ticket, reachable) {
            ProbeOutcome::Online(self.flush().await)
        } else {
            ProbeOutcome::Offline
        }
    }

    /// One tick of the background loop: probe while offline, force a resync
    /// when `pending_sync` has been stuck for too long.
    async fn background_tick(self: &Arc<Self>) {
        if !self.connectivity.is_online() {
            self.probe().await;
            return;
        }
        let age = self.queue().pending_age(Instant::now());
        let Some(age) = age.filter(|age| *age >= self.config.max_pending_age) else {
            return;
        };
        tracing::warn!(age_secs = age.as_secs(), "pending sync is stale, forcing resync");
        self.flush().await;
        let month = self.current_month();
        match self.refresh(month).await {
            Ok(outcome) => tracing::debug!(?outcome, "forced resync finished"),
            Err(err) => tracing::error!(%err, "forced resync failed"),
        }
        let cleared = self.queue().settle();
        tracing::info!(cleared, "stale pending sync handled");
    }
}

impl SyncSession {
    /// Send everything queued while offline.
    pub async fn flush_pending(&self) -> ResultSync<FlushReport> {
        self.ensure_open()?;
        Ok(self.inner.flush().await)
    }

    /// Full resync of `month`: fetch all four collections, merge them
    /// without touching unsynced local work, then repair the month.
    pub async fn refresh_month(&self, month: MonthKey) -> ResultSync<RefreshOutcome> {
        self.ensure_open()?;
        self.inner.refresh(month).await
    }

    /// Subscribe to remote changes of `month`, replacing earlier
    /// subscriptions.
    pub async fn start_realtime(&self, month: MonthKey) -> ResultSync<()> {
        self.ensure_open()?;
        let inner = &self.inner;
        let weak: Weak<SessionInner> = Arc::downgrade(inner);
        let handler: ChangeHandler = Arc::new(move |change| {
            if let Some(inner) = weak.upgrade() {
                inner.on_remote_change(change);
            }
        });

        let mut subscriptions = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let subscription = with_deadline(
                inner.config.deadlines.fetch,
                "subscribe",
                inner
                    .gateway
                    .subscribe(kind, inner.filter_for(kind, month), Arc::clone(&handler)),
            )
            .await
            .map_err(|err| inner.classify(err))?;
            subscriptions.push(subscription);
        }
        inner.replace_subscriptions(subscriptions);
        tracing::info!(%month, "realtime subscriptions started");
        Ok(())
    }

    /// Probe the remote store now, flushing the queue if it is reachable.
    pub async fn probe_now(&self) -> ResultSync<ProbeOutcome> {
        self.ensure_open()?;
        Ok(self.inner.probe().await)
    }

    pub async fn handle_platform_signal(&self, signal: PlatformSignal) -> ResultSync<ProbeOutcome> {
        self.ensure_open()?;
        if self.inner.connectivity.platform_signal(signal) {
            return Ok(self.inner.probe().await);
        }
        Ok(ProbeOutcome::Skipped)
    }

    /// Spawn the probe / staleness loop. It stops on logout.
    pub fn start_background(&self) -> ResultSync<()> {
        self.ensure_open()?;
        let weak = Arc::downgrade(&self.inner);
        let mut shutdown = self.inner.shutdown_signal();
        let period = self.inner.config.probe_interval;
        self.inner.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.is_closed() {
                    break;
                }
                inner.background_tick().await;
            }
            tracing::debug!("background loop stopped");
        });
        Ok(())
    }

    /// Raise `pending_sync` by hand, e.g. before a bulk local edit.
    pub fn mark_pending_sync(&self) {
        self.inner.queue().set_pending_sync();
    }

    /// Pause realtime pushes until the guard drops.
    #[must_use]
    pub fn begin_import(&self) -> ImportGuard {
        self.inner.gate.begin_import()
    }

    /// Delete every remote and local document of the user. Realtime pushes
    /// are dropped while it runs.
    pub async fn reset_all(&self) -> ResultSync<()> {
        self.ensure_open()?;
        let inner = &self.inner;
        let _reset = inner.gate.begin_reset();
        if !inner.connectivity.is_online() {
            return Err(SyncError::Network(
                "cannot reset while offline".to_string(),
            ));
        }

        // Dependents first so nothing is left pointing at a deleted envelope.
        let order = [
            EntityKind::Transaction,
            EntityKind::Allocation,
            EntityKind::IncomeSource,
            EntityKind::Envelope,
        ];
        let filter = Filter::user(inner.user_id.clone());
        for kind in order {
            let documents = with_deadline(
                inner.config.deadlines.fetch,
                "query",
                inner.gateway.query(kind, &filter),
            )
            .await
            .map_err(|err| inner.classify(err))?;

            let ids: Vec<String> = documents
                .iter()
                .filter_map(|doc| doc.id().map(str::to_string))
                .collect();
            let deletes = ids.iter().map(|id| {
                with_deadline(
                    inner.config.deadlines.mutation,
                    "delete",
                    inner.gateway.delete(kind, id),
                )
            });
            for result in join_all(deletes).await {
                match result {
                    Ok(()) => {}
                    Err(err) if err.kind == ErrorKind::NotFound => {}
                    Err(err) => return Err(inner.classify(err)),
                }
            }
            tracing::info!(%kind, deleted = ids.len(), "remote collection cleared");
        }

        inner.queue().clear();
        inner.store.replace(LedgerState::default());
        tracing::warn!(user_id = %inner.user_id, "all data reset");
        Ok(())
    }
}
