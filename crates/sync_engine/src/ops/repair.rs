//! Execution of mirror repairs planned by the ledger.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use ledger::{EntityId, MonthKey, RepairAction, RepairScope, Transaction};

use crate::{ResultSync, SyncSession, docs::EntityRef};

use super::SessionInner;

/// Per-month reentrancy guard. A repair requested while the same month is
/// running is folded into one more pass of the running repair.
#[derive(Debug, Default)]
pub struct RepairWorker {
    running: Mutex<HashMap<MonthKey, bool>>,
}

struct RepairTicket<'a> {
    worker: &'a RepairWorker,
    month: MonthKey,
}

impl RepairWorker {
    fn try_begin(&self, month: MonthKey) -> Option<RepairTicket<'_>> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rerun) = running.get_mut(&month) {
            *rerun = true;
            return None;
        }
        running.insert(month, false);
        Some(RepairTicket {
            worker: self,
            month,
        })
    }

    #[must_use]
    pub fn is_running(&self, month: MonthKey) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&month)
    }
}

impl RepairTicket<'_> {
    fn rerun_requested(&self) -> bool {
        let mut running = self
            .worker
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        running
            .get_mut(&self.month)
            .map(|rerun| std::mem::take(rerun))
            .unwrap_or(false)
    }
}

impl Drop for RepairTicket<'_> {
    fn drop(&mut self) {
        self.worker
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.month);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
    /// The month was already being repaired; that run picks this request up.
    pub skipped: bool,
}

impl SessionInner {
    pub(crate) async fn run_repair(
        self: &Arc<Self>,
        month: MonthKey,
        envelope_id: Option<EntityId>,
    ) -> RepairReport {
        let Some(ticket) = self.repair.try_begin(month) else {
            tracing::debug!(%month, "repair already running, rerun requested");
            return RepairReport {
                skipped: true,
                ..RepairReport::default()
            };
        };

        let mut scope = RepairScope {
            month,
            today: self.today(),
            envelope_id,
        };
        let mut report = RepairReport::default();
        loop {
            let plan = self.store.read(|state| state.plan_repair(&scope));
            if !plan.is_empty() {
                tracing::info!(%month, actions = plan.actions.len(), "repairing mirror transactions");
            }
            for action in plan.actions {
                self.apply_repair(action, &mut report).await;
            }
            if !ticket.rerun_requested() {
                break;
            }
            scope.envelope_id = None;
        }
        report
    }

    async fn apply_repair(self: &Arc<Self>, action: RepairAction, report: &mut RepairReport) {
        let result = match action {
            RepairAction::Create {
                envelope_id,
                month,
                mirror,
                amount,
                date,
            } => {
                let now = self.now();
                let created = Transaction::mirror(
                    EntityId::temp_at(now),
                    &self.user_id,
                    envelope_id,
                    mirror,
                    amount,
                    date,
                    now,
                )
                .and_then(|tx| {
                    let id = tx.id.clone();
                    self.store
                        .try_apply(|state| state.insert_transaction(tx))
                        .map(|()| id)
                });
                match created {
                    Ok(id) => {
                        tracing::debug!(%id, %month, %amount, "mirror created");
                        report.created += 1;
                        self.push_create(EntityRef::transaction(id)).await.map(|_| ())
                    }
                    Err(err) => Err(err.into()),
                }
            }
            RepairAction::Update {
                transaction_id,
                amount,
            } => {
                let updated = self.store.try_apply(|state| {
                    state.update_transaction(&transaction_id, |tx| {
                        tx.amount = amount;
                        Ok(())
                    })
                });
                match updated {
                    Ok(_) => {
                        tracing::debug!(%transaction_id, %amount, "mirror updated");
                        report.updated += 1;
                        self.push_update(EntityRef::transaction(transaction_id)).await
                    }
                    Err(err) => Err(err.into()),
                }
            }
            RepairAction::Delete { transaction_id } => {
                self.store
                    .apply(|state| state.remove_transaction(&transaction_id));
                tracing::debug!(%transaction_id, "mirror deleted");
                report.deleted += 1;
                self.push_delete(EntityRef::transaction(transaction_id)).await
            }
        };
        if let Err(err) = result {
            report.failed += 1;
            tracing::error!(%err, "repair action failed");
        }
    }
}

impl SyncSession {
    /// Restore the allocation and mirror invariant for `month`.
    pub async fn repair_month(&self, month: MonthKey) -> ResultSync<RepairReport> {
        self.ensure_open()?;
        Ok(self.inner.run_repair(month, None).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_requests_fold_into_a_rerun() {
        let worker = RepairWorker::default();
        let june: MonthKey = "2025-06".parse().unwrap();
        let ticket = worker.try_begin(june).unwrap();
        assert!(worker.try_begin(june).is_none());
        assert!(worker.try_begin(june.next()).is_some());
        assert!(ticket.rerun_requested());
        assert!(!ticket.rerun_requested());
        drop(ticket);
        assert!(!worker.is_running(june));
    }
}
