//! In-memory ledger state and its mutation primitives.
//!
//! `LedgerState` is plain data: every method here is synchronous and either
//! validates and mutates, or leaves the state untouched on error. Concurrency
//! and change notification live in [`LedgerStore`](crate::LedgerStore).

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    EntityId, Envelope, EnvelopeAllocation, IncomeSource, LedgerError, MirrorKind, MoneyCents,
    MonthKey, ResultLedger, Transaction, TransactionKind, util::name_key,
};

/// Entities addressable by id.
pub trait Keyed {
    fn key(&self) -> &EntityId;
    fn set_key(&mut self, id: EntityId);
}

macro_rules! keyed {
    ($($ty:ty),*) => {
        $(
            impl Keyed for $ty {
                fn key(&self) -> &EntityId {
                    &self.id
                }

                fn set_key(&mut self, id: EntityId) {
                    self.id = id;
                }
            }
        )*
    };
}

keyed!(Envelope, Transaction, IncomeSource, EnvelopeAllocation);

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub envelopes: BTreeMap<EntityId, Envelope>,
    pub transactions: BTreeMap<EntityId, Transaction>,
    pub income_sources: BTreeMap<EntityId, IncomeSource>,
    pub allocations: BTreeMap<EntityId, EnvelopeAllocation>,
}

/// Everything removed by an envelope cascade, kept so a failed remote delete
/// or create can be rolled back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedEnvelope {
    pub envelope: Envelope,
    pub transactions: Vec<Transaction>,
    pub allocations: Vec<EnvelopeAllocation>,
}

/// Dependents whose foreign key moved from a temp id to a confirmed id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rewrite {
    pub transactions: Vec<EntityId>,
    pub allocations: Vec<EntityId>,
}

/// Result of an allocation upsert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationUpsert {
    pub allocation: EnvelopeAllocation,
    /// Value before the write; `None` when the allocation was created.
    pub previous: Option<EnvelopeAllocation>,
}

/// Ids protected from a remote merge.
///
/// `keep_local` entities have local changes not yet confirmed by the remote
/// store; `suppressed` entities were deleted locally and must not come back.
#[derive(Clone, Debug, Default)]
pub struct MergeGuard {
    pub keep_local: HashSet<EntityId>,
    pub suppressed: HashSet<EntityId>,
}

impl MergeGuard {
    fn protects(&self, id: &EntityId) -> bool {
        id.is_temp() || self.keep_local.contains(id)
    }
}

impl LedgerState {
    pub fn envelope(&self, id: &EntityId) -> ResultLedger<&Envelope> {
        self.envelopes
            .get(id)
            .ok_or_else(|| LedgerError::KeyNotFound(format!("envelope {id}")))
    }

    pub fn transaction(&self, id: &EntityId) -> ResultLedger<&Transaction> {
        self.transactions
            .get(id)
            .ok_or_else(|| LedgerError::KeyNotFound(format!("transaction {id}")))
    }

    pub fn income_source(&self, id: &EntityId) -> ResultLedger<&IncomeSource> {
        self.income_sources
            .get(id)
            .ok_or_else(|| LedgerError::KeyNotFound(format!("income source {id}")))
    }

    pub fn allocation(&self, id: &EntityId) -> ResultLedger<&EnvelopeAllocation> {
        self.allocations
            .get(id)
            .ok_or_else(|| LedgerError::KeyNotFound(format!("allocation {id}")))
    }

    /// Order index for an envelope appended at the end of the list.
    #[must_use]
    pub fn next_order_index(&self) -> u32 {
        self.envelopes
            .values()
            .map(|e| e.order_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Envelopes sorted by `order_index`.
    #[must_use]
    pub fn ordered_envelopes(&self) -> Vec<&Envelope> {
        let mut envelopes: Vec<&Envelope> = self.envelopes.values().collect();
        envelopes.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));
        envelopes
    }

    fn ensure_unique_name(&self, envelope: &Envelope) -> ResultLedger<()> {
        if !envelope.is_active {
            return Ok(());
        }
        let key = name_key(&envelope.name);
        let clash = self
            .envelopes
            .values()
            .any(|e| e.id != envelope.id && e.is_active && name_key(&e.name) == key);
        if clash {
            return Err(LedgerError::ExistingKey(envelope.name.clone()));
        }
        Ok(())
    }

    pub fn insert_envelope(&mut self, envelope: Envelope) -> ResultLedger<()> {
        if self.envelopes.contains_key(&envelope.id) {
            return Err(LedgerError::ExistingKey(envelope.id.to_string()));
        }
        self.ensure_unique_name(&envelope)?;
        self.envelopes.insert(envelope.id.clone(), envelope);
        Ok(())
    }

    /// Apply `f` to an envelope, returning the value before the change.
    pub fn update_envelope(
        &mut self,
        id: &EntityId,
        f: impl FnOnce(&mut Envelope) -> ResultLedger<()>,
    ) -> ResultLedger<Envelope> {
        let previous = self.envelope(id)?.clone();
        let mut next = previous.clone();
        f(&mut next)?;
        next.id = previous.id.clone();
        self.ensure_unique_name(&next)?;
        self.envelopes.insert(id.clone(), next);
        Ok(previous)
    }

    /// Remove an envelope together with its transactions, allocations and the
    /// partner legs of its transfers.
    pub fn remove_envelope(&mut self, id: &EntityId) -> Option<RemovedEnvelope> {
        let envelope = self.envelopes.remove(id)?;

        let transfer_ids: HashSet<String> = self
            .transactions
            .values()
            .filter(|tx| &tx.envelope_id == id)
            .filter_map(|tx| tx.transfer_id.clone())
            .collect();
        let tx_ids: Vec<EntityId> = self
            .transactions
            .values()
            .filter(|tx| {
                &tx.envelope_id == id
                    || tx
                        .transfer_id
                        .as_ref()
                        .is_some_and(|t| transfer_ids.contains(t))
            })
            .map(|tx| tx.id.clone())
            .collect();
        let transactions = tx_ids
            .iter()
            .filter_map(|tx_id| self.transactions.remove(tx_id))
            .collect();

        let alloc_ids: Vec<EntityId> = self
            .allocations
            .values()
            .filter(|a| &a.envelope_id == id)
            .map(|a| a.id.clone())
            .collect();
        let allocations = alloc_ids
            .iter()
            .filter_map(|alloc_id| self.allocations.remove(alloc_id))
            .collect();

        Some(RemovedEnvelope {
            envelope,
            transactions,
            allocations,
        })
    }

    /// Undo [`remove_envelope`](Self::remove_envelope).
    pub fn restore_envelope(&mut self, removed: RemovedEnvelope) {
        self.envelopes
            .insert(removed.envelope.id.clone(), removed.envelope);
        for tx in removed.transactions {
            self.transactions.insert(tx.id.clone(), tx);
        }
        for alloc in removed.allocations {
            self.allocations.insert(alloc.id.clone(), alloc);
        }
    }

    pub fn insert_transaction(&mut self, tx: Transaction) -> ResultLedger<()> {
        self.envelope(&tx.envelope_id)?;
        if self.transactions.contains_key(&tx.id) {
            return Err(LedgerError::ExistingKey(tx.id.to_string()));
        }
        self.transactions.insert(tx.id.clone(), tx);
        Ok(())
    }

    /// Insert both legs of a transfer after checking the pairing rules.
    pub fn insert_transfer(&mut self, expense: Transaction, income: Transaction) -> ResultLedger<()> {
        validate_transfer_pair(&expense, &income)?;
        for leg in [&expense, &income] {
            let envelope = self.envelope(&leg.envelope_id)?;
            if !envelope.is_active {
                return Err(LedgerError::InvalidTransfer(format!(
                    "envelope {} is inactive",
                    envelope.name
                )));
            }
            if self.transactions.contains_key(&leg.id) {
                return Err(LedgerError::ExistingKey(leg.id.to_string()));
            }
        }
        self.transactions.insert(expense.id.clone(), expense);
        self.transactions.insert(income.id.clone(), income);
        Ok(())
    }

    /// Apply `f` to a transaction, returning the values before the change.
    ///
    /// The first element is the edited transaction. Amount and date edits on a
    /// transfer leg are mirrored on its partner (second element) so the pair
    /// stays balanced.
    pub fn update_transaction(
        &mut self,
        id: &EntityId,
        f: impl FnOnce(&mut Transaction) -> ResultLedger<()>,
    ) -> ResultLedger<Vec<Transaction>> {
        let previous = self.transaction(id)?.clone();
        let mut next = previous.clone();
        f(&mut next)?;
        next.id = previous.id.clone();
        next.month = MonthKey::of(next.date);
        crate::util::ensure_positive(next.amount, "amount")?;
        self.envelope(&next.envelope_id)?;

        let partner = self.transfer_partner(&previous).cloned();
        if let Some(partner) = &partner {
            if next.kind != previous.kind {
                return Err(LedgerError::InvalidTransfer(
                    "transfer legs cannot change type".to_string(),
                ));
            }
            if partner.envelope_id == next.envelope_id {
                return Err(LedgerError::InvalidTransfer(
                    "transfer legs must use distinct envelopes".to_string(),
                ));
            }
        }

        let mut changed = vec![previous];
        if let Some(mut partner) = partner {
            changed.push(partner.clone());
            partner.amount = next.amount;
            partner.set_date(next.date);
            self.transactions.insert(partner.id.clone(), partner);
        }
        self.transactions.insert(id.clone(), next);
        Ok(changed)
    }

    /// The other leg of a transfer.
    #[must_use]
    pub fn transfer_partner(&self, tx: &Transaction) -> Option<&Transaction> {
        let transfer_id = tx.transfer_id.as_ref()?;
        self.transactions
            .values()
            .find(|other| other.id != tx.id && other.transfer_id.as_ref() == Some(transfer_id))
    }

    /// Remove a transaction and, for transfers, its partner leg.
    pub fn remove_transaction(&mut self, id: &EntityId) -> Vec<Transaction> {
        let Some(tx) = self.transactions.remove(id) else {
            return Vec::new();
        };
        let partner_id = self.transfer_partner(&tx).map(|p| p.id.clone());
        let mut removed = vec![tx];
        if let Some(partner) = partner_id.and_then(|pid| self.transactions.remove(&pid)) {
            removed.push(partner);
        }
        removed
    }

    pub fn restore_transactions(&mut self, transactions: Vec<Transaction>) {
        for tx in transactions {
            self.transactions.insert(tx.id.clone(), tx);
        }
    }

    #[must_use]
    pub fn allocation_for(&self, envelope_id: &EntityId, month: MonthKey) -> Option<&EnvelopeAllocation> {
        self.allocations
            .values()
            .find(|a| &a.envelope_id == envelope_id && a.month == month)
    }

    /// Update the `(envelope, month)` allocation if it exists, else create it
    /// with `new_id`.
    pub fn upsert_allocation(
        &mut self,
        user_id: &str,
        envelope_id: &EntityId,
        month: MonthKey,
        amount: MoneyCents,
        new_id: EntityId,
    ) -> ResultLedger<AllocationUpsert> {
        self.envelope(envelope_id)?;
        let next = EnvelopeAllocation::new(new_id, user_id, envelope_id.clone(), month, amount)?;

        if let Some(existing) = self.allocation_for(envelope_id, month).cloned() {
            let mut updated = existing.clone();
            updated.budgeted_amount = next.budgeted_amount;
            self.allocations.insert(updated.id.clone(), updated.clone());
            return Ok(AllocationUpsert {
                allocation: updated,
                previous: Some(existing),
            });
        }

        self.allocations.insert(next.id.clone(), next.clone());
        Ok(AllocationUpsert {
            allocation: next,
            previous: None,
        })
    }

    pub fn remove_allocation(&mut self, id: &EntityId) -> Option<EnvelopeAllocation> {
        self.allocations.remove(id)
    }

    pub fn insert_income_source(&mut self, source: IncomeSource) -> ResultLedger<()> {
        if self.income_sources.contains_key(&source.id) {
            return Err(LedgerError::ExistingKey(source.id.to_string()));
        }
        self.income_sources.insert(source.id.clone(), source);
        Ok(())
    }

    pub fn update_income_source(
        &mut self,
        id: &EntityId,
        f: impl FnOnce(&mut IncomeSource) -> ResultLedger<()>,
    ) -> ResultLedger<IncomeSource> {
        let previous = self.income_source(id)?.clone();
        let mut next = previous.clone();
        f(&mut next)?;
        next.id = previous.id.clone();
        crate::util::ensure_non_negative(next.amount, "income amount")?;
        self.income_sources.insert(id.clone(), next);
        Ok(previous)
    }

    pub fn remove_income_source(&mut self, id: &EntityId) -> Option<IncomeSource> {
        self.income_sources.remove(id)
    }

    /// Mirror transactions of `kind` for `(envelope, month)`, earliest first.
    #[must_use]
    pub fn mirrors(
        &self,
        envelope_id: &EntityId,
        month: MonthKey,
        kind: MirrorKind,
    ) -> Vec<&Transaction> {
        let mut found: Vec<&Transaction> = self
            .transactions
            .values()
            .filter(|tx| {
                &tx.envelope_id == envelope_id
                    && tx.month == month
                    && tx.mirror_kind() == Some(kind)
            })
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        found
    }

    /// Re-key a confirmed envelope and rewrite every foreign key pointing at
    /// the temp id. Returns `None` when the envelope is gone (deleted while
    /// its create was in flight).
    pub fn confirm_envelope(&mut self, temp: &EntityId, real: &EntityId) -> Option<Rewrite> {
        if !rekey(&mut self.envelopes, temp, real) {
            return None;
        }
        let mut rewrite = Rewrite::default();
        for tx in self.transactions.values_mut() {
            if &tx.envelope_id == temp {
                tx.envelope_id = real.clone();
                rewrite.transactions.push(tx.id.clone());
            }
        }
        for alloc in self.allocations.values_mut() {
            if &alloc.envelope_id == temp {
                alloc.envelope_id = real.clone();
                rewrite.allocations.push(alloc.id.clone());
            }
        }
        Some(rewrite)
    }

    pub fn confirm_transaction(&mut self, temp: &EntityId, real: &EntityId) -> bool {
        rekey(&mut self.transactions, temp, real)
    }

    pub fn confirm_allocation(&mut self, temp: &EntityId, real: &EntityId) -> bool {
        rekey(&mut self.allocations, temp, real)
    }

    pub fn confirm_income_source(&mut self, temp: &EntityId, real: &EntityId) -> bool {
        rekey(&mut self.income_sources, temp, real)
    }

    /// Number of entities that carry `id`, either as their own id or as a
    /// foreign key.
    #[must_use]
    pub fn references(&self, id: &EntityId) -> usize {
        let own = usize::from(self.envelopes.contains_key(id))
            + usize::from(self.transactions.contains_key(id))
            + usize::from(self.income_sources.contains_key(id))
            + usize::from(self.allocations.contains_key(id));
        let foreign = self
            .transactions
            .values()
            .filter(|tx| &tx.envelope_id == id)
            .count()
            + self
                .allocations
                .values()
                .filter(|a| &a.envelope_id == id)
                .count();
        own + foreign
    }

    /// Replace confirmed envelopes with a remote view.
    pub fn merge_envelopes(&mut self, remote: Vec<Envelope>, guard: &MergeGuard) -> usize {
        merge_scoped(&mut self.envelopes, remote, guard, |_| true)
    }

    /// Replace confirmed transactions (optionally one month only) with a
    /// remote view.
    pub fn merge_transactions(
        &mut self,
        remote: Vec<Transaction>,
        month: Option<MonthKey>,
        guard: &MergeGuard,
    ) -> usize {
        merge_scoped(&mut self.transactions, remote, guard, |tx| {
            month.is_none_or(|m| tx.month == m)
        })
    }

    pub fn merge_income_sources(
        &mut self,
        remote: Vec<IncomeSource>,
        month: Option<MonthKey>,
        guard: &MergeGuard,
    ) -> usize {
        merge_scoped(&mut self.income_sources, remote, guard, |s| {
            month.is_none_or(|m| s.month == m)
        })
    }

    pub fn merge_allocations(
        &mut self,
        remote: Vec<EnvelopeAllocation>,
        month: Option<MonthKey>,
        guard: &MergeGuard,
    ) -> usize {
        merge_scoped(&mut self.allocations, remote, guard, |a| {
            month.is_none_or(|m| a.month == m)
        })
    }

    /// Ids of temp-id transactions and allocations whose envelope is
    /// confirmed, i.e. entities that can now be created remotely.
    #[must_use]
    pub fn orphaned_temp_dependents(&self) -> Rewrite {
        Rewrite {
            transactions: self
                .transactions
                .values()
                .filter(|tx| tx.id.is_temp() && !tx.envelope_id.is_temp())
                .map(|tx| tx.id.clone())
                .collect(),
            allocations: self
                .allocations
                .values()
                .filter(|a| a.id.is_temp() && !a.envelope_id.is_temp())
                .map(|a| a.id.clone())
                .collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
            && self.transactions.is_empty()
            && self.income_sources.is_empty()
            && self.allocations.is_empty()
    }
}

fn validate_transfer_pair(expense: &Transaction, income: &Transaction) -> ResultLedger<()> {
    if expense.kind != TransactionKind::Expense || income.kind != TransactionKind::Income {
        return Err(LedgerError::InvalidTransfer(
            "a transfer needs one expense leg and one income leg".to_string(),
        ));
    }
    match (&expense.transfer_id, &income.transfer_id) {
        (Some(a), Some(b)) if a == b => {}
        _ => {
            return Err(LedgerError::InvalidTransfer(
                "transfer legs must share a transfer id".to_string(),
            ));
        }
    }
    if expense.amount != income.amount {
        return Err(LedgerError::InvalidTransfer(
            "transfer legs must have equal amounts".to_string(),
        ));
    }
    if expense.envelope_id == income.envelope_id {
        return Err(LedgerError::InvalidTransfer(
            "transfer legs must use distinct envelopes".to_string(),
        ));
    }
    Ok(())
}

fn rekey<T: Keyed>(map: &mut BTreeMap<EntityId, T>, temp: &EntityId, real: &EntityId) -> bool {
    let Some(mut entity) = map.remove(temp) else {
        return false;
    };
    entity.set_key(real.clone());
    map.insert(real.clone(), entity);
    true
}

fn merge_scoped<T: Keyed>(
    map: &mut BTreeMap<EntityId, T>,
    remote: Vec<T>,
    guard: &MergeGuard,
    in_scope: impl Fn(&T) -> bool,
) -> usize {
    let before = map.len();
    map.retain(|id, entity| !in_scope(entity) || guard.protects(id));
    let mut applied = 0;
    for entity in remote {
        let id = entity.key().clone();
        if !in_scope(&entity) || guard.protects(&id) || guard.suppressed.contains(&id) {
            continue;
        }
        map.insert(id, entity);
        applied += 1;
    }
    tracing::debug!(before, after = map.len(), applied, "merged remote view");
    applied
}
