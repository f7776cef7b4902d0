use futures::future::join_all;
use ledger::{
    EntityId, LedgerError, NewTransaction, Transaction, TransactionKind, TransactionPatch,
    TransferCmd,
};
use uuid::Uuid;

use crate::{
    ResultSync, SyncSession,
    docs::{DocCodec, EntityRef, document_for},
};

/// Ids of both legs of a transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferIds {
    pub expense: EntityId,
    pub income: EntityId,
}

impl SyncSession {
    /// Record an income or expense. Returns the confirmed id, or the temp id
    /// when the create was deferred.
    pub async fn add_transaction(&self, cmd: NewTransaction) -> ResultSync<EntityId> {
        self.ensure_open()?;
        let inner = &self.inner;
        let now = inner.now();
        let mut tx = Transaction::new(
            EntityId::temp_at(now),
            &inner.user_id,
            cmd.envelope_id,
            cmd.kind,
            cmd.amount,
            cmd.date,
            cmd.description.as_deref(),
            now,
        )?;
        tx.reconciled = cmd.reconciled;
        let temp = tx.id.clone();
        inner.store.try_apply(|state| state.insert_transaction(tx))?;
        tracing::debug!(id = %temp, "transaction created locally");

        Ok(inner
            .push_create(EntityRef::transaction(temp.clone()))
            .await?
            .unwrap_or(temp))
    }

    /// Move money between two envelopes: an expense leg on `from` and an
    /// income leg on `to`, linked by a shared transfer id. The legs are
    /// created concurrently and confirm in any order.
    pub async fn transfer(&self, cmd: TransferCmd) -> ResultSync<TransferIds> {
        self.ensure_open()?;
        let inner = &self.inner;
        let now = inner.now();
        let transfer_id = Uuid::new_v4().to_string();
        let leg = |envelope_id: EntityId, kind: TransactionKind| {
            Transaction::new(
                EntityId::temp_at(now),
                &inner.user_id,
                envelope_id,
                kind,
                cmd.amount,
                cmd.date,
                cmd.description.as_deref(),
                now,
            )
            .map(|mut tx| {
                tx.transfer_id = Some(transfer_id.clone());
                tx
            })
        };
        let expense = leg(cmd.from_envelope_id.clone(), TransactionKind::Expense)?;
        let income = leg(cmd.to_envelope_id.clone(), TransactionKind::Income)?;
        let (expense_id, income_id) = (expense.id.clone(), income.id.clone());
        inner
            .store
            .try_apply(|state| state.insert_transfer(expense, income))?;
        tracing::info!(%transfer_id, amount = %cmd.amount, "transfer created locally");

        let (expense_result, income_result) = futures::join!(
            inner.push_create(EntityRef::transaction(expense_id.clone())),
            inner.push_create(EntityRef::transaction(income_id.clone())),
        );
        Ok(TransferIds {
            expense: expense_result?.unwrap_or(expense_id),
            income: income_result?.unwrap_or(income_id),
        })
    }

    /// Edit a transaction. Amount and date edits on a transfer leg are
    /// mirrored on its partner.
    pub async fn update_transaction(
        &self,
        id: &EntityId,
        patch: TransactionPatch,
    ) -> ResultSync<()> {
        self.ensure_open()?;
        let inner = &self.inner;
        let previous = inner.store.try_apply(|state| {
            state.update_transaction(id, |tx| {
                if let Some(amount) = patch.amount {
                    tx.amount = amount;
                }
                if let Some(date) = patch.date {
                    tx.set_date(date);
                }
                if let Some(description) = patch.description.as_deref() {
                    tx.set_description(Some(description));
                }
                if let Some(kind) = patch.kind {
                    tx.kind = kind;
                }
                if let Some(envelope_id) = patch.envelope_id.clone() {
                    tx.envelope_id = envelope_id;
                }
                Ok(())
            })
        })?;
        self.push_transaction_edits(previous).await
    }

    pub async fn set_reconciled(&self, id: &EntityId, reconciled: bool) -> ResultSync<()> {
        self.ensure_open()?;
        let previous = self.inner.store.try_apply(|state| {
            state.update_transaction(id, |tx| {
                tx.reconciled = reconciled;
                Ok(())
            })
        })?;
        self.push_transaction_edits(previous).await
    }

    /// Push the rows that actually changed; restore `previous` on a
    /// permanent failure.
    async fn push_transaction_edits(&self, previous: Vec<Transaction>) -> ResultSync<()> {
        let inner = &self.inner;
        let changed: Vec<EntityRef> = inner.store.read(|state| {
            previous
                .iter()
                .map(|tx| EntityRef::transaction(tx.id.clone()))
                .filter(|entity| {
                    let before = previous
                        .iter()
                        .find(|tx| tx.id == entity.id)
                        .map(DocCodec::to_doc);
                    document_for(state, entity) != before
                })
                .collect()
        });

        let failure = join_all(changed.into_iter().map(|entity| inner.push_update(entity)))
            .await
            .into_iter()
            .find_map(Result::err);
        if let Some(err) = failure {
            tracing::warn!(%err, "transaction edit rolled back");
            inner
                .store
                .apply(|state| state.restore_transactions(previous));
            return Err(err);
        }
        Ok(())
    }

    /// Delete a transaction; a transfer leg takes its partner with it.
    ///
    /// The requested leg is deleted remotely before its partner. When it is
    /// rejected both legs are restored; when only the partner is rejected,
    /// the partner alone comes back.
    pub async fn delete_transaction(&self, id: &EntityId) -> ResultSync<()> {
        self.ensure_open()?;
        let inner = &self.inner;
        let removed = inner.store.apply(|state| state.remove_transaction(id));
        if removed.is_empty() {
            return Err(LedgerError::KeyNotFound(format!("transaction {id}")).into());
        }

        if let Err(err) = inner.push_delete(EntityRef::transaction(id.clone())).await {
            tracing::warn!(%id, %err, "transaction delete rejected, restoring");
            inner
                .store
                .apply(|state| state.restore_transactions(removed));
            return Err(err);
        }

        let partners: Vec<_> = removed.into_iter().filter(|tx| &tx.id != id).collect();
        let results = join_all(
            partners
                .iter()
                .map(|tx| inner.push_delete(EntityRef::transaction(tx.id.clone()))),
        )
        .await;
        let mut failure = None;
        let mut kept = Vec::new();
        for (partner, result) in partners.into_iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(
                    %id,
                    partner = %partner.id,
                    %err,
                    "transfer partner delete rejected, restoring it"
                );
                kept.push(partner);
                failure.get_or_insert(err);
            }
        }
        if let Some(err) = failure {
            inner.store.apply(|state| state.restore_transactions(kept));
            return Err(err);
        }
        Ok(())
    }
}
