use futures::future::join_all;
use ledger::{EntityId, Envelope, LedgerError, NewEnvelope, Piggybank, ResultLedger};

use crate::{ResultSync, SyncSession, docs::EntityRef};

impl SyncSession {
    /// Create an envelope locally and persist it remotely.
    ///
    /// Returns the confirmed id, or the temp id when the create was queued.
    pub async fn create_envelope(&self, cmd: NewEnvelope) -> ResultSync<EntityId> {
        self.ensure_open()?;
        let inner = &self.inner;
        let now = inner.now();
        let temp = EntityId::temp_at(now);

        let envelope = inner.store.try_apply(|state| -> ResultLedger<Envelope> {
            let order_index = cmd.order_index.unwrap_or_else(|| state.next_order_index());
            let envelope = Envelope::new(
                temp.clone(),
                &inner.user_id,
                &cmd.name,
                order_index,
                cmd.piggybank.clone(),
                now,
            )?;
            state.insert_envelope(envelope.clone())?;
            Ok(envelope)
        })?;
        tracing::info!(id = %temp, name = %envelope.name, "envelope created locally");

        let id = inner
            .push_create(EntityRef::envelope(temp.clone()))
            .await?
            .unwrap_or(temp);
        if envelope.is_piggybank() {
            inner
                .run_repair(inner.current_month(), Some(id.clone()))
                .await;
        }
        Ok(id)
    }

    /// Apply `f` locally, push the result, roll back on a permanent failure.
    async fn edit_envelope(
        &self,
        id: &EntityId,
        f: impl FnOnce(&mut Envelope) -> ResultLedger<()>,
    ) -> ResultSync<()> {
        self.ensure_open()?;
        let inner = &self.inner;
        let previous = inner.store.try_apply(|state| state.update_envelope(id, f))?;

        if let Err(err) = inner.push_update(EntityRef::envelope(id.clone())).await {
            tracing::warn!(%id, %err, "envelope edit rolled back");
            inner.store.apply(|state| {
                if let Some(current) = state.envelopes.get_mut(id) {
                    *current = previous;
                }
            });
            return Err(err);
        }
        Ok(())
    }

    pub async fn rename_envelope(&self, id: &EntityId, name: &str) -> ResultSync<()> {
        self.edit_envelope(id, |envelope| envelope.rename(name))
            .await
    }

    pub async fn set_envelope_active(&self, id: &EntityId, active: bool) -> ResultSync<()> {
        self.edit_envelope(id, |envelope| {
            envelope.is_active = active;
            Ok(())
        })
        .await
    }

    /// Turn an envelope into a piggybank (or back, with `None`).
    pub async fn configure_piggybank(
        &self,
        id: &EntityId,
        piggybank: Option<Piggybank>,
    ) -> ResultSync<()> {
        self.edit_envelope(id, |envelope| {
            envelope.piggybank = piggybank;
            Ok(())
        })
        .await?;
        self.inner
            .run_repair(self.inner.current_month(), Some(id.clone()))
            .await;
        Ok(())
    }

    /// Pause or resume the monthly contribution of a piggybank.
    pub async fn set_piggybank_paused(&self, id: &EntityId, paused: bool) -> ResultSync<()> {
        self.edit_envelope(id, |envelope| match envelope.piggybank.as_mut() {
            Some(piggybank) => {
                piggybank.paused = paused;
                Ok(())
            }
            None => Err(LedgerError::InvalidDocument(format!(
                "envelope {} is not a piggybank",
                envelope.name
            ))),
        })
        .await?;
        if !paused {
            self.inner
                .run_repair(self.inner.current_month(), Some(id.clone()))
                .await;
        }
        Ok(())
    }

    /// Assign `order_index` from the position in `ordered`.
    pub async fn reorder_envelopes(&self, ordered: &[EntityId]) -> ResultSync<()> {
        self.ensure_open()?;
        let inner = &self.inner;
        let previous = inner.store.try_apply(|state| -> ResultLedger<Vec<Envelope>> {
            let mut previous = Vec::new();
            for (index, id) in (0u32..).zip(ordered) {
                if state.envelope(id)?.order_index == index {
                    continue;
                }
                previous.push(state.update_envelope(id, |envelope| {
                    envelope.order_index = index;
                    Ok(())
                })?);
            }
            Ok(previous)
        })?;

        let pushes = previous
            .iter()
            .map(|envelope| inner.push_update(EntityRef::envelope(envelope.id.clone())));
        let failure = join_all(pushes).await.into_iter().find_map(Result::err);
        if let Some(err) = failure {
            tracing::warn!(%err, "reorder rolled back");
            inner.store.apply(|state| {
                for envelope in previous {
                    if let Some(current) = state.envelopes.get_mut(&envelope.id) {
                        current.order_index = envelope.order_index;
                    }
                }
            });
            return Err(err);
        }
        Ok(())
    }

    /// Delete an envelope with its transactions and allocations.
    ///
    /// The local removal is immediate. The envelope is deleted remotely
    /// first; a permanent failure there restores the cascade and nothing
    /// else is sent. The dependents are then deleted concurrently.
    pub async fn delete_envelope(&self, id: &EntityId) -> ResultSync<()> {
        self.ensure_open()?;
        let inner = &self.inner;
        let removed = inner
            .store
            .apply(|state| state.remove_envelope(id))
            .ok_or_else(|| LedgerError::KeyNotFound(format!("envelope {id}")))?;
        tracing::info!(
            %id,
            transactions = removed.transactions.len(),
            allocations = removed.allocations.len(),
            "envelope deleted locally"
        );

        if let Err(err) = inner.push_delete(EntityRef::envelope(id.clone())).await {
            tracing::warn!(%id, %err, "envelope delete rejected, restoring");
            inner.store.apply(|state| state.restore_envelope(removed));
            return Err(err);
        }

        let dependents = removed
            .transactions
            .iter()
            .map(|tx| EntityRef::transaction(tx.id.clone()))
            .chain(
                removed
                    .allocations
                    .iter()
                    .map(|a| EntityRef::allocation(a.id.clone())),
            );
        let results = join_all(dependents.map(|t| inner.push_delete(t))).await;
        for err in results.into_iter().filter_map(Result::err) {
            tracing::error!(%id, %err, "dependent delete failed");
        }
        Ok(())
    }
}
