use std::collections::BTreeMap;

use ledger::{
    EntityId, IncomeSource, IncomeSourcePatch, LedgerError, MoneyCents, MonthKey, MonthlyBudget,
    NewIncomeSource,
};

use crate::{ResultSync, SyncSession, docs::EntityRef};

impl SyncSession {
    /// Budget `amount` on an envelope for `month`, updating the existing
    /// allocation when there is one, then repair the mirror transaction.
    pub async fn set_allocation(
        &self,
        envelope_id: &EntityId,
        month: MonthKey,
        amount: MoneyCents,
    ) -> ResultSync<EntityId> {
        self.ensure_open()?;
        let inner = &self.inner;
        let new_id = EntityId::temp_at(inner.now());
        let upsert = inner.store.try_apply(|state| {
            state.upsert_allocation(&inner.user_id, envelope_id, month, amount, new_id)
        })?;
        let local_id = upsert.allocation.id.clone();
        let entity = EntityRef::allocation(local_id.clone());

        let id = match upsert.previous {
            None => inner.push_create(entity).await?.unwrap_or(local_id),
            Some(previous) => {
                if let Err(err) = inner.push_update(entity).await {
                    tracing::warn!(%local_id, %err, "allocation edit rolled back");
                    inner.store.apply(|state| {
                        if let Some(current) = state.allocations.get_mut(&local_id) {
                            *current = previous;
                        }
                    });
                    return Err(err);
                }
                local_id
            }
        };

        // The envelope may have been confirmed while the allocation was in
        // flight.
        let envelope_id = inner
            .store
            .read(|state| state.allocations.get(&id).map(|a| a.envelope_id.clone()));
        if let Some(envelope_id) = envelope_id {
            inner.run_repair(month, Some(envelope_id)).await;
        }
        Ok(id)
    }

    /// Remove the allocation of an envelope for `month` and its mirror.
    pub async fn delete_allocation(&self, envelope_id: &EntityId, month: MonthKey) -> ResultSync<()> {
        self.ensure_open()?;
        let inner = &self.inner;
        let removed = inner
            .store
            .apply(|state| {
                let id = state.allocation_for(envelope_id, month)?.id.clone();
                state.remove_allocation(&id)
            })
            .ok_or_else(|| {
                LedgerError::KeyNotFound(format!("allocation {envelope_id} {month}"))
            })?;

        if let Err(err) = inner
            .push_delete(EntityRef::allocation(removed.id.clone()))
            .await
        {
            tracing::warn!(id = %removed.id, %err, "allocation delete rejected, restoring");
            inner.store.apply(|state| {
                state.allocations.insert(removed.id.clone(), removed);
            });
            return Err(err);
        }
        inner.run_repair(month, Some(envelope_id.clone())).await;
        Ok(())
    }

    /// Copy every allocation of `from` into `to`, skipping inactive envelopes
    /// and envelopes already allocated in `to`. Returns how many were copied.
    pub async fn copy_allocations(&self, from: MonthKey, to: MonthKey) -> ResultSync<usize> {
        self.ensure_open()?;
        let pending: Vec<(EntityId, MoneyCents)> = self.inner.store.read(|state| {
            state
                .allocations
                .values()
                .filter(|a| a.month == from)
                .filter(|a| state.allocation_for(&a.envelope_id, to).is_none())
                .filter(|a| {
                    state
                        .envelopes
                        .get(&a.envelope_id)
                        .is_some_and(|e| e.is_active)
                })
                .map(|a| (a.envelope_id.clone(), a.budgeted_amount))
                .collect()
        });

        let mut copied = 0;
        for (envelope_id, amount) in pending {
            self.set_allocation(&envelope_id, to, amount).await?;
            copied += 1;
        }
        tracing::info!(%from, %to, copied, "allocations copied");
        Ok(copied)
    }

    pub async fn add_income_source(&self, cmd: NewIncomeSource) -> ResultSync<EntityId> {
        self.ensure_open()?;
        let inner = &self.inner;
        let source = IncomeSource::new(
            EntityId::temp_at(inner.now()),
            &inner.user_id,
            cmd.month,
            &cmd.name,
            cmd.amount,
            cmd.frequency,
        )?;
        let temp = source.id.clone();
        inner
            .store
            .try_apply(|state| state.insert_income_source(source))?;

        Ok(inner
            .push_create(EntityRef::income_source(temp.clone()))
            .await?
            .unwrap_or(temp))
    }

    pub async fn update_income_source(
        &self,
        id: &EntityId,
        patch: IncomeSourcePatch,
    ) -> ResultSync<()> {
        self.ensure_open()?;
        let inner = &self.inner;
        let previous = inner.store.try_apply(|state| {
            state.update_income_source(id, |source| {
                if let Some(name) = patch.name.as_deref() {
                    source.rename(name)?;
                }
                if let Some(amount) = patch.amount {
                    source.amount = amount;
                }
                if let Some(frequency) = patch.frequency {
                    source.frequency = frequency;
                }
                Ok(())
            })
        })?;

        if let Err(err) = inner.push_update(EntityRef::income_source(id.clone())).await {
            tracing::warn!(%id, %err, "income source edit rolled back");
            inner.store.apply(|state| {
                if let Some(current) = state.income_sources.get_mut(id) {
                    *current = previous;
                }
            });
            return Err(err);
        }
        Ok(())
    }

    pub async fn delete_income_source(&self, id: &EntityId) -> ResultSync<()> {
        self.ensure_open()?;
        let inner = &self.inner;
        let removed = inner
            .store
            .apply(|state| state.remove_income_source(id))
            .ok_or_else(|| LedgerError::KeyNotFound(format!("income source {id}")))?;

        if let Err(err) = inner.push_delete(EntityRef::income_source(id.clone())).await {
            tracing::warn!(%id, %err, "income source delete rejected, restoring");
            inner.store.apply(|state| {
                state.income_sources.insert(removed.id.clone(), removed);
            });
            return Err(err);
        }
        Ok(())
    }

    #[must_use]
    pub fn monthly_budget(&self, month: MonthKey) -> MonthlyBudget {
        self.inner
            .store
            .read(|state| state.monthly_budget(&self.inner.user_id, month))
    }

    #[must_use]
    pub fn balances(&self) -> BTreeMap<EntityId, MoneyCents> {
        self.inner.store.read(|state| state.balances())
    }

    #[must_use]
    pub fn balance(&self, envelope_id: &EntityId) -> MoneyCents {
        self.inner.store.read(|state| state.balance(envelope_id))
    }
}
