//! Temp-id confirmation.
//!
//! [`confirm`] runs inside one store write: the entity is re-keyed and every
//! foreign key pointing at the temp id is rewritten before any observer is
//! notified. It returns the remote work the confirmation unlocks, which the
//! session executes afterwards.

use api_types::{Document, EntityKind};
use ledger::{EntityId, LedgerState};

use crate::docs::{EntityRef, document_for};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FollowUp {
    /// A dependent whose parent is now confirmed can be created.
    Create(EntityRef),
    /// The entity changed while its create was in flight.
    Update(EntityRef),
    /// The entity was deleted while its create was in flight.
    Delete(EntityRef),
}

/// Confirm `temp` as `real`. `sent` is the document the create carried.
pub fn confirm(
    state: &mut LedgerState,
    temp: &EntityRef,
    real: &EntityId,
    sent: &Document,
) -> Vec<FollowUp> {
    let confirmed = EntityRef::new(temp.kind, real.clone());
    let mut follow_ups = Vec::new();

    let found = match temp.kind {
        EntityKind::Envelope => match state.confirm_envelope(&temp.id, real) {
            Some(rewrite) => {
                tracing::debug!(
                    from = %temp.id,
                    to = %real,
                    transactions = rewrite.transactions.len(),
                    allocations = rewrite.allocations.len(),
                    "rewrote envelope references"
                );
                follow_ups.extend(
                    rewrite
                        .transactions
                        .into_iter()
                        .filter(EntityId::is_temp)
                        .map(|id| FollowUp::Create(EntityRef::transaction(id))),
                );
                follow_ups.extend(
                    rewrite
                        .allocations
                        .into_iter()
                        .filter(EntityId::is_temp)
                        .map(|id| FollowUp::Create(EntityRef::allocation(id))),
                );
                true
            }
            None => false,
        },
        EntityKind::Transaction => state.confirm_transaction(&temp.id, real),
        EntityKind::IncomeSource => state.confirm_income_source(&temp.id, real),
        EntityKind::Allocation => state.confirm_allocation(&temp.id, real),
    };

    if !found {
        tracing::info!(entity = %temp, %real, "confirmed after local delete");
        follow_ups.push(FollowUp::Delete(confirmed));
        return follow_ups;
    }

    if document_for(state, &confirmed).is_some_and(|latest| &latest != sent) {
        follow_ups.push(FollowUp::Update(confirmed));
    }
    tracing::info!(entity = %temp, %real, "confirmed");
    follow_ups
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use ledger::{Envelope, MoneyCents, Transaction, TransactionKind};

    use super::*;
    use crate::docs::DocCodec;

    fn state_with_temp_envelope() -> (LedgerState, EntityId, Document) {
        let temp = EntityId::temp();
        let envelope = Envelope::new(temp.clone(), "alice", "Groceries", 0, None, Utc::now()).unwrap();
        let sent = envelope.to_doc();
        let mut state = LedgerState::default();
        state.insert_envelope(envelope).unwrap();
        (state, temp, sent)
    }

    #[test]
    fn unlocks_temp_dependents() {
        let (mut state, temp, sent) = state_with_temp_envelope();
        let tx = Transaction::new(
            EntityId::temp(),
            "alice",
            temp.clone(),
            TransactionKind::Income,
            MoneyCents::new(150_50),
            NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
            None,
            Utc::now(),
        )
        .unwrap();
        let tx_id = tx.id.clone();
        state.insert_transaction(tx).unwrap();

        let follow_ups = confirm(
            &mut state,
            &EntityRef::envelope(temp.clone()),
            &EntityId::new("env-1"),
            &sent,
        );
        assert_eq!(follow_ups, vec![FollowUp::Create(EntityRef::transaction(tx_id))]);
        assert_eq!(state.references(&temp), 0);
    }

    #[test]
    fn late_edits_and_deletes_are_pushed() {
        let (mut state, temp, sent) = state_with_temp_envelope();
        state
            .update_envelope(&temp, |e| {
                e.name = "Food".to_string();
                Ok(())
            })
            .unwrap();
        let real = EntityId::new("env-1");
        assert_eq!(
            confirm(&mut state, &EntityRef::envelope(temp), &real, &sent),
            vec![FollowUp::Update(EntityRef::envelope(real.clone()))]
        );

        let (mut state, temp, sent) = state_with_temp_envelope();
        state.remove_envelope(&temp);
        assert_eq!(
            confirm(&mut state, &EntityRef::envelope(temp), &real, &sent),
            vec![FollowUp::Delete(EntityRef::envelope(real))]
        );
    }
}
