//! Planning of allocation ↔ mirror-transaction repairs.
//!
//! The planner is pure: it inspects a [`LedgerState`] and returns the actions
//! that restore the invariant for one month. Executing them (locally and
//! remotely) is the sync engine's job.
//!
//! Rules, per `(envelope, month)`:
//!
//! - regular envelopes mirror their allocation: exactly one automatic income
//!   transaction tagged [`ALLOCATION_TAG`](crate::ALLOCATION_TAG) equal to
//!   `budgeted_amount`, none when the amount is zero or there is no
//!   allocation;
//! - piggybank envelopes get one [`PIGGYBANK_TAG`](crate::PIGGYBANK_TAG)
//!   contribution, only for the real current month and never while paused;
//! - duplicates keep the earliest row and delete the rest.

use chrono::NaiveDate;

use crate::{EntityId, Envelope, LedgerState, MirrorKind, MoneyCents, MonthKey, Transaction};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepairAction {
    Create {
        envelope_id: EntityId,
        month: MonthKey,
        mirror: MirrorKind,
        amount: MoneyCents,
        date: NaiveDate,
    },
    Update {
        transaction_id: EntityId,
        amount: MoneyCents,
    },
    Delete {
        transaction_id: EntityId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepairPlan {
    pub month: MonthKey,
    pub actions: Vec<RepairAction>,
}

impl RepairPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Scope of a repair run.
#[derive(Clone, Debug)]
pub struct RepairScope {
    pub month: MonthKey,
    /// Today in the user's timezone; decides the real current month.
    pub today: NaiveDate,
    /// Restrict the run to one envelope.
    pub envelope_id: Option<EntityId>,
}

impl LedgerState {
    #[must_use]
    pub fn plan_repair(&self, scope: &RepairScope) -> RepairPlan {
        let mut actions = Vec::new();
        let envelopes = self
            .envelopes
            .values()
            .filter(|e| scope.envelope_id.as_ref().is_none_or(|id| &e.id == id));

        for envelope in envelopes {
            if envelope.is_piggybank() {
                self.plan_piggybank(envelope, scope, &mut actions);
            } else {
                let target = self
                    .allocation_for(&envelope.id, scope.month)
                    .map(|a| a.budgeted_amount)
                    .unwrap_or(MoneyCents::ZERO);
                let mirrors = self.mirrors(&envelope.id, scope.month, MirrorKind::Allocation);
                plan_mirrors(
                    &envelope.id,
                    scope.month,
                    MirrorKind::Allocation,
                    scope.month.first_day(),
                    &mirrors,
                    target,
                    &mut actions,
                );
            }
        }

        RepairPlan {
            month: scope.month,
            actions,
        }
    }

    fn plan_piggybank(&self, envelope: &Envelope, scope: &RepairScope, out: &mut Vec<RepairAction>) {
        let Some(piggybank) = envelope.piggybank.as_ref() else {
            return;
        };
        if scope.month != MonthKey::of(scope.today) || piggybank.paused || !envelope.is_active {
            return;
        }
        let mirrors = self.mirrors(&envelope.id, scope.month, MirrorKind::Piggybank);
        plan_mirrors(
            &envelope.id,
            scope.month,
            MirrorKind::Piggybank,
            scope.today,
            &mirrors,
            piggybank.monthly_contribution,
            out,
        );
    }
}

fn plan_mirrors(
    envelope_id: &EntityId,
    month: MonthKey,
    mirror: MirrorKind,
    date: NaiveDate,
    mirrors: &[&Transaction],
    target: MoneyCents,
    out: &mut Vec<RepairAction>,
) {
    let Some((keep, duplicates)) = mirrors.split_first() else {
        if target.is_positive() {
            out.push(RepairAction::Create {
                envelope_id: envelope_id.clone(),
                month,
                mirror,
                amount: target,
                date,
            });
        }
        return;
    };

    for duplicate in duplicates {
        out.push(RepairAction::Delete {
            transaction_id: duplicate.id.clone(),
        });
    }
    if !target.is_positive() {
        out.push(RepairAction::Delete {
            transaction_id: keep.id.clone(),
        });
    } else if keep.amount != target {
        out.push(RepairAction::Update {
            transaction_id: keep.id.clone(),
            amount: target,
        });
    }
}
