//! Budget allocations and the monthly budget aggregate.

use serde::{Deserialize, Serialize};

use crate::{EntityId, MoneyCents, MonthKey, ResultLedger, util::ensure_non_negative};

/// Planned amount for one envelope in one month.
///
/// At most one allocation exists per `(envelope_id, month)`; writes go through
/// [`LedgerState::upsert_allocation`](crate::LedgerState::upsert_allocation).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeAllocation {
    pub id: EntityId,
    pub user_id: String,
    pub envelope_id: EntityId,
    pub month: MonthKey,
    pub budgeted_amount: MoneyCents,
}

impl EnvelopeAllocation {
    pub fn new(
        id: EntityId,
        user_id: &str,
        envelope_id: EntityId,
        month: MonthKey,
        budgeted_amount: MoneyCents,
    ) -> ResultLedger<Self> {
        ensure_non_negative(budgeted_amount, "budgeted amount")?;
        Ok(Self {
            id,
            user_id: user_id.to_string(),
            envelope_id,
            month,
            budgeted_amount,
        })
    }
}

/// Derived per-month budget totals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyBudget {
    /// `"<user_id>_<month>"`.
    pub id: String,
    pub user_id: String,
    pub month: MonthKey,
    pub total_income: MoneyCents,
    pub total_allocated: MoneyCents,
    /// `total_income - total_allocated`; may be negative when over-allocated.
    pub available_to_budget: MoneyCents,
}
