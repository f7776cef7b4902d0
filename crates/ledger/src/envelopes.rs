//! Envelopes are named budget categories. Their balance is never stored: see
//! [`LedgerState::balance`](crate::LedgerState::balance).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    EntityId, MoneyCents, ResultLedger,
    util::{ensure_non_negative, ensure_positive, normalize_required_name},
};

/// Automatic monthly contribution settings of a piggybank envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piggybank {
    pub monthly_contribution: MoneyCents,
    pub target_amount: Option<MoneyCents>,
    pub paused: bool,
}

impl Piggybank {
    pub fn new(
        monthly_contribution: MoneyCents,
        target_amount: Option<MoneyCents>,
    ) -> ResultLedger<Self> {
        ensure_non_negative(monthly_contribution, "monthly contribution")?;
        if let Some(target) = target_amount {
            ensure_positive(target, "piggybank target")?;
        }
        Ok(Self {
            monthly_contribution,
            target_amount,
            paused: false,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EntityId,
    pub user_id: String,
    pub name: String,
    pub is_active: bool,
    pub order_index: u32,
    pub piggybank: Option<Piggybank>,
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(
        id: EntityId,
        user_id: &str,
        name: &str,
        order_index: u32,
        piggybank: Option<Piggybank>,
        created_at: DateTime<Utc>,
    ) -> ResultLedger<Self> {
        Ok(Self {
            id,
            user_id: user_id.to_string(),
            name: normalize_required_name(name, "envelope")?,
            is_active: true,
            order_index,
            piggybank,
            created_at,
        })
    }

    /// Trimmed and NFC-normalized.
    pub fn rename(&mut self, name: &str) -> ResultLedger<()> {
        self.name = normalize_required_name(name, "envelope")?;
        Ok(())
    }

    #[must_use]
    pub fn is_piggybank(&self) -> bool {
        self.piggybank.is_some()
    }

    /// Piggybank contribution due for the current month, if any.
    #[must_use]
    pub fn due_contribution(&self) -> Option<MoneyCents> {
        if !self.is_active {
            return None;
        }
        self.piggybank
            .as_ref()
            .filter(|p| !p.paused && p.monthly_contribution.is_positive())
            .map(|p| p.monthly_contribution)
    }
}
