//! Transaction primitives.
//!
//! A `Transaction` is an append-only ledger fact moving money into (`Income`)
//! or out of (`Expense`) exactly one envelope. Transfers are two transactions
//! sharing a `transfer_id`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    EntityId, LedgerError, MoneyCents, MonthKey, ResultLedger,
    util::{ensure_positive, normalize_optional_text},
};

/// Description carried by allocation mirror transactions.
pub const ALLOCATION_TAG: &str = "Budget allocation";
/// Description carried by piggybank contribution transactions.
pub const PIGGYBANK_TAG: &str = "Piggybank contribution";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl TryFrom<&str> for TransactionKind {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            other => Err(LedgerError::InvalidDocument(format!(
                "invalid transaction type: {other}"
            ))),
        }
    }
}

/// Automatic transactions maintained by the repair worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MirrorKind {
    /// Mirrors an `EnvelopeAllocation` of the same (envelope, month).
    Allocation,
    /// Monthly contribution of a piggybank envelope.
    Piggybank,
}

impl MirrorKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Allocation => ALLOCATION_TAG,
            Self::Piggybank => PIGGYBANK_TAG,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: EntityId,
    pub user_id: String,
    pub envelope_id: EntityId,
    pub kind: TransactionKind,
    /// Always positive; the direction is carried by `kind`.
    pub amount: MoneyCents,
    pub date: NaiveDate,
    pub month: MonthKey,
    pub description: String,
    pub transfer_id: Option<String>,
    pub reconciled: bool,
    pub is_automatic: bool,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: EntityId,
        user_id: &str,
        envelope_id: EntityId,
        kind: TransactionKind,
        amount: MoneyCents,
        date: NaiveDate,
        description: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> ResultLedger<Self> {
        ensure_positive(amount, "amount")?;
        Ok(Self {
            id,
            user_id: user_id.to_string(),
            envelope_id,
            kind,
            amount,
            date,
            month: MonthKey::of(date),
            description: normalize_optional_text(description),
            transfer_id: None,
            reconciled: false,
            is_automatic: false,
            created_at,
        })
    }

    /// Build the automatic mirror transaction for `(envelope, month)`.
    pub fn mirror(
        id: EntityId,
        user_id: &str,
        envelope_id: EntityId,
        mirror: MirrorKind,
        amount: MoneyCents,
        date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> ResultLedger<Self> {
        let mut tx = Self::new(
            id,
            user_id,
            envelope_id,
            TransactionKind::Income,
            amount,
            date,
            Some(mirror.tag()),
            created_at,
        )?;
        tx.is_automatic = true;
        Ok(tx)
    }

    /// Amount with the sign of its effect on the envelope balance.
    #[must_use]
    pub fn signed_amount(&self) -> MoneyCents {
        match self.kind {
            TransactionKind::Income => self.amount,
            TransactionKind::Expense => -self.amount,
        }
    }

    #[must_use]
    pub fn mirror_kind(&self) -> Option<MirrorKind> {
        if !self.is_automatic || self.transfer_id.is_some() {
            return None;
        }
        match self.description.as_str() {
            ALLOCATION_TAG => Some(MirrorKind::Allocation),
            PIGGYBANK_TAG => Some(MirrorKind::Piggybank),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_transfer_leg(&self) -> bool {
        self.transfer_id.is_some()
    }

    pub fn set_description(&mut self, description: Option<&str>) {
        self.description = normalize_optional_text(description);
    }

    /// Move the transaction to a new date, keeping `month` consistent.
    pub fn set_date(&mut self, date: NaiveDate) {
        self.date = date;
        self.month = MonthKey::of(date);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn rejects_non_positive_amounts() {
        let err = Transaction::new(
            EntityId::temp(),
            "alice",
            EntityId::new("env-1"),
            TransactionKind::Expense,
            MoneyCents::ZERO,
            day(2025, 6, 3),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    #[test]
    fn month_tracks_date() {
        let mut tx = Transaction::new(
            EntityId::temp(),
            "alice",
            EntityId::new("env-1"),
            TransactionKind::Expense,
            MoneyCents::new(500),
            day(2025, 6, 30),
            Some("  lunch "),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(tx.month.to_string(), "2025-06");
        assert_eq!(tx.description, "lunch");
        assert_eq!(tx.signed_amount(), MoneyCents::new(-500));
        tx.set_date(day(2025, 7, 1));
        assert_eq!(tx.month.to_string(), "2025-07");
    }

    #[test]
    fn only_automatic_tagged_rows_are_mirrors() {
        let mirror = Transaction::mirror(
            EntityId::temp(),
            "alice",
            EntityId::new("env-1"),
            MirrorKind::Allocation,
            MoneyCents::new(200_00),
            day(2025, 6, 1),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(mirror.mirror_kind(), Some(MirrorKind::Allocation));
        assert_eq!(mirror.kind, TransactionKind::Income);

        let mut manual = mirror.clone();
        manual.is_automatic = false;
        assert_eq!(manual.mirror_kind(), None);
    }
}
