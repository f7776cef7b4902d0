//! Command structs for ledger write operations.
//!
//! These types group parameters for write operations (envelope creation,
//! transactions, transfers, income), keeping call sites readable and avoiding
//! long argument lists.

use chrono::NaiveDate;

use crate::{
    EntityId, IncomeFrequency, MoneyCents, MonthKey, Piggybank, TransactionKind,
};

/// Create an envelope.
#[derive(Clone, Debug)]
pub struct NewEnvelope {
    pub name: String,
    pub order_index: Option<u32>,
    pub piggybank: Option<Piggybank>,
}

impl NewEnvelope {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order_index: None,
            piggybank: None,
        }
    }

    #[must_use]
    pub fn order_index(mut self, order_index: u32) -> Self {
        self.order_index = Some(order_index);
        self
    }

    #[must_use]
    pub fn piggybank(mut self, piggybank: Piggybank) -> Self {
        self.piggybank = Some(piggybank);
        self
    }
}

/// Record an income or an expense on one envelope.
#[derive(Clone, Debug)]
pub struct NewTransaction {
    pub envelope_id: EntityId,
    pub kind: TransactionKind,
    pub amount: MoneyCents,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub reconciled: bool,
}

impl NewTransaction {
    #[must_use]
    pub fn income(envelope_id: EntityId, amount: MoneyCents, date: NaiveDate) -> Self {
        Self::new(envelope_id, TransactionKind::Income, amount, date)
    }

    #[must_use]
    pub fn expense(envelope_id: EntityId, amount: MoneyCents, date: NaiveDate) -> Self {
        Self::new(envelope_id, TransactionKind::Expense, amount, date)
    }

    #[must_use]
    pub fn new(
        envelope_id: EntityId,
        kind: TransactionKind,
        amount: MoneyCents,
        date: NaiveDate,
    ) -> Self {
        Self {
            envelope_id,
            kind,
            amount,
            date,
            description: None,
            reconciled: false,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn reconciled(mut self, reconciled: bool) -> Self {
        self.reconciled = reconciled;
        self
    }
}

/// Move money between two envelopes.
#[derive(Clone, Debug)]
pub struct TransferCmd {
    pub from_envelope_id: EntityId,
    pub to_envelope_id: EntityId,
    pub amount: MoneyCents,
    pub date: NaiveDate,
    pub description: Option<String>,
}

impl TransferCmd {
    #[must_use]
    pub fn new(
        from_envelope_id: EntityId,
        to_envelope_id: EntityId,
        amount: MoneyCents,
        date: NaiveDate,
    ) -> Self {
        Self {
            from_envelope_id,
            to_envelope_id,
            amount,
            date,
            description: None,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Partial edit of a transaction. `None` fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct TransactionPatch {
    pub amount: Option<MoneyCents>,
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
    pub kind: Option<TransactionKind>,
    pub envelope_id: Option<EntityId>,
}

impl TransactionPatch {
    #[must_use]
    pub fn amount(mut self, amount: MoneyCents) -> Self {
        self.amount = Some(amount);
        self
    }

    #[must_use]
    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: TransactionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn envelope_id(mut self, envelope_id: EntityId) -> Self {
        self.envelope_id = Some(envelope_id);
        self
    }
}

/// Add an income source to a month.
#[derive(Clone, Debug)]
pub struct NewIncomeSource {
    pub month: MonthKey,
    pub name: String,
    pub amount: MoneyCents,
    pub frequency: IncomeFrequency,
}

impl NewIncomeSource {
    #[must_use]
    pub fn new(month: MonthKey, name: impl Into<String>, amount: MoneyCents) -> Self {
        Self {
            month,
            name: name.into(),
            amount,
            frequency: IncomeFrequency::default(),
        }
    }

    #[must_use]
    pub fn frequency(mut self, frequency: IncomeFrequency) -> Self {
        self.frequency = frequency;
        self
    }
}

/// Partial edit of an income source.
#[derive(Clone, Debug, Default)]
pub struct IncomeSourcePatch {
    pub name: Option<String>,
    pub amount: Option<MoneyCents>,
    pub frequency: Option<IncomeFrequency>,
}
