//! Version 1 cache schema.
//!
//! The first client generation cached its documents as loosely shaped JSON:
//! camelCase fields, amounts as floating major units (`150.5`), capitalized
//! transaction types and no `createdAt` on transactions. These types describe
//! that shape exactly so hydration can migrate it once into a
//! [`LedgerState`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::{
    EntityId, Envelope, EnvelopeAllocation, IncomeFrequency, IncomeSource, LedgerError,
    LedgerState, MoneyCents, MonthKey, Piggybank, ResultLedger, Transaction, TransactionKind,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerV1 {
    #[serde(default)]
    pub envelopes: Vec<EnvelopeV1>,
    #[serde(default)]
    pub transactions: Vec<TransactionV1>,
    #[serde(default)]
    pub income_sources: Vec<IncomeSourceV1>,
    #[serde(default)]
    pub allocations: Vec<AllocationV1>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiggybankV1 {
    pub monthly_contribution: f64,
    pub target_amount: Option<f64>,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeV1 {
    pub id: String,
    pub name: String,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    #[serde(default)]
    pub order_index: u32,
    pub piggybank: Option<PiggybankV1>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionV1 {
    pub id: String,
    pub date: NaiveDate,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    pub envelope_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub transfer_id: Option<String>,
    #[serde(default)]
    pub reconciled: bool,
    #[serde(default)]
    pub is_automatic: bool,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeSourceV1 {
    pub id: String,
    pub month: String,
    pub name: String,
    pub amount: f64,
    #[serde(default)]
    pub frequency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationV1 {
    pub id: String,
    pub envelope_id: String,
    pub month: String,
    pub budgeted_amount: f64,
}

fn active_by_default() -> bool {
    true
}

impl LedgerV1 {
    /// Migrate to the current schema. Every row is validated; the first
    /// invalid row aborts the migration.
    pub fn into_state(self, user_id: &str) -> ResultLedger<LedgerState> {
        let mut state = LedgerState::default();

        for env in self.envelopes {
            let piggybank = env
                .piggybank
                .map(|p| -> ResultLedger<Piggybank> {
                    let target = p.target_amount.map(MoneyCents::from_major_f64).transpose()?;
                    let mut piggybank =
                        Piggybank::new(MoneyCents::from_major_f64(p.monthly_contribution)?, target)?;
                    piggybank.paused = p.paused;
                    Ok(piggybank)
                })
                .transpose()?;
            let mut envelope = Envelope::new(
                EntityId::new(env.id),
                user_id,
                &env.name,
                env.order_index,
                piggybank,
                env.created_at,
            )?;
            envelope.is_active = env.is_active;
            state.envelopes.insert(envelope.id.clone(), envelope);
        }

        for tx in self.transactions {
            let kind = TransactionKind::try_from(tx.kind.to_ascii_lowercase().as_str())?;
            let created_at = tx
                .date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .ok_or_else(|| LedgerError::InvalidDocument("invalid date".to_string()))?;
            let mut migrated = Transaction::new(
                EntityId::new(tx.id),
                tx.user_id.as_deref().unwrap_or(user_id),
                EntityId::new(tx.envelope_id),
                kind,
                MoneyCents::from_major_f64(tx.amount)?,
                tx.date,
                Some(&tx.description),
                created_at,
            )?;
            migrated.transfer_id = tx.transfer_id;
            migrated.reconciled = tx.reconciled;
            migrated.is_automatic = tx.is_automatic;
            state.transactions.insert(migrated.id.clone(), migrated);
        }

        for source in self.income_sources {
            let frequency = source
                .frequency
                .as_deref()
                .map(IncomeFrequency::try_from)
                .transpose()?
                .unwrap_or_default();
            let migrated = IncomeSource::new(
                EntityId::new(source.id),
                user_id,
                source.month.parse::<MonthKey>()?,
                &source.name,
                MoneyCents::from_major_f64(source.amount)?,
                frequency,
            )?;
            state.income_sources.insert(migrated.id.clone(), migrated);
        }

        for alloc in self.allocations {
            let migrated = EnvelopeAllocation::new(
                EntityId::new(alloc.id),
                user_id,
                EntityId::new(alloc.envelope_id),
                alloc.month.parse::<MonthKey>()?,
                MoneyCents::from_major_f64(alloc.budgeted_amount)?,
            )?;
            // v1 caches could hold duplicate rows; the first one wins.
            if state
                .allocation_for(&migrated.envelope_id, migrated.month)
                .is_none()
            {
                state.allocations.insert(migrated.id.clone(), migrated);
            }
        }

        Ok(state)
    }
}
