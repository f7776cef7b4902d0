//! Conversion between ledger entities and remote documents.
//!
//! Outgoing documents never carry an id: the store assigns it on create and
//! it travels separately on update. Incoming documents must carry one.

use api_types::{
    Document, EntityKind,
    allocation::AllocationDoc,
    envelope::{EnvelopeDoc, PiggybankDoc},
    income::IncomeSourceDoc,
    transaction::{TransactionDoc, TransactionType},
};
use ledger::{
    EntityId, Envelope, EnvelopeAllocation, IncomeFrequency, IncomeSource, LedgerError,
    LedgerState, MoneyCents, MonthKey, Piggybank, ResultLedger, Transaction, TransactionKind,
};

/// Reference to one entity of the store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }

    pub fn envelope(id: EntityId) -> Self {
        Self::new(EntityKind::Envelope, id)
    }

    pub fn transaction(id: EntityId) -> Self {
        Self::new(EntityKind::Transaction, id)
    }

    pub fn income_source(id: EntityId) -> Self {
        Self::new(EntityKind::IncomeSource, id)
    }

    pub fn allocation(id: EntityId) -> Self {
        Self::new(EntityKind::Allocation, id)
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

pub trait DocCodec: Sized {
    const KIND: EntityKind;

    fn to_doc(&self) -> Document;

    fn from_doc(doc: Document) -> ResultLedger<Self>;
}

fn required_id(id: Option<String>, kind: EntityKind) -> ResultLedger<EntityId> {
    id.map(EntityId::new)
        .ok_or_else(|| LedgerError::InvalidDocument(format!("{kind} document without id")))
}

fn wrong_kind(expected: EntityKind, doc: &Document) -> LedgerError {
    LedgerError::InvalidDocument(format!("expected {expected}, got {}", doc.kind()))
}

impl DocCodec for Envelope {
    const KIND: EntityKind = EntityKind::Envelope;

    fn to_doc(&self) -> Document {
        Document::Envelope(EnvelopeDoc {
            id: None,
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            is_active: self.is_active,
            order_index: self.order_index,
            piggybank: self.piggybank.as_ref().map(|p| PiggybankDoc {
                monthly_contribution_minor: p.monthly_contribution.cents(),
                target_amount_minor: p.target_amount.map(MoneyCents::cents),
                paused: p.paused,
            }),
            created_at: self.created_at,
        })
    }

    fn from_doc(doc: Document) -> ResultLedger<Self> {
        let Document::Envelope(doc) = doc else {
            return Err(wrong_kind(Self::KIND, &doc));
        };
        let piggybank = doc
            .piggybank
            .map(|p| -> ResultLedger<Piggybank> {
                let mut piggybank = Piggybank::new(
                    MoneyCents::new(p.monthly_contribution_minor),
                    p.target_amount_minor.map(MoneyCents::new),
                )?;
                piggybank.paused = p.paused;
                Ok(piggybank)
            })
            .transpose()?;
        let mut envelope = Envelope::new(
            required_id(doc.id, Self::KIND)?,
            &doc.user_id,
            &doc.name,
            doc.order_index,
            piggybank,
            doc.created_at,
        )?;
        envelope.is_active = doc.is_active;
        Ok(envelope)
    }
}

impl DocCodec for Transaction {
    const KIND: EntityKind = EntityKind::Transaction;

    fn to_doc(&self) -> Document {
        Document::Transaction(TransactionDoc {
            id: None,
            user_id: self.user_id.clone(),
            envelope_id: self.envelope_id.to_string(),
            kind: match self.kind {
                TransactionKind::Income => TransactionType::Income,
                TransactionKind::Expense => TransactionType::Expense,
            },
            amount_minor: self.amount.cents(),
            date: self.date,
            month: self.month.to_string(),
            description: self.description.clone(),
            transfer_id: self.transfer_id.clone(),
            reconciled: self.reconciled,
            is_automatic: self.is_automatic,
            created_at: self.created_at,
        })
    }

    fn from_doc(doc: Document) -> ResultLedger<Self> {
        let Document::Transaction(doc) = doc else {
            return Err(wrong_kind(Self::KIND, &doc));
        };
        let kind = match doc.kind {
            TransactionType::Income => TransactionKind::Income,
            TransactionType::Expense => TransactionKind::Expense,
        };
        let mut tx = Transaction::new(
            required_id(doc.id, Self::KIND)?,
            &doc.user_id,
            EntityId::new(doc.envelope_id),
            kind,
            MoneyCents::new(doc.amount_minor),
            doc.date,
            Some(&doc.description),
            doc.created_at,
        )?;
        tx.transfer_id = doc.transfer_id;
        tx.reconciled = doc.reconciled;
        tx.is_automatic = doc.is_automatic;
        Ok(tx)
    }
}

impl DocCodec for IncomeSource {
    const KIND: EntityKind = EntityKind::IncomeSource;

    fn to_doc(&self) -> Document {
        Document::IncomeSource(IncomeSourceDoc {
            id: None,
            user_id: self.user_id.clone(),
            month: self.month.to_string(),
            name: self.name.clone(),
            amount_minor: self.amount.cents(),
            frequency: self.frequency.as_str().to_string(),
        })
    }

    fn from_doc(doc: Document) -> ResultLedger<Self> {
        let Document::IncomeSource(doc) = doc else {
            return Err(wrong_kind(Self::KIND, &doc));
        };
        IncomeSource::new(
            required_id(doc.id, Self::KIND)?,
            &doc.user_id,
            doc.month.parse::<MonthKey>()?,
            &doc.name,
            MoneyCents::new(doc.amount_minor),
            IncomeFrequency::try_from(doc.frequency.as_str())?,
        )
    }
}

impl DocCodec for EnvelopeAllocation {
    const KIND: EntityKind = EntityKind::Allocation;

    fn to_doc(&self) -> Document {
        Document::Allocation(AllocationDoc {
            id: None,
            user_id: self.user_id.clone(),
            envelope_id: self.envelope_id.to_string(),
            month: self.month.to_string(),
            budgeted_amount_minor: self.budgeted_amount.cents(),
        })
    }

    fn from_doc(doc: Document) -> ResultLedger<Self> {
        let Document::Allocation(doc) = doc else {
            return Err(wrong_kind(Self::KIND, &doc));
        };
        EnvelopeAllocation::new(
            required_id(doc.id, Self::KIND)?,
            &doc.user_id,
            EntityId::new(doc.envelope_id),
            doc.month.parse::<MonthKey>()?,
            MoneyCents::new(doc.budgeted_amount_minor),
        )
    }
}

/// Current document of `entity`, `None` when it is not in the store.
pub fn document_for(state: &LedgerState, entity: &EntityRef) -> Option<Document> {
    match entity.kind {
        EntityKind::Envelope => state.envelopes.get(&entity.id).map(DocCodec::to_doc),
        EntityKind::Transaction => state.transactions.get(&entity.id).map(DocCodec::to_doc),
        EntityKind::IncomeSource => state.income_sources.get(&entity.id).map(DocCodec::to_doc),
        EntityKind::Allocation => state.allocations.get(&entity.id).map(DocCodec::to_doc),
    }
}

/// Envelope `entity` points at, if any.
pub fn parent_of(state: &LedgerState, entity: &EntityRef) -> Option<EntityId> {
    match entity.kind {
        EntityKind::Transaction => state
            .transactions
            .get(&entity.id)
            .map(|tx| tx.envelope_id.clone()),
        EntityKind::Allocation => state
            .allocations
            .get(&entity.id)
            .map(|a| a.envelope_id.clone()),
        EntityKind::Envelope | EntityKind::IncomeSource => None,
    }
}

/// Decode every document, skipping (and logging) the ones that do not pass
/// validation.
pub fn decode_all<T: DocCodec>(documents: Vec<Document>) -> Vec<T> {
    documents
        .into_iter()
        .filter_map(|doc| {
            let id = doc.id().map(str::to_string);
            match T::from_doc(doc) {
                Ok(entity) => Some(entity),
                Err(err) => {
                    tracing::warn!(kind = %T::KIND, id = ?id, %err, "skipping invalid remote document");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::*;

    #[test]
    fn transactions_round_trip_through_documents() {
        let mut tx = Transaction::new(
            EntityId::new("txn-1"),
            "alice",
            EntityId::new("env-1"),
            TransactionKind::Expense,
            MoneyCents::new(12_34),
            NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
            Some("coffee"),
            Utc::now(),
        )
        .unwrap();
        tx.reconciled = true;

        let mut doc = tx.to_doc();
        assert_eq!(doc.id(), None);
        doc.set_id(Some("txn-1".to_string()));
        assert_eq!(Transaction::from_doc(doc).unwrap(), tx);
    }

    #[test]
    fn documents_without_ids_are_rejected() {
        let envelope =
            Envelope::new(EntityId::new("env-1"), "alice", "Rent", 0, None, Utc::now()).unwrap();
        let err = Envelope::from_doc(envelope.to_doc()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidDocument(_)));
    }

    #[test]
    fn invalid_documents_are_skipped() {
        let good = EnvelopeAllocation::new(
            EntityId::new("alloc-1"),
            "alice",
            EntityId::new("env-1"),
            "2025-06".parse().unwrap(),
            MoneyCents::new(10_00),
        )
        .unwrap();
        let mut good_doc = good.to_doc();
        good_doc.set_id(Some("alloc-1".to_string()));
        let mut bad_doc = good.to_doc();
        bad_doc.set_id(Some("alloc-2".to_string()));
        if let Document::Allocation(doc) = &mut bad_doc {
            doc.month = "June".to_string();
        }

        let decoded: Vec<EnvelopeAllocation> = decode_all(vec![good_doc, bad_doc]);
        assert_eq!(decoded, vec![good]);
    }
}
