//! Document schemas exchanged with the remote store.
//!
//! The remote store is a document database with one collection per entity
//! kind. Field names are camelCase on the wire and money is carried as integer
//! minor units (`*Minor`). Ids are assigned by the remote store, so they are
//! absent on documents sent for creation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Remote collection an entity lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Envelope,
    Transaction,
    IncomeSource,
    Allocation,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Envelope,
        EntityKind::Transaction,
        EntityKind::IncomeSource,
        EntityKind::Allocation,
    ];

    /// Collection name in the remote store.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Envelope => "envelopes",
            Self::Transaction => "transactions",
            Self::IncomeSource => "incomeSources",
            Self::Allocation => "envelopeAllocations",
        }
    }

    /// Kinds whose documents are partitioned by month.
    pub fn is_monthly(self) -> bool {
        matches!(self, Self::IncomeSource | Self::Allocation)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.collection())
    }
}

pub mod envelope {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct PiggybankDoc {
        pub monthly_contribution_minor: i64,
        pub target_amount_minor: Option<i64>,
        #[serde(default)]
        pub paused: bool,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EnvelopeDoc {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub id: Option<String>,
        pub user_id: String,
        pub name: String,
        pub is_active: bool,
        pub order_index: u32,
        #[serde(default)]
        pub piggybank: Option<PiggybankDoc>,
        pub created_at: DateTime<Utc>,
    }
}

pub mod transaction {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TransactionType {
        Income,
        Expense,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TransactionDoc {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub id: Option<String>,
        pub user_id: String,
        pub envelope_id: String,
        #[serde(rename = "type")]
        pub kind: TransactionType,
        /// Always positive; the direction is carried by `type`.
        pub amount_minor: i64,
        pub date: NaiveDate,
        /// `YYYY-MM` of `date`.
        pub month: String,
        #[serde(default)]
        pub description: String,
        #[serde(default)]
        pub transfer_id: Option<String>,
        #[serde(default)]
        pub reconciled: bool,
        #[serde(default)]
        pub is_automatic: bool,
        pub created_at: DateTime<Utc>,
    }
}

pub mod income {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct IncomeSourceDoc {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub id: Option<String>,
        pub user_id: String,
        pub month: String,
        pub name: String,
        pub amount_minor: i64,
        /// `monthly`, `biweekly`, `weekly` or `one_time`.
        pub frequency: String,
    }
}

pub mod allocation {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AllocationDoc {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub id: Option<String>,
        pub user_id: String,
        pub envelope_id: String,
        pub month: String,
        pub budgeted_amount_minor: i64,
    }
}

/// Any remote document, tagged by kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Document {
    Envelope(envelope::EnvelopeDoc),
    Transaction(transaction::TransactionDoc),
    IncomeSource(income::IncomeSourceDoc),
    Allocation(allocation::AllocationDoc),
}

impl Document {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Envelope(_) => EntityKind::Envelope,
            Self::Transaction(_) => EntityKind::Transaction,
            Self::IncomeSource(_) => EntityKind::IncomeSource,
            Self::Allocation(_) => EntityKind::Allocation,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Envelope(doc) => doc.id.as_deref(),
            Self::Transaction(doc) => doc.id.as_deref(),
            Self::IncomeSource(doc) => doc.id.as_deref(),
            Self::Allocation(doc) => doc.id.as_deref(),
        }
    }

    /// Set the remote id (done by the store on create).
    pub fn set_id(&mut self, id: Option<String>) {
        match self {
            Self::Envelope(doc) => doc.id = id,
            Self::Transaction(doc) => doc.id = id,
            Self::IncomeSource(doc) => doc.id = id,
            Self::Allocation(doc) => doc.id = id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::Envelope(doc) => &doc.user_id,
            Self::Transaction(doc) => &doc.user_id,
            Self::IncomeSource(doc) => &doc.user_id,
            Self::Allocation(doc) => &doc.user_id,
        }
    }

    pub fn month(&self) -> Option<&str> {
        match self {
            Self::Envelope(_) => None,
            Self::Transaction(doc) => Some(&doc.month),
            Self::IncomeSource(doc) => Some(&doc.month),
            Self::Allocation(doc) => Some(&doc.month),
        }
    }

    pub fn envelope_id(&self) -> Option<&str> {
        match self {
            Self::Envelope(_) | Self::IncomeSource(_) => None,
            Self::Transaction(doc) => Some(&doc.envelope_id),
            Self::Allocation(doc) => Some(&doc.envelope_id),
        }
    }
}

/// Query / subscription filter. Every set field must match.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope_id: Option<String>,
}

impl Filter {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            month: None,
            envelope_id: None,
        }
    }

    pub fn month(mut self, month: impl Into<String>) -> Self {
        self.month = Some(month.into());
        self
    }

    pub fn envelope(mut self, envelope_id: impl Into<String>) -> Self {
        self.envelope_id = Some(envelope_id.into());
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if doc.user_id() != self.user_id {
            return false;
        }
        if let Some(month) = &self.month
            && doc.month().is_some_and(|m| m != month)
        {
            return false;
        }
        if let Some(envelope_id) = &self.envelope_id
            && doc.envelope_id() != Some(envelope_id.as_str())
        {
            return false;
        }
        true
    }
}
