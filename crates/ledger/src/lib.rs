//! Envelope-budgeting ledger: entities, derived balances and the invariants
//! between allocations and their mirror transactions.
//!
//! The ledger is purely local. It knows nothing about the remote store; the
//! `sync_engine` crate drives it.

pub use allocations::{EnvelopeAllocation, MonthlyBudget};
pub use commands::{
    IncomeSourcePatch, NewEnvelope, NewIncomeSource, NewTransaction, TransactionPatch, TransferCmd,
};
pub use envelopes::{Envelope, Piggybank};
pub use error::LedgerError;
pub use ids::EntityId;
pub use income::{IncomeFrequency, IncomeSource};
pub use legacy::LedgerV1;
pub use money::MoneyCents;
pub use month::MonthKey;
pub use repair::{RepairAction, RepairPlan, RepairScope};
pub use state::{AllocationUpsert, Keyed, LedgerState, MergeGuard, RemovedEnvelope, Rewrite};
pub use store::LedgerStore;
pub use transactions::{ALLOCATION_TAG, MirrorKind, PIGGYBANK_TAG, Transaction, TransactionKind};

mod allocations;
mod balances;
mod commands;
mod envelopes;
mod error;
mod ids;
mod income;
mod legacy;
mod money;
mod month;
mod repair;
mod state;
mod store;
mod transactions;
mod util;

pub type ResultLedger<T> = Result<T, LedgerError>;
