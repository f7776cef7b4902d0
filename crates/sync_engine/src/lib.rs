//! Offline-first synchronization of the envelope ledger with a remote
//! document store.
//!
//! A [`SyncSession`] owns the local [`ledger::LedgerStore`]. Every mutation
//! is applied locally first under a temp id, then pushed through a
//! [`RemoteGateway`]. Confirmed ids are reconciled into the store, network
//! failures queue the work until connectivity returns, and permanent
//! rejections roll the optimistic write back.

pub use connectivity::{Connectivity, ConnectivityMonitor, PlatformSignal, ProbeTicket};
pub use deadline::{Deadlines, with_deadline};
pub use docs::{DocCodec, EntityRef};
pub use error::{ErrorKind, GatewayError, SyncError};
pub use gate::{GateState, ImportGuard, RealtimeGate, ResetGuard};
pub use gateway::{ChangeHandler, GatewayResult, RemoteChange, RemoteGateway, Subscription};
pub use memory::{MemoryGateway, Operation};
pub use ops::{
    AuthIdentity, Clock, FlushReport, ProbeOutcome, RefreshOutcome, RepairReport, RepairWorker,
    SNAPSHOT_VERSION, SessionSnapshot, SyncConfig, SyncSession, SyncSessionBuilder, SyncStatus,
    TransferIds,
};
pub use queue::{FlushBatch, PendingQueue, PendingSnapshot};
pub use reconciler::FollowUp;

mod connectivity;
mod deadline;
mod docs;
mod error;
mod gate;
mod gateway;
mod memory;
mod ops;
mod queue;
mod reconciler;

pub type ResultSync<T> = Result<T, SyncError>;
