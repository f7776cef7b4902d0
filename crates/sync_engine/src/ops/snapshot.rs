//! Versioned session snapshot.
//!
//! Version 1 caches hold only the ledger, in the legacy float-amount schema.
//! Version 2 adds the pending queue and stores amounts as integer cents.

use ledger::{LedgerError, LedgerState, LedgerV1};
use serde::{Deserialize, Serialize};

use crate::{ResultSync, SyncError, SyncSession, queue::PendingSnapshot};

use super::remote::temp_entities;

pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub version: u32,
    pub user_id: String,
    pub ledger: LedgerState,
    #[serde(default)]
    pub pending: PendingSnapshot,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    #[serde(default = "legacy_version")]
    version: u32,
    user_id: Option<String>,
}

fn legacy_version() -> u32 {
    1
}

impl SessionSnapshot {
    /// Parse any supported snapshot version, migrating to the current one.
    /// `user_id` fills in the owner of v1 caches, which do not record it.
    pub fn parse(raw: &str, user_id: &str) -> ResultSync<Self> {
        let header: Header = serde_json::from_str(raw)?;
        match header.version {
            1 => {
                let legacy: LedgerV1 = serde_json::from_str(raw)?;
                let owner = header.user_id.unwrap_or_else(|| user_id.to_string());
                let ledger = legacy.into_state(&owner)?;
                tracing::info!(
                    envelopes = ledger.envelopes.len(),
                    transactions = ledger.transactions.len(),
                    "migrated v1 snapshot"
                );
                Ok(Self {
                    version: SNAPSHOT_VERSION,
                    user_id: owner,
                    ledger,
                    pending: PendingSnapshot::default(),
                })
            }
            SNAPSHOT_VERSION => Ok(serde_json::from_str(raw)?),
            other => Err(LedgerError::UnsupportedSnapshot(other).into()),
        }
    }
}

impl SyncSession {
    /// Serialize the ledger and the pending queue as the current snapshot
    /// version.
    pub fn serialize(&self) -> ResultSync<String> {
        let snapshot = SessionSnapshot {
            version: SNAPSHOT_VERSION,
            user_id: self.inner.user_id.clone(),
            ledger: self.inner.store.snapshot(),
            pending: self.inner.queue().snapshot(),
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Replace local state with a serialized snapshot. Unsynced temp
    /// entities raise `pending_sync` so the next flush picks them up.
    pub fn hydrate(&self, raw: &str) -> ResultSync<()> {
        self.ensure_open()?;
        let inner = &self.inner;
        let snapshot = SessionSnapshot::parse(raw, &inner.user_id)?;
        if snapshot.user_id != inner.user_id {
            return Err(SyncError::SnapshotUserMismatch(snapshot.user_id));
        }

        let unsynced = temp_entities(&snapshot.ledger).len();
        inner.store.replace(snapshot.ledger);
        let mut queue = inner.queue();
        queue.restore(snapshot.pending);
        if unsynced > 0 {
            queue.set_pending_sync();
        }
        tracing::info!(unsynced, "session hydrated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_version_is_read_as_v1() {
        let raw = r#"{
            "envelopes": [
                {"id": "env-1", "name": "Groceries", "createdAt": "2025-01-01T00:00:00Z"}
            ],
            "transactions": [
                {"id": "t1", "date": "2025-06-03", "amount": 150.5, "envelopeId": "env-1",
                 "type": "Income"}
            ]
        }"#;
        let snapshot = SessionSnapshot::parse(raw, "user-1").unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.user_id, "user-1");
        assert_eq!(snapshot.ledger.transactions.len(), 1);
        assert_eq!(snapshot.pending, PendingSnapshot::default());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = SessionSnapshot::parse(r#"{"version": 7}"#, "user-1").unwrap_err();
        assert_eq!(err, SyncError::Ledger(LedgerError::UnsupportedSnapshot(7)));
    }

    #[test]
    fn current_version_parses_as_is() {
        let snapshot = SessionSnapshot {
            version: SNAPSHOT_VERSION,
            user_id: "user-1".to_string(),
            ledger: LedgerState::default(),
            pending: PendingSnapshot::default(),
        };
        let raw = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(SessionSnapshot::parse(&raw, "someone-else").unwrap(), snapshot);
    }
}
