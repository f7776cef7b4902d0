use std::sync::{Arc, Mutex};

use api_types::{Document, EntityKind, Filter, envelope::EnvelopeDoc};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use ledger::{EntityId, LedgerState, MoneyCents, MonthKey, NewEnvelope, NewTransaction};
use sync_engine::{
    AuthIdentity, MemoryGateway, PendingSnapshot, ProbeOutcome, RefreshOutcome, RemoteChange,
    RemoteGateway, SNAPSHOT_VERSION, SessionSnapshot, SyncError, SyncSession,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
}

fn june() -> MonthKey {
    "2025-06".parse().unwrap()
}

fn session_as(gateway: &MemoryGateway, user: &str, online: bool) -> SyncSession {
    SyncSession::builder(AuthIdentity::authenticated(user), Arc::new(gateway.clone()))
        .clock(now)
        .online(online)
        .build()
        .unwrap()
}

fn session(gateway: &MemoryGateway) -> SyncSession {
    session_as(gateway, "alice", true)
}

fn envelope_doc(name: &str) -> Document {
    Document::Envelope(EnvelopeDoc {
        id: None,
        user_id: "alice".to_string(),
        name: name.to_string(),
        is_active: true,
        order_index: 0,
        piggybank: None,
        created_at: now(),
    })
}

fn local_names(session: &SyncSession) -> Vec<String> {
    session.store().read(|state| {
        let mut names: Vec<String> = state.envelopes.values().map(|e| e.name.clone()).collect();
        names.sort();
        names
    })
}

#[test]
fn unauthenticated_identities_are_refused() {
    let identity = AuthIdentity {
        user_id: "alice".to_string(),
        authenticated: false,
    };
    let err = SyncSession::builder(identity, Arc::new(MemoryGateway::new()))
        .build()
        .unwrap_err();
    assert_eq!(err, SyncError::Unauthenticated);
}

#[tokio::test]
async fn realtime_pushes_are_dropped_while_pending_sync() {
    let gateway = MemoryGateway::new();
    let session = session(&gateway);
    session.start_realtime(june()).await.unwrap();
    assert_eq!(gateway.subscriber_count(), 4);

    gateway.insert(envelope_doc("Rent"));
    assert_eq!(local_names(&session), vec!["Rent"]);

    session.mark_pending_sync();
    gateway.insert(envelope_doc("Food"));
    assert_eq!(local_names(&session), vec!["Rent"]);
    assert_eq!(session.status().dropped_pushes, 1);

    let report = session.flush_pending().await.unwrap();
    assert!(report.settled);
    assert!(!session.status().pending_sync);

    gateway.remove(EntityKind::Envelope, "env-1");
    assert_eq!(local_names(&session), vec!["Food"]);
}

#[tokio::test]
async fn observers_never_see_a_create_twice() {
    let gateway = MemoryGateway::new();
    let session = session(&gateway);
    let rent = session
        .create_envelope(NewEnvelope::new("Rent"))
        .await
        .unwrap();
    session.start_realtime(june()).await.unwrap();

    // Registered after the session, so it runs once the session has handled
    // the same push.
    let seen = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(session.store());
    let envelope = rent.clone();
    let record = Arc::clone(&seen);
    let _observer = gateway
        .subscribe(
            EntityKind::Transaction,
            Filter::user("alice").month("2025-06"),
            Arc::new(move |_: RemoteChange| {
                let view =
                    store.read(|state| (state.transactions.len(), state.balance(&envelope)));
                record.lock().unwrap().push(view);
            }),
        )
        .await
        .unwrap();

    let date = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
    session
        .add_transaction(NewTransaction::income(rent.clone(), MoneyCents::new(150_50), date))
        .await
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![(0, MoneyCents::ZERO), (1, MoneyCents::new(150_50))]
    );
    assert_eq!(session.balance(&rent), MoneyCents::new(150_50));
    assert_eq!(session.store().read(|state| state.transactions.len()), 1);
    assert!(!session.status().pending_sync);
}

#[tokio::test]
async fn import_guard_pauses_realtime_pushes() {
    let gateway = MemoryGateway::new();
    let session = session(&gateway);
    session.start_realtime(june()).await.unwrap();

    let guard = session.begin_import();
    gateway.insert(envelope_doc("Rent"));
    assert!(local_names(&session).is_empty());

    drop(guard);
    gateway.insert(envelope_doc("Food"));
    assert_eq!(local_names(&session), vec!["Food", "Rent"]);
}

#[tokio::test]
async fn offline_refresh_serves_the_cache_until_a_probe_succeeds() {
    let gateway = MemoryGateway::new();
    let session = session_as(&gateway, "alice", false);
    let temp = session
        .create_envelope(NewEnvelope::new("Offline"))
        .await
        .unwrap();
    assert!(temp.is_temp());

    gateway.insert(envelope_doc("Remote"));
    let outcome = session.refresh_month(june()).await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Cached);
    assert_eq!(local_names(&session), vec!["Offline"]);

    let outcome = session.probe_now().await.unwrap();
    assert!(matches!(outcome, ProbeOutcome::Online(_)));
    session.refresh_month(june()).await.unwrap();
    assert_eq!(local_names(&session), vec!["Offline", "Remote"]);
}

#[tokio::test]
async fn snapshot_round_trips_pending_work() {
    let gateway = MemoryGateway::new();
    let session = session_as(&gateway, "alice", false);
    session
        .create_envelope(NewEnvelope::new("Rent"))
        .await
        .unwrap();
    let raw = session.serialize().unwrap();

    let restored = session_as(&gateway, "alice", false);
    restored.hydrate(&raw).unwrap();
    assert_eq!(restored.store().snapshot(), session.store().snapshot());
    let status = restored.status();
    assert_eq!(status.pending_creates, 1);
    assert!(status.pending_sync);

    // Replaying the queue on the restored session reaches the remote store.
    restored.probe_now().await.unwrap();
    assert_eq!(gateway.documents(EntityKind::Envelope).len(), 1);
}

#[tokio::test]
async fn v1_snapshots_are_migrated_on_hydrate() {
    let raw = r#"{
        "envelopes": [
            {"id": "env-1", "name": "Groceries", "createdAt": "2025-01-01T00:00:00Z"}
        ],
        "transactions": [
            {"id": "t1", "date": "2025-06-03", "amount": 150.5, "envelopeId": "env-1",
             "type": "Income", "description": "paycheck"}
        ]
    }"#;
    let session = session(&MemoryGateway::new());
    session.hydrate(raw).unwrap();

    let envelope = EntityId::new("env-1");
    assert_eq!(session.balance(&envelope), MoneyCents::new(150_50));
    assert!(!session.status().pending_sync);

    let upgraded: SessionSnapshot = serde_json::from_str(&session.serialize().unwrap()).unwrap();
    assert_eq!(upgraded.version, SNAPSHOT_VERSION);
    assert_eq!(upgraded.user_id, "alice");
}

#[tokio::test]
async fn snapshots_of_another_user_are_rejected() {
    let snapshot = SessionSnapshot {
        version: SNAPSHOT_VERSION,
        user_id: "bob".to_string(),
        ledger: LedgerState::default(),
        pending: PendingSnapshot::default(),
    };
    let raw = serde_json::to_string(&snapshot).unwrap();
    let err = session(&MemoryGateway::new()).hydrate(&raw).unwrap_err();
    assert_eq!(err, SyncError::SnapshotUserMismatch("bob".to_string()));
}

#[tokio::test]
async fn logout_tears_the_session_down() {
    let gateway = MemoryGateway::new();
    let session = session(&gateway);
    session
        .create_envelope(NewEnvelope::new("Rent"))
        .await
        .unwrap();
    session.start_realtime(june()).await.unwrap();
    session.start_background().unwrap();

    session.logout();
    assert_eq!(gateway.subscriber_count(), 0);
    assert!(session.store().read(LedgerState::is_empty));
    let err = session
        .create_envelope(NewEnvelope::new("Food"))
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::SessionClosed);
    // Remote data is untouched.
    assert_eq!(gateway.documents(EntityKind::Envelope).len(), 1);
}

#[tokio::test]
async fn reset_clears_remote_and_local_data() {
    let gateway = MemoryGateway::new();
    let session = session(&gateway);
    let envelope = session
        .create_envelope(NewEnvelope::new("Rent"))
        .await
        .unwrap();
    session
        .set_allocation(&envelope, june(), MoneyCents::new(500_00))
        .await
        .unwrap();

    session.reset_all().await.unwrap();
    for kind in EntityKind::ALL {
        assert!(gateway.documents(kind).is_empty(), "{kind} not cleared");
    }
    assert!(session.store().read(LedgerState::is_empty));
}

#[tokio::test(start_paused = true)]
async fn background_loop_probes_while_offline() {
    let gateway = MemoryGateway::new();
    let session = session_as(&gateway, "alice", false);
    session
        .create_envelope(NewEnvelope::new("Rent"))
        .await
        .unwrap();
    session.start_background().unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(31)).await;
    assert_eq!(gateway.documents(EntityKind::Envelope).len(), 1);
    assert!(!session.status().pending_sync);
    session.logout();
}
