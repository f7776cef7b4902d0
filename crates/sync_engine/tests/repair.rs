use std::sync::Arc;

use api_types::{
    Document, EntityKind,
    allocation::AllocationDoc,
    envelope::EnvelopeDoc,
    transaction::{TransactionDoc, TransactionType},
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use ledger::{
    ALLOCATION_TAG, EntityId, MirrorKind, MoneyCents, MonthKey, NewEnvelope, NewIncomeSource,
    Piggybank,
};
use sync_engine::{AuthIdentity, MemoryGateway, RefreshOutcome, RepairReport, SyncSession};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
}

fn june() -> MonthKey {
    "2025-06".parse().unwrap()
}

fn session(gateway: &MemoryGateway) -> SyncSession {
    SyncSession::builder(
        AuthIdentity::authenticated("alice"),
        Arc::new(gateway.clone()),
    )
    .clock(now)
    .build()
    .unwrap()
}

fn local_mirrors(session: &SyncSession, kind: MirrorKind) -> Vec<MoneyCents> {
    session.store().read(|state| {
        state
            .transactions
            .values()
            .filter(|tx| tx.mirror_kind() == Some(kind))
            .map(|tx| tx.amount)
            .collect()
    })
}

fn remote_mirrors(gateway: &MemoryGateway) -> Vec<i64> {
    gateway
        .documents(EntityKind::Transaction)
        .into_iter()
        .filter_map(|doc| match doc {
            Document::Transaction(tx) if tx.is_automatic => Some(tx.amount_minor),
            _ => None,
        })
        .collect()
}

fn mirror_doc(amount_minor: i64, hour: u32) -> Document {
    Document::Transaction(TransactionDoc {
        id: None,
        user_id: "alice".to_string(),
        envelope_id: "env-1".to_string(),
        kind: TransactionType::Income,
        amount_minor,
        date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        month: "2025-06".to_string(),
        description: ALLOCATION_TAG.to_string(),
        transfer_id: None,
        reconciled: false,
        is_automatic: true,
        created_at: Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap(),
    })
}

#[tokio::test]
async fn allocation_is_mirrored_and_removed_with_zero() {
    let gateway = MemoryGateway::new();
    let session = session(&gateway);
    let envelope = session
        .create_envelope(NewEnvelope::new("Groceries"))
        .await
        .unwrap();

    session
        .set_allocation(&envelope, june(), MoneyCents::new(200_00))
        .await
        .unwrap();
    assert_eq!(
        local_mirrors(&session, MirrorKind::Allocation),
        vec![MoneyCents::new(200_00)]
    );
    assert_eq!(remote_mirrors(&gateway), vec![200_00]);
    assert_eq!(session.balance(&envelope), MoneyCents::new(200_00));

    session
        .set_allocation(&envelope, june(), MoneyCents::ZERO)
        .await
        .unwrap();
    assert!(local_mirrors(&session, MirrorKind::Allocation).is_empty());
    assert!(remote_mirrors(&gateway).is_empty());
    assert_eq!(session.balance(&envelope), MoneyCents::ZERO);
    // The allocation itself survives with a zero amount.
    assert_eq!(gateway.documents(EntityKind::Allocation).len(), 1);
}

#[tokio::test]
async fn duplicate_mirrors_collapse_to_the_allocation() {
    let gateway = MemoryGateway::new();
    gateway.insert(Document::Envelope(EnvelopeDoc {
        id: Some("env-1".to_string()),
        user_id: "alice".to_string(),
        name: "Groceries".to_string(),
        is_active: true,
        order_index: 0,
        piggybank: None,
        created_at: Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
    }));
    gateway.insert(Document::Allocation(AllocationDoc {
        id: None,
        user_id: "alice".to_string(),
        envelope_id: "env-1".to_string(),
        month: "2025-06".to_string(),
        budgeted_amount_minor: 150_00,
    }));
    let kept = gateway.insert(mirror_doc(100_00, 8));
    gateway.insert(mirror_doc(150_00, 9));

    let session = session(&gateway);
    let outcome = session.refresh_month(june()).await.unwrap();
    let RefreshOutcome::Refreshed {
        transactions,
        repair,
        ..
    } = outcome
    else {
        panic!("expected a refresh, got {outcome:?}");
    };
    assert_eq!(transactions, 2);
    assert_eq!(
        repair,
        RepairReport {
            updated: 1,
            deleted: 1,
            ..RepairReport::default()
        }
    );

    let local: Vec<(EntityId, MoneyCents)> = session.store().read(|state| {
        state
            .transactions
            .values()
            .map(|tx| (tx.id.clone(), tx.amount))
            .collect()
    });
    assert_eq!(local, vec![(EntityId::new(kept), MoneyCents::new(150_00))]);
    assert_eq!(remote_mirrors(&gateway), vec![150_00]);
}

#[tokio::test]
async fn repair_is_idempotent() {
    let gateway = MemoryGateway::new();
    let session = session(&gateway);
    let envelope = session
        .create_envelope(NewEnvelope::new("Rent"))
        .await
        .unwrap();
    session
        .set_allocation(&envelope, june(), MoneyCents::new(900_00))
        .await
        .unwrap();

    assert_eq!(
        session.repair_month(june()).await.unwrap(),
        RepairReport::default()
    );
    assert_eq!(remote_mirrors(&gateway), vec![900_00]);
}

#[tokio::test]
async fn piggybank_contributes_in_the_current_month_only() {
    let gateway = MemoryGateway::new();
    let session = session(&gateway);
    let piggybank = Piggybank::new(MoneyCents::new(25_00), Some(MoneyCents::new(600_00))).unwrap();
    let trip = session
        .create_envelope(NewEnvelope::new("Trip").piggybank(piggybank))
        .await
        .unwrap();

    assert_eq!(
        local_mirrors(&session, MirrorKind::Piggybank),
        vec![MoneyCents::new(25_00)]
    );
    let date = session.store().read(|state| {
        state
            .transactions
            .values()
            .map(|tx| tx.date)
            .next()
    });
    assert_eq!(date, NaiveDate::from_ymd_opt(2025, 6, 15));

    let july = session.repair_month(june().next()).await.unwrap();
    assert_eq!(july, RepairReport::default());

    // Pausing keeps the contribution already made this month.
    session.set_piggybank_paused(&trip, true).await.unwrap();
    assert_eq!(
        local_mirrors(&session, MirrorKind::Piggybank),
        vec![MoneyCents::new(25_00)]
    );
}

#[tokio::test]
async fn copied_allocations_bring_their_mirrors() {
    let gateway = MemoryGateway::new();
    let session = session(&gateway);
    let rent = session
        .create_envelope(NewEnvelope::new("Rent"))
        .await
        .unwrap();
    let food = session
        .create_envelope(NewEnvelope::new("Food"))
        .await
        .unwrap();
    let may = june().previous();
    session
        .set_allocation(&rent, may, MoneyCents::new(900_00))
        .await
        .unwrap();
    session
        .set_allocation(&food, may, MoneyCents::new(300_00))
        .await
        .unwrap();
    session
        .set_allocation(&food, june(), MoneyCents::new(350_00))
        .await
        .unwrap();

    let copied = session.copy_allocations(may, june()).await.unwrap();
    assert_eq!(copied, 1);

    let budget = session.monthly_budget(june());
    assert_eq!(budget.total_allocated, MoneyCents::new(1_250_00));
    assert_eq!(gateway.documents(EntityKind::Allocation).len(), 4);
}

#[tokio::test]
async fn monthly_budget_tracks_income_sources() {
    let gateway = MemoryGateway::new();
    let session = session(&gateway);
    let salary = session
        .add_income_source(NewIncomeSource::new(june(), "Salary", MoneyCents::new(3_000_00)))
        .await
        .unwrap();
    assert_eq!(salary, EntityId::new("inc-1"));
    let envelope = session
        .create_envelope(NewEnvelope::new("Rent"))
        .await
        .unwrap();
    session
        .set_allocation(&envelope, june(), MoneyCents::new(1_000_00))
        .await
        .unwrap();

    let budget = session.monthly_budget(june());
    assert_eq!(budget.total_income, MoneyCents::new(3_000_00));
    assert_eq!(budget.available_to_budget, MoneyCents::new(2_000_00));

    session.delete_income_source(&salary).await.unwrap();
    assert_eq!(session.monthly_budget(june()).total_income, MoneyCents::ZERO);
    assert!(gateway.documents(EntityKind::IncomeSource).is_empty());
}
