use std::sync::Arc;

use ledger::{
    EntityId, LedgerError, MoneyCents, MonthKey, NewEnvelope, NewTransaction, Piggybank, TransferCmd,
};
use sync_engine::{AuthIdentity, MemoryGateway, PlatformSignal, ProbeOutcome, SyncSession};

use crate::{cache::SnapshotCache, error::Result, settings::Settings};

fn session(settings: &Settings, gateway: &MemoryGateway, online: bool) -> Result<SyncSession> {
    let session = SyncSession::builder(
        AuthIdentity::authenticated(settings.session.user_id.clone()),
        Arc::new(gateway.clone()),
    )
    .config(settings.sync_config())
    .timezone(settings.timezone()?)
    .online(online)
    .build()?;
    Ok(session)
}

fn print_summary(session: &SyncSession, month: MonthKey) {
    let balances = session.balances();
    session.store().read(|state| {
        println!("Envelopes:");
        for envelope in state.ordered_envelopes() {
            let balance = balances.get(&envelope.id).copied().unwrap_or_default();
            let marker = if envelope.is_piggybank() { " (piggybank)" } else { "" };
            println!("  {:<20} {:>12}{marker}", envelope.name, balance.to_string());
        }
    });

    let budget = session.monthly_budget(month);
    println!("Budget {month}:");
    println!("  income     {:>12}", budget.total_income.to_string());
    println!("  allocated  {:>12}", budget.total_allocated.to_string());
    println!("  available  {:>12}", budget.available_to_budget.to_string());

    let status = session.status();
    println!(
        "Sync: {:?}, pending_sync={}, queued={}",
        status.connectivity,
        status.pending_sync,
        status.pending_creates + status.pending_updates + status.pending_deletes
    );
}

fn envelope_named(session: &SyncSession, name: &str) -> Result<EntityId> {
    session
        .store()
        .read(|state| {
            state
                .envelopes
                .values()
                .find(|envelope| envelope.name == name)
                .map(|envelope| envelope.id.clone())
        })
        .ok_or_else(|| LedgerError::KeyNotFound(name.to_string()).into())
}

/// Show the cached ledger without reaching any remote store.
pub fn balances(settings: &Settings, cache: &SnapshotCache) -> Result<()> {
    let Some(raw) = cache.load()? else {
        println!("No cache at {}", cache.path().display());
        return Ok(());
    };
    let gateway = MemoryGateway::new();
    gateway.set_offline(true);
    let session = session(settings, &gateway, false)?;
    session.hydrate(&raw)?;
    print_summary(&session, session.current_month());
    session.logout();
    Ok(())
}

/// Record a budget offline, reconnect to a sandbox remote and let the
/// queue drain, then persist the resulting snapshot.
pub async fn simulate(settings: &Settings, cache: &SnapshotCache) -> Result<()> {
    let gateway = MemoryGateway::new();
    gateway.set_offline(true);
    let session = session(settings, &gateway, false)?;
    let month = session.current_month();
    let day = month.first_day();

    let groceries = session
        .create_envelope(NewEnvelope::new("Groceries"))
        .await?;
    session.create_envelope(NewEnvelope::new("Rent")).await?;
    session
        .create_envelope(NewEnvelope::new("Trip").piggybank(Piggybank::new(
            MoneyCents::new(25_00),
            Some(MoneyCents::new(600_00)),
        )?))
        .await?;
    session
        .add_transaction(
            NewTransaction::income(groceries, MoneyCents::from_major_f64(150.50)?, day)
                .description("paycheck"),
        )
        .await?;
    tracing::info!(
        envelopes = 3,
        queued = session.status().pending_creates,
        "recorded offline"
    );

    gateway.set_offline(false);
    match session
        .handle_platform_signal(PlatformSignal::Online)
        .await?
    {
        ProbeOutcome::Online(report) => tracing::info!(
            attempted = report.attempted,
            failed = report.failed,
            settled = report.settled,
            "reconnected"
        ),
        other => tracing::warn!(?other, "still offline"),
    }
    session.start_realtime(month).await?;

    // Ids handed out offline were temporary; confirmed ones replaced them.
    let rent = envelope_named(&session, "Rent")?;
    let groceries = envelope_named(&session, "Groceries")?;
    let trip = envelope_named(&session, "Trip")?;

    session
        .set_allocation(&rent, month, MoneyCents::new(900_00))
        .await?;
    session
        .transfer(
            TransferCmd::new(groceries, trip, MoneyCents::new(50_00), day).description("save up"),
        )
        .await?;
    let report = session.repair_month(month).await?;
    tracing::info!(?report, "repair pass");

    print_summary(&session, month);
    cache.save(&session.serialize()?)?;
    println!("Snapshot written to {}", cache.path().display());
    session.logout();
    Ok(())
}

pub fn reset_cache(cache: &SnapshotCache) -> Result<()> {
    if cache.clear()? {
        println!("Removed {}", cache.path().display());
    } else {
        println!("No cache at {}", cache.path().display());
    }
    Ok(())
}
