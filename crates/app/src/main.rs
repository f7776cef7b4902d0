use std::process::ExitCode;

use clap::Parser;
use settings::{Cli, Command, Settings};

mod cache;
mod commands;
mod error;
mod settings;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match Settings::load(&cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("failed to load settings: {err}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "envelopes={level},sync_engine={level},ledger={level}",
            level = settings.app.level
        ))
        .init();

    let cache = cache::SnapshotCache::new(&settings.cache.path);
    let result = match cli.command {
        Command::Balances => commands::balances(&settings, &cache),
        Command::Simulate => commands::simulate(&settings, &cache).await,
        Command::ResetCache => commands::reset_cache(&cache),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
