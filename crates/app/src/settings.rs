//! Settings of the `envelopes` binary.
//!
//! Layered from lowest to highest precedence: the optional TOML file
//! (`config/envelopes.toml` or `--config`), `ENVELOPES_*` environment
//! variables (`ENVELOPES_SYNC__FETCH_TIMEOUT_MS=8000`), then CLI flags.

use std::time::Duration;

use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use sync_engine::{Deadlines, SyncConfig};

use crate::error::{AppError, Result};

const DEFAULT_CONFIG_PATH: &str = "config/envelopes.toml";

#[derive(Debug, Parser)]
#[command(name = "envelopes")]
#[command(about = "Offline-first envelope budgeting, run against a sandbox remote")]
pub struct Cli {
    /// Optional config file path (TOML).
    #[arg(long)]
    pub config: Option<String>,
    #[arg(long)]
    pub user_id: Option<String>,
    /// Override timezone (IANA name).
    #[arg(long)]
    pub timezone: Option<String>,
    /// Override the cache file path.
    #[arg(long)]
    pub cache: Option<String>,
    /// Override the log level.
    #[arg(long)]
    pub level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print envelope balances and the current month budget from the cache.
    Balances,
    /// Walk through an offline session against the sandbox remote.
    Simulate,
    /// Delete the cache file.
    ResetCache,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Session {
    pub user_id: String,
    pub timezone: String,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            user_id: "local".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Sync {
    pub mutation_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub probe_interval_secs: u64,
    pub max_pending_age_secs: u64,
}

impl Default for Sync {
    fn default() -> Self {
        Self {
            mutation_timeout_ms: 3_000,
            fetch_timeout_ms: 5_000,
            probe_interval_secs: 30,
            max_pending_age_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cache {
    pub path: String,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            path: "config/envelopes_cache.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub session: Session,
    pub sync: Sync,
    pub cache: Cache,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
        let mut settings: Settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("ENVELOPES")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        if let Some(user_id) = &cli.user_id {
            settings.session.user_id = user_id.clone();
        }
        if let Some(timezone) = &cli.timezone {
            settings.session.timezone = timezone.clone();
        }
        if let Some(cache) = &cli.cache {
            settings.cache.path = cache.clone();
        }
        if let Some(level) = &cli.level {
            settings.app.level = level.clone();
        }
        Ok(settings)
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.session
            .timezone
            .parse::<Tz>()
            .map_err(|_| AppError::Timezone(self.session.timezone.clone()))
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            deadlines: Deadlines {
                mutation: Duration::from_millis(self.sync.mutation_timeout_ms),
                fetch: Duration::from_millis(self.sync.fetch_timeout_ms),
            },
            probe_interval: Duration::from_secs(self.sync.probe_interval_secs),
            max_pending_age: Duration::from_secs(self.sync.max_pending_age_secs),
        }
    }
}
