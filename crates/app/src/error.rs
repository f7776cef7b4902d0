use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Sync(#[from] sync_engine::SyncError),
    #[error(transparent)]
    Ledger(#[from] ledger::LedgerError),
    #[error("unknown timezone: {0}")]
    Timezone(String),
}
