use std::{future::Future, time::Duration};

use crate::{error::GatewayError, gateway::GatewayResult};

/// Deadlines raced by every remote call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadlines {
    /// create / update / delete / probe
    pub mutation: Duration,
    /// query and subscribe
    pub fetch: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            mutation: Duration::from_millis(3_000),
            fetch: Duration::from_millis(5_000),
        }
    }
}

/// Race `call` against `limit`. An elapsed deadline becomes a network error,
/// indistinguishable from an explicit one.
pub async fn with_deadline<T>(
    limit: Duration,
    what: &str,
    call: impl Future<Output = GatewayResult<T>>,
) -> GatewayResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(what, limit_ms = limit.as_millis() as u64, "remote call timed out");
            Err(GatewayError::network(format!(
                "{what} timed out after {}ms",
                limit.as_millis()
            )))
        }
    }
}
