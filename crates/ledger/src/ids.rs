//! Entity identifiers.
//!
//! An id is either a *confirmed* id assigned by the remote store or a
//! provisional `temp-<timestamp>-<random>` id issued locally while the remote
//! create is pending. Temp ids never leave the client.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const TEMP_PREFIX: &str = "temp-";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an id returned by the remote store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Issue a fresh provisional id.
    #[must_use]
    pub fn temp() -> Self {
        Self::temp_at(Utc::now())
    }

    /// Issue a provisional id stamped with `now`.
    #[must_use]
    pub fn temp_at(now: DateTime<Utc>) -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{TEMP_PREFIX}{}-{}",
            now.timestamp_millis(),
            &random[..9]
        ))
    }

    #[must_use]
    pub fn is_temp(&self) -> bool {
        self.0.starts_with(TEMP_PREFIX)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn temp_ids_have_timestamp_and_random_suffix() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let id = EntityId::temp_at(now);
        assert!(id.is_temp());
        let parts: Vec<&str> = id.as_str().splitn(3, '-').collect();
        assert_eq!(parts[0], "temp");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 9);
    }

    #[test]
    fn temp_ids_are_unique_within_the_same_millisecond() {
        let now = Utc::now();
        assert_ne!(EntityId::temp_at(now), EntityId::temp_at(now));
    }

    #[test]
    fn remote_ids_are_confirmed() {
        assert!(!EntityId::new("env-1").is_temp());
    }
}
