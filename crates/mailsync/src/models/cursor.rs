//! History cursor tracking for incremental Gmail sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position in a mailbox's change history (Gmail `historyId`)
///
/// Gmail reports history IDs as decimal strings in REST responses and as
/// JSON numbers in push notifications, so both forms deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct HistoryCursor(pub u64);

impl HistoryCursor {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HistoryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for HistoryCursor {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for HistoryCursor {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl<'de> Deserialize<'de> for HistoryCursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Persisted cursor for one monitored mailbox
///
/// "All changes up to `history_id` have been reconciled." Only one
/// CursorState exists per identity and its `history_id` never decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorState {
    /// Mailbox identity (email address) this cursor belongs to
    pub identity: String,
    /// Last reconciled history position
    pub history_id: HistoryCursor,
    /// When the cursor last moved
    pub updated_at: DateTime<Utc>,
}

impl CursorState {
    pub fn new(identity: impl Into<String>, history_id: HistoryCursor) -> Self {
        Self {
            identity: identity.into(),
            history_id,
            updated_at: Utc::now(),
        }
    }

    /// Move the cursor forward; values at or below the current one are ignored
    pub fn advanced(mut self, history_id: HistoryCursor) -> Self {
        if history_id > self.history_id {
            self.history_id = history_id;
            self.updated_at = Utc::now();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_number_and_string() {
        let from_number: HistoryCursor = serde_json::from_str("12345").unwrap();
        let from_string: HistoryCursor = serde_json::from_str("\"12345\"").unwrap();
        assert_eq!(from_number, HistoryCursor(12345));
        assert_eq!(from_string, HistoryCursor(12345));
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(serde_json::from_str::<HistoryCursor>("\"abc\"").is_err());
        assert!(serde_json::from_str::<HistoryCursor>("-4").is_err());
    }

    #[test]
    fn test_advanced_never_regresses() {
        let state = CursorState::new("user@example.com", HistoryCursor(50));
        let state = state.advanced(HistoryCursor(40));
        assert_eq!(state.history_id, HistoryCursor(50));
        let state = state.advanced(HistoryCursor(60));
        assert_eq!(state.history_id, HistoryCursor(60));
    }

    #[test]
    fn test_serialization() {
        let state = CursorState::new("user@example.com", HistoryCursor(12345));
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: CursorState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
