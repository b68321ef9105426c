//! Change history and watch models

use chrono::{DateTime, Utc};

use super::{HistoryCursor, MessageId};

/// Kind of change reported by the history API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    MessageAdded,
    MessageDeleted,
    LabelAdded,
    LabelRemoved,
}

/// A single message-level change
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub message_id: MessageId,
    pub label_ids: Vec<String>,
}

impl ChangeRecord {
    pub fn new(kind: ChangeKind, message_id: impl Into<MessageId>, label_ids: Vec<String>) -> Self {
        Self {
            kind,
            message_id: message_id.into(),
            label_ids,
        }
    }

    /// True for "message added" records carrying `label`
    pub fn is_added_with_label(&self, label: &str) -> bool {
        self.kind == ChangeKind::MessageAdded && self.label_ids.iter().any(|l| l == label)
    }
}

/// Changes between a start cursor and the mailbox's current position
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryDelta {
    /// Mailbox position the delta extends to (absent if the provider omitted it)
    pub new_cursor: Option<HistoryCursor>,
    pub records: Vec<ChangeRecord>,
}

/// Active provider-side watch
#[derive(Debug, Clone, PartialEq)]
pub struct WatchRegistration {
    /// Mailbox position when the watch was registered
    pub history_id: HistoryCursor,
    /// When the watch lapses unless renewed
    pub expires_at: Option<DateTime<Utc>>,
}
