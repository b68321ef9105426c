//! Decoded push notification

use super::HistoryCursor;

/// A mailbox change signal delivered by Pub/Sub
///
/// Delivery is at-least-once: the same notification (or an older one) may
/// arrive again at any time.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Mailbox the notification is about
    pub email_address: String,
    /// Mailbox position that triggered the notification
    pub history_id: HistoryCursor,
    /// Pub/Sub delivery identifier, for logging
    pub delivery_id: Option<String>,
}

impl Notification {
    /// Whether this notification targets `identity` (addresses compare case-insensitively)
    pub fn is_for(&self, identity: &str) -> bool {
        self.email_address.eq_ignore_ascii_case(identity)
    }
}
