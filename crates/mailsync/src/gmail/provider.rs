//! Provider seam consumed by the sync engine

use anyhow::Result;

use super::api::WatchRequest;
use crate::models::{HistoryCursor, HistoryDelta, MessageDetail, MessageId, WatchRegistration};

/// Mailbox operations the sync engine needs from the provider
///
/// `GmailClient` is the production implementation; tests script their own.
/// Every call names the mailbox identity explicitly.
pub trait MailboxApi: Send + Sync {
    /// All changes after `start`
    ///
    /// # Errors
    /// Fails with `HistoryExpiredError` when `start` has fallen out of the
    /// provider's retention window.
    fn list_history(&self, identity: &str, start: HistoryCursor) -> Result<HistoryDelta>;

    /// The mailbox's current history position
    fn current_cursor(&self, identity: &str) -> Result<HistoryCursor>;

    /// Full MIME structure of a message
    fn get_message(&self, identity: &str, id: &MessageId) -> Result<MessageDetail>;

    /// Decoded bytes of one attachment
    fn get_attachment(
        &self,
        identity: &str,
        message_id: &MessageId,
        attachment_id: &str,
    ) -> Result<Vec<u8>>;

    /// Register (or renew) the push watch
    fn watch(&self, identity: &str, request: &WatchRequest) -> Result<WatchRegistration>;

    /// Cancel the push watch
    fn stop(&self, identity: &str) -> Result<()>;
}
