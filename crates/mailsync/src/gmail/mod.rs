//! Gmail API integration
//!
//! This module provides:
//! - The `MailboxApi` seam the sync engine talks to
//! - A REST client implementing it
//! - Service-account (domain-wide delegation) authentication
//! - Response normalization to domain models

mod auth;
mod client;
mod normalize;
mod provider;

pub use auth::{ServiceAccountAuth, ServiceAccountKey, TokenSource};
pub use client::{GmailClient, HistoryExpiredError};
pub use normalize::{decode_base64_bytes, normalize_history, normalize_message, parse_expiration};
pub use provider::MailboxApi;

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    use crate::models::HistoryCursor;

    /// One page of `users.history.list`
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub history_id: Option<HistoryCursor>,
        pub next_page_token: Option<String>,
    }

    /// A history entry; each list holds changes of one kind
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: Option<String>,
        pub messages_added: Option<Vec<MessageChange>>,
        pub messages_deleted: Option<Vec<MessageChange>>,
        pub labels_added: Option<Vec<LabelChange>>,
        pub labels_removed: Option<Vec<LabelChange>>,
    }

    /// Message added to or deleted from the mailbox
    #[derive(Debug, Deserialize)]
    pub struct MessageChange {
        pub message: MessageRef,
    }

    /// Labels added to or removed from a message
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LabelChange {
        pub message: MessageRef,
        pub label_ids: Option<Vec<String>>,
    }

    /// Reference to a message as embedded in history records
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
    }

    /// Full message from Gmail API (`format=full`)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
        pub payload: Option<MessagePart>,
    }

    /// MIME part; the message payload is the root part
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Part body: inline base64url data or a reference to an attachment
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub attachment_id: Option<String>,
        pub size: Option<u64>,
        pub data: Option<String>,
    }

    /// Response of `users.messages.attachments.get`
    #[derive(Debug, Deserialize)]
    pub struct AttachmentResponse {
        pub size: Option<u64>,
        pub data: Option<String>,
    }

    /// Response of `users.getProfile`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProfileResponse {
        pub email_address: String,
        pub history_id: HistoryCursor,
    }

    /// Body of `users.watch`
    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WatchRequest {
        pub label_ids: Vec<String>,
        pub topic_name: String,
        pub label_filter_behavior: String,
    }

    impl WatchRequest {
        /// Watch only changes touching `label`, published to `topic_name`
        pub fn including(label: impl Into<String>, topic_name: impl Into<String>) -> Self {
            Self {
                label_ids: vec![label.into()],
                topic_name: topic_name.into(),
                label_filter_behavior: "INCLUDE".to_string(),
            }
        }
    }

    /// Response of `users.watch`
    #[derive(Debug, Deserialize)]
    pub struct WatchResponse {
        #[serde(rename = "historyId")]
        pub history_id: HistoryCursor,
        /// Milliseconds since epoch, as a decimal string
        pub expiration: Option<String>,
    }
}
