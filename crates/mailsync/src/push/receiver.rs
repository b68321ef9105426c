//! Pub/Sub push envelope decoding and dispatch

use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};
use crate::gmail::decode_base64_bytes;
use crate::models::{HistoryCursor, Notification};
use crate::sync::{HistoryReconciler, PassReport};

/// Pub/Sub push request body
#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    pub message: Option<PushMessage>,
    pub subscription: Option<String>,
}

/// The wrapped Pub/Sub message
#[derive(Debug, Deserialize)]
pub struct PushMessage {
    /// Base64-encoded Gmail notification JSON
    pub data: Option<String>,
    #[serde(rename = "messageId", alias = "message_id")]
    pub message_id: Option<String>,
}

/// Gmail's notification payload inside `message.data`
#[derive(Debug, Deserialize)]
struct GmailNotification {
    #[serde(rename = "emailAddress")]
    email_address: Option<String>,
    #[serde(rename = "historyId")]
    history_id: Option<HistoryCursor>,
}

/// How a delivery was handled
#[derive(Debug, Clone, PartialEq)]
pub enum Acknowledgement {
    /// A pass ran to completion
    Processed(PassReport),
    /// The notification is for another mailbox
    Ignored,
    /// The body could not be decoded; redelivery would not help
    Rejected(String),
}

impl Acknowledgement {
    /// HTTP status to answer the push with
    pub fn status_code(&self) -> u16 {
        match self {
            Acknowledgement::Processed(_) | Acknowledgement::Ignored => 204,
            Acknowledgement::Rejected(_) => 400,
        }
    }
}

/// Decode a push body into a notification
pub fn decode_envelope(body: &[u8]) -> SyncResult<Notification> {
    let envelope: PushEnvelope = serde_json::from_slice(body)
        .map_err(|e| {
            SyncError::MalformedNotification(format!("Body is not a push envelope: {}", e))
        })?;

    let message = envelope
        .message
        .ok_or_else(|| SyncError::MalformedNotification("Missing message".to_string()))?;

    let data = message
        .data
        .filter(|d| !d.is_empty())
        .ok_or_else(|| SyncError::MalformedNotification("Missing message.data".to_string()))?;

    let payload = decode_base64_bytes(&data)
        .map_err(|e| SyncError::MalformedNotification(format!("{:#}", e)))?;

    let notification: GmailNotification = serde_json::from_slice(&payload)
        .map_err(|e| {
            SyncError::MalformedNotification(format!("Payload is not notification JSON: {}", e))
        })?;

    let email_address = notification
        .email_address
        .filter(|a| !a.is_empty())
        .ok_or_else(|| SyncError::MalformedNotification("Missing emailAddress".to_string()))?;
    let history_id = notification
        .history_id
        .ok_or_else(|| SyncError::MalformedNotification("Missing historyId".to_string()))?;

    Ok(Notification {
        email_address,
        history_id,
        delivery_id: message.message_id,
    })
}

/// Accepts push deliveries for one monitored mailbox
pub struct NotificationReceiver {
    identity: String,
    reconciler: Arc<HistoryReconciler>,
}

impl NotificationReceiver {
    pub fn new(identity: impl Into<String>, reconciler: Arc<HistoryReconciler>) -> Self {
        Self {
            identity: identity.into(),
            reconciler,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Handle one push body
    ///
    /// Undecodable bodies and foreign mailboxes are acknowledged so the
    /// provider stops redelivering them. A failed pass is returned as an
    /// error, which the caller turns into a redelivery request.
    pub fn handle(&self, body: &[u8]) -> SyncResult<Acknowledgement> {
        let notification = match decode_envelope(body) {
            Ok(notification) => notification,
            Err(e) => {
                warn!("Rejecting push delivery: {}", e);
                return Ok(Acknowledgement::Rejected(e.to_string()));
            }
        };

        if !notification.is_for(&self.identity) {
            debug!(
                "Ignoring notification for {} (monitoring {})",
                notification.email_address, self.identity
            );
            return Ok(Acknowledgement::Ignored);
        }

        info!(
            "Notification {} for {} at history {}",
            notification.delivery_id.as_deref().unwrap_or("-"),
            notification.email_address,
            notification.history_id
        );

        let report = self
            .reconciler
            .reconcile(&self.identity, notification.history_id)?;
        Ok(Acknowledgement::Processed(report))
    }
}
