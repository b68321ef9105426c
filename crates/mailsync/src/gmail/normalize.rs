//! Gmail API response normalization
//!
//! Converts Gmail API responses to domain models.

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};

use super::api::{self, GmailMessage, HistoryResponse, LabelChange, MessageChange};
use crate::models::{
    ChangeKind, ChangeRecord, HistoryDelta, MessageDetail, MessageId, MessagePart, PartBody,
};

/// Flatten history pages into a single delta
///
/// The delta's cursor is the last one reported by any page.
pub fn normalize_history(pages: Vec<HistoryResponse>) -> HistoryDelta {
    let mut delta = HistoryDelta::default();

    for page in pages {
        if page.history_id.is_some() {
            delta.new_cursor = page.history_id;
        }

        for record in page.history.unwrap_or_default() {
            push_message_changes(&mut delta, ChangeKind::MessageAdded, record.messages_added);
            push_message_changes(&mut delta, ChangeKind::MessageDeleted, record.messages_deleted);
            push_label_changes(&mut delta, ChangeKind::LabelAdded, record.labels_added);
            push_label_changes(&mut delta, ChangeKind::LabelRemoved, record.labels_removed);
        }
    }

    delta
}

fn push_message_changes(
    delta: &mut HistoryDelta,
    kind: ChangeKind,
    changes: Option<Vec<MessageChange>>,
) {
    for change in changes.unwrap_or_default() {
        delta.records.push(ChangeRecord::new(
            kind,
            change.message.id,
            change.message.label_ids.unwrap_or_default(),
        ));
    }
}

fn push_label_changes(
    delta: &mut HistoryDelta,
    kind: ChangeKind,
    changes: Option<Vec<LabelChange>>,
) {
    for change in changes.unwrap_or_default() {
        delta.records.push(ChangeRecord::new(
            kind,
            change.message.id,
            change.label_ids.unwrap_or_default(),
        ));
    }
}

/// Normalize a Gmail API message to a MessageDetail
pub fn normalize_message(gmail_msg: GmailMessage) -> Result<MessageDetail> {
    let payload = gmail_msg
        .payload
        .with_context(|| format!("Message {} has no payload", gmail_msg.id))?;

    Ok(MessageDetail {
        id: MessageId::new(gmail_msg.id),
        label_ids: gmail_msg.label_ids.unwrap_or_default(),
        payload: normalize_part(payload),
    })
}

fn normalize_part(part: api::MessagePart) -> MessagePart {
    let body = part
        .body
        .map(|b| PartBody {
            attachment_id: b.attachment_id.filter(|id| !id.is_empty()),
            data: b.data.filter(|d| !d.is_empty()),
            size: b.size,
        })
        .unwrap_or_default();

    MessagePart {
        part_id: part.part_id,
        mime_type: part.mime_type,
        filename: part.filename,
        body,
        parts: part
            .parts
            .unwrap_or_default()
            .into_iter()
            .map(normalize_part)
            .collect(),
    }
}

/// Decode base64-encoded body or attachment data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
pub fn decode_base64_bytes(data: &str) -> Result<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    let data = data.trim();
    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data) {
            return Ok(decoded);
        }
    }

    anyhow::bail!("Data is not valid base64 ({} chars)", data.len())
}

/// Parse a watch expiration (milliseconds since epoch as a string)
pub fn parse_expiration(millis: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = millis.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}
