//! Attachment discovery and download
//!
//! Only the message's top-level parts are inspected. Attachments nested in
//! deeper multipart containers (e.g. a forwarded message's own attachments)
//! are not visited.

use anyhow::{Context, Result};
use log::debug;
use std::sync::Arc;

use crate::gmail::{MailboxApi, decode_base64_bytes};
use crate::models::{MessageDetail, MessageId};
use crate::storage::DEFAULT_CONTENT_TYPE;

/// Where an attachment's bytes live
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentSource {
    /// Fetched separately by attachment ID
    Remote(String),
    /// Embedded in the message as base64url data
    Inline(String),
}

/// An attachment found on a message
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRef {
    /// Index among the message's top-level parts
    pub part_index: usize,
    /// Original filename, unsanitized
    pub filename: String,
    pub content_type: String,
    pub source: AttachmentSource,
}

/// List the attachments on a message's top-level parts
pub fn attachment_refs(detail: &MessageDetail) -> Vec<AttachmentRef> {
    detail
        .payload
        .parts
        .iter()
        .enumerate()
        .filter_map(|(part_index, part)| {
            let filename = part.attachment_name()?;

            let source = match (&part.body.attachment_id, &part.body.data) {
                (Some(id), _) => AttachmentSource::Remote(id.clone()),
                (None, Some(data)) => AttachmentSource::Inline(data.clone()),
                (None, None) => {
                    debug!(
                        "Part {} ({}) of message {} has no body, skipping",
                        part_index, filename, detail.id
                    );
                    return None;
                }
            };

            Some(AttachmentRef {
                part_index,
                filename: filename.to_string(),
                content_type: part
                    .mime_type
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                source,
            })
        })
        .collect()
}

/// Fetches messages and their attachment payloads
pub struct AttachmentExtractor {
    api: Arc<dyn MailboxApi>,
}

impl AttachmentExtractor {
    pub fn new(api: Arc<dyn MailboxApi>) -> Self {
        Self { api }
    }

    /// Fetch a message and list its attachments
    pub fn extract(&self, identity: &str, message_id: &MessageId) -> Result<Vec<AttachmentRef>> {
        let detail = self
            .api
            .get_message(identity, message_id)
            .with_context(|| format!("Failed to fetch message {}", message_id))?;
        Ok(attachment_refs(&detail))
    }

    /// Decoded bytes of one attachment
    pub fn fetch_bytes(
        &self,
        identity: &str,
        message_id: &MessageId,
        attachment: &AttachmentRef,
    ) -> Result<Vec<u8>> {
        match &attachment.source {
            AttachmentSource::Remote(attachment_id) => self
                .api
                .get_attachment(identity, message_id, attachment_id)
                .with_context(|| {
                    format!(
                        "Failed to fetch attachment {} of message {}",
                        attachment.filename, message_id
                    )
                }),
            AttachmentSource::Inline(data) => decode_base64_bytes(data).with_context(|| {
                format!(
                    "Inline attachment {} of message {} is not valid base64",
                    attachment.filename, message_id
                )
            }),
        }
    }
}
