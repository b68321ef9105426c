//! Message model: identifiers and MIME part structure

use serde::{Deserialize, Serialize};

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full structure of a message as needed for attachment extraction
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDetail {
    pub id: MessageId,
    pub label_ids: Vec<String>,
    /// Root MIME node; its `parts` are the top-level parts
    pub payload: MessagePart,
}

/// One node of the MIME tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePart {
    pub part_id: Option<String>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub body: PartBody,
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    /// Filename if the part carries a non-empty one
    pub fn attachment_name(&self) -> Option<&str> {
        self.filename.as_deref().filter(|name| !name.is_empty())
    }
}

/// Body reference of a MIME node
///
/// Large payloads are referenced by `attachment_id`; small ones are
/// inlined as base64url `data`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartBody {
    pub attachment_id: Option<String>,
    pub data: Option<String>,
    pub size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_name_ignores_empty() {
        let mut part = MessagePart::default();
        assert_eq!(part.attachment_name(), None);

        part.filename = Some(String::new());
        assert_eq!(part.attachment_name(), None);

        part.filename = Some("report.pdf".to_string());
        assert_eq!(part.attachment_name(), Some("report.pdf"));
    }

    #[test]
    fn test_message_id_display() {
        assert_eq!(MessageId::new("18c2f").to_string(), "18c2f");
    }
}
