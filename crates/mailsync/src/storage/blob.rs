//! Blob sink trait and object naming for attachment payloads

use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::MessageId;

/// Placeholder for parts that carry no filename at all
const UNNAMED_ATTACHMENT: &str = "unnamed_attachment";

/// Placeholder for filenames that sanitize down to nothing
const EMPTY_SANITIZED_NAME: &str = "attachment";

/// Fallback MIME type for parts that don't declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Key for storing an attachment payload
///
/// The part index keeps keys unique when two parts of one message share a
/// filename; re-extracting a message overwrites the same objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    /// Message ID this content belongs to
    pub message_id: String,
    /// Position of the part among the message's top-level parts
    pub part_index: usize,
    /// Object-name-safe filename
    pub filename: String,
}

impl BlobKey {
    /// Create a key for an attachment, sanitizing the original filename
    pub fn attachment(message_id: &MessageId, part_index: usize, filename: Option<&str>) -> Self {
        Self {
            message_id: message_id.as_str().to_string(),
            part_index,
            filename: sanitize_filename(filename),
        }
    }

    /// Object name within a bucket: `{message_id}/{part_index}_{filename}`
    pub fn object_name(&self) -> String {
        format!("{}/{}_{}", self.message_id, self.part_index, self.filename)
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.object_name())
    }
}

/// Make a filename safe for object names
///
/// Characters outside `[A-Za-z0-9_.-]` become `_`, runs of `_` collapse,
/// and leading/trailing `_`, `.` and `-` are trimmed.
pub fn sanitize_filename(filename: Option<&str>) -> String {
    let filename = match filename {
        Some(name) if !name.is_empty() => name,
        _ => UNNAMED_ATTACHMENT,
    };

    let mut sanitized = String::with_capacity(filename.len());
    for c in filename.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            c
        } else {
            '_'
        };
        if c == '_' && sanitized.ends_with('_') {
            continue;
        }
        sanitized.push(c);
    }

    let trimmed = sanitized.trim_matches(|c| matches!(c, '_' | '.' | '-'));
    if trimmed.is_empty() {
        EMPTY_SANITIZED_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Trait for durable blob storage
///
/// Uploads are overwrite-idempotent: putting the same key twice leaves one
/// object holding the latest bytes.
pub trait BlobSink: Send + Sync {
    /// Store `data` under `key` in `bucket`
    fn upload(&self, bucket: &str, key: &BlobKey, data: &[u8], content_type: &str) -> Result<()>;
}

/// A stored object, as kept by `InMemoryBlobSink`
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// In-memory blob sink for tests and dry runs
#[derive(Default)]
pub struct InMemoryBlobSink {
    objects: RwLock<HashMap<(String, String), StoredBlob>>,
    uploads: RwLock<usize>,
}

impl InMemoryBlobSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve an object by bucket and object name
    pub fn get(&self, bucket: &str, object_name: &str) -> Option<StoredBlob> {
        self.objects
            .read()
            .ok()?
            .get(&(bucket.to_string(), object_name.to_string()))
            .cloned()
    }

    /// Object names currently stored in `bucket`, sorted
    pub fn object_names(&self, bucket: &str) -> Vec<String> {
        let Ok(objects) = self.objects.read() else {
            return Vec::new();
        };
        let mut names: Vec<String> = objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Total number of upload calls, including overwrites
    pub fn upload_count(&self) -> usize {
        self.uploads.read().map(|n| *n).unwrap_or(0)
    }
}

impl BlobSink for InMemoryBlobSink {
    fn upload(&self, bucket: &str, key: &BlobKey, data: &[u8], content_type: &str) -> Result<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| anyhow::anyhow!("Blob map lock poisoned"))?;
        objects.insert(
            (bucket.to_string(), key.object_name()),
            StoredBlob {
                data: data.to_vec(),
                content_type: content_type.to_string(),
            },
        );

        let mut uploads = self
            .uploads
            .write()
            .map_err(|_| anyhow::anyhow!("Upload counter lock poisoned"))?;
        *uploads += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_and_collapses() {
        assert_eq!(sanitize_filename(Some("report (final)!.pdf")), "report_final_.pdf");
    }

    #[test]
    fn test_sanitize_output_alphabet() {
        let name = sanitize_filename(Some("  Ünïcödé  résumé (v2) #1.docx "));
        assert!(!name.is_empty());
        assert!(
            name.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        );
        assert!(!name.contains("__"));
        assert!(!name.starts_with(['_', '.', '-']));
        assert!(!name.ends_with(['_', '.', '-']));
    }

    #[test]
    fn test_sanitize_trims_separators() {
        assert_eq!(sanitize_filename(Some("..-_hidden.txt_-.")), "hidden.txt");
    }

    #[test]
    fn test_sanitize_placeholders() {
        assert_eq!(sanitize_filename(None), "unnamed_attachment");
        assert_eq!(sanitize_filename(Some("")), "unnamed_attachment");
        assert_eq!(sanitize_filename(Some("???")), "attachment");
        assert_eq!(sanitize_filename(Some("._-")), "attachment");
    }

    #[test]
    fn test_sanitize_keeps_safe_names() {
        assert_eq!(sanitize_filename(Some("invoice-2024_03.pdf")), "invoice-2024_03.pdf");
    }

    #[test]
    fn test_key_uniqueness_by_part_index() {
        let id = MessageId::new("m1");
        let a = BlobKey::attachment(&id, 1, Some("report.pdf"));
        let b = BlobKey::attachment(&id, 2, Some("report.pdf"));
        assert_ne!(a, b);
        assert_eq!(a.object_name(), "m1/1_report.pdf");
        assert_eq!(b.object_name(), "m1/2_report.pdf");
    }

    #[test]
    fn test_in_memory_overwrite() {
        let sink = InMemoryBlobSink::new();
        let key = BlobKey::attachment(&MessageId::new("m1"), 0, Some("a.txt"));

        sink.upload("bucket", &key, b"one", "text/plain").unwrap();
        sink.upload("bucket", &key, b"two", "text/plain").unwrap();

        assert_eq!(sink.object_names("bucket"), vec!["m1/0_a.txt".to_string()]);
        assert_eq!(sink.get("bucket", "m1/0_a.txt").unwrap().data, b"two");
        assert_eq!(sink.upload_count(), 2);
    }
}
