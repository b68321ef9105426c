//! File-based blob sink with optional zstd compression

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::blob::{BlobKey, BlobSink, StoredBlob};

/// Metadata kept next to each object
#[derive(Debug, Serialize, Deserialize)]
struct ObjectMeta {
    content_type: String,
    size: usize,
    compressed: bool,
}

/// File-based blob sink for local runs
///
/// Directory structure:
/// ```text
/// root/
///   my-bucket/
///     18c2f0a1b2c3d4e5/
///       1_report.pdf              # raw payload (or 1_report.pdf.zst)
///       1_report.pdf.meta.json    # content type, size, compression flag
/// ```
pub struct FileBlobSink {
    root: PathBuf,
    compression_level: Option<i32>,
}

impl FileBlobSink {
    /// Create a new file blob sink at the given path
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context("Failed to create blob storage directory")?;
        Ok(Self {
            root,
            compression_level: None,
        })
    }

    /// Store payloads zstd-compressed at `level`
    pub fn with_compression(mut self, level: i32) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Get the file path for a blob key
    fn blob_path(&self, bucket: &str, key: &BlobKey, compressed: bool) -> PathBuf {
        let mut name = format!("{}_{}", key.part_index, key.filename);
        if compressed {
            name.push_str(".zst");
        }
        self.root.join(bucket).join(&key.message_id).join(name)
    }

    fn meta_path(&self, bucket: &str, key: &BlobKey) -> PathBuf {
        self.root
            .join(bucket)
            .join(&key.message_id)
            .join(format!("{}_{}.meta.json", key.part_index, key.filename))
    }

    /// Retrieve an object, decompressing if needed
    ///
    /// Returns None if the object doesn't exist.
    pub fn get(&self, bucket: &str, key: &BlobKey) -> Result<Option<StoredBlob>> {
        let meta_path = self.meta_path(bucket, key);
        if !meta_path.exists() {
            return Ok(None);
        }

        let meta: ObjectMeta = config::load_json_file(&meta_path)?;
        let raw = fs::read(self.blob_path(bucket, key, meta.compressed))?;

        let data = if meta.compressed {
            let mut decoder = zstd::Decoder::new(raw.as_slice())?;
            let mut decompressed = Vec::with_capacity(meta.size);
            decoder
                .read_to_end(&mut decompressed)
                .context("Failed to decompress blob")?;
            decompressed
        } else {
            raw
        };

        Ok(Some(StoredBlob {
            data,
            content_type: meta.content_type,
        }))
    }
}

/// Write atomically (write to temp, then rename)
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, data)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to move blob into place at {}", path.display()))?;
    Ok(())
}

impl BlobSink for FileBlobSink {
    fn upload(&self, bucket: &str, key: &BlobKey, data: &[u8], content_type: &str) -> Result<()> {
        let compressed = self.compression_level.is_some();
        let path = self.blob_path(bucket, key, compressed);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let payload = match self.compression_level {
            Some(level) => zstd::encode_all(data, level).context("Failed to compress blob")?,
            None => data.to_vec(),
        };
        write_atomic(&path, &payload)?;

        // Drop a copy left behind in the other encoding
        let other = self.blob_path(bucket, key, !compressed);
        if other.exists() {
            fs::remove_file(&other)?;
        }

        let meta = ObjectMeta {
            content_type: content_type.to_string(),
            size: data.len(),
            compressed,
        };
        write_atomic(&self.meta_path(bucket, key), &serde_json::to_vec_pretty(&meta)?)?;

        Ok(())
    }
}
