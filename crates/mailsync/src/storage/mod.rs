//! Storage traits and implementations
//!
//! This module defines the storage abstraction layer for sync state and
//! attachment payloads. The trait-based design allows swapping between
//! in-memory, local and cloud implementations.

mod blob;
mod blob_file;
mod gcs;
mod memory;
mod sqlite;
mod traits;

pub use blob::{
    BlobKey, BlobSink, DEFAULT_CONTENT_TYPE, InMemoryBlobSink, StoredBlob, sanitize_filename,
};
pub use blob_file::FileBlobSink;
pub use gcs::GcsBlobSink;
pub use memory::InMemoryCursorStore;
pub use sqlite::SqliteCursorStore;
pub use traits::CursorStore;
