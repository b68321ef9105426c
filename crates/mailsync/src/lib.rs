//! Mailsync crate - Incremental mailbox sync for push-driven services
//!
//! This crate provides the core of the attachment sync service:
//! - Domain models (HistoryCursor, Notification, MessageDetail)
//! - Gmail API client with service-account delegation
//! - Cursor stores and blob sinks
//! - History reconciliation engine
//! - Push envelope handling and watch lifecycle
//!
//! Everything here is synchronous; the HTTP front end runs passes on a
//! blocking thread.

pub mod config;
pub mod error;
pub mod gmail;
pub mod models;
pub mod push;
pub mod storage;
pub mod sync;

pub use crate::config::{BlobBackend, ServiceConfig};
pub use error::{SyncError, SyncResult};
pub use gmail::{
    GmailClient, HistoryExpiredError, MailboxApi, ServiceAccountAuth, ServiceAccountKey,
    TokenSource,
};
pub use models::{
    ChangeKind, ChangeRecord, CursorState, HistoryCursor, HistoryDelta, MessageDetail, MessageId,
    MessagePart, Notification, PartBody, WatchRegistration,
};
pub use push::{Acknowledgement, NotificationReceiver, SubscriptionManager, decode_envelope};
pub use storage::{
    BlobKey, BlobSink, CursorStore, FileBlobSink, GcsBlobSink, InMemoryBlobSink,
    InMemoryCursorStore, SqliteCursorStore, sanitize_filename,
};
pub use sync::{
    AttachmentExtractor, AttachmentRef, AttachmentSource, HistoryReconciler, PassOutcome,
    PassReport, ReconcileOptions,
};
