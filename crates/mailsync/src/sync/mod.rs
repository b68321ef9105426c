//! Sync engine for incremental mailbox reconciliation
//!
//! Provides idempotent passes that can be safely retried: uploads overwrite
//! by key and the cursor only ever moves forward.

mod extract;
mod locks;
mod reconcile;

pub use extract::{AttachmentExtractor, AttachmentRef, AttachmentSource, attachment_refs};
pub use locks::IdentityLocks;
pub use reconcile::{
    HistoryReconciler, PassOutcome, PassReport, ReconcileOptions, matching_messages,
};
