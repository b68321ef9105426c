//! Per-identity mutual exclusion for reconciliation passes

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One mutex per mailbox identity, created on first use
///
/// Passes for the same mailbox run one at a time so the cursor
/// read-then-write cannot interleave; different mailboxes don't contend.
#[derive(Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `identity` (addresses compare case-insensitively)
    pub fn lock_for(&self, identity: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(identity.to_ascii_lowercase())
            .or_default()
            .clone()
    }
}
