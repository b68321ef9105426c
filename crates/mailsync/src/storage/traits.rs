//! Storage trait definitions

use crate::models::{CursorState, HistoryCursor};
use anyhow::Result;

/// Durable per-mailbox history cursor
///
/// Implementations must make `set` monotonic: writing a value at or below
/// the stored one leaves the store unchanged, so a late or replayed pass can
/// never move the cursor backwards.
pub trait CursorStore: Send + Sync {
    /// Get the cursor for a mailbox identity
    fn get(&self, identity: &str) -> Result<Option<CursorState>>;

    /// Persist a new cursor value (no-op unless it moves forward)
    ///
    /// Returns the state held after the write.
    fn set(&self, identity: &str, cursor: HistoryCursor) -> Result<CursorState>;

    /// Forget the cursor for a mailbox identity
    fn delete(&self, identity: &str) -> Result<()>;
}
