//! In-memory storage implementation
//!
//! Used by tests and for local runs that don't need state across restarts.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;

use super::CursorStore;
use crate::models::{CursorState, HistoryCursor};

/// In-memory implementation of CursorStore
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<String, CursorState>>,
}

impl InMemoryCursorStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            cursors: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCursorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorStore for InMemoryCursorStore {
    fn get(&self, identity: &str) -> Result<Option<CursorState>> {
        let cursors = self
            .cursors
            .read()
            .map_err(|_| anyhow::anyhow!("Cursor map lock poisoned"))?;
        Ok(cursors.get(identity).cloned())
    }

    fn set(&self, identity: &str, cursor: HistoryCursor) -> Result<CursorState> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| anyhow::anyhow!("Cursor map lock poisoned"))?;

        let state = match cursors.remove(identity) {
            Some(existing) => existing.advanced(cursor),
            None => CursorState::new(identity, cursor),
        };
        cursors.insert(identity.to_string(), state.clone());
        Ok(state)
    }

    fn delete(&self, identity: &str) -> Result<()> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| anyhow::anyhow!("Cursor map lock poisoned"))?;
        cursors.remove(identity);
        Ok(())
    }
}
