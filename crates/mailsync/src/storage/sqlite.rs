//! SQLite-backed cursor storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::traits::CursorStore;
use crate::models::{CursorState, HistoryCursor};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Last reconciled history position per mailbox
            CREATE TABLE cursors (
                identity TEXT PRIMARY KEY,
                history_id INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        ),
    ])
}

/// SQLite-based cursor store
///
/// The upsert only replaces a row when the new history ID is larger, so the
/// stored cursor is monotonic even if two writers race.
pub struct SqliteCursorStore {
    conn: Mutex<Connection>,
}

impl SqliteCursorStore {
    /// Open (or create) the cursor database at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL keeps readers unblocked during the single-row writes; NORMAL
        // sync is durable across process crashes in WAL mode.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Cursor database lock poisoned"))
    }

    fn load(conn: &Connection, identity: &str) -> Result<Option<CursorState>> {
        let row: Option<(String, i64, String)> = conn
            .query_row(
                "SELECT identity, history_id, updated_at FROM cursors WHERE identity = ?",
                [identity],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((identity, history_id, updated_at_str)) = row else {
            return Ok(None);
        };

        let history_id = u64::try_from(history_id)
            .with_context(|| format!("Stored history ID {} is negative", history_id))?;

        let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now());

        Ok(Some(CursorState {
            identity,
            history_id: HistoryCursor(history_id),
            updated_at,
        }))
    }
}

impl CursorStore for SqliteCursorStore {
    fn get(&self, identity: &str) -> Result<Option<CursorState>> {
        let conn = self.conn()?;
        Self::load(&conn, identity)
    }

    fn set(&self, identity: &str, cursor: HistoryCursor) -> Result<CursorState> {
        let conn = self.conn()?;

        let history_id = i64::try_from(cursor.value())
            .with_context(|| format!("History ID {} does not fit in SQLite INTEGER", cursor))?;

        conn.execute(
            "INSERT INTO cursors (identity, history_id, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(identity) DO UPDATE SET
                 history_id = excluded.history_id,
                 updated_at = excluded.updated_at
             WHERE excluded.history_id > cursors.history_id",
            params![identity, history_id, chrono::Utc::now().to_rfc3339()],
        )?;

        Self::load(&conn, identity)?
            .with_context(|| format!("Cursor for {} missing after write", identity))
    }

    fn delete(&self, identity: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM cursors WHERE identity = ?", [identity])?;
        Ok(())
    }
}
