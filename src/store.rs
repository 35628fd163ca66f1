//! SQLite-backed preference store and interaction log.
//!
//! The database lives at `~/.inboxdaemon/assistant.db`. Two tables:
//! `preferences` is an upsert-only key/value map of learned user
//! preferences (tone, verbosity, greeting style); `interactions` is an
//! append-only per-sender log consumed as read-only prompt context.
//! Rows are never updated or deleted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::InteractionRecord;

/// SQLite connection wrapper for preferences and interaction history.
///
/// Intentionally NOT `Clone` or `Sync`; the workflow touches it only from
/// the single-threaded batch path, so no internal locking is needed.
pub struct PreferenceStore {
    conn: Connection,
}

impl PreferenceStore {
    /// Open (and initialize) the store at the default location.
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(Self::default_path()?)
    }

    /// Open (and initialize) the store at an explicit path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn default_path() -> Result<PathBuf, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::HomeDirNotFound)?;
        Ok(home.join(".inboxdaemon").join("assistant.db"))
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS preferences (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS interactions (
                id         TEXT PRIMARY KEY,
                sender     TEXT NOT NULL,
                subject    TEXT NOT NULL,
                thread_id  TEXT NOT NULL,
                action     TEXT NOT NULL,
                reply      TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_interactions_sender
                ON interactions (sender, created_at DESC);",
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    /// Upsert one learned preference. Overwrites, never appends.
    pub fn set_preference(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        debug!(key, value, "preference updated");
        Ok(())
    }

    pub fn get_preference(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM preferences WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// All preferences as (key, value) pairs, for prompt injection.
    pub fn all_preferences(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM preferences ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ------------------------------------------------------------------
    // Interaction log
    // ------------------------------------------------------------------

    /// Append one completed-email record. Written once per terminal state.
    pub fn record_interaction(
        &self,
        sender: &str,
        subject: &str,
        thread_id: &str,
        action: &str,
        reply_text: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO interactions (id, sender, subject, thread_id, action, reply, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                sender,
                subject,
                thread_id,
                action,
                reply_text,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// The most recent interactions with a sender, newest first.
    pub fn history_for(
        &self,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT sender, subject, thread_id, action, reply, created_at
             FROM interactions WHERE sender = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![sender, limit as i64], |row| {
            let created_at: String = row.get(5)?;
            Ok(InteractionRecord {
                sender: row.get(0)?,
                subject: row.get(1)?,
                thread_id: row.get(2)?,
                action: row.get(3)?,
                reply_text: row.get(4)?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_upsert_overwrites() {
        let store = PreferenceStore::open_in_memory().unwrap();
        store.set_preference("tone", "formal").unwrap();
        store.set_preference("tone", "casual").unwrap();
        assert_eq!(store.get_preference("tone").unwrap().as_deref(), Some("casual"));
        assert_eq!(store.all_preferences().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_preference_is_none() {
        let store = PreferenceStore::open_in_memory().unwrap();
        assert!(store.get_preference("greeting").unwrap().is_none());
    }

    #[test]
    fn test_history_is_per_sender_and_bounded() {
        let store = PreferenceStore::open_in_memory().unwrap();
        for i in 0..4 {
            store
                .record_interaction(
                    "a@x.com",
                    &format!("subject {i}"),
                    "t1",
                    "replied",
                    Some("thanks"),
                )
                .unwrap();
        }
        store
            .record_interaction("b@y.com", "other", "t2", "ignored", None)
            .unwrap();

        let history = store.history_for("a@x.com", 3).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|r| r.sender == "a@x.com"));

        let other = store.history_for("b@y.com", 10).unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].action, "ignored");
        assert!(other[0].reply_text.is_none());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("assistant.db");
        let store = PreferenceStore::open(&path).unwrap();
        store.set_preference("k", "v").unwrap();
        assert!(path.exists());
    }
}
