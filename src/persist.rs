//! Local snapshot persistence
//!
//! The ledger is saved as one versionless JSON document in a key/value table.

use crate::ledger::LedgerSnapshot;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Key the ledger snapshot is stored under
pub const SNAPSHOT_KEY: &str = "sensechat-messages";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Snapshot is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Where ledger snapshots live between runs
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing (or an empty value) was saved
    fn load(&self) -> StoreResult<Option<LedgerSnapshot>>;

    fn save(&self, snapshot: &LedgerSnapshot) -> StoreResult<()>;
}

impl<T: SnapshotStore + ?Sized> SnapshotStore for Arc<T> {
    fn load(&self) -> StoreResult<Option<LedgerSnapshot>> {
        (**self).load()
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> StoreResult<()> {
        (**self).save(snapshot)
    }
}

fn decode(raw: &str) -> StoreResult<Option<LedgerSnapshot>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(raw)?))
}

/// `SQLite`-backed store
#[derive(Clone)]
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    /// Open or create the database, creating parent directories as needed
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw stored value, used by tests and diagnostics
    pub fn raw(&self) -> StoreResult<Option<String>> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![SNAPSHOT_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn put_raw(&self, value: &str) -> StoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![SNAPSHOT_KEY, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn load(&self) -> StoreResult<Option<LedgerSnapshot>> {
        match self.raw()? {
            Some(raw) => decode(&raw),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> StoreResult<()> {
        self.put_raw(&serde_json::to_string(snapshot)?)
    }
}

/// In-process store, for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    value: Mutex<Option<String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(raw.into())),
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> StoreResult<Option<LedgerSnapshot>> {
        let value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        match value.as_deref() {
            Some(raw) => decode(raw),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> StoreResult<()> {
        let raw = serde_json::to_string(snapshot)?;
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::message::{ConversationKey, Message};
    use chrono::{TimeZone, Utc};

    fn sample_snapshot() -> LedgerSnapshot {
        let key = ConversationKey::new("user_1", "user_2");
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut ledger = Ledger::new();
        ledger.open(key.clone());
        ledger.record_sent(&key, Message::sent("m1", "user_1", "hello", Some("greeting".into()), at));
        ledger.record_received(&key, Message::received("m2", "user_2", "hi", None, at));
        ledger.snapshot()
    }

    #[test]
    fn test_missing_and_empty_values_load_as_none() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        assert!(store.load().unwrap().is_none());

        store.put_raw("").unwrap();
        assert!(store.load().unwrap().is_none());

        store.put_raw("{}").unwrap();
        assert_eq!(store.load().unwrap(), Some(LedgerSnapshot::default()));
    }

    #[test]
    fn test_corrupt_value_is_an_error() {
        let store = MemorySnapshotStore::with_raw("{not json");
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let snapshot = sample_snapshot();

        {
            let store = SqliteSnapshotStore::open(&path).unwrap();
            store.save(&snapshot).unwrap();
            store.save(&snapshot).unwrap();
        }

        let store = SqliteSnapshotStore::open(&path).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        let ledger = Ledger::from_snapshot(loaded);
        let key = ConversationKey::new("user_2", "user_1");
        assert_eq!(ledger.conversation(&key).len(), 2);
        assert_eq!(ledger.view().len(), 2);
    }

    #[test]
    fn test_snapshot_uses_string_keys() {
        let raw = serde_json::to_string(&sample_snapshot()).unwrap();
        assert!(raw.contains(r#""user_1:user_2""#));
    }
}
