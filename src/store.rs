//! Durable storage for presets and command history.
//!
//! ## Design
//! - `KeyValueStore`: raw string blobs by key. Injected, so the session and
//!   preset manager never touch a concrete backend.
//! - `PersistenceStore`: typed JSON arrays on top of any backend. Reads of
//!   absent or malformed keys yield an empty collection; write failures are
//!   logged and swallowed. Nothing here is ever fatal.
//!
//! Backends: `MemoryStore` (tests, `--storage memory`), `FileStore` (one
//! `<key>.json` per key), `SqliteStore` (single `kv` table).

use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::{HubError, Result};

/// Key holding the JSON `Preset[]` array.
pub const PRESETS_KEY: &str = "mcp-client-presets";
/// Key holding the JSON `string[]` history array.
pub const HISTORY_KEY: &str = "mcp-client-history";

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// A synchronous string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key with raw content, bypassing serialization.
    pub fn with_raw(self, key: &str, value: &str) -> Self {
        if let Ok(mut map) = self.entries.lock() {
            map.insert(key.to_string(), value.to_string());
        }
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self
            .entries
            .lock()
            .map_err(|_| HubError::Storage("memory store lock poisoned".into()))?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self
            .entries
            .lock()
            .map_err(|_| HubError::Storage("memory store lock poisoned".into()))?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        // Write-then-rename so a crash never leaves a half-written array.
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, self.path_for(key))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| HubError::Storage("sqlite connection lock poisoned".into()))?;
        let result = conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        });
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| HubError::Storage("sqlite connection lock poisoned".into()))?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PersistenceStore
// ---------------------------------------------------------------------------

/// Typed, failure-tolerant access to JSON arrays in a `KeyValueStore`.
#[derive(Clone)]
pub struct PersistenceStore {
    backend: Arc<dyn KeyValueStore>,
}

impl PersistenceStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Load the array stored under `key`. Absent, unreadable or malformed
    /// content all yield an empty vector.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key, error = %e, "failed to read stored collection");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<T>>(&raw) {
            Ok(items) => {
                debug!(key, count = items.len(), "loaded stored collection");
                items
            }
            Err(e) => {
                warn!(key, error = %e, "stored collection is malformed; starting empty");
                Vec::new()
            }
        }
    }

    /// Serialize `items` under `key`. Returns whether the write landed; a
    /// failure is logged and otherwise ignored.
    pub fn save<T: Serialize>(&self, key: &str, items: &[T]) -> bool {
        let json = match serde_json::to_string(items) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize collection");
                return false;
            }
        };
        match self.backend.set(key, &json) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "failed to save collection");
                false
            }
        }
    }
}

impl std::fmt::Debug for PersistenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceStore").finish_non_exhaustive()
    }
}
