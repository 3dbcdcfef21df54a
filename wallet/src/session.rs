//! Session persistence
//!
//! The signed-in address is kept in two key-value stores: a durable one (a
//! JSON file under the data directory) and a volatile per-process one. Reads
//! prefer the durable store and fall back to the volatile one; writes go to
//! both. Once a durable write or delete of a key fails, the volatile copy of
//! that key is authoritative until a durable write succeeds again. Store
//! failures are logged and never surface to callers.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use displaydoc::Display;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};

const SESSION_KEY: &str = "session";
const PENDING_KEY: &str = "pending_payload";
const SESSION_FILE: &str = "session.json";

/// Error from a key-value store.
#[derive(Debug, Display, Error)]
pub enum StoreError {
    /// I/O error: {0}
    Io(#[from] std::io::Error),

    /// Corrupt store contents: {0}
    Corrupt(#[from] serde_json::Error),
}

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Per-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// Writes go to a temp file that is renamed over the original, so a crash
/// never leaves a half-written file. On unix the file is only readable by
/// its owner.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let temp_path = self.path.with_extension("tmp");

        #[cfg(unix)]
        {
            use std::{io::Write, os::unix::fs::OpenOptionsExt};
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&temp_path, json)?;
        }

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut entries = self.read_all()?;
        f(&mut entries);
        self.write_all(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// A signed-in wallet holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub address: String,
    pub issued_at: DateTime<Utc>,
}

/// Durable-with-fallback session storage.
pub struct SessionStore {
    durable: Box<dyn KeyValueStore>,
    volatile: Box<dyn KeyValueStore>,
    /// Keys whose durable copy missed the latest write or delete
    stale_durable: Mutex<HashSet<String>>,
    max_age: ChronoDuration,
}

impl SessionStore {
    pub fn new(
        durable: Box<dyn KeyValueStore>,
        volatile: Box<dyn KeyValueStore>,
        max_age: Duration,
    ) -> Self {
        Self {
            durable,
            volatile,
            stale_durable: Mutex::new(HashSet::new()),
            max_age: ChronoDuration::from_std(max_age)
                .unwrap_or_else(|_| ChronoDuration::days(36_500)),
        }
    }

    /// File-backed store under `data_dir`, with an in-memory fallback.
    pub fn open(data_dir: &Path, max_age: Duration) -> Self {
        Self::new(
            Box::new(FileStore::new(data_dir.join(SESSION_FILE))),
            Box::new(MemoryStore::new()),
            max_age,
        )
    }

    /// Two in-memory stores; nothing outlives the process.
    pub fn in_memory(max_age: Duration) -> Self {
        Self::new(
            Box::new(MemoryStore::new()),
            Box::new(MemoryStore::new()),
            max_age,
        )
    }

    pub fn save(&self, address: &str) {
        self.save_at(address, Utc::now());
    }

    pub fn save_at(&self, address: &str, issued_at: DateTime<Utc>) {
        let session = Session {
            address: address.to_string(),
            issued_at,
        };
        match serde_json::to_string(&session) {
            Ok(json) => self.write(SESSION_KEY, &json),
            Err(e) => warn!("Persistence degraded: cannot encode session: {}", e),
        }
    }

    /// Address of a session that is still within the max-age window.
    pub fn load(&self) -> Option<String> {
        self.load_at(Utc::now())
    }

    pub fn load_at(&self, now: DateTime<Utc>) -> Option<String> {
        self.load_session_at(now).map(|s| s.address)
    }

    pub fn load_session_at(&self, now: DateTime<Utc>) -> Option<Session> {
        let json = self.read(SESSION_KEY)?;
        let session: Session = match serde_json::from_str(&json) {
            Ok(session) => session,
            Err(e) => {
                warn!("Discarding unreadable session: {}", e);
                self.delete(SESSION_KEY);
                return None;
            }
        };

        if now.signed_duration_since(session.issued_at) > self.max_age {
            debug!("Session for {} expired", session.address);
            self.delete(SESSION_KEY);
            return None;
        }
        Some(session)
    }

    pub fn clear(&self) {
        self.delete(SESSION_KEY);
    }

    /// Remember a sign request that may still complete after a restart.
    pub fn save_pending(&self, payload_id: &str) {
        self.write(PENDING_KEY, payload_id);
    }

    pub fn load_pending(&self) -> Option<String> {
        self.read(PENDING_KEY)
    }

    pub fn clear_pending(&self) {
        self.delete(PENDING_KEY);
    }

    fn read(&self, key: &str) -> Option<String> {
        let durable_current = !self.stale_durable.lock().contains(key);
        if durable_current {
            match self.durable.get(key) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(e) => warn!("Persistence degraded: durable read of {} failed: {}", key, e),
            }
        }
        match self.volatile.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Persistence degraded: volatile read of {} failed: {}", key, e);
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        let result = self.durable.set(key, value);
        self.track_durable(key, "write", result);
        if let Err(e) = self.volatile.set(key, value) {
            warn!("Persistence degraded: volatile write of {} failed: {}", key, e);
        }
    }

    fn delete(&self, key: &str) {
        let result = self.durable.remove(key);
        self.track_durable(key, "delete", result);
        if let Err(e) = self.volatile.remove(key) {
            warn!("Persistence degraded: volatile delete of {} failed: {}", key, e);
        }
    }

    fn track_durable(&self, key: &str, op: &str, result: Result<(), StoreError>) {
        let mut stale = self.stale_durable.lock();
        match result {
            Ok(()) => {
                stale.remove(key);
            }
            Err(e) => {
                warn!("Persistence degraded: durable {} of {} failed: {}", op, key, e);
                stale.insert(key.to_string());
            }
        }
    }
}
