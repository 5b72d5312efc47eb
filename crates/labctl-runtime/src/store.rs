//! Persistence of the split-view state across reloads.
//!
//! Backends only move strings ([`PersistenceStore`]); [`ViewStore`] owns the
//! JSON encoding and the expiry rule: an entry whose `expires_at` has passed,
//! or that no longer decodes, is cleared on load and never adopted.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use labctl_core::types::PersistedViewState;

use crate::error::StoreError;

pub trait PersistenceStore: Send + Sync {
    fn read(&self) -> Result<Option<String>, StoreError>;
    fn write(&self, contents: &str) -> Result<(), StoreError>;
    fn remove(&self) -> Result<(), StoreError>;
}

// ─── Backends ─────────────────────────────────────────────────────

/// JSON file; written via a temp file and rename.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl PersistenceStore for FileStore {
    fn read(&self) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, contents: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<String>>,
}

impl MemoryStore {
    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PersistenceStore for MemoryStore {
    fn read(&self) -> Result<Option<String>, StoreError> {
        Ok(self.slot().clone())
    }

    fn write(&self, contents: &str) -> Result<(), StoreError> {
        *self.slot() = Some(contents.to_owned());
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        *self.slot() = None;
        Ok(())
    }
}

// ─── Typed view ───────────────────────────────────────────────────

pub struct ViewStore {
    backend: Box<dyn PersistenceStore>,
}

impl ViewStore {
    pub fn new(backend: impl PersistenceStore + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    pub fn save(&self, state: &PersistedViewState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)?;
        self.backend.write(&json)
    }

    /// Load the entry if it is still valid at `now`; stale entries are cleared.
    pub fn load(&self, now: DateTime<Utc>) -> Option<PersistedViewState> {
        let raw = match self.backend.read() {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("failed to read view state: {e}");
                return None;
            }
        };
        let state = match serde_json::from_str::<PersistedViewState>(&raw) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("discarding corrupt view state: {e}");
                self.clear();
                return None;
            }
        };
        if state.is_expired(now) {
            tracing::info!(session_id = %state.session_id, "discarding expired view state");
            self.clear();
            return None;
        }
        Some(state)
    }

    /// Remove the entry; failures are logged, never fatal.
    pub fn clear(&self) {
        if let Err(e) = self.backend.remove() {
            tracing::warn!("failed to clear view state: {e}");
        }
    }
}
