//! Process-local handles that make cached payloads addressable by the media engine.
//!
//! A handle is an opaque `mem://` locator backed by an in-memory registry.
//! Handles are never persisted; the library recreates them on every reload and
//! releases the previous generation.

use crate::error::HandleError;
use crate::store::{checksum, CacheEntry};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const HANDLE_SCHEME: &str = "mem://handle/";

/// A playable reference to a materialized cache payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    key: u64,
    track_id: String,
}

impl Handle {
    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    /// Locator the media engine resolves through [`HandleManager::resolve`].
    pub fn locator(&self) -> String {
        format!("{}{}", HANDLE_SCHEME, self.key)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} ({})", HANDLE_SCHEME, self.key, self.track_id)
    }
}

/// Allocates and frees handles.
#[derive(Debug, Default)]
pub struct HandleManager {
    next_key: AtomicU64,
    live: Mutex<HashMap<u64, Bytes>>,
}

impl HandleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle for the entry's payload.
    ///
    /// Fails only when the payload is empty or no longer matches the checksum
    /// recorded when it was stored.
    pub fn materialize(&self, entry: &CacheEntry) -> Result<Handle, HandleError> {
        let id = &entry.record.id;
        if entry.payload.is_empty() {
            return Err(HandleError::EmptyPayload(id.clone()));
        }
        if checksum(&entry.payload) != entry.checksum {
            return Err(HandleError::ChecksumMismatch(id.clone()));
        }

        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.registry().insert(key, entry.payload.clone());
        let handle = Handle {
            key,
            track_id: id.clone(),
        };
        tracing::debug!("Materialized {}", handle);
        Ok(handle)
    }

    /// Free a handle. Releasing twice is a no-op.
    pub fn release(&self, handle: &Handle) {
        if self.registry().remove(&handle.key).is_some() {
            tracing::debug!("Released {}", handle);
        }
    }

    /// Payload behind a `mem://handle/` locator, if the handle is still live.
    pub fn resolve(&self, locator: &str) -> Option<Bytes> {
        let key = locator.strip_prefix(HANDLE_SCHEME)?.parse::<u64>().ok()?;
        self.registry().get(&key).cloned()
    }

    pub fn is_live(&self, handle: &Handle) -> bool {
        self.registry().contains_key(&handle.key)
    }

    /// Number of handles not yet released.
    pub fn live_count(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Bytes>> {
        // The map holds no invariants a panicking holder could break.
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
