//! Cache lifecycle: downloads, local imports, eviction and the materialized library.
//!
//! Every successful mutation of the store is followed by a full library
//! reload, which re-materializes a handle per entry and releases the previous
//! generation, and then by a [`CacheChange`] notification to every registered
//! [`CacheListener`].

use crate::config::CacheSettings;
use crate::error::{CacheError, CacheResult, FetchError, StoreError};
use crate::fetch::Fetcher;
use crate::format::{title_from_name, AudioFormat};
use crate::handles::{Handle, HandleManager};
use crate::store::CacheStore;
use crate::track::{TrackRecord, TrackSource, LOCAL_ID_PREFIX};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

/// A track in the offline library.
#[derive(Debug, Clone)]
pub struct LibraryTrack {
    pub record: TrackRecord,
    /// `None` when the payload could not be materialized.
    pub handle: Option<Handle>,
    pub size: u64,
    pub saved_at: DateTime<Utc>,
}

impl LibraryTrack {
    pub fn is_playable(&self) -> bool {
        self.handle.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheChangeKind {
    Downloaded,
    Imported,
    Evicted,
}

/// A successful mutation of the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheChange {
    pub track_id: String,
    pub kind: CacheChangeKind,
}

/// Events for observers such as a UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    DownloadStarted(String),
    DownloadFinished { id: String, ok: bool },
    LibraryChanged(CacheChange),
}

/// Receives every successful cache mutation, after the library reload.
#[async_trait]
pub trait CacheListener: Send + Sync {
    async fn cache_changed(&self, change: &CacheChange);
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub item_count: usize,
    pub total_bytes: u64,
}

/// Holds the id of the single in-flight download and frees the slot on drop.
struct DownloadSlot<'a> {
    slot: &'a StdMutex<Option<String>>,
}

impl Drop for DownloadSlot<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    handles: Arc<HandleManager>,
    library: RwLock<Vec<LibraryTrack>>,
    /// Serializes reloads so an older generation never replaces a newer one.
    reload_lock: Mutex<()>,
    downloading: StdMutex<Option<String>>,
    listeners: StdMutex<Vec<Weak<dyn CacheListener>>>,
    events: broadcast::Sender<CacheEvent>,
    fetch_attempts: u32,
    retry_delay: Duration,
    default_cover_url: Option<String>,
}

impl CacheManager {
    /// Create a manager. Call [`CacheManager::reload`] once to load the library.
    pub fn new(
        settings: &CacheSettings,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        handles: Arc<HandleManager>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            fetcher,
            handles,
            library: RwLock::new(Vec::new()),
            reload_lock: Mutex::new(()),
            downloading: StdMutex::new(None),
            listeners: StdMutex::new(Vec::new()),
            events,
            fetch_attempts: settings.fetch_attempts.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            default_cover_url: settings.default_cover_url.clone(),
        }
    }

    pub fn handles(&self) -> &Arc<HandleManager> {
        &self.handles
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Register a listener. Only a weak reference is kept.
    pub fn add_listener<L: CacheListener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<L> = Arc::downgrade(listener);
        let weak: Weak<dyn CacheListener> = weak;
        lock(&self.listeners).push(weak);
    }

    /// Id of the download holding the slot, if any.
    pub fn current_download(&self) -> Option<String> {
        lock(&self.downloading).clone()
    }

    pub async fn is_cached(&self, id: &str) -> bool {
        self.library.read().await.iter().any(|t| t.record.id == id)
    }

    /// Live handle for a cached, playable track.
    pub async fn cached_handle(&self, id: &str) -> Option<Handle> {
        self.library
            .read()
            .await
            .iter()
            .find(|t| t.record.id == id)
            .and_then(|t| t.handle.clone())
    }

    pub async fn library(&self) -> Vec<LibraryTrack> {
        self.library.read().await.clone()
    }

    pub async fn stats(&self) -> CacheStats {
        let library = self.library.read().await;
        CacheStats {
            item_count: library.len(),
            total_bytes: library.iter().map(|t| t.size).sum(),
        }
    }

    /// Download a remote track into the cache.
    ///
    /// Only one download runs at a time; any other request fails with
    /// [`CacheError::DownloadBusy`] while the slot is held. A failed download
    /// leaves the store untouched.
    pub async fn download(&self, track: &TrackRecord) -> CacheResult<()> {
        let Some(locator) = track.audio_locator() else {
            return Err(CacheError::MissingLocator(track.id.clone()));
        };
        let slot = self.acquire_slot(&track.id)?;

        tracing::info!("Downloading {} from {}", track.id, locator);
        let _ = self.events.send(CacheEvent::DownloadStarted(track.id.clone()));

        let result = self.fetch_and_store(track, locator).await;
        drop(slot);
        let _ = self.events.send(CacheEvent::DownloadFinished {
            id: track.id.clone(),
            ok: result.is_ok(),
        });

        if let Err(e) = result {
            tracing::warn!("Download of {} failed: {}", track.id, e);
            return Err(e);
        }

        tracing::info!("Downloaded {}", track.id);
        self.reload().await?;
        self.notify(CacheChange {
            track_id: track.id.clone(),
            kind: CacheChangeKind::Downloaded,
        })
        .await;
        Ok(())
    }

    /// Import an audio file straight into the cache under a fresh local id.
    pub async fn import_local(&self, bytes: Bytes, name: &str) -> CacheResult<TrackRecord> {
        let Some(format) = AudioFormat::detect(name, &bytes) else {
            tracing::warn!("Rejected import of {}: only MP3/WAV are supported", name);
            return Err(CacheError::UnsupportedFormat(name.to_string()));
        };
        if bytes.is_empty() {
            return Err(CacheError::UnsupportedFormat(format!("{name} is empty")));
        }

        let record = TrackRecord {
            id: format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4()),
            title: title_from_name(name),
            artist: "Local Upload".into(),
            album: "My Uploads".into(),
            duration: 0.0,
            genre: "Custom".into(),
            cover_url: self.default_cover_url.clone(),
            audio_url: None,
            source: TrackSource::LocalImport,
        };

        self.store
            .put(&record, bytes)
            .await
            .map_err(|source| CacheError::CacheWrite {
                id: record.id.clone(),
                source,
            })?;
        tracing::info!("Imported {} ({}) as {}", name, format.extension(), record.id);

        self.reload().await?;
        self.notify(CacheChange {
            track_id: record.id.clone(),
            kind: CacheChangeKind::Imported,
        })
        .await;
        Ok(record)
    }

    /// Read a file from disk and import it.
    pub async fn import_file(&self, path: &Path) -> CacheResult<TrackRecord> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CacheError::Store(StoreError::io(path, e)))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("import");
        self.import_local(Bytes::from(bytes), name).await
    }

    /// Remove a track from the cache. Evicting an absent track is a no-op.
    pub async fn evict(&self, id: &str) -> CacheResult<()> {
        let existing = self
            .library
            .read()
            .await
            .iter()
            .find(|t| t.record.id == id)
            .map(|t| t.handle.clone());

        self.store.delete(id).await?;
        if let Some(Some(handle)) = &existing {
            self.handles.release(handle);
        }
        self.reload().await?;

        if existing.is_some() {
            tracing::info!("Evicted {}", id);
            self.notify(CacheChange {
                track_id: id.to_string(),
                kind: CacheChangeKind::Evicted,
            })
            .await;
        }
        Ok(())
    }

    /// Evict when cached, download otherwise. Rejected while any download runs.
    pub async fn toggle_offline(&self, track: &TrackRecord) -> CacheResult<CacheChangeKind> {
        if let Some(busy) = self.current_download() {
            return Err(CacheError::DownloadBusy(busy));
        }
        if self.is_cached(&track.id).await {
            self.evict(&track.id).await?;
            Ok(CacheChangeKind::Evicted)
        } else {
            self.download(track).await?;
            Ok(CacheChangeKind::Downloaded)
        }
    }

    /// Rebuild the library from the store.
    ///
    /// Materializes one handle per entry, swaps the new generation in and
    /// releases every handle of the previous one. Entries whose payload cannot
    /// be materialized stay listed but unplayable.
    pub async fn reload(&self) -> CacheResult<()> {
        let _serial = self.reload_lock.lock().await;

        let entries = self.store.get_all().await?;
        let mut next = Vec::with_capacity(entries.len());
        for entry in &entries {
            let handle = match self.handles.materialize(entry) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!("{}; track stays unplayable", e);
                    None
                }
            };
            next.push(LibraryTrack {
                record: entry.record.clone(),
                handle,
                size: entry.payload.len() as u64,
                saved_at: entry.saved_at,
            });
        }
        next.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));

        let count = next.len();
        let previous = std::mem::replace(&mut *self.library.write().await, next);
        for handle in previous.iter().filter_map(|t| t.handle.as_ref()) {
            self.handles.release(handle);
        }

        tracing::debug!(
            "Library reloaded: {} tracks, {} live handles",
            count,
            self.handles.live_count()
        );
        Ok(())
    }

    fn acquire_slot(&self, id: &str) -> CacheResult<DownloadSlot<'_>> {
        let mut current = lock(&self.downloading);
        if let Some(busy) = current.as_ref() {
            tracing::debug!("Rejected download of {}: {} in progress", id, busy);
            return Err(CacheError::DownloadBusy(busy.clone()));
        }
        *current = Some(id.to_string());
        Ok(DownloadSlot {
            slot: &self.downloading,
        })
    }

    async fn fetch_and_store(&self, track: &TrackRecord, locator: &str) -> CacheResult<()> {
        let payload = self
            .fetch_with_retry(locator)
            .await
            .map_err(|source| CacheError::DownloadFetch {
                id: track.id.clone(),
                source,
            })?;

        self.store
            .put(track, payload)
            .await
            .map_err(|source| CacheError::CacheWrite {
                id: track.id.clone(),
                source,
            })
    }

    async fn fetch_with_retry(&self, locator: &str) -> Result<Bytes, FetchError> {
        let mut attempt = 1;
        loop {
            let result = match self.fetcher.fetch(locator).await {
                Ok(bytes) if bytes.is_empty() => Err(FetchError::EmptyBody),
                other => other,
            };
            match result {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < self.fetch_attempts => {
                    tracing::warn!(
                        "Fetch attempt {}/{} for {} failed: {}",
                        attempt,
                        self.fetch_attempts,
                        locator,
                        e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn notify(&self, change: CacheChange) {
        let _ = self.events.send(CacheEvent::LibraryChanged(change.clone()));

        let listeners: Vec<Arc<dyn CacheListener>> = {
            let mut listeners = lock(&self.listeners);
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.cache_changed(&change).await;
        }
    }
}
