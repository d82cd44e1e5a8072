#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;
use track_player::media::EngineCommand;
use track_player::{
    CacheEntry, CacheManager, CacheStore, DiskStore, FetchError, Fetcher, HandleManager, HeadlessEngine, MediaEngine,
    Player, Settings, StoreError, TrackRecord, Transport,
};

pub fn track(id: &str) -> TrackRecord {
    let mut track = TrackRecord::remote(id, format!("Track {id}"), format!("https://cdn.test/{id}.mp3"));
    track.artist = "Test Artist".into();
    track.duration = 180.0;
    track
}

pub fn remote_url(id: &str) -> String {
    format!("https://cdn.test/{id}.mp3")
}

/// Payload served for `locator` unless scripted otherwise.
pub fn payload_for(locator: &str) -> Bytes {
    Bytes::from(format!("ID3 audio of {locator}"))
}

/// Fetcher answering from a script, optionally held until released.
#[derive(Default)]
pub struct ScriptedFetcher {
    failures: Mutex<HashMap<String, (u16, usize)>>,
    calls: AtomicUsize,
    held: AtomicBool,
    entered: Notify,
    gate: Notify,
}

impl ScriptedFetcher {
    /// Fail the next `times` fetches of `locator` with `status`.
    pub fn fail(&self, locator: &str, status: u16, times: usize) {
        self.failures.lock().unwrap().insert(locator.to_string(), (status, times));
    }

    /// Block fetches until [`ScriptedFetcher::release`].
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.notify_waiters();
        self.gate.notify_one();
    }

    /// Resolves once a fetch has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        if self.held.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }

        let mut failures = self.failures.lock().unwrap();
        if let Some((status, remaining)) = failures.get_mut(locator) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FetchError::Status(*status));
            }
        }
        Ok(payload_for(locator))
    }
}

/// Disk store whose writes can be made to fail.
pub struct FlakyStore {
    inner: DiskStore,
    fail_puts: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: DiskStore) -> Self {
        Self {
            inner,
            fail_puts: AtomicBool::new(false),
        }
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn root(&self) -> &std::path::Path {
        self.inner.root()
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn put(&self, track: &TrackRecord, payload: Bytes) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                path: self.inner.root().to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.put(track, payload).await
    }

    async fn get_all(&self) -> Result<Vec<CacheEntry>, StoreError> {
        self.inner.get_all().await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }
}

/// A fully wired player over a temporary store and a headless engine.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<FlakyStore>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub handles: Arc<HandleManager>,
    pub engine: Arc<HeadlessEngine>,
    pub player: Player,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(|_| {}).await
    }

    pub async fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::open(dir, configure).await
    }

    /// Build a player over an existing cache directory.
    pub async fn open(dir: TempDir, configure: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = Settings::default();
        settings.cache.dir = dir.path().join("cache");
        settings.cache.fetch_attempts = 1;
        settings.cache.retry_delay_ms = 0;
        configure(&mut settings);

        let store = Arc::new(FlakyStore::new(DiskStore::new(settings.cache.dir.clone()).unwrap()));
        let fetcher = Arc::new(ScriptedFetcher::default());
        let handles = Arc::new(HandleManager::new());
        let engine = Arc::new(HeadlessEngine::new());

        let player = Player::new(
            settings,
            store.clone(),
            fetcher.clone(),
            handles.clone(),
            engine.clone() as Arc<dyn MediaEngine>,
        )
        .await
        .unwrap();

        Self {
            dir,
            store,
            fetcher,
            handles,
            engine,
            player,
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        self.player.cache()
    }

    pub fn transport(&self) -> &Arc<Transport> {
        self.player.transport()
    }

    /// Ticket of the most recent engine load.
    pub fn last_ticket(&self) -> u64 {
        self.engine
            .commands()
            .iter()
            .rev()
            .find_map(|c| match c {
                EngineCommand::Load { ticket, .. } => Some(*ticket),
                _ => None,
            })
            .expect("nothing loaded")
    }

    pub fn load_count(&self) -> usize {
        self.engine
            .commands()
            .iter()
            .filter(|c| matches!(c, EngineCommand::Load { .. }))
            .count()
    }
}
