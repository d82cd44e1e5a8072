//! The assembled player: queue, cache lifecycle and transport wired together.

use crate::cache::CacheManager;
use crate::catalog::CatalogEvent;
use crate::config::Settings;
use crate::error::CacheResult;
use crate::fetch::Fetcher;
use crate::handles::HandleManager;
use crate::media::MediaEngine;
use crate::queue::Queue;
use crate::store::CacheStore;
use crate::track::TrackRecord;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct Player {
    settings: Settings,
    queue: Arc<RwLock<Queue>>,
    cache: Arc<CacheManager>,
    transport: Arc<Transport>,
}

impl Player {
    /// Build every component from explicit settings and collaborators, then
    /// load the offline library.
    pub async fn new(
        settings: Settings,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        handles: Arc<HandleManager>,
        engine: Arc<dyn MediaEngine>,
    ) -> CacheResult<Self> {
        let queue = Arc::new(RwLock::new(Queue::new(settings.playback.shuffle_excludes_current)));
        let cache = Arc::new(CacheManager::new(&settings.cache, store, fetcher, handles));
        cache.reload().await?;
        let transport = Transport::new(&settings.playback, engine, cache.clone(), queue.clone());

        let stats = cache.stats().await;
        tracing::info!(
            "Offline library: {} tracks, {:.1} MB",
            stats.item_count,
            stats.total_bytes as f64 / 1024.0 / 1024.0
        );

        Ok(Self {
            settings,
            queue,
            cache,
            transport,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn queue(&self) -> &Arc<RwLock<Queue>> {
        &self.queue
    }

    /// Replace the queue with a catalog snapshot.
    ///
    /// When nothing has been selected yet, the first track is cued paused.
    pub async fn apply_snapshot(&self, snapshot: Vec<TrackRecord>) {
        let first = snapshot.first().cloned();
        tracing::info!("Catalog snapshot: {} tracks", snapshot.len());
        self.queue.write().await.replace(snapshot);

        if let Some(first) = first {
            if self.transport.current_track().await.is_none() {
                if let Err(e) = self.transport.cue(first).await {
                    tracing::warn!("Could not cue first track: {}", e);
                }
            }
        }
    }

    pub async fn handle_catalog_event(&self, event: CatalogEvent) {
        match event {
            CatalogEvent::Snapshot(tracks) => self.apply_snapshot(tracks).await,
            CatalogEvent::Connected => tracing::info!("Catalog online"),
            CatalogEvent::Disconnected => tracing::warn!("Catalog offline; cached tracks remain playable"),
        }
    }

    /// Find a track by id in the queue, then in the offline library.
    pub async fn find_track(&self, id: &str) -> Option<TrackRecord> {
        if let Some(track) = self.queue.read().await.get(id) {
            return Some(track.clone());
        }
        self.cache
            .library()
            .await
            .into_iter()
            .find(|t| t.record.id == id)
            .map(|t| t.record)
    }
}
