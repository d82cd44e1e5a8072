//! Playback transport: source selection, play/pause, navigation and media events.
//!
//! The transport is `Idle` until a track with a resolvable source is loaded,
//! and `Loaded` afterwards; `is_playing` is tracked separately and always
//! mirrors what the engine actually accepted. All state lives behind one
//! async mutex, so every continuation works on the state as it is when it
//! resumes, never on a copy taken before a suspension point.

use crate::cache::{CacheChange, CacheListener, CacheManager};
use crate::config::PlaybackSettings;
use crate::error::{TransportError, TransportResult};
use crate::media::{MediaEngine, MediaEvent, MediaEventKind, MediaSource};
use crate::queue::{NavigationMode, Queue};
use crate::track::TrackRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPhase {
    /// No source loaded.
    Idle,
    /// A source is loaded, paused or playing.
    Loaded,
}

/// Observable transport state.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportState {
    pub current_track_id: Option<String>,
    pub is_playing: bool,
    pub position: f32,
    pub duration: f32,
    pub volume: f32,
    pub mode: NavigationMode,
    pub phase: TransportPhase,
    /// Whether the loaded source is the local cache rather than the network.
    pub source_is_cached: bool,
}

struct Inner {
    current: Option<TrackRecord>,
    source: Option<MediaSource>,
    /// Ticket of the latest load; events with another ticket are stale.
    ticket: u64,
    is_playing: bool,
    position: f32,
    duration: f32,
    volume: f32,
    mode: NavigationMode,
}

impl Inner {
    fn phase(&self) -> TransportPhase {
        if self.current.is_some() && self.source.is_some() {
            TransportPhase::Loaded
        } else {
            TransportPhase::Idle
        }
    }

    fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|t| t.id.as_str())
    }

    fn snapshot(&self) -> TransportState {
        TransportState {
            current_track_id: self.current_id().map(str::to_string),
            is_playing: self.is_playing,
            position: self.position,
            duration: self.duration,
            volume: self.volume,
            mode: self.mode,
            phase: self.phase(),
            source_is_cached: self.source.as_ref().is_some_and(MediaSource::is_cached),
        }
    }

    fn next_ticket(&mut self) -> u64 {
        self.ticket += 1;
        self.ticket
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

pub struct Transport {
    engine: Arc<dyn MediaEngine>,
    cache: Arc<CacheManager>,
    queue: Arc<RwLock<Queue>>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<TransportState>,
}

impl Transport {
    /// Create a transport and register it for cache change notifications.
    pub fn new(
        settings: &PlaybackSettings,
        engine: Arc<dyn MediaEngine>,
        cache: Arc<CacheManager>,
        queue: Arc<RwLock<Queue>>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let transport = Arc::new(Self {
            engine,
            cache,
            queue,
            inner: Mutex::new(Inner {
                current: None,
                source: None,
                ticket: 0,
                is_playing: false,
                position: 0.0,
                duration: 0.0,
                volume: clamp_unit(settings.volume),
                mode: settings.mode,
            }),
            events,
        });
        transport.cache.add_listener(&transport);
        transport
    }

    /// State changes, one message per change.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportState> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> TransportState {
        self.inner.lock().await.snapshot()
    }

    pub async fn current_track(&self) -> Option<TrackRecord> {
        self.inner.lock().await.current.clone()
    }

    /// Feed engine events into the transport until the channel closes.
    pub fn spawn_event_loop(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<MediaEvent>) -> JoinHandle<()> {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                transport.handle_media_event(event).await;
            }
            tracing::debug!("Media event channel closed");
        })
    }

    /// Play `track`, or toggle play/pause when it is already loaded.
    pub async fn select(&self, track: TrackRecord) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        let result = if inner.phase() == TransportPhase::Loaded && inner.current_id() == Some(track.id.as_str()) {
            self.toggle_locked(&mut inner).await
        } else {
            self.load_locked(&mut inner, track, true).await
        };
        self.publish(&inner);
        result
    }

    /// Load `track` paused, unless something is already loaded.
    pub async fn cue(&self, track: TrackRecord) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.phase() == TransportPhase::Loaded {
            return Ok(());
        }
        let result = self.load_locked(&mut inner, track, false).await;
        self.publish(&inner);
        result
    }

    pub async fn toggle_play_pause(&self) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        let result = self.toggle_locked(&mut inner).await;
        self.publish(&inner);
        result
    }

    /// Skip forward exactly as if the current track had ended.
    pub async fn next(&self) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        let result = self.advance_locked(&mut inner).await;
        self.publish(&inner);
        result
    }

    /// Play the catalog-order predecessor of the current track.
    pub async fn previous(&self) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(current) = inner.current_id().map(str::to_string) else {
            return Ok(());
        };
        let previous = {
            let queue = self.queue.read().await;
            if queue.is_empty() {
                None
            } else {
                let id = queue.retreat(&current);
                queue.get(&id).cloned()
            }
        };
        let result = match previous {
            Some(track) => self.load_locked(&mut inner, track, true).await,
            None => Ok(()),
        };
        self.publish(&inner);
        result
    }

    /// Seek to a fraction of the track duration.
    ///
    /// The reported position changes immediately; the engine's own position
    /// events correct any drift.
    pub async fn seek(&self, fraction: f32) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.phase() == TransportPhase::Idle {
            return Ok(());
        }
        let position = clamp_unit(fraction) * inner.duration;
        self.engine.seek(position).await?;
        inner.position = position;
        self.publish(&inner);
        Ok(())
    }

    /// Set the volume; values outside [0, 1] are clamped.
    pub async fn set_volume(&self, volume: f32) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        let volume = clamp_unit(volume);
        inner.volume = volume;
        let result = self.engine.set_volume(volume).await;
        self.publish(&inner);
        result.map_err(TransportError::from)
    }

    pub async fn set_mode(&self, mode: NavigationMode) {
        let mut inner = self.inner.lock().await;
        if inner.mode != mode {
            tracing::info!("Navigation mode: {}", mode.as_str());
            inner.mode = mode;
            self.publish(&inner);
        }
    }

    /// React to an engine event. Events from an earlier load are ignored.
    pub async fn handle_media_event(&self, event: MediaEvent) {
        let mut inner = self.inner.lock().await;
        if event.ticket != inner.ticket || inner.source.is_none() {
            tracing::trace!("Ignoring stale media event {:?}", event);
            return;
        }

        match event.kind {
            MediaEventKind::MetadataReady { duration } => {
                if duration.is_finite() && duration > 0.0 {
                    inner.duration = duration;
                    self.refine_duration(&mut inner, duration).await;
                }
            }
            MediaEventKind::PositionChanged { position } => {
                inner.position = position;
            }
            MediaEventKind::Ended => {
                if let Err(e) = self.advance_locked(&mut inner).await {
                    tracing::warn!("Could not continue after track end: {}", e);
                }
            }
            MediaEventKind::Error(message) => {
                tracing::warn!(
                    "Playback error on {}: {}",
                    inner.current_id().unwrap_or("-"),
                    message
                );
                inner.is_playing = false;
            }
        }
        self.publish(&inner);
    }

    /// Prefer a live cached handle, then the remote locator.
    async fn resolve(&self, track: &TrackRecord) -> Option<MediaSource> {
        if let Some(handle) = self.cache.cached_handle(&track.id).await {
            return Some(MediaSource::Cached(handle));
        }
        track.audio_locator().map(|url| MediaSource::Remote(url.to_string()))
    }

    async fn load_locked(&self, inner: &mut Inner, track: TrackRecord, autoplay: bool) -> TransportResult<()> {
        let Some(source) = self.resolve(&track).await else {
            tracing::warn!("No playable source for {}", track.id);
            return Err(TransportError::NoSource(track.id));
        };
        self.load_source(inner, track, source, autoplay).await
    }

    async fn load_source(
        &self,
        inner: &mut Inner,
        track: TrackRecord,
        source: MediaSource,
        autoplay: bool,
    ) -> TransportResult<()> {
        let ticket = inner.next_ticket();
        tracing::info!(
            "Loading {} from {}",
            track.id,
            if source.is_cached() { "cache" } else { "network" }
        );

        if let Err(e) = self.engine.load(ticket, &source).await {
            // The engine dropped whatever it had; keep the previous track id.
            tracing::warn!("Failed to load {}: {}", track.id, e);
            inner.source = None;
            inner.is_playing = false;
            inner.position = 0.0;
            return Err(e.into());
        }

        inner.duration = track.duration;
        inner.current = Some(track);
        inner.source = Some(source);
        inner.position = 0.0;
        inner.is_playing = false;

        if autoplay {
            self.start_locked(inner).await
        } else {
            Ok(())
        }
    }

    async fn start_locked(&self, inner: &mut Inner) -> TransportResult<()> {
        match self.engine.play().await {
            Ok(()) => {
                inner.is_playing = true;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Playback did not start: {}", e);
                inner.is_playing = false;
                Err(e.into())
            }
        }
    }

    async fn toggle_locked(&self, inner: &mut Inner) -> TransportResult<()> {
        if inner.source.is_none() {
            // Loaded track lost its source (failed load); try again.
            return match inner.current.clone() {
                Some(track) => self.load_locked(inner, track, true).await,
                None => Ok(()),
            };
        }
        if inner.is_playing {
            self.engine.pause().await?;
            inner.is_playing = false;
            Ok(())
        } else {
            self.start_locked(inner).await
        }
    }

    /// Track-end semantics: restart under repeat-one, otherwise advance the queue.
    async fn advance_locked(&self, inner: &mut Inner) -> TransportResult<()> {
        let Some(current) = inner.current_id().map(str::to_string) else {
            return Ok(());
        };

        if inner.mode == NavigationMode::RepeatOne {
            if inner.source.is_none() {
                return Ok(());
            }
            self.engine.seek(0.0).await?;
            inner.position = 0.0;
            return self.start_locked(inner).await;
        }

        let next = {
            let queue = self.queue.read().await;
            if queue.is_empty() {
                None
            } else {
                let id = queue.advance(&current, inner.mode);
                queue.get(&id).cloned()
            }
        };

        match next {
            Some(track) => {
                let result = self.load_locked(inner, track, true).await;
                if result.is_err() {
                    self.halt_locked(inner).await;
                }
                result
            }
            None => {
                tracing::debug!("Queue empty; stopping after {}", current);
                self.halt_locked(inner).await;
                Ok(())
            }
        }
    }

    /// Pause the engine after a track ended without a successor.
    async fn halt_locked(&self, inner: &mut Inner) {
        if inner.is_playing {
            if let Err(e) = self.engine.pause().await {
                tracing::warn!("Failed to pause engine: {}", e);
            }
        }
        inner.is_playing = false;
    }

    /// Re-resolve the current track's source after its cache status changed.
    async fn reresolve_locked(&self, inner: &mut Inner) -> TransportResult<()> {
        let Some(track) = inner.current.clone() else {
            return Ok(());
        };
        let resolved = self.resolve(&track).await;

        match (resolved, inner.source.as_ref()) {
            (Some(new), Some(old)) if new.same_origin(old) => {
                inner.source = Some(new);
                Ok(())
            }
            (Some(new), _) => {
                let was_playing = inner.is_playing;
                tracing::info!("Switching {} to a new source", track.id);
                self.load_source(inner, track, new, was_playing).await
            }
            (None, _) => {
                tracing::info!("{} is no longer playable; going idle", track.id);
                inner.next_ticket();
                if let Err(e) = self.engine.stop().await {
                    tracing::warn!("Failed to stop engine: {}", e);
                }
                inner.current = None;
                inner.source = None;
                inner.is_playing = false;
                inner.position = 0.0;
                inner.duration = 0.0;
                Ok(())
            }
        }
    }

    /// Swap in the regenerated handle for an unchanged cached source.
    async fn refresh_handle(&self, inner: &mut Inner) {
        let Some(MediaSource::Cached(old)) = inner.source.as_ref() else {
            return;
        };
        if let Some(handle) = self.cache.cached_handle(old.track_id()).await {
            inner.source = Some(MediaSource::Cached(handle));
        }
    }

    async fn refine_duration(&self, inner: &mut Inner, duration: f32) {
        let Some(current) = inner.current.as_mut() else {
            return;
        };
        if current.duration > 0.0 {
            return;
        }
        current.duration = duration;
        let id = current.id.clone();
        if let Some(track) = self.queue.write().await.get_mut(&id) {
            if track.duration <= 0.0 {
                track.duration = duration;
            }
        }
        tracing::debug!("Refined duration of {} to {:.1}s", id, duration);
    }

    fn publish(&self, inner: &Inner) {
        let _ = self.events.send(inner.snapshot());
    }
}

#[async_trait]
impl CacheListener for Transport {
    async fn cache_changed(&self, change: &CacheChange) {
        let mut inner = self.inner.lock().await;
        if inner.current_id() != Some(change.track_id.as_str()) {
            self.refresh_handle(&mut inner).await;
            return;
        }
        if let Err(e) = self.reresolve_locked(&mut inner).await {
            tracing::warn!("Could not re-resolve {}: {}", change.track_id, e);
        }
        self.publish(&inner);
    }
}
