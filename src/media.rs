//! Media engine boundary.
//!
//! The transport is the engine's only client. Commands go through
//! [`MediaEngine`]; the engine reports back asynchronously with
//! [`MediaEvent`]s tagged with the ticket of the load they belong to.

use crate::error::EngineError;
use crate::handles::Handle;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Something the engine can play.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// Payload held in the local cache.
    Cached(Handle),
    /// Remote audio locator.
    Remote(String),
}

impl MediaSource {
    /// Locator handed to the engine.
    pub fn locator(&self) -> String {
        match self {
            MediaSource::Cached(handle) => handle.locator(),
            MediaSource::Remote(url) => url.clone(),
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, MediaSource::Cached(_))
    }

    /// Whether both sources play the same bytes from the same place.
    ///
    /// Cached sources compare by track, so regenerated handles for the same
    /// entry count as the same origin.
    pub fn same_origin(&self, other: &MediaSource) -> bool {
        match (self, other) {
            (MediaSource::Cached(a), MediaSource::Cached(b)) => a.track_id() == b.track_id(),
            (MediaSource::Remote(a), MediaSource::Remote(b)) => a == b,
            _ => false,
        }
    }
}

/// Asynchronous report from the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaEvent {
    /// Ticket passed to the [`MediaEngine::load`] this event belongs to.
    pub ticket: u64,
    pub kind: MediaEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaEventKind {
    /// Metadata loaded; duration in seconds.
    MetadataReady { duration: f32 },
    /// Playback position in seconds.
    PositionChanged { position: f32 },
    Ended,
    Error(String),
}

/// Decode/playback backend.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Replace the current source. Later events carry `ticket`.
    async fn load(&self, ticket: u64, source: &MediaSource) -> Result<(), EngineError>;
    async fn play(&self) -> Result<(), EngineError>;
    async fn pause(&self) -> Result<(), EngineError>;
    /// Seek to an absolute position in seconds.
    async fn seek(&self, position: f32) -> Result<(), EngineError>;
    async fn set_volume(&self, volume: f32) -> Result<(), EngineError>;
    /// Drop the current source.
    async fn stop(&self) -> Result<(), EngineError>;
}

/// A command received by [`HeadlessEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Load { ticket: u64, locator: String },
    Play,
    Pause,
    Seek(f32),
    SetVolume(f32),
    Stop,
}

/// Engine without audio output.
///
/// Accepts every command and records it. Playback can be refused to mimic
/// a backend that blocks autoplay.
#[derive(Debug, Default)]
pub struct HeadlessEngine {
    commands: Mutex<Vec<EngineCommand>>,
    refuse_play: AtomicBool,
    fail_load: AtomicBool,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `play` calls fail.
    pub fn set_refuse_play(&self, refuse: bool) {
        self.refuse_play.store(refuse, Ordering::SeqCst);
    }

    /// Make subsequent `load` calls fail.
    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<EngineCommand> {
        self.log().clone()
    }

    /// Drain the recorded commands.
    pub fn take_commands(&self) -> Vec<EngineCommand> {
        std::mem::take(&mut *self.log())
    }

    /// Locator of the most recent load, if any.
    pub fn last_loaded(&self) -> Option<String> {
        self.log().iter().rev().find_map(|c| match c {
            EngineCommand::Load { locator, .. } => Some(locator.clone()),
            _ => None,
        })
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Vec<EngineCommand>> {
        self.commands.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, command: EngineCommand) {
        tracing::trace!("headless engine: {:?}", command);
        self.log().push(command);
    }
}

#[async_trait]
impl MediaEngine for HeadlessEngine {
    async fn load(&self, ticket: u64, source: &MediaSource) -> Result<(), EngineError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(EngineError(format!("cannot open {}", source.locator())));
        }
        self.record(EngineCommand::Load {
            ticket,
            locator: source.locator(),
        });
        Ok(())
    }

    async fn play(&self) -> Result<(), EngineError> {
        if self.refuse_play.load(Ordering::SeqCst) {
            return Err(EngineError("playback not allowed".into()));
        }
        self.record(EngineCommand::Play);
        Ok(())
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.record(EngineCommand::Pause);
        Ok(())
    }

    async fn seek(&self, position: f32) -> Result<(), EngineError> {
        self.record(EngineCommand::Seek(position));
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.record(EngineCommand::SetVolume(volume));
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.record(EngineCommand::Stop);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::HandleManager;
    use crate::store::{checksum, CacheEntry};
    use crate::track::TrackRecord;
    use bytes::Bytes;

    fn cached(manager: &HandleManager, id: &str) -> MediaSource {
        let entry = CacheEntry {
            record: TrackRecord::remote(id, id, "https://x/a.mp3"),
            payload: Bytes::from_static(b"audio"),
            saved_at: chrono::Utc::now(),
            checksum: checksum(b"audio"),
        };
        MediaSource::Cached(manager.materialize(&entry).unwrap())
    }

    #[test]
    fn regenerated_handles_share_origin() {
        let manager = HandleManager::new();
        let a1 = cached(&manager, "a");
        let a2 = cached(&manager, "a");
        let b = cached(&manager, "b");

        assert_ne!(a1, a2);
        assert!(a1.same_origin(&a2));
        assert!(!a1.same_origin(&b));
        assert!(!a1.same_origin(&MediaSource::Remote("https://x/a.mp3".into())));
    }

    #[tokio::test]
    async fn headless_engine_records_and_refuses() {
        let engine = HeadlessEngine::new();
        let source = MediaSource::Remote("https://x/a.mp3".into());
        engine.load(1, &source).await.unwrap();
        engine.play().await.unwrap();

        engine.set_refuse_play(true);
        assert!(engine.play().await.is_err());

        assert_eq!(engine.last_loaded().as_deref(), Some("https://x/a.mp3"));
        assert_eq!(
            engine.take_commands(),
            vec![
                EngineCommand::Load {
                    ticket: 1,
                    locator: "https://x/a.mp3".into()
                },
                EngineCommand::Play,
            ]
        );
        assert!(engine.commands().is_empty());
    }
}
