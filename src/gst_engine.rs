//! GStreamer-based audio engine.
//!
//! Remote sources go straight to `playbin`; cached handles are fed through an
//! `appsrc` element so payloads never touch the filesystem.

use crate::error::EngineError;
use crate::handles::HandleManager;
use crate::media::{MediaEngine, MediaEvent, MediaEventKind, MediaSource};
use async_trait::async_trait;
use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const POSITION_INTERVAL: Duration = Duration::from_millis(500);

fn engine_err(context: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError(format!("{context}: {e}"))
}

/// Audio engine around a single `playbin`.
pub struct GstEngine {
    playbin: gst::Element,
    handles: Arc<HandleManager>,
    /// Payload waiting for the next `appsrc` to be set up.
    pending: Arc<Mutex<Option<Bytes>>>,
    ticket: Arc<AtomicU64>,
}

impl GstEngine {
    /// Initialize GStreamer and build the pipeline.
    ///
    /// Bus messages and position updates are forwarded to `events`.
    pub fn new(handles: Arc<HandleManager>, events: mpsc::UnboundedSender<MediaEvent>) -> Result<Self, EngineError> {
        gst::init().map_err(|e| engine_err("Failed to initialize GStreamer", e))?;
        tracing::info!("GStreamer initialized: {}", gst::version_string());

        let playbin = gst::ElementFactory::make("playbin")
            .name("player")
            .build()
            .map_err(|e| engine_err("Failed to create playbin", e))?;

        let pending: Arc<Mutex<Option<Bytes>>> = Arc::new(Mutex::new(None));
        let pending_src = pending.clone();
        playbin.connect("source-setup", false, move |args| {
            let source = args.get(1)?.get::<gst::Element>().ok()?;
            let appsrc = source.downcast::<gst_app::AppSrc>().ok()?;
            let payload = pending_src.lock().ok()?.take()?;
            appsrc.set_format(gst::Format::Bytes);
            if let Err(e) = appsrc.push_buffer(gst::Buffer::from_slice(payload)) {
                tracing::error!("Failed to push cached payload: {:?}", e);
            }
            let _ = appsrc.end_of_stream();
            None
        });

        let ticket = Arc::new(AtomicU64::new(0));
        Self::spawn_bus_thread(&playbin, ticket.clone(), events.clone())?;
        Self::spawn_position_task(playbin.clone(), ticket.clone(), events);

        Ok(Self {
            playbin,
            handles,
            pending,
            ticket,
        })
    }

    fn spawn_bus_thread(
        playbin: &gst::Element,
        ticket: Arc<AtomicU64>,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<(), EngineError> {
        let bus = playbin
            .bus()
            .ok_or_else(|| EngineError("Pipeline has no bus".into()))?;
        let playbin_weak = playbin.downgrade();

        std::thread::spawn(move || {
            for msg in bus.iter_timed(gst::ClockTime::NONE) {
                let kind = match msg.view() {
                    gst::MessageView::Eos(_) => Some(MediaEventKind::Ended),
                    gst::MessageView::Error(err) => {
                        tracing::error!("GStreamer error: {} ({:?})", err.error(), err.debug());
                        Some(MediaEventKind::Error(err.error().to_string()))
                    }
                    gst::MessageView::DurationChanged(_) | gst::MessageView::AsyncDone(_) => playbin_weak
                        .upgrade()
                        .and_then(|p| p.query_duration::<gst::ClockTime>())
                        .map(|d| MediaEventKind::MetadataReady {
                            duration: d.nseconds() as f32 / 1e9,
                        }),
                    _ => None,
                };
                if let Some(kind) = kind {
                    let event = MediaEvent {
                        ticket: ticket.load(Ordering::SeqCst),
                        kind,
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    fn spawn_position_task(playbin: gst::Element, ticket: Arc<AtomicU64>, events: mpsc::UnboundedSender<MediaEvent>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(POSITION_INTERVAL);
            loop {
                interval.tick().await;
                let (_, state, _) = playbin.state(gst::ClockTime::ZERO);
                if state != gst::State::Playing {
                    continue;
                }
                if let Some(pos) = playbin.query_position::<gst::ClockTime>() {
                    let event = MediaEvent {
                        ticket: ticket.load(Ordering::SeqCst),
                        kind: MediaEventKind::PositionChanged {
                            position: pos.nseconds() as f32 / 1e9,
                        },
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
            }
        });
    }

    fn set_state(&self, state: gst::State) -> Result<(), EngineError> {
        self.playbin
            .set_state(state)
            .map(|_| ())
            .map_err(|e| engine_err(&format!("Failed to set pipeline to {:?}", state), e))
    }
}

#[async_trait]
impl MediaEngine for GstEngine {
    async fn load(&self, ticket: u64, source: &MediaSource) -> Result<(), EngineError> {
        self.set_state(gst::State::Null)?;
        self.ticket.store(ticket, Ordering::SeqCst);

        let uri = match source {
            MediaSource::Remote(url) => url.clone(),
            MediaSource::Cached(handle) => {
                let payload = self
                    .handles
                    .resolve(&handle.locator())
                    .ok_or_else(|| EngineError(format!("{} was released", handle)))?;
                if let Ok(mut pending) = self.pending.lock() {
                    *pending = Some(payload);
                }
                "appsrc://".to_string()
            }
        };
        tracing::debug!("Loading {}", uri);
        self.playbin.set_property("uri", uri.as_str());
        self.set_state(gst::State::Paused)
    }

    async fn play(&self) -> Result<(), EngineError> {
        self.set_state(gst::State::Playing)
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.set_state(gst::State::Paused)
    }

    async fn seek(&self, position: f32) -> Result<(), EngineError> {
        let target = gst::ClockTime::from_nseconds((position.max(0.0) as f64 * 1e9) as u64);
        self.playbin
            .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT, target)
            .map_err(|e| engine_err("Seek failed", e))
    }

    async fn set_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.playbin.set_property("volume", volume as f64);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.set_state(gst::State::Null)
    }
}

impl Drop for GstEngine {
    fn drop(&mut self) {
        let _ = self.playbin.set_state(gst::State::Null);
    }
}
