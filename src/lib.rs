//! Streaming music player core with an offline cache.
//!
//! Tracks come from a shared remote catalog and can be kept for offline
//! playback. A single transport plays each track from the local cache when
//! a copy exists and from the network otherwise.
//!
//! ```text
//! catalog snapshot ──> Queue ──┐
//!                              ├──> Transport ──> MediaEngine
//! Fetcher ──> CacheManager ────┘        ^
//!               │   └─> HandleManager   │
//!               └─> CacheStore          └── cache change notifications
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod format;
#[cfg(feature = "gstreamer")]
pub mod gst_engine;
pub mod handles;
pub mod media;
pub mod player;
pub mod queue;
pub mod store;
pub mod track;
pub mod transport;

pub use cache::{CacheChange, CacheChangeKind, CacheEvent, CacheListener, CacheManager, CacheStats, LibraryTrack};
pub use catalog::{CatalogClient, CatalogEvent, CatalogSync};
pub use config::Settings;
pub use error::{CacheError, EngineError, FetchError, HandleError, StoreError, TransportError};
pub use fetch::{Fetcher, HttpFetcher};
pub use handles::{Handle, HandleManager};
pub use media::{HeadlessEngine, MediaEngine, MediaEvent, MediaEventKind, MediaSource};
pub use player::Player;
pub use queue::{NavigationMode, Queue};
pub use store::{CacheEntry, CacheStore, DiskStore};
pub use track::{TrackRecord, TrackSource};
pub use transport::{Transport, TransportPhase, TransportState};
