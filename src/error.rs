//! Error types for the cache, the object handles and the transport.

use std::path::PathBuf;

/// Failure of the persistent cache store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cache I/O failed at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache metadata at {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure to fetch a payload from its remote locator.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("server returned status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("server returned an empty body")]
    EmptyBody,
}

impl FetchError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status(code) => *code >= 500 || *code == 429,
            FetchError::Transport(_) => true,
            FetchError::EmptyBody => false,
        }
    }
}

/// A payload that cannot be turned into a playable handle.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("cached payload for {0} is empty")]
    EmptyPayload(String),

    #[error("cached payload for {0} does not match its checksum")]
    ChecksumMismatch(String),
}

/// Errors surfaced by the cache lifecycle manager.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Another download holds the single download slot. Not a fault; retry later.
    #[error("download of {0} already in progress, try again later")]
    DownloadBusy(String),

    #[error("failed to download {id}: {source}")]
    DownloadFetch {
        id: String,
        #[source]
        source: FetchError,
    },

    #[error("failed to write {id} to the cache: {source}")]
    CacheWrite {
        id: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("track {0} has no audio locator")]
    MissingLocator(String),
}

impl CacheError {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::DownloadBusy(_))
    }
}

/// Failure reported by a media engine command.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("media engine: {0}")]
pub struct EngineError(pub String);

/// Errors surfaced by the playback transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no playable source for track {0}")]
    NoSource(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
pub type TransportResult<T> = std::result::Result<T, TransportError>;
