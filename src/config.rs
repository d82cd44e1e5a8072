//! Runtime settings.
//!
//! Precedence (highest wins):
//! 1) Environment variables (prefix `TRACK_PLAYER__`, `__` as nested separator)
//! 2) Config file, if present (`TRACK_PLAYER_CONFIG` or
//!    `$XDG_CONFIG_HOME/track-player/config.toml`)
//! 3) Struct defaults

use crate::queue::NavigationMode;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "track-player";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub catalog: CatalogSettings,
    pub cache: CacheSettings,
    pub playback: PlaybackSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Base URL of the catalog server.
    pub url: String,
    /// Collection holding the public tracks.
    pub collection: String,
    /// Bearer token for catalog requests and payload downloads.
    pub token: Option<String>,
    /// Seed demo tracks when the catalog is empty.
    pub seed_demo_tracks: bool,
    /// Delay before reconnecting the realtime subscription.
    pub reconnect_secs: u64,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8090".into(),
            collection: "tracks".into(),
            token: None,
            seed_demo_tracks: true,
            reconnect_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Directory of the persistent cache store.
    pub dir: PathBuf,
    /// Fetch attempts per download (1 = no retry).
    pub fetch_attempts: u32,
    /// Pause between fetch attempts (milliseconds).
    pub retry_delay_ms: u64,
    /// Cover assigned to local imports.
    pub default_cover_url: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            fetch_attempts: 2,
            retry_delay_ms: 500,
            default_cover_url: Some(
                "https://images.unsplash.com/photo-1614613535308-eb5fbd3d2c17?w=400&q=80".into(),
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Initial volume in [0, 1]; out-of-range values are clamped.
    pub volume: f32,
    pub mode: NavigationMode,
    pub shuffle_excludes_current: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            mode: NavigationMode::Sequential,
            shuffle_excludes_current: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}

impl Settings {
    /// Load settings from the environment and the resolved config file.
    pub fn load() -> Result<Self, ::config::ConfigError> {
        Self::load_from(resolve_config_path().as_deref())
    }

    /// Load settings from an explicit (optional) config file plus the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ::config::ConfigError> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("TRACK_PLAYER")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Basic sanity checks on loaded settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.catalog.url.trim().is_empty() {
            return Err("catalog.url must not be empty".to_string());
        }
        if self.cache.fetch_attempts == 0 {
            return Err("cache.fetch_attempts must be >= 1".to_string());
        }
        Ok(())
    }
}

/// Config path from `TRACK_PLAYER_CONFIG`, else the XDG default.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Some(p) = env::var_os("TRACK_PLAYER_CONFIG") {
        return Some(PathBuf::from(p));
    }
    xdg_dir("XDG_CONFIG_HOME", ".config").map(|d| d.join(APP_DIR).join("config.toml"))
}

fn default_cache_dir() -> PathBuf {
    xdg_dir("XDG_CACHE_HOME", ".cache")
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("cache"))
}

fn xdg_dir(var: &str, home_fallback: &str) -> Option<PathBuf> {
    if let Some(dir) = env::var_os(var) {
        return Some(PathBuf::from(dir));
    }
    env::var_os("HOME").map(|home| PathBuf::from(home).join(home_fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.playback.mode, NavigationMode::Sequential);
        assert_eq!(settings.cache.fetch_attempts, 2);
        assert!(settings.catalog.seed_demo_tracks);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[catalog]
url = "https://music.example.com"
collection = "public_tracks"

[cache]
dir = "/tmp/track-player-test"
fetch_attempts = 4

[playback]
mode = "shuffle"
volume = 0.5
"#,
        )
        .unwrap();

        let settings = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(settings.catalog.url, "https://music.example.com");
        assert_eq!(settings.catalog.collection, "public_tracks");
        assert_eq!(settings.catalog.reconnect_secs, 5);
        assert_eq!(settings.cache.dir, PathBuf::from("/tmp/track-player-test"));
        assert_eq!(settings.cache.fetch_attempts, 4);
        assert_eq!(settings.playback.mode, NavigationMode::Shuffle);
        assert_eq!(settings.playback.volume, 0.5);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(settings.catalog.collection, "tracks");
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut settings = Settings::default();
        settings.cache.fetch_attempts = 0;
        assert!(settings.validate().is_err());
    }
}
