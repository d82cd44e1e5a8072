//! Track records shared by the catalog, the cache and the transport.

use serde::{Deserialize, Serialize};

/// Prefix of every id minted for a locally imported track.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Where a track record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackSource {
    #[default]
    Remote,
    LocalImport,
}

/// A single track, either from the remote catalog or imported from a local file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    /// Seconds; 0 until the first successful metadata load.
    #[serde(default)]
    pub duration: f32,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub cover_url: Option<String>,
    /// Absent for local imports.
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub source: TrackSource,
}

impl TrackRecord {
    /// Create a remote track with the minimum required fields.
    pub fn remote(id: impl Into<String>, title: impl Into<String>, audio_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: String::new(),
            album: String::new(),
            duration: 0.0,
            genre: String::new(),
            cover_url: None,
            audio_url: Some(audio_url.into()),
            source: TrackSource::Remote,
        }
    }

    pub fn is_local_import(&self) -> bool {
        self.source == TrackSource::LocalImport
    }

    /// Remote locator, ignoring empty strings the catalog may hand us.
    pub fn audio_locator(&self) -> Option<&str> {
        self.audio_url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_catalog_shape_with_defaults() {
        let json = r#"{"id":"t1","title":"Deep Focus","audioUrl":"https://x/2.mp3","coverUrl":null}"#;
        let track: TrackRecord = serde_json::from_str(json).unwrap();
        assert_eq!(track.id, "t1");
        assert_eq!(track.duration, 0.0);
        assert_eq!(track.source, TrackSource::Remote);
        assert_eq!(track.audio_locator(), Some("https://x/2.mp3"));
    }

    #[test]
    fn empty_locator_is_treated_as_absent() {
        let mut track = TrackRecord::remote("t1", "x", "");
        assert_eq!(track.audio_locator(), None);
        track.audio_url = None;
        assert_eq!(track.audio_locator(), None);
    }

    #[test]
    fn source_tag_uses_kebab_case() {
        let json = serde_json::to_string(&TrackSource::LocalImport).unwrap();
        assert_eq!(json, "\"local-import\"");
    }
}
