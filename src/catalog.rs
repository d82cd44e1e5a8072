//! Remote catalog access.
//!
//! [`CatalogClient`] talks to the catalog's REST API; [`CatalogSync`] keeps a
//! realtime WebSocket subscription open and emits a full, ordered snapshot
//! whenever the collection changes.

use crate::config::CatalogSettings;
use crate::track::{TrackRecord, TrackSource};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message},
};
use url::Url;

const PAGE_SIZE: u32 = 200;

/// Events from the catalog subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    Connected,
    Disconnected,
    /// Authoritative replacement of the catalog contents, in catalog order.
    Snapshot(Vec<TrackRecord>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    items: Vec<T>,
    #[serde(default)]
    page: u32,
    #[serde(default)]
    total_pages: u32,
}

/// A record as the catalog serves it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogRecord {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    album: String,
    #[serde(default)]
    duration: Option<f32>,
    #[serde(default)]
    genre: String,
    #[serde(default)]
    cover_url: Option<String>,
    #[serde(default)]
    audio_url: Option<String>,
}

impl From<CatalogRecord> for TrackRecord {
    fn from(r: CatalogRecord) -> Self {
        TrackRecord {
            id: r.id,
            title: r.title,
            artist: r.artist,
            album: r.album,
            duration: r.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0),
            genre: r.genre,
            cover_url: r.cover_url.filter(|u| !u.is_empty()),
            audio_url: r.audio_url.filter(|u| !u.is_empty()),
            source: TrackSource::Remote,
        }
    }
}

/// Body of a create request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewRecord<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    title: &'a str,
    artist: &'a str,
    album: &'a str,
    duration: f32,
    genre: &'a str,
    cover_url: Option<&'a str>,
    audio_url: Option<&'a str>,
}

/// Realtime message envelope.
#[derive(Debug, Deserialize)]
struct RealtimeMessage {
    #[serde(default)]
    action: Option<String>,
}

/// Tracks seeded into an empty catalog.
pub fn demo_tracks() -> Vec<TrackRecord> {
    let demo = |id: &str, title: &str, artist: &str, album: &str, duration: f32, genre: &str, cover: &str, n: u8| {
        TrackRecord {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
            duration,
            genre: genre.into(),
            cover_url: Some(format!("https://images.unsplash.com/{cover}?w=400&q=80")),
            audio_url: Some(format!(
                "https://www.soundhelix.com/examples/mp3/SoundHelix-Song-{n}.mp3"
            )),
            source: TrackSource::Remote,
        }
    };
    vec![
        demo("demotrack000001", "Cyberpunk City", "Techno Dreams", "Neon Horizon", 184.0, "Synthwave", "photo-1594736797933-d0501ba2fe65", 1),
        demo("demotrack000002", "Deep Focus", "Mindful State", "Flow", 245.0, "Ambient", "photo-1519681393784-d120267933ba", 2),
        demo("demotrack000003", "Midnight Drive", "Lofi Core", "Night Shift", 210.0, "Lofi", "photo-1493225255756-d9584f8606e9", 3),
    ]
}

/// REST client for the catalog collection.
#[derive(Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    token: Option<String>,
}

impl CatalogClient {
    pub fn new(client: reqwest::Client, settings: &CatalogSettings) -> Self {
        Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            collection: settings.collection.clone(),
            token: settings.token.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn records_url(&self) -> String {
        format!(
            "{}/api/collections/{}/records",
            self.base_url,
            urlencoding::encode(&self.collection)
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Every track in catalog order.
    pub async fn fetch_snapshot(&self) -> Result<Vec<TrackRecord>> {
        let mut tracks = Vec::new();
        let mut page = 1;
        loop {
            let url = format!("{}?sort=created&perPage={}&page={}", self.records_url(), PAGE_SIZE, page);
            let res = self
                .authorize(self.client.get(url))
                .send()
                .await
                .context("Failed to send catalog request")?
                .error_for_status()
                .context("Catalog returned error")?;
            let parsed: ListResponse<CatalogRecord> =
                res.json().await.context("Failed to parse catalog page")?;

            let count = parsed.items.len();
            tracks.extend(parsed.items.into_iter().map(TrackRecord::from));
            if count == 0 || parsed.page >= parsed.total_pages {
                break;
            }
            page += 1;
        }
        tracing::debug!("Fetched catalog snapshot with {} tracks", tracks.len());
        Ok(tracks)
    }

    /// Add a track to the catalog. The catalog assigns an id unless one is given.
    pub async fn create_track(&self, track: &TrackRecord) -> Result<TrackRecord> {
        let body = NewRecord {
            id: Some(track.id.as_str()).filter(|id| !id.is_empty()),
            title: &track.title,
            artist: &track.artist,
            album: &track.album,
            duration: track.duration,
            genre: &track.genre,
            cover_url: track.cover_url.as_deref(),
            audio_url: track.audio_url.as_deref(),
        };
        let res = self
            .authorize(self.client.post(self.records_url()))
            .json(&body)
            .send()
            .await
            .context("Failed to send create request")?
            .error_for_status()
            .context("Catalog rejected new track")?;
        let created: CatalogRecord = res.json().await.context("Failed to parse created track")?;
        tracing::info!("Created catalog track {}", created.id);
        Ok(created.into())
    }

    pub async fn delete_track(&self, id: &str) -> Result<()> {
        let url = format!("{}/{}", self.records_url(), urlencoding::encode(id));
        self.authorize(self.client.delete(url))
            .send()
            .await
            .context("Failed to send delete request")?
            .error_for_status()
            .context("Catalog rejected delete")?;
        tracing::info!("Deleted catalog track {}", id);
        Ok(())
    }

    /// Seed the demo tracks if the catalog is empty. Returns how many were added.
    pub async fn seed_if_empty(&self) -> Result<usize> {
        if !self.fetch_snapshot().await?.is_empty() {
            return Ok(0);
        }
        tracing::info!("Seeding empty catalog with demo tracks...");
        let demo = demo_tracks();
        for track in &demo {
            self.create_track(track).await?;
        }
        Ok(demo.len())
    }
}

/// Whether a realtime message reports a change to the collection.
fn is_change_message(text: &str) -> bool {
    match serde_json::from_str::<RealtimeMessage>(text) {
        Ok(msg) => matches!(msg.action.as_deref(), Some("create" | "update" | "delete")),
        Err(e) => {
            tracing::debug!("Failed to parse realtime message: {} - {}", e, text);
            false
        }
    }
}

/// Realtime connection manager.
pub struct CatalogSync {
    client: CatalogClient,
    event_tx: mpsc::Sender<CatalogEvent>,
    is_connected: Arc<RwLock<bool>>,
    seed_demo_tracks: bool,
    reconnect: Duration,
}

impl CatalogSync {
    pub fn new(client: CatalogClient, settings: &CatalogSettings, event_tx: mpsc::Sender<CatalogEvent>) -> Self {
        Self {
            client,
            event_tx,
            is_connected: Arc::new(RwLock::new(false)),
            seed_demo_tracks: settings.seed_demo_tracks,
            reconnect: Duration::from_secs(settings.reconnect_secs.max(1)),
        }
    }

    /// Build the WebSocket URL.
    fn ws_url(&self) -> Result<Url> {
        let mut url = Url::parse(self.client.base_url()).context("Invalid catalog URL")?;

        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("Failed to set WebSocket scheme"))?;
        url.set_path("/api/realtime");

        Ok(url)
    }

    /// Start the realtime connection loop.
    pub async fn run(&self) {
        loop {
            tracing::info!("Connecting to catalog realtime...");

            match self.connect_and_subscribe().await {
                Ok(()) => {
                    tracing::warn!(
                        "Realtime connection closed, reconnecting in {}s...",
                        self.reconnect.as_secs()
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "Realtime connection error: {:#}, reconnecting in {}s...",
                        e,
                        self.reconnect.as_secs()
                    );
                }
            }

            *self.is_connected.write().await = false;
            if self.event_tx.send(CatalogEvent::Disconnected).await.is_err() {
                tracing::debug!("Catalog event receiver dropped, stopping sync");
                return;
            }

            sleep(self.reconnect).await;
        }
    }

    /// Fetch the catalog (seeding it when empty) and emit a snapshot.
    async fn refresh(&self) -> Result<()> {
        let mut snapshot = self.client.fetch_snapshot().await?;
        if snapshot.is_empty() && self.seed_demo_tracks && self.client.seed_if_empty().await? > 0 {
            snapshot = self.client.fetch_snapshot().await?;
        }
        self.event_tx
            .send(CatalogEvent::Snapshot(snapshot))
            .await
            .context("Catalog event receiver dropped")?;
        Ok(())
    }

    async fn connect_and_subscribe(&self) -> Result<()> {
        let url = self.ws_url()?;
        tracing::debug!("Connecting to: {}", url);

        let mut request = url.to_string().into_client_request()?;
        if let Some(token) = &self.client.token {
            request
                .headers_mut()
                .insert("Authorization", format!("Bearer {}", token).parse()?);
        }

        let (ws_stream, _response) = connect_async(request)
            .await
            .context("Failed to connect to WebSocket")?;

        let (mut write, mut read) = ws_stream.split();

        // The server greets every connection with its client id.
        let client_id = loop {
            let Some(msg) = read.next().await else {
                anyhow::bail!("Connection closed before client id");
            };
            if let Message::Text(text) = msg.context("Failed to receive message")? {
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
                    if let Some(id) = json.get("clientId").and_then(|v| v.as_str()) {
                        break id.to_string();
                    }
                }
            }
        };

        tracing::debug!("Got client ID: {}", client_id);

        let subscribe_msg = serde_json::json!({
            "clientId": client_id,
            "subscriptions": [self.client.collection()]
        });
        write
            .send(Message::Text(subscribe_msg.to_string()))
            .await
            .context("Failed to send subscription")?;

        *self.is_connected.write().await = true;
        let _ = self.event_tx.send(CatalogEvent::Connected).await;
        tracing::info!("Realtime connected and subscribed");

        self.refresh().await?;

        while let Some(msg) = read.next().await {
            match msg.context("Failed to receive message")? {
                Message::Text(text) => {
                    if is_change_message(&text) {
                        tracing::debug!("Catalog changed, refreshing snapshot");
                        self.refresh().await?;
                    }
                }
                Message::Ping(data) => {
                    write
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Message::Close(_) => {
                    tracing::info!("WebSocket closed by server");
                    break;
                }
                _ => {}
            }
        }

        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }
}

/// Spawn the catalog subscription as a background task.
pub fn spawn_catalog_sync(client: CatalogClient, settings: &CatalogSettings) -> mpsc::Receiver<CatalogEvent> {
    let (tx, rx) = mpsc::channel(16);
    let sync = CatalogSync::new(client, settings, tx);

    tokio::spawn(async move {
        sync.run().await;
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_conversion_normalizes_empty_fields() {
        let json = r#"{
            "id": "abc123",
            "title": "Deep Focus",
            "artist": "Mindful State",
            "duration": 0,
            "coverUrl": "",
            "audioUrl": "https://x/2.mp3",
            "collectionName": "tracks"
        }"#;
        let record: CatalogRecord = serde_json::from_str(json).unwrap();
        let track = TrackRecord::from(record);
        assert_eq!(track.id, "abc123");
        assert_eq!(track.duration, 0.0);
        assert_eq!(track.cover_url, None);
        assert_eq!(track.audio_url.as_deref(), Some("https://x/2.mp3"));
        assert_eq!(track.source, TrackSource::Remote);
    }

    #[test]
    fn list_response_keeps_catalog_order() {
        let json = r#"{"page":1,"perPage":200,"totalPages":1,"items":[{"id":"b"},{"id":"a"},{"id":"c"}]}"#;
        let parsed: ListResponse<CatalogRecord> = serde_json::from_str(json).unwrap();
        let ids: Vec<String> = parsed.items.into_iter().map(|r| TrackRecord::from(r).id).collect();
        assert_eq!(ids, ["b", "a", "c"]);
        assert_eq!(parsed.total_pages, 1);
    }

    #[test]
    fn change_messages_are_recognized() {
        assert!(is_change_message(r#"{"action":"create","record":{"id":"x"}}"#));
        assert!(is_change_message(r#"{"action":"delete","record":{"id":"x"}}"#));
        assert!(!is_change_message(r#"{"clientId":"abc"}"#));
        assert!(!is_change_message("not json"));
    }

    #[test]
    fn ws_url_switches_scheme() {
        let settings = CatalogSettings {
            url: "https://music.example.com/".into(),
            ..CatalogSettings::default()
        };
        let client = CatalogClient::new(reqwest::Client::new(), &settings);
        let (tx, _rx) = mpsc::channel(1);
        let sync = CatalogSync::new(client, &settings, tx);

        let url = sync.ws_url().unwrap();
        assert_eq!(url.as_str(), "wss://music.example.com/api/realtime");
    }

    #[test]
    fn demo_tracks_are_remote_and_playable() {
        let demo = demo_tracks();
        assert_eq!(demo.len(), 3);
        assert!(demo.iter().all(|t| t.audio_locator().is_some() && !t.is_local_import()));
    }
}
