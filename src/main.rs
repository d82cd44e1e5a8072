use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use track_player::catalog::spawn_catalog_sync;
use track_player::{
    CacheEvent, CatalogClient, DiskStore, HandleManager, HttpFetcher, MediaEngine, MediaEvent, Player, Settings,
};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: track-player [play [id] | sync | library | download <id> | evict <id> | import <file>]";

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;
    init_logging(&settings);
    settings.validate().map_err(anyhow::Error::msg)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("play");
    let arg = args.get(1).map(String::as_str);

    let client = reqwest::Client::new();
    let catalog = CatalogClient::new(client.clone(), &settings.catalog);
    let store = Arc::new(DiskStore::new(settings.cache.dir.clone())?);
    let fetcher = Arc::new(HttpFetcher::new(client, settings.catalog.token.clone()));
    let handles = Arc::new(HandleManager::new());

    let (media_tx, media_rx) = mpsc::unbounded_channel();
    let engine = build_engine(handles.clone(), media_tx)?;
    let player = Player::new(settings.clone(), store, fetcher, handles, engine).await?;
    player.transport().spawn_event_loop(media_rx);

    match (command, arg) {
        ("play", id) => run(&player, catalog, id).await,
        ("sync", _) => {
            let tracks = catalog.fetch_snapshot().await?;
            println!("Fetched {} tracks", tracks.len());
            for track in &tracks {
                let mark = if player.cache().is_cached(&track.id).await { "*" } else { " " };
                println!("{} {}  {} - {}", mark, track.id, track.artist, track.title);
            }
            Ok(())
        }
        ("library", _) => {
            let stats = player.cache().stats().await;
            println!(
                "{} tracks, {:.1} MB",
                stats.item_count,
                stats.total_bytes as f64 / 1024.0 / 1024.0
            );
            for track in player.cache().library().await {
                println!(
                    "{} {}  {} ({:.1} MB, saved {})",
                    if track.is_playable() { " " } else { "!" },
                    track.record.id,
                    track.record.title,
                    track.size as f64 / 1024.0 / 1024.0,
                    track.saved_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        ("download", Some(id)) => {
            player.apply_snapshot(catalog.fetch_snapshot().await?).await;
            let Some(track) = player.find_track(id).await else {
                bail!("Track {} is not in the catalog", id);
            };
            player.cache().download(&track).await?;
            println!("Saved {} for offline playback", track.title);
            Ok(())
        }
        ("evict", Some(id)) => {
            player.cache().evict(id).await?;
            println!("Removed {} from the offline library", id);
            Ok(())
        }
        ("import", Some(path)) => {
            let track = player.cache().import_file(Path::new(path)).await?;
            println!("Imported {} as {}", track.title, track.id);
            Ok(())
        }
        _ => bail!(USAGE),
    }
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(feature = "gstreamer")]
fn build_engine(handles: Arc<HandleManager>, events: mpsc::UnboundedSender<MediaEvent>) -> Result<Arc<dyn MediaEngine>> {
    let engine = track_player::gst_engine::GstEngine::new(handles, events)?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "gstreamer"))]
fn build_engine(_handles: Arc<HandleManager>, _events: mpsc::UnboundedSender<MediaEvent>) -> Result<Arc<dyn MediaEngine>> {
    tracing::warn!("Built without the `gstreamer` feature; playback is silent");
    Ok(Arc::new(track_player::HeadlessEngine::new()))
}

/// Follow the catalog and drive playback until Ctrl-C.
async fn run(player: &Player, catalog: CatalogClient, start_id: Option<&str>) -> Result<()> {
    let mut catalog_rx = spawn_catalog_sync(catalog, &player.settings().catalog);
    let mut cache_rx = player.cache().subscribe();
    let mut state_rx = player.transport().subscribe();
    let mut pending_start = start_id.map(str::to_string);

    if let Some(id) = pending_start.clone() {
        // Offline library tracks are playable before the catalog answers.
        if let Some(track) = player.find_track(&id).await {
            player.transport().select(track).await?;
            pending_start = None;
        }
    }

    loop {
        tokio::select! {
            Some(event) = catalog_rx.recv() => {
                player.handle_catalog_event(event).await;
                if let Some(id) = pending_start.take() {
                    match player.find_track(&id).await {
                        Some(track) => {
                            if let Err(e) = player.transport().select(track).await {
                                tracing::warn!("Could not play {}: {}", id, e);
                            }
                        }
                        None => pending_start = Some(id),
                    }
                }
            }
            Ok(event) = cache_rx.recv() => match event {
                CacheEvent::DownloadStarted(id) => tracing::info!("Downloading {}...", id),
                CacheEvent::DownloadFinished { id, ok } => tracing::info!("Download of {} finished (ok: {})", id, ok),
                CacheEvent::LibraryChanged(change) => tracing::debug!("Library changed: {:?}", change),
            },
            Ok(state) = state_rx.recv() => {
                tracing::debug!(
                    "{:?} {} playing={} {:.0}/{:.0}s",
                    state.phase,
                    state.current_track_id.as_deref().unwrap_or("-"),
                    state.is_playing,
                    state.position,
                    state.duration
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                return Ok(());
            }
        }
    }
}
