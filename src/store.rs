//! Persistent cache store for offline track payloads.
//!
//! Each cached track lives in its own directory, named after the SHA-256 of
//! the track id:
//!
//! ```text
//! cache/
//! └── 3f2a…/
//!     ├── meta.json                  # record, retention timestamp, checksum
//!     └── payload-<checksum>.bin     # audio bytes
//! ```
//!
//! `meta.json` is renamed into place last, so an entry only becomes visible
//! once its payload is complete.

use crate::error::StoreError;
use crate::track::TrackRecord;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

const META_FILE: &str = "meta.json";

/// A cached track: its record plus the opaque audio payload.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub record: TrackRecord,
    pub payload: Bytes,
    /// When the entry was written.
    pub saved_at: DateTime<Utc>,
    /// Hex SHA-256 of the payload, recorded at write time.
    pub checksum: String,
}

/// What `meta.json` holds.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMeta {
    record: TrackRecord,
    saved_at: DateTime<Utc>,
    size: u64,
    checksum: String,
    payload_file: String,
}

/// Hex SHA-256 of a byte slice.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Durable keyed store of cache entries.
///
/// Operations on different keys may run in any order. Retry decisions belong
/// to the caller.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Insert or replace the entry for `track.id`.
    async fn put(&self, track: &TrackRecord, payload: Bytes) -> Result<(), StoreError>;

    /// Every entry, in no particular order.
    async fn get_all(&self) -> Result<Vec<CacheEntry>, StoreError>;

    /// Remove the entry for `id`. Absent ids are not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Filesystem-backed [`CacheStore`].
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open (or create) a store rooted at `root`.
    pub fn new(root: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        tracing::info!("Cache store opened at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, id: &str) -> PathBuf {
        self.root.join(&checksum(id.as_bytes())[..32])
    }

    fn read_meta(path: &Path) -> Result<StoredMeta, StoreError> {
        let json = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        Self::parse_meta(path, &json)
    }

    async fn read_meta_async(path: &Path) -> Result<StoredMeta, StoreError> {
        let json = tokio::fs::read(path).await.map_err(|e| StoreError::io(path, e))?;
        Self::parse_meta(path, &json)
    }

    fn parse_meta(path: &Path, json: &[u8]) -> Result<StoredMeta, StoreError> {
        serde_json::from_slice(json).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    fn scan(root: &Path) -> Result<Vec<CacheEntry>, StoreError> {
        if !root.exists() {
            return Ok(Vec::new());
        }
        fs::read_dir(root).map_err(|e| StoreError::io(root, e))?;

        let mut entries = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() || entry.file_name() != META_FILE {
                continue;
            }
            let meta_path = entry.path();
            let meta = match Self::read_meta(meta_path) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!("Skipping unreadable cache entry: {}", e);
                    continue;
                }
            };
            let Some(dir) = meta_path.parent() else {
                continue;
            };
            let payload_path = dir.join(&meta.payload_file);
            match fs::read(&payload_path) {
                Ok(bytes) => entries.push(CacheEntry {
                    record: meta.record,
                    payload: Bytes::from(bytes),
                    saved_at: meta.saved_at,
                    checksum: meta.checksum,
                }),
                Err(e) => {
                    tracing::warn!("Cache entry {} has no readable payload: {}", meta.record.id, e);
                }
            }
        }
        Ok(entries)
    }

    /// Remove payload files in `dir` other than `keep`.
    async fn remove_stale_payloads(dir: &Path, keep: &str) {
        let Ok(mut read_dir) = tokio::fs::read_dir(dir).await else {
            return;
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with("payload-") && name != keep {
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    tracing::debug!("Failed to remove stale payload {:?}: {}", entry.path(), e);
                }
            }
        }
    }
}

/// Write `bytes` to `path` through a temporary file and a rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn put(&self, track: &TrackRecord, payload: Bytes) -> Result<(), StoreError> {
        let dir = self.entry_dir(&track.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let sum = checksum(&payload);
        let payload_file = format!("payload-{}.bin", &sum[..16]);
        let meta = StoredMeta {
            record: track.clone(),
            saved_at: Utc::now(),
            size: payload.len() as u64,
            checksum: sum,
            payload_file: payload_file.clone(),
        };
        let meta_path = dir.join(META_FILE);
        let json = serde_json::to_vec_pretty(&meta).map_err(|source| StoreError::Corrupt {
            path: meta_path.clone(),
            source,
        })?;

        let previous = Self::read_meta_async(&meta_path).await.ok().map(|m| m.payload_file);

        write_atomic(&dir.join(&payload_file), &payload).await?;
        if let Err(e) = write_atomic(&meta_path, &json).await {
            if previous.as_deref() != Some(payload_file.as_str()) {
                let _ = tokio::fs::remove_file(dir.join(&payload_file)).await;
            }
            if previous.is_none() {
                let _ = tokio::fs::remove_dir(&dir).await;
            }
            return Err(e);
        }
        Self::remove_stale_payloads(&dir, &payload_file).await;

        tracing::debug!(
            "Stored {} ({:.2} KB) in {:?}",
            track.id,
            payload.len() as f64 / 1024.0,
            dir
        );
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::scan(&root))
            .await
            .map_err(|e| StoreError::io(&self.root, std::io::Error::other(e)))?
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let dir = self.entry_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!("Deleted cache entry {}", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, DiskStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(temp_dir.path().join("cache")).unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn put_then_get_all_returns_entry() {
        let (_dir, store) = create_test_store();
        let track = TrackRecord::remote("t1", "Cyberpunk City", "https://x/1.mp3");

        store.put(&track, Bytes::from_static(b"ID3audio")).await.unwrap();

        let entries = store.get_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record, track);
        assert_eq!(&entries[0].payload[..], b"ID3audio");
        assert_eq!(entries[0].checksum, checksum(b"ID3audio"));
    }

    #[tokio::test]
    async fn put_overwrites_metadata_and_payload() {
        let (_dir, store) = create_test_store();
        let mut track = TrackRecord::remote("t1", "Old title", "https://x/1.mp3");
        store.put(&track, Bytes::from_static(b"first")).await.unwrap();

        track.title = "New title".into();
        store.put(&track, Bytes::from_static(b"second")).await.unwrap();

        let entries = store.get_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.title, "New title");
        assert_eq!(&entries[0].payload[..], b"second");

        // The superseded payload file is gone.
        let dir = store.entry_dir("t1");
        let files = fs::read_dir(dir).unwrap().count();
        assert_eq!(files, 2);
    }

    #[tokio::test]
    async fn put_replaces_an_entry_with_corrupt_metadata() {
        let (_dir, store) = create_test_store();
        let track = TrackRecord::remote("t1", "x", "https://x/1.mp3");
        store.put(&track, Bytes::from_static(b"first")).await.unwrap();
        fs::write(store.entry_dir("t1").join(META_FILE), b"{not json").unwrap();
        assert!(store.get_all().await.unwrap().is_empty());

        store.put(&track, Bytes::from_static(b"second")).await.unwrap();

        let entries = store.get_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(&entries[0].payload[..], b"second");
        assert_eq!(fs::read_dir(store.entry_dir("t1")).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn delete_is_noop_for_absent_ids() {
        let (_dir, store) = create_test_store();
        store.delete("never-cached").await.unwrap();

        let track = TrackRecord::remote("t1", "x", "https://x/1.mp3");
        store.put(&track, Bytes::from_static(b"data")).await.unwrap();
        store.delete("t1").await.unwrap();
        store.delete("t1").await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ids_with_path_separators_stay_inside_root() {
        let (_dir, store) = create_test_store();
        let track = TrackRecord::remote("../../etc/passwd", "x", "https://x/1.mp3");
        store.put(&track, Bytes::from_static(b"data")).await.unwrap();

        let entries = store.get_all().await.unwrap();
        assert_eq!(entries[0].record.id, "../../etc/passwd");
        assert!(store.entry_dir(&track.id).starts_with(store.root()));
    }

    #[tokio::test]
    async fn directories_without_metadata_are_ignored() {
        let (_dir, store) = create_test_store();
        let orphan = store.root().join("orphan");
        fs::create_dir_all(&orphan).unwrap();
        fs::write(orphan.join("payload-0000.bin"), b"partial").unwrap();

        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_metadata_is_skipped() {
        let (_dir, store) = create_test_store();
        let track = TrackRecord::remote("good", "x", "https://x/1.mp3");
        store.put(&track, Bytes::from_static(b"data")).await.unwrap();

        let bad = store.root().join("bad");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join(META_FILE), b"{not json").unwrap();

        let entries = store.get_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.id, "good");
    }
}
