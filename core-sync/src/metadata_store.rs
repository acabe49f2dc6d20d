//! # Metadata Store
//!
//! Last-known synced state per path, persisted as one JSON document.
//!
//! ## Overview
//!
//! The store is the engine's single source of truth for "what did this path
//! look like when it was last synced". Conflict detection, echo suppression
//! and remote deletions all consult it.
//!
//! The file lives at `<sync_root>/<metadata_dir>/metadata.json` and maps each
//! relative path to a [`FileMetadataRecord`]:
//!
//! ```json
//! {
//!   "docs/a.txt": { "contentHash": "2cf2…", "size": 5, "modifiedAt": 1700000000000, "lastSyncAt": 1700000001000 },
//!   "docs": { "contentHash": "", "size": 0, "modifiedAt": 0, "lastSyncAt": 1700000001000, "isDirectory": true }
//! }
//! ```
//!
//! It is loaded wholesale at start and rewritten wholesale on save. Saves go
//! through `metadata.json.tmp` and a rename, so a crash mid-write leaves the
//! previous document intact.

use crate::descriptor::is_within;
use crate::error::{Result, SyncError};
use bridge_traits::FileSystemAccess;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const METADATA_FILE_NAME: &str = "metadata.json";
const METADATA_TMP_FILE_NAME: &str = "metadata.json.tmp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadataRecord {
    /// Lowercase hex digest; empty for directories
    pub content_hash: String,
    pub size: u64,
    /// Unix epoch milliseconds
    pub modified_at: i64,
    /// Unix epoch milliseconds
    pub last_sync_at: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_directory: bool,
}

impl FileMetadataRecord {
    pub fn file(content_hash: impl Into<String>, size: u64, modified_at: i64, last_sync_at: i64) -> Self {
        Self {
            content_hash: content_hash.into(),
            size,
            modified_at,
            last_sync_at,
            is_directory: false,
        }
    }

    pub fn directory(last_sync_at: i64) -> Self {
        Self {
            content_hash: String::new(),
            size: 0,
            modified_at: 0,
            last_sync_at,
            is_directory: true,
        }
    }
}

pub struct MetadataStore {
    fs: Arc<dyn FileSystemAccess>,
    dir: PathBuf,
    records: RwLock<HashMap<String, FileMetadataRecord>>,
    dirty: AtomicBool,
    revision: AtomicU64,
}

impl MetadataStore {
    /// Store persisted below `dir` (the engine's hidden metadata directory).
    pub fn new(fs: Arc<dyn FileSystemAccess>, dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            dir: dir.into(),
            records: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            revision: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE_NAME)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replace the in-memory map with the persisted document.
    ///
    /// A missing file is an empty store. An unreadable or corrupt file also
    /// leaves the store empty, but is reported as [`SyncError::MetadataIo`]
    /// so the caller can surface it.
    pub async fn load(&self) -> Result<usize> {
        let path = self.path();
        let loaded = self.read_document(&path).await;

        let mut records = self.records.write().await;
        self.dirty.store(false, Ordering::SeqCst);
        match loaded {
            Ok(map) => {
                *records = map;
                info!(path = ?path, entries = records.len(), "Loaded sync metadata");
                Ok(records.len())
            }
            Err(e) => {
                records.clear();
                warn!(path = ?path, error = %e, "Sync metadata unreadable, starting empty");
                Err(e)
            }
        }
    }

    async fn read_document(&self, path: &Path) -> Result<HashMap<String, FileMetadataRecord>> {
        let data = match self.fs.read_file(path).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return Ok(HashMap::new()),
            Err(e) => return Err(SyncError::MetadataIo(format!("read {:?}: {}", path, e))),
        };

        serde_json::from_slice(&data)
            .map_err(|e| SyncError::MetadataIo(format!("parse {:?}: {}", path, e)))
    }

    /// Rewrite the whole document atomically.
    pub async fn save(&self) -> Result<()> {
        let document = {
            let records = self.records.read().await;
            let ordered: BTreeMap<&String, &FileMetadataRecord> = records.iter().collect();
            let document = serde_json::to_vec_pretty(&ordered)
                .map_err(|e| SyncError::MetadataIo(format!("serialize: {}", e)))?;
            // Cleared under the guard so a later upsert marks the store dirty again.
            self.dirty.store(false, Ordering::SeqCst);
            document
        };

        let tmp = self.dir.join(METADATA_TMP_FILE_NAME);
        let target = self.path();
        let result = async {
            self.fs.create_dir_all(&self.dir).await?;
            self.fs.write_file(&tmp, Bytes::from(document)).await?;
            self.fs.rename(&tmp, &target).await
        }
        .await;

        if let Err(e) = result {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(SyncError::MetadataIo(format!("write {:?}: {}", target, e)));
        }

        debug!(path = ?target, "Saved sync metadata");
        Ok(())
    }

    /// Save only if something changed since the last load or save.
    pub async fn flush_if_dirty(&self) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.save().await?;
        Ok(true)
    }

    pub async fn get(&self, path: &str) -> Option<FileMetadataRecord> {
        self.records.read().await.get(path).cloned()
    }

    pub async fn upsert(&self, path: impl Into<String>, record: FileMetadataRecord) {
        self.records.write().await.insert(path.into(), record);
        self.touch();
    }

    pub async fn remove(&self, path: &str) -> Option<FileMetadataRecord> {
        let removed = self.records.write().await.remove(path);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Forget `dir` and everything recorded below it.
    pub async fn remove_tree(&self, dir: &str) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|path, _| !is_within(path, dir));
        let removed = before - records.len();
        drop(records);

        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Whether `dir` itself or anything below it is recorded.
    pub async fn tracks_tree(&self, dir: &str) -> bool {
        self.records
            .read()
            .await
            .keys()
            .any(|path| is_within(path, dir))
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> HashMap<String, FileMetadataRecord> {
        self.records.read().await.clone()
    }

    /// Number of mutations since the store was created.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
        self.dirty.store(true, Ordering::SeqCst);
    }
}
