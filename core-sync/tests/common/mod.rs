//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::{Sha256Hasher, TokioFileSystem};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, ChangeKind, Clock, ContentHasher, RemoteChange, RemoteFile, SyncProvider, WatchEvent,
    WatchEventKind, WatchSource, WatchStream,
};
use chrono::{DateTime, Utc};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver, RecvError};
use core_sync::{PacingPolicy, SyncConfig, SyncEngine};
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify, Semaphore};

/// 2023-11-14T22:13:20Z
pub const NOW_MILLIS: i64 = 1_700_000_000_000;

pub fn hash_of(content: &str) -> String {
    Sha256Hasher::hash_bytes(content.as_bytes())
}

pub fn mtime_millis(path: &Path) -> i64 {
    let modified = std::fs::metadata(path).unwrap().modified().unwrap();
    DateTime::<Utc>::from(modified).timestamp_millis()
}

/// Background work disabled; tests drive passes explicitly.
pub fn quiet_config() -> SyncConfig {
    SyncConfig::default()
        .with_pacing(PacingPolicy::Unlimited)
        .with_sync_interval(Duration::from_secs(3600))
        .with_metadata_flush_interval(Duration::from_secs(3600))
        .with_full_sync_on_start(false)
        .with_scan_local_on_start(false)
}

// ============================================================================
// Clock
// ============================================================================

pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap()
    }
}

// ============================================================================
// Watch source
// ============================================================================

/// Watch source fed by the test instead of the OS.
#[derive(Default)]
pub struct ChannelWatchSource {
    sender: Mutex<Option<mpsc::UnboundedSender<WatchEvent>>>,
}

impl ChannelWatchSource {
    pub fn send(&self, event: WatchEvent) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            sender.send(event).ok();
        }
    }
}

#[async_trait]
impl WatchSource for ChannelWatchSource {
    async fn watch(&self, _root: &Path) -> BridgeResult<WatchStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }
}

// ============================================================================
// Hasher
// ============================================================================

/// SHA-256 hasher whose calls wait for a permit.
pub struct GatedHasher {
    pub gate: Semaphore,
    /// Notified whenever a hash starts.
    pub entered: Notify,
}

impl GatedHasher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            entered: Notify::new(),
        })
    }
}

#[async_trait]
impl ContentHasher for GatedHasher {
    async fn hash_file(&self, path: &Path) -> BridgeResult<String> {
        self.entered.notify_one();
        let _permit = self.gate.acquire().await;
        Sha256Hasher::new().hash_file(path).await
    }

    fn algorithm(&self) -> &'static str {
        "sha256"
    }
}

// ============================================================================
// Provider
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Upload(String),
    Download(String),
    Delete(String),
    CreateFolder(String),
    DeleteFolder(String),
}

#[derive(Debug, Clone)]
struct StoredFile {
    content: Vec<u8>,
    hash: String,
    modified_at: i64,
}

/// In-memory provider with a call log and failure injection.
#[derive(Default)]
pub struct MemoryProvider {
    files: Mutex<BTreeMap<String, StoredFile>>,
    folders: Mutex<BTreeSet<String>>,
    changes: Mutex<Vec<RemoteChange>>,
    calls: Mutex<Vec<Call>>,
    fail_uploads: AtomicBool,
    fail_listing: AtomicBool,
    gate: Option<Arc<Semaphore>>,
    /// Notified whenever an upload starts.
    pub entered: Notify,
}

impl MemoryProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Uploads block until `gate` has permits.
    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub fn failing_uploads() -> Arc<Self> {
        let provider = Self::default();
        provider.fail_uploads.store(true, Ordering::SeqCst);
        Arc::new(provider)
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Store a remote file without logging a call.
    pub fn put(&self, path: &str, content: &str, modified_at: i64) {
        self.files.lock().unwrap().insert(
            path.to_string(),
            StoredFile {
                content: content.as_bytes().to_vec(),
                hash: hash_of(content),
                modified_at,
            },
        );
    }

    pub fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    /// Queue a change for the next poll, describing the current remote state.
    pub fn push_change(&self, path: &str, kind: ChangeKind) {
        let file = self.files.lock().unwrap().get(path).cloned();
        let change = RemoteChange {
            path: path.to_string(),
            kind,
            hash: file.as_ref().filter(|_| kind.carries_content()).map(|f| f.hash.clone()),
            size: file.as_ref().map(|f| f.content.len() as u64).unwrap_or(0),
            modified_at: file.as_ref().map(|f| f.modified_at).unwrap_or(0),
        };
        self.changes.lock().unwrap().push(change);
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|f| String::from_utf8_lossy(&f.content).into_owned())
    }

    pub fn has_folder(&self, path: &str) -> bool {
        self.folders.lock().unwrap().contains(path)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Upload(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SyncProvider for MemoryProvider {
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> BridgeResult<()> {
        self.log(Call::Upload(remote_path.to_string()));
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(BridgeError::Remote("upload rejected".to_string()));
        }

        let content = tokio::fs::read(local_path).await?;
        self.files.lock().unwrap().insert(
            remote_path.to_string(),
            StoredFile {
                hash: Sha256Hasher::hash_bytes(&content),
                content,
                modified_at: Utc::now().timestamp_millis(),
            },
        );
        Ok(())
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> BridgeResult<()> {
        self.log(Call::Download(remote_path.to_string()));
        let content = self
            .files
            .lock()
            .unwrap()
            .get(remote_path)
            .map(|f| f.content.clone())
            .ok_or_else(|| BridgeError::NotFound(remote_path.to_string()))?;
        tokio::fs::write(local_path, content).await?;
        Ok(())
    }

    async fn delete_file(&self, remote_path: &str) -> BridgeResult<()> {
        self.log(Call::Delete(remote_path.to_string()));
        self.files.lock().unwrap().remove(remote_path);
        Ok(())
    }

    async fn create_folder(&self, remote_path: &str) -> BridgeResult<()> {
        self.log(Call::CreateFolder(remote_path.to_string()));
        self.folders.lock().unwrap().insert(remote_path.to_string());
        Ok(())
    }

    async fn delete_folder(&self, remote_path: &str) -> BridgeResult<()> {
        self.log(Call::DeleteFolder(remote_path.to_string()));
        self.folders.lock().unwrap().remove(remote_path);
        let prefix = format!("{}/", remote_path);
        self.files
            .lock()
            .unwrap()
            .retain(|path, _| !path.starts_with(&prefix));
        Ok(())
    }

    async fn list_files(&self) -> BridgeResult<Vec<RemoteFile>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(BridgeError::Remote("listing unavailable".to_string()));
        }
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(path, f)| RemoteFile {
                path: path.clone(),
                hash: f.hash.clone(),
                size: f.content.len() as u64,
                modified_at: f.modified_at,
            })
            .collect())
    }

    async fn get_changes(&self) -> BridgeResult<Vec<RemoteChange>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(BridgeError::Remote("change feed unavailable".to_string()));
        }
        Ok(std::mem::take(&mut *self.changes.lock().unwrap()))
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub dir: TempDir,
    pub root: PathBuf,
    pub engine: SyncEngine,
    pub events: Receiver<CoreEvent>,
    pub watch: Arc<ChannelWatchSource>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new(config: SyncConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Sync");
        Self::with_root(dir, root, config)
    }

    /// Reopen an engine on an existing directory.
    pub fn with_root(dir: TempDir, root: PathBuf, config: SyncConfig) -> Self {
        Self::with_hasher(dir, root, config, Arc::new(Sha256Hasher::new()))
    }

    pub fn with_hasher(
        dir: TempDir,
        root: PathBuf,
        config: SyncConfig,
        hasher: Arc<dyn ContentHasher>,
    ) -> Self {
        let watch = Arc::new(ChannelWatchSource::default());
        let clock = Arc::new(FixedClock::new(NOW_MILLIS));
        let core = CoreConfig::builder()
            .sync_root(&root)
            .file_system(Arc::new(TokioFileSystem::new()))
            .hasher(hasher)
            .watch_source(watch.clone())
            .clock(clock.clone())
            .build()
            .unwrap();

        let bus = Arc::new(EventBus::new(1024));
        let events = bus.subscribe();
        let engine = SyncEngine::new(core, config, bus).unwrap();

        Self {
            dir,
            root,
            engine,
            events,
            watch,
            clock,
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.path(rel)).ok()
    }

    /// Deliver a watch event as the OS would.
    pub fn notify(&self, kind: WatchEventKind, rel: &str) {
        self.watch.send(WatchEvent::new(kind, self.path(rel)));
    }

    /// Wait up to five seconds for an event matching `predicate`.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> CoreEvent
    where
        F: FnMut(&CoreEvent) -> bool,
    {
        let events = &mut self.events;
        tokio::time::timeout(Duration::from_secs(5), async move {
            loop {
                match events.recv().await {
                    Ok(event) if predicate(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("event bus closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Events published so far and not yet consumed.
    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
