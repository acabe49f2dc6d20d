//! # Sync Engine
//!
//! Orchestrates local change delivery, full sync and incremental sync.
//!
//! ## Overview
//!
//! The `SyncEngine` owns every moving part of the sync core:
//! - The [`LocalWatcher`] feeding the [`ChangeQueue`]
//! - The drain loop handing queued changes to the [`Dispatcher`]
//! - A periodic timer running incremental syncs
//! - A periodic metadata flush
//! - The [`ConflictDetector`] and [`ConflictResolver`] for remote content
//!
//! All item processing (draining one descriptor, applying one remote change)
//! happens under a single processing lane, so metadata is never mutated by
//! two items at once and at most one conflict is pending at any time.
//!
//! ## Workflow
//!
//! ### Start
//! 1. Create the sync root and metadata directory (failure aborts `start`)
//! 2. Load metadata, falling back to an empty map if it is unreadable
//! 3. Start watching the sync root
//! 4. Enqueue files that changed while the engine was stopped
//! 5. Spawn the watcher, drain, timer and flush tasks
//! 6. Run a full sync in the background
//!
//! ### Full Sync
//! Queued local changes are drained first. Then, for each provider in
//! turn: list every remote file, download files
//! missing locally, and run conflict detection on files present on both
//! sides. A listing failure skips only that provider.
//!
//! ### Incremental Sync
//! 1. Drain queued local changes
//! 2. Poll each provider for changes and apply them locally
//!
//! Remote changes applied locally are mirrored to every other provider.
//!
//! ### Stop
//! Background tasks are cancelled, queued changes are discarded, the item
//! in flight finishes, metadata is flushed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncConfig, SyncEngine};
//! use std::sync::Arc;
//!
//! let engine = SyncEngine::new(core_config, SyncConfig::default(), event_bus)?;
//! engine.add_provider("nas", Arc::new(nas_provider)).await?;
//! engine.start().await?;
//!
//! // ...
//!
//! engine.pause().await?;
//! engine.resume().await?;
//! engine.stop().await?;
//! ```

use crate::change_queue::ChangeQueue;
use crate::config::{PausePolicy, SyncConfig};
use crate::conflict::{ConflictDetector, ConflictRequest, ConflictResolver, FileSnapshot, Resolution};
use crate::context::SyncContext;
use crate::descriptor::{relative_path, validate_remote_path, ChangeDescriptor, Origin};
use crate::dispatcher::Dispatcher;
use crate::metadata_store::{FileMetadataRecord, MetadataStore};
use crate::pacer::Pacer;
use crate::registry::ProviderRegistry;
use crate::state::EngineState;
use crate::watcher::LocalWatcher;
use crate::{Result, SyncError};
use bridge_traits::{BridgeError, ChangeKind, RemoteChange, SyncProvider, WatchSource};
use core_runtime::config::CoreConfig;
use core_runtime::events::{
    CoreEvent, EngineEvent, ErrorCategory, EventBus, Receiver, SyncEvent,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

// ============================================================================
// Reports
// ============================================================================

/// Snapshot returned by [`SyncEngine::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub state: EngineState,
    /// Distinct paths waiting in the queue
    pub queued: usize,
    pub providers: Vec<String>,
    /// Paths recorded in the metadata store
    pub tracked_entries: usize,
    pub sync_root: PathBuf,
}

/// Summary of one full or incremental sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Local descriptors drained before polling
    pub local_processed: u64,
    /// Remote files or changes applied
    pub remote_applied: u64,
    /// Providers whose listing or poll failed
    pub failed_providers: Vec<String>,
}

// ============================================================================
// Engine
// ============================================================================

struct Session {
    id: Uuid,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct EngineInner {
    ctx: Arc<SyncContext>,
    config: SyncConfig,
    watch_source: Arc<dyn WatchSource>,
    registry: Arc<ProviderRegistry>,
    queue: Arc<ChangeQueue>,
    dispatcher: Dispatcher,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    watcher: LocalWatcher,
    pacer: Pacer,
    state: watch::Sender<EngineState>,
    /// Held while one item is processed
    lane: Mutex<()>,
    /// Held across lifecycle transitions
    session: Mutex<Option<Session>>,
    conflict_requests: Mutex<Option<mpsc::Receiver<ConflictRequest>>>,
}

/// Local-to-remote file sync engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create a stopped engine.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if either configuration is invalid.
    pub fn new(core: CoreConfig, config: SyncConfig, event_bus: Arc<EventBus>) -> Result<Self> {
        core.validate()
            .map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;

        let ctx = Arc::new(SyncContext::from_core(&core, config.ignore.clone(), event_bus));
        let registry = Arc::new(ProviderRegistry::new());
        let queue = Arc::new(ChangeQueue::new());
        let (resolver, conflict_requests) =
            ConflictResolver::new(Arc::clone(&ctx), config.conflict_strategy);
        let (state, _) = watch::channel(EngineState::Stopped);

        Ok(Self {
            inner: Arc::new(EngineInner {
                dispatcher: Dispatcher::new(
                    Arc::clone(&ctx),
                    Arc::clone(&registry),
                    config.metadata_commit,
                ),
                detector: ConflictDetector::new(Arc::clone(&ctx)),
                watcher: LocalWatcher::new(Arc::clone(&ctx), Arc::clone(&queue)),
                pacer: Pacer::new(config.pacing),
                watch_source: Arc::clone(&core.watch_source),
                resolver,
                registry,
                queue,
                state,
                lane: Mutex::new(()),
                session: Mutex::new(None),
                conflict_requests: Mutex::new(conflict_requests),
                config,
                ctx,
            }),
        })
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start watching and syncing.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidStateTransition`] if the engine is not stopped
    /// - [`SyncError::SyncRootUnavailable`] if the sync root cannot be
    ///   created, read or watched
    #[instrument(skip(self), fields(sync_root = ?self.inner.ctx.sync_root))]
    pub async fn start(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        let current = self.state();
        if current != EngineState::Stopped {
            return Err(SyncError::InvalidStateTransition {
                from: current.to_string(),
                to: EngineState::Running.to_string(),
                reason: "engine is already started".to_string(),
            });
        }

        info!("Phase 1: Preparing sync root");
        self.prepare_root().await?;

        info!("Phase 2: Loading metadata");
        if let Err(e) = self.inner.ctx.metadata.load().await {
            self.inner
                .ctx
                .emit_error(ErrorCategory::MetadataIo, None, None, e.to_string());
        }

        info!("Phase 3: Watching sync root");
        let root = self.inner.ctx.sync_root.clone();
        let stream = self
            .inner
            .watch_source
            .watch(&root)
            .await
            .map_err(|e| root_unavailable(&root, e))?;

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.inner.state.send_replace(EngineState::Running);
        self.inner
            .ctx
            .emit(CoreEvent::Engine(EngineEvent::Started {
                session_id: id.to_string(),
                sync_root: root.display().to_string(),
            }));

        if self.inner.config.scan_local_on_start {
            info!("Phase 4: Scanning for offline changes");
            if let Err(e) = self.inner.watcher.scan().await {
                warn!(error = %e, "Local scan failed");
                self.inner
                    .ctx
                    .emit_error(e.category(), None, None, e.to_string());
            }
        }

        info!("Phase 5: Spawning background tasks");
        let mut tasks = Vec::with_capacity(5);

        let engine = self.clone();
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            engine.inner.watcher.run(stream, token).await;
        }));

        let engine = self.clone();
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { engine.run_drain_loop(token).await }));

        let engine = self.clone();
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { engine.run_timer(token).await }));

        let engine = self.clone();
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { engine.run_metadata_flush(token).await }));

        if self.inner.config.full_sync_on_start {
            let engine = self.clone();
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = engine.full_sync_with(&token).await {
                    error!("Startup full sync failed: {}", e);
                }
            }));
        }

        *session = Some(Session { id, cancel, tasks });
        info!(session_id = %id, "Sync engine started");
        Ok(())
    }

    async fn prepare_root(&self) -> Result<()> {
        let ctx = &self.inner.ctx;
        ctx.fs
            .create_dir_all(&ctx.sync_root)
            .await
            .map_err(|e| root_unavailable(&ctx.sync_root, e))?;

        let metadata = ctx
            .fs
            .metadata(&ctx.sync_root)
            .await
            .map_err(|e| root_unavailable(&ctx.sync_root, e))?;
        if !metadata.is_directory {
            return Err(SyncError::SyncRootUnavailable {
                path: ctx.sync_root.display().to_string(),
                message: "not a directory".to_string(),
            });
        }

        ctx.fs
            .create_dir_all(&ctx.metadata_dir)
            .await
            .map_err(|e| root_unavailable(&ctx.metadata_dir, e))
    }

    /// Stop all background work.
    ///
    /// Queued changes are discarded; the item being processed, if any, is
    /// allowed to finish before this returns. Metadata is flushed.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        self.state().transition(EngineState::Stopped)?;

        let Some(active) = session.take() else {
            self.inner.state.send_replace(EngineState::Stopped);
            return Ok(());
        };

        info!(session_id = %active.id, "Stopping sync engine");
        active.cancel.cancel();

        // Wait for the in-flight item.
        drop(self.inner.lane.lock().await);

        for task in active.tasks {
            if let Err(e) = task.await {
                error!("Background task ended abnormally: {}", e);
            }
        }

        // After the watcher has joined, so a change it was still hashing is
        // discarded too.
        let discarded = self.inner.queue.clear().await;

        self.inner.state.send_replace(EngineState::Stopped);

        if let Err(e) = self.inner.ctx.metadata.save().await {
            warn!(error = %e, "Failed to flush metadata on stop");
            self.inner
                .ctx
                .emit_error(ErrorCategory::MetadataIo, None, None, e.to_string());
        }

        self.inner
            .ctx
            .emit(CoreEvent::Engine(EngineEvent::Stopped {
                session_id: active.id.to_string(),
                discarded,
            }));
        info!(discarded, "Sync engine stopped");
        Ok(())
    }

    /// Suspend the periodic remote poll. Under
    /// [`PausePolicy::SuspendAll`] queued local changes are held as well.
    pub async fn pause(&self) -> Result<()> {
        let _session = self.inner.session.lock().await;
        let next = self.state().transition(EngineState::Paused)?;
        self.inner.state.send_replace(next);

        self.inner.ctx.emit(CoreEvent::Engine(EngineEvent::Paused));
        info!(policy = ?self.inner.config.pause_policy, "Sync paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let _session = self.inner.session.lock().await;
        let current = self.state();
        if current != EngineState::Paused {
            return Err(SyncError::InvalidStateTransition {
                from: current.to_string(),
                to: EngineState::Running.to_string(),
                reason: "engine is not paused".to_string(),
            });
        }
        self.inner.state.send_replace(EngineState::Running);
        self.inner.queue.wake();

        self.inner.ctx.emit(CoreEvent::Engine(EngineEvent::Resumed));
        info!("Sync resumed");
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state(),
            queued: self.inner.queue.len().await,
            providers: self.inner.registry.names().await,
            tracked_entries: self.inner.ctx.metadata.len().await,
            sync_root: self.inner.ctx.sync_root.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Providers
    // ------------------------------------------------------------------------

    pub async fn add_provider(&self, name: impl Into<String>, provider: Arc<dyn SyncProvider>) -> Result<()> {
        let name = name.into();
        self.inner.registry.add(name.clone(), provider).await?;
        self.inner
            .ctx
            .emit(CoreEvent::Engine(EngineEvent::ProviderAdded { provider: name }));
        Ok(())
    }

    pub async fn remove_provider(&self, name: &str) -> Result<()> {
        self.inner.registry.remove(name).await?;
        self.inner
            .ctx
            .emit(CoreEvent::Engine(EngineEvent::ProviderRemoved {
                provider: name.to_string(),
            }));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Host access
    // ------------------------------------------------------------------------

    /// Queue a descriptor as if the watcher had produced it.
    pub async fn enqueue(&self, descriptor: ChangeDescriptor) {
        self.inner.queue.enqueue(descriptor).await;
    }

    /// Receiving end for manual conflict decisions. `Some` once, and only
    /// with [`ConflictStrategy::Manual`](crate::ConflictStrategy::Manual).
    pub async fn take_conflict_requests(&self) -> Option<mpsc::Receiver<ConflictRequest>> {
        self.inner.conflict_requests.lock().await.take()
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.inner.ctx.event_bus.subscribe()
    }

    pub fn metadata(&self) -> Arc<MetadataStore> {
        Arc::clone(&self.inner.ctx.metadata)
    }

    /// Write metadata to disk now.
    pub async fn flush_metadata(&self) -> Result<()> {
        self.inner.ctx.metadata.save().await
    }

    // ------------------------------------------------------------------------
    // Sync passes
    // ------------------------------------------------------------------------

    /// Process queued local changes until the queue is empty.
    ///
    /// Returns the number of descriptors processed. Does nothing while
    /// paused under [`PausePolicy::SuspendAll`].
    pub async fn drain_pending(&self) -> u64 {
        let cancel = self.current_token().await;
        let processed = self.drain_with(&cancel).await;
        // An item popped by the drain loop may still be in flight.
        drop(self.inner.lane.lock().await);
        processed
    }

    /// Drain local changes, then poll every provider for remote changes.
    pub async fn incremental_sync(&self) -> Result<SyncReport> {
        let cancel = self.current_token().await;
        self.incremental_sync_with(&cancel).await
    }

    /// Drain queued local changes, then pull every provider's full listing.
    pub async fn full_sync(&self) -> Result<SyncReport> {
        let cancel = self.current_token().await;
        self.full_sync_with(&cancel).await
    }

    async fn current_token(&self) -> CancellationToken {
        match self.inner.session.lock().await.as_ref() {
            Some(session) => session.cancel.clone(),
            None => CancellationToken::new(),
        }
    }

    fn dispatch_suspended(&self) -> bool {
        self.inner.config.pause_policy == PausePolicy::SuspendAll
            && self.state() == EngineState::Paused
    }

    async fn drain_with(&self, cancel: &CancellationToken) -> u64 {
        let mut processed = 0u64;

        loop {
            if cancel.is_cancelled() || self.dispatch_suspended() || self.inner.queue.is_empty().await {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.inner.pacer.acquire() => {}
            }

            let _lane = self.inner.lane.lock().await;
            if cancel.is_cancelled() || self.dispatch_suspended() {
                break;
            }
            let Some(descriptor) = self.inner.queue.pop().await else {
                break;
            };

            self.inner.dispatcher.dispatch(descriptor).await;
            processed += 1;

            let remaining = self.inner.queue.len().await as u64;
            self.inner.ctx.emit(CoreEvent::Sync(SyncEvent::Progress {
                phase: "drain".to_string(),
                processed,
                remaining,
            }));
        }

        if processed > 0 {
            debug!(processed, "Drain pass complete");
        }
        processed
    }

    #[instrument(skip(self, cancel))]
    async fn incremental_sync_with(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        debug!("Phase 1: Draining local changes");
        report.local_processed = self.drain_with(cancel).await;

        debug!("Phase 2: Polling providers");
        for (name, provider) in self.inner.registry.snapshot().await {
            if cancel.is_cancelled() {
                break;
            }

            let changes = match provider.get_changes().await {
                Ok(changes) => changes,
                Err(e) => {
                    warn!(provider = %name, error = %e, "Polling provider failed");
                    self.inner
                        .ctx
                        .emit_error(ErrorCategory::Provider, Some(name.as_str()), None, e.to_string());
                    report.failed_providers.push(name);
                    continue;
                }
            };

            for change in changes {
                if cancel.is_cancelled() {
                    break;
                }
                if self.inner.ctx.ignore.is_ignored(&change.path) {
                    continue;
                }

                self.inner.ctx.emit(CoreEvent::Sync(SyncEvent::RemoteChange {
                    provider: name.clone(),
                    path: change.path.clone(),
                    kind: change.kind,
                }));

                let _lane = self.inner.lane.lock().await;
                if cancel.is_cancelled() {
                    break;
                }
                self.apply_remote(&name, provider.as_ref(), &change, cancel)
                    .await;
                report.remote_applied += 1;
            }
        }

        info!(
            local = report.local_processed,
            remote = report.remote_applied,
            "Incremental sync complete"
        );
        Ok(report)
    }

    #[instrument(skip(self, cancel))]
    async fn full_sync_with(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        // Pending local deletes must reach providers before their listings
        // are read back.
        report.local_processed = self.drain_with(cancel).await;
        drop(self.inner.lane.lock().await);

        for (name, provider) in self.inner.registry.snapshot().await {
            if cancel.is_cancelled() {
                break;
            }

            info!(provider = %name, "Full sync: listing remote files");
            let files = match provider.list_files().await {
                Ok(files) => files,
                Err(e) => {
                    warn!(provider = %name, error = %e, "Listing failed, skipping provider");
                    self.inner
                        .ctx
                        .emit_error(ErrorCategory::Provider, Some(name.as_str()), None, e.to_string());
                    report.failed_providers.push(name);
                    continue;
                }
            };

            let total = files.len() as u64;
            let mut processed = 0u64;
            for file in files {
                if cancel.is_cancelled() {
                    break;
                }
                processed += 1;
                if self.inner.ctx.ignore.is_ignored(&file.path) {
                    continue;
                }

                let change = RemoteChange::from_listing(file);
                {
                    let _lane = self.inner.lane.lock().await;
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.apply_remote(&name, provider.as_ref(), &change, cancel)
                        .await;
                }
                report.remote_applied += 1;

                self.inner.ctx.emit(CoreEvent::Sync(SyncEvent::Progress {
                    phase: "fullSync".to_string(),
                    processed,
                    remaining: total - processed,
                }));
            }
            info!(provider = %name, files = total, "Full sync: provider done");
        }

        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------------

    async fn run_drain_loop(&self, cancel: CancellationToken) {
        loop {
            self.drain_with(&cancel).await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.inner.queue.notified() => {}
            }
        }
        debug!("Drain loop stopped");
    }

    async fn run_timer(&self, cancel: CancellationToken) {
        let period = self.inner.config.sync_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.state() != EngineState::Running {
                        debug!("Paused, skipping remote poll");
                        continue;
                    }
                    if let Err(e) = self.incremental_sync_with(&cancel).await {
                        error!("Incremental sync failed: {}", e);
                    }
                }
            }
        }
        debug!("Sync timer stopped");
    }

    async fn run_metadata_flush(&self, cancel: CancellationToken) {
        let period = self.inner.config.metadata_flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.inner.ctx.metadata.flush_if_dirty().await {
                        warn!(error = %e, "Periodic metadata flush failed");
                        self.inner
                            .ctx
                            .emit_error(ErrorCategory::MetadataIo, None, None, e.to_string());
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Remote change application
    // ------------------------------------------------------------------------

    /// Apply one remote change locally. Failures are reported, never returned.
    #[instrument(skip(self, provider, change, cancel), fields(provider = %name, path = %change.path, kind = %change.kind))]
    async fn apply_remote(
        &self,
        name: &str,
        provider: &dyn SyncProvider,
        change: &RemoteChange,
        cancel: &CancellationToken,
    ) {
        if let Err(reason) = validate_remote_path(&change.path) {
            warn!(reason = %reason, "Rejecting remote path outside the sync root");
            self.inner.ctx.emit_error(
                ErrorCategory::Provider,
                Some(name),
                Some(change.path.as_str()),
                format!("rejected remote path: {}", reason),
            );
            return;
        }

        let result = match change.kind {
            ChangeKind::Created | ChangeKind::Modified => {
                self.apply_remote_file(name, provider, change, cancel).await
            }
            ChangeKind::Deleted => self.apply_remote_delete(name, change).await,
            ChangeKind::DirCreated => self.apply_remote_dir_created(name, change).await,
            ChangeKind::DirDeleted => self.apply_remote_dir_deleted(name, change).await,
        };

        if let Err(e) = result {
            warn!(error = %e, "Failed to apply remote change");
            self.inner.ctx.emit_error(
                e.category(),
                Some(name),
                Some(change.path.as_str()),
                e.to_string(),
            );
        }
    }

    async fn apply_remote_file(
        &self,
        name: &str,
        provider: &dyn SyncProvider,
        change: &RemoteChange,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ctx = &self.inner.ctx;
        let path = change.path.as_str();
        let Some(remote_hash) = change.hash.clone() else {
            return Err(SyncError::Provider {
                provider: name.to_string(),
                path: path.to_string(),
                message: "change carries no content hash".to_string(),
            });
        };

        let local = ctx.local_path(path);
        let existing = match ctx.fs.metadata(&local).await {
            Ok(metadata) => Some(metadata),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(local_io(path, e)),
        };

        match existing {
            None => {
                let metadata = ctx
                    .download_into_place(provider, path, &local)
                    .await
                    .map_err(|e| SyncError::Provider {
                        provider: name.to_string(),
                        path: path.to_string(),
                        message: format!("download failed: {}", e),
                    })?;

                let modified_at = metadata.modified_or_epoch();
                ctx.metadata
                    .upsert(
                        path,
                        FileMetadataRecord::file(
                            remote_hash.clone(),
                            metadata.size,
                            modified_at,
                            ctx.now_millis(),
                        ),
                    )
                    .await;
                ctx.emit(CoreEvent::Sync(SyncEvent::FileDownloaded {
                    provider: name.to_string(),
                    path: path.to_string(),
                    size: metadata.size,
                }));
                info!(size = metadata.size, "Downloaded new remote file");

                let descriptor = ChangeDescriptor::from_remote(name, change, ctx.now_millis())
                    .with_content(remote_hash, metadata.size, modified_at);
                self.mirror(descriptor).await;
                Ok(())
            }
            Some(metadata) if metadata.is_directory => {
                warn!("Remote file collides with a local directory, skipping");
                Ok(())
            }
            Some(_) => {
                let remote = FileSnapshot {
                    hash: remote_hash,
                    size: change.size,
                    modified_at: change.modified_at,
                };
                self.reconcile(name, provider, change, remote, cancel).await
            }
        }
    }

    /// Both sides have the file: detect, then resolve.
    async fn reconcile(
        &self,
        name: &str,
        provider: &dyn SyncProvider,
        change: &RemoteChange,
        remote: FileSnapshot,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ctx = &self.inner.ctx;
        let path = change.path.as_str();

        let Some(conflict) = self.inner.detector.detect(name, path, &remote).await? else {
            let recorded = ctx.metadata.get(path).await;
            if recorded.map(|r| r.content_hash) != Some(remote.hash.clone()) {
                let metadata = ctx
                    .fs
                    .metadata(&ctx.local_path(path))
                    .await
                    .map_err(|e| local_io(path, e))?;
                ctx.metadata
                    .upsert(
                        path,
                        FileMetadataRecord::file(
                            remote.hash,
                            metadata.size,
                            metadata.modified_or_epoch(),
                            ctx.now_millis(),
                        ),
                    )
                    .await;
            }
            return Ok(());
        };

        let outcome = self
            .inner
            .resolver
            .resolve(&conflict, provider, cancel)
            .await?;

        let now = ctx.now_millis();
        let kept = match outcome.resolution {
            Resolution::KeepRemote => {
                let metadata = ctx
                    .fs
                    .metadata(&ctx.local_path(path))
                    .await
                    .map_err(|e| local_io(path, e))?;
                FileSnapshot {
                    hash: conflict.remote.hash.clone(),
                    size: metadata.size,
                    modified_at: metadata.modified_or_epoch(),
                }
            }
            Resolution::KeepLocal => conflict.local.clone(),
            Resolution::Skip => return Ok(()),
        };

        ctx.metadata
            .upsert(
                path,
                FileMetadataRecord::file(kept.hash.clone(), kept.size, kept.modified_at, now),
            )
            .await;

        let descriptor = ChangeDescriptor::local(path, ChangeKind::Modified, now)
            .with_content(kept.hash, kept.size, kept.modified_at)
            .with_origin(Origin::Provider(name.to_string()));
        self.mirror(descriptor).await;
        Ok(())
    }

    async fn apply_remote_delete(&self, name: &str, change: &RemoteChange) -> Result<()> {
        let ctx = &self.inner.ctx;
        let path = change.path.as_str();
        let local = ctx.local_path(path);
        let record = ctx.metadata.get(path).await;

        let exists = match ctx.fs.metadata(&local).await {
            Ok(metadata) => !metadata.is_directory,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(local_io(path, e)),
        };

        match (exists, record) {
            (false, None) => Ok(()),
            (false, Some(_)) => {
                ctx.metadata.remove(path).await;
                self.mirror_remote(name, change).await;
                Ok(())
            }
            (true, None) => {
                debug!("Untracked local file kept");
                Ok(())
            }
            (true, Some(record)) => {
                let hash = ctx
                    .hasher
                    .hash_file(&local)
                    .await
                    .map_err(|e| local_io(path, e))?;

                if hash != record.content_hash {
                    warn!("Local copy changed since last sync, keeping it");
                    self.inner
                        .queue
                        .enqueue(ChangeDescriptor::local(path, ChangeKind::Modified, ctx.now_millis()))
                        .await;
                    return Ok(());
                }

                ctx.fs
                    .delete_file(&local)
                    .await
                    .map_err(|e| local_io(path, e))?;
                ctx.metadata.remove(path).await;
                info!("Deleted local copy of remotely deleted file");
                self.mirror_remote(name, change).await;
                Ok(())
            }
        }
    }

    async fn apply_remote_dir_created(&self, name: &str, change: &RemoteChange) -> Result<()> {
        let ctx = &self.inner.ctx;
        let path = change.path.as_str();
        let local = ctx.local_path(path);

        let tracked = ctx
            .metadata
            .get(path)
            .await
            .is_some_and(|record| record.is_directory);
        if tracked && ctx.fs.exists(&local).await.unwrap_or(false) {
            return Ok(());
        }

        ctx.fs
            .create_dir_all(&local)
            .await
            .map_err(|e| local_io(path, e))?;
        ctx.metadata
            .upsert(path, FileMetadataRecord::directory(ctx.now_millis()))
            .await;
        debug!("Created local directory");

        self.mirror_remote(name, change).await;
        Ok(())
    }

    async fn apply_remote_dir_deleted(&self, name: &str, change: &RemoteChange) -> Result<()> {
        let ctx = &self.inner.ctx;
        let path = change.path.as_str();
        let local = ctx.local_path(path);

        let exists = ctx
            .fs
            .exists(&local)
            .await
            .map_err(|e| local_io(path, e))?;
        if !exists {
            if ctx.metadata.remove_tree(path).await > 0 {
                self.mirror_remote(name, change).await;
            }
            return Ok(());
        }

        let files = ctx
            .fs
            .list_files_recursive(&local)
            .await
            .map_err(|e| local_io(path, e))?;
        for file in files {
            let Some(relative) = relative_path(&ctx.sync_root, &file) else {
                continue;
            };
            let Some(record) = ctx.metadata.get(&relative).await else {
                warn!(file = %relative, "Directory holds untracked files, keeping it");
                return Ok(());
            };
            let hash = ctx
                .hasher
                .hash_file(&file)
                .await
                .map_err(|e| local_io(&relative, e))?;
            if hash != record.content_hash {
                warn!(file = %relative, "Directory holds locally modified files, keeping it");
                return Ok(());
            }
        }

        ctx.fs
            .delete_dir_all(&local)
            .await
            .map_err(|e| local_io(path, e))?;
        ctx.metadata.remove_tree(path).await;
        info!("Deleted local directory");

        self.mirror_remote(name, change).await;
        Ok(())
    }

    /// Forward a change that was applied locally to every other provider.
    async fn mirror(&self, descriptor: ChangeDescriptor) {
        let report = self.inner.dispatcher.dispatch(descriptor).await;
        if report.attempted() > 0 {
            debug!(
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                "Mirrored remote change"
            );
        }
    }

    async fn mirror_remote(&self, name: &str, change: &RemoteChange) {
        let descriptor = ChangeDescriptor::from_remote(name, change, self.inner.ctx.now_millis());
        self.mirror(descriptor).await;
    }
}

fn root_unavailable(path: &std::path::Path, e: BridgeError) -> SyncError {
    SyncError::SyncRootUnavailable {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn local_io(path: &str, e: BridgeError) -> SyncError {
    SyncError::WatcherIo {
        path: path.to_string(),
        message: e.to_string(),
    }
}
