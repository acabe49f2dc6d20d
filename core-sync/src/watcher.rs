//! # Local Watcher
//!
//! Turns raw [`WatchEvent`]s for the sync root into [`ChangeDescriptor`]s on
//! the [`ChangeQueue`].
//!
//! ## Overview
//!
//! - Paths under the metadata directory and other ignored paths are dropped.
//! - Creations and modifications are stated and hashed *before* they are
//!   enqueued. If either fails the event is dropped, a `WatcherIo` error is
//!   emitted, and the watcher carries on.
//! - Removals are enqueued immediately without touching the disk. Whether a
//!   removed path was a directory comes from the platform hint or, failing
//!   that, from the metadata store.
//! - Every accepted change is announced with [`SyncEvent::LocalChange`].
//!
//! At startup [`LocalWatcher::scan`] enqueues files that changed while the
//! engine was not running.

use crate::change_queue::ChangeQueue;
use crate::context::SyncContext;
use crate::descriptor::{relative_path, ChangeDescriptor};
use crate::{Result, SyncError};
use bridge_traits::{ChangeKind, EntryHint, WatchEvent, WatchEventKind, WatchStream};
use core_runtime::events::{CoreEvent, ErrorCategory, SyncEvent};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

pub struct LocalWatcher {
    ctx: Arc<SyncContext>,
    queue: Arc<ChangeQueue>,
}

impl LocalWatcher {
    pub fn new(ctx: Arc<SyncContext>, queue: Arc<ChangeQueue>) -> Self {
        Self { ctx, queue }
    }

    /// Consume `stream` until it ends or `cancel` fires.
    pub async fn run(&self, mut stream: WatchStream, cancel: CancellationToken) {
        info!(root = ?self.ctx.sync_root, "Local watcher running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(event) => {
                        self.handle_event(event).await;
                    }
                    None => {
                        warn!("Watch stream ended, local changes are no longer observed");
                        break;
                    }
                },
            }
        }
        debug!("Local watcher stopped");
    }

    /// Normalize one event and enqueue it. Returns the enqueued descriptor.
    pub async fn handle_event(&self, event: WatchEvent) -> Option<ChangeDescriptor> {
        let path = relative_path(&self.ctx.sync_root, &event.path)?;
        if self.ctx.ignore.is_ignored(&path) {
            trace!(path = %path, "Ignored path");
            return None;
        }

        let descriptor = match event.kind {
            WatchEventKind::Removed => self.describe_removal(path, event.entry).await,
            WatchEventKind::Created | WatchEventKind::Modified => {
                match self.describe_present(path, event.kind).await {
                    Ok(descriptor) => descriptor?,
                    Err(e) => {
                        warn!(error = %e, "Dropping local change");
                        if let SyncError::WatcherIo { path, message } = &e {
                            self.ctx.emit_error(
                                ErrorCategory::WatcherIo,
                                None,
                                Some(path.as_str()),
                                message.clone(),
                            );
                        }
                        return None;
                    }
                }
            }
        };

        self.accept(descriptor.clone()).await;
        Some(descriptor)
    }

    async fn describe_removal(&self, path: String, hint: EntryHint) -> ChangeDescriptor {
        let is_directory = match hint {
            EntryHint::Directory => true,
            EntryHint::File => false,
            EntryHint::Unknown => match self.ctx.metadata.get(&path).await {
                Some(record) => record.is_directory,
                None => self.ctx.metadata.tracks_tree(&path).await,
            },
        };

        let kind = if is_directory {
            ChangeKind::DirDeleted
        } else {
            ChangeKind::Deleted
        };
        ChangeDescriptor::local(path, kind, self.ctx.now_millis())
    }

    /// `Ok(None)` means there is nothing to enqueue (the path vanished, or a
    /// directory reported a modification).
    async fn describe_present(
        &self,
        path: String,
        kind: WatchEventKind,
    ) -> Result<Option<ChangeDescriptor>> {
        let absolute = self.ctx.local_path(&path);
        let error_path = path.clone();
        let io_error = move |message: String| SyncError::WatcherIo {
            path: error_path.clone(),
            message,
        };

        let metadata = match self.ctx.fs.metadata(&absolute).await {
            Ok(metadata) => metadata,
            Err(e) if e.is_not_found() => {
                debug!(path = %path, "Path vanished before it could be read");
                return Ok(None);
            }
            Err(e) => return Err(io_error(format!("stat failed: {}", e))),
        };

        let now = self.ctx.now_millis();
        if metadata.is_directory {
            return Ok(match kind {
                WatchEventKind::Created => {
                    Some(ChangeDescriptor::local(path, ChangeKind::DirCreated, now))
                }
                _ => None,
            });
        }

        let hash = match self.ctx.hasher.hash_file(&absolute).await {
            Ok(hash) => hash,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(io_error(format!("hash failed: {}", e))),
        };

        let change_kind = match kind {
            WatchEventKind::Created => ChangeKind::Created,
            _ => ChangeKind::Modified,
        };
        Ok(Some(
            ChangeDescriptor::local(path, change_kind, now).with_content(
                hash,
                metadata.size,
                metadata.modified_or_epoch(),
            ),
        ))
    }

    async fn accept(&self, descriptor: ChangeDescriptor) {
        debug!(path = %descriptor.path, kind = %descriptor.kind, "Local change");
        self.ctx.emit(CoreEvent::Sync(SyncEvent::LocalChange {
            path: descriptor.path.clone(),
            kind: descriptor.kind,
            hash: descriptor.content_hash.clone(),
        }));
        self.queue.enqueue(descriptor).await;
    }

    /// Enqueue every file whose content differs from its metadata record,
    /// and a delete for every tracked entry no longer on disk.
    ///
    /// Returns the number of descriptors enqueued. Unreadable files are
    /// reported and skipped.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<usize> {
        let files = self
            .ctx
            .fs
            .list_files_recursive(&self.ctx.sync_root)
            .await
            .map_err(|e| SyncError::WatcherIo {
                path: self.ctx.sync_root.display().to_string(),
                message: e.to_string(),
            })?;

        let mut enqueued = 0;
        for absolute in files {
            let Some(path) = relative_path(&self.ctx.sync_root, &absolute) else {
                continue;
            };
            if self.ctx.ignore.is_ignored(&path) {
                continue;
            }

            let record = self.ctx.metadata.get(&path).await;
            let kind = if record.is_some() {
                WatchEventKind::Modified
            } else {
                WatchEventKind::Created
            };

            let descriptor = match self.describe_present(path.clone(), kind).await {
                Ok(Some(descriptor)) => descriptor,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path, error = %e, "Skipping unreadable file during scan");
                    self.ctx
                        .emit_error(ErrorCategory::WatcherIo, None, Some(path.as_str()), e.to_string());
                    continue;
                }
            };

            let unchanged = record.is_some_and(|r| Some(&r.content_hash) == descriptor.content_hash.as_ref());
            if !unchanged {
                self.accept(descriptor).await;
                enqueued += 1;
            }
        }

        enqueued += self.scan_removed().await;

        info!(enqueued, "Local scan complete");
        Ok(enqueued)
    }

    async fn scan_removed(&self) -> usize {
        let mut tracked: Vec<_> = self.ctx.metadata.snapshot().await.into_iter().collect();
        tracked.sort_by(|a, b| a.0.cmp(&b.0));

        let mut enqueued = 0;
        for (path, record) in tracked {
            if self.ctx.ignore.is_ignored(&path) {
                continue;
            }
            match self.ctx.fs.exists(&self.ctx.local_path(&path)).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %path, error = %e, "Could not check tracked entry during scan");
                    self.ctx
                        .emit_error(ErrorCategory::WatcherIo, None, Some(path.as_str()), e.to_string());
                    continue;
                }
            }

            let kind = if record.is_directory {
                ChangeKind::DirDeleted
            } else {
                ChangeKind::Deleted
            };
            self.accept(ChangeDescriptor::local(path, kind, self.ctx.now_millis()))
                .await;
            enqueued += 1;
        }
        enqueued
    }
}
