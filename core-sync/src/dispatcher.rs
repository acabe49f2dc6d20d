//! # Sync Dispatcher
//!
//! Fans one change out to every registered provider.
//!
//! ## Overview
//!
//! Each descriptor kind maps to one provider capability:
//!
//! | kind | call |
//! |---|---|
//! | `Created`, `Modified` | `upload_file` |
//! | `Deleted` | `delete_file` |
//! | `DirCreated` | `create_folder` |
//! | `DirDeleted` | `delete_folder` |
//!
//! Providers are attempted one after another and independently: a failure
//! is reported as a [`SyncEvent::Error`] for that provider and path, and the
//! remaining providers are still attempted. Once every provider has been
//! tried the metadata record for the path is written exactly once, subject
//! to the configured [`MetadataCommit`].
//!
//! Local descriptors are revalidated first. The file is re-stated and
//! re-hashed, so a change that has since vanished is dropped and a file that
//! already matches its metadata record (typically the engine's own download
//! echoing back through the watcher) is skipped. Descriptors originating at
//! a provider skip the revalidation and the origin provider itself.

use crate::config::MetadataCommit;
use crate::context::SyncContext;
use crate::descriptor::ChangeDescriptor;
use crate::metadata_store::FileMetadataRecord;
use crate::registry::ProviderRegistry;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{ChangeKind, SyncProvider};
use core_runtime::events::{CoreEvent, ErrorCategory, SyncEvent};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Why a descriptor was not sent anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No provider besides the origin is registered.
    NoProviders,
    /// The local file no longer exists.
    Vanished,
    /// The local state already matches the metadata record.
    AlreadySynced,
    /// A deletion for a path the engine never synced.
    Untracked,
    /// The local file could not be read.
    Unreadable,
}

/// Outcome of dispatching one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub path: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Option<SkipReason>,
    pub metadata_updated: bool,
}

impl DispatchReport {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: None,
            metadata_updated: false,
        }
    }

    /// Number of provider calls made.
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

pub struct Dispatcher {
    ctx: Arc<SyncContext>,
    registry: Arc<ProviderRegistry>,
    commit: MetadataCommit,
}

impl Dispatcher {
    pub fn new(ctx: Arc<SyncContext>, registry: Arc<ProviderRegistry>, commit: MetadataCommit) -> Self {
        Self {
            ctx,
            registry,
            commit,
        }
    }

    #[instrument(skip(self, descriptor), fields(path = %descriptor.path, kind = %descriptor.kind, origin = %descriptor.origin))]
    pub async fn dispatch(&self, descriptor: ChangeDescriptor) -> DispatchReport {
        let mut report = DispatchReport::new(&descriptor.path);

        let descriptor = if descriptor.origin.is_local() {
            match self.revalidate(descriptor).await {
                Ok(descriptor) => descriptor,
                Err(reason) => {
                    debug!(?reason, "Skipping dispatch");
                    report.skipped = Some(reason);
                    return report;
                }
            }
        } else {
            descriptor
        };

        let origin = descriptor.origin.provider();
        let targets: Vec<(String, Arc<dyn SyncProvider>)> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|(name, _)| Some(name.as_str()) != origin)
            .collect();

        if targets.is_empty() {
            debug!("No providers to dispatch to");
            report.skipped = Some(SkipReason::NoProviders);
            return report;
        }

        for (name, provider) in targets {
            match self.deliver(provider.as_ref(), &descriptor).await {
                Ok(()) => {
                    debug!(provider = %name, "Delivered change");
                    self.ctx.emit(CoreEvent::Sync(SyncEvent::Success {
                        provider: name.clone(),
                        path: descriptor.path.clone(),
                        kind: descriptor.kind,
                    }));
                    report.succeeded.push(name);
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Provider rejected change");
                    self.ctx.emit_error(
                        ErrorCategory::Provider,
                        Some(name.as_str()),
                        Some(descriptor.path.as_str()),
                        e.to_string(),
                    );
                    report.failed.push(name);
                }
            }
        }

        if descriptor.origin.is_local() {
            report.metadata_updated = self.commit_metadata(&descriptor, &report).await;
        }
        report
    }

    async fn deliver(&self, provider: &dyn SyncProvider, descriptor: &ChangeDescriptor) -> BridgeResult<()> {
        let path = descriptor.path.as_str();
        match descriptor.kind {
            ChangeKind::Created | ChangeKind::Modified => {
                provider
                    .upload_file(&self.ctx.local_path(path), path)
                    .await
            }
            ChangeKind::Deleted => provider.delete_file(path).await,
            ChangeKind::DirCreated => provider.create_folder(path).await,
            ChangeKind::DirDeleted => provider.delete_folder(path).await,
        }
    }

    async fn revalidate(&self, descriptor: ChangeDescriptor) -> Result<ChangeDescriptor, SkipReason> {
        let record = self.ctx.metadata.get(&descriptor.path).await;

        match descriptor.kind {
            ChangeKind::Created | ChangeKind::Modified => {
                let path = self.ctx.local_path(&descriptor.path);
                let metadata = match self.ctx.fs.metadata(&path).await {
                    Ok(metadata) if metadata.is_directory => return Err(SkipReason::Vanished),
                    Ok(metadata) => metadata,
                    Err(e) if e.is_not_found() => return Err(SkipReason::Vanished),
                    Err(e) => {
                        self.report_unreadable(&descriptor.path, e.to_string());
                        return Err(SkipReason::Unreadable);
                    }
                };

                let hash = match self.ctx.hasher.hash_file(&path).await {
                    Ok(hash) => hash,
                    Err(e) if e.is_not_found() => return Err(SkipReason::Vanished),
                    Err(e) => {
                        self.report_unreadable(&descriptor.path, e.to_string());
                        return Err(SkipReason::Unreadable);
                    }
                };

                if record.as_ref().is_some_and(|r| !r.is_directory && r.content_hash == hash) {
                    return Err(SkipReason::AlreadySynced);
                }
                Ok(descriptor.with_content(hash, metadata.size, metadata.modified_or_epoch()))
            }
            ChangeKind::Deleted if record.is_none() => Err(SkipReason::Untracked),
            ChangeKind::DirCreated if record.as_ref().is_some_and(|r| r.is_directory) => {
                Err(SkipReason::AlreadySynced)
            }
            ChangeKind::DirDeleted if !self.ctx.metadata.tracks_tree(&descriptor.path).await => {
                Err(SkipReason::Untracked)
            }
            _ => Ok(descriptor),
        }
    }

    fn report_unreadable(&self, path: &str, message: String) {
        warn!(path, error = %message, "Local file unreadable at dispatch");
        self.ctx
            .emit_error(ErrorCategory::WatcherIo, None, Some(path), message);
    }

    async fn commit_metadata(&self, descriptor: &ChangeDescriptor, report: &DispatchReport) -> bool {
        if !report.failed.is_empty() {
            match self.commit {
                MetadataCommit::RequireAllProviders => {
                    warn!(failed = ?report.failed, "Leaving metadata untouched, not every provider accepted the change");
                    return false;
                }
                MetadataCommit::Optimistic => {
                    warn!(failed = ?report.failed, "Recording change as synced although some providers failed");
                }
            }
        }

        let metadata = &self.ctx.metadata;
        let path = descriptor.path.as_str();
        let now = self.ctx.now_millis();
        match descriptor.kind {
            ChangeKind::Created | ChangeKind::Modified => {
                let record = FileMetadataRecord::file(
                    descriptor.content_hash.clone().unwrap_or_default(),
                    descriptor.size,
                    descriptor.modified_at,
                    now,
                );
                metadata.upsert(path, record).await;
            }
            ChangeKind::Deleted => {
                metadata.remove(path).await;
            }
            ChangeKind::DirCreated => {
                metadata.upsert(path, FileMetadataRecord::directory(now)).await;
            }
            ChangeKind::DirDeleted => {
                metadata.remove_tree(path).await;
            }
        }
        true
    }
}
