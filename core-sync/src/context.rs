//! Collaborators shared by the watcher, dispatcher, conflict handling and
//! the orchestrator.

use crate::descriptor::local_path;
use crate::ignore::IgnoreRules;
use crate::metadata_store::MetadataStore;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{Clock, ContentHasher, FileMetadata, FileSystemAccess, SyncProvider};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, ErrorCategory, EventBus, SyncEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const STAGING_DIR_NAME: &str = "staging";

pub struct SyncContext {
    pub sync_root: PathBuf,
    pub metadata_dir: PathBuf,
    pub fs: Arc<dyn FileSystemAccess>,
    pub hasher: Arc<dyn ContentHasher>,
    pub clock: Arc<dyn Clock>,
    pub event_bus: Arc<EventBus>,
    pub metadata: Arc<MetadataStore>,
    pub ignore: IgnoreRules,
}

impl SyncContext {
    pub fn from_core(core: &CoreConfig, ignore: IgnoreRules, event_bus: Arc<EventBus>) -> Self {
        let metadata_dir = core.metadata_dir();
        Self {
            sync_root: core.sync_root.clone(),
            metadata: Arc::new(MetadataStore::new(
                Arc::clone(&core.file_system),
                metadata_dir.clone(),
            )),
            metadata_dir,
            fs: Arc::clone(&core.file_system),
            hasher: Arc::clone(&core.hasher),
            clock: Arc::clone(&core.clock),
            event_bus,
            ignore: ignore.with_metadata_dir(core.metadata_dir_name.clone()),
        }
    }

    pub fn local_path(&self, relative: &str) -> PathBuf {
        local_path(&self.sync_root, relative)
    }

    /// Downloads land here before being renamed into place.
    pub fn staging_dir(&self) -> PathBuf {
        self.metadata_dir.join(STAGING_DIR_NAME)
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    /// Publish an event; having no subscribers is fine.
    pub fn emit(&self, event: CoreEvent) {
        self.event_bus.emit(event).ok();
    }

    pub fn emit_error(
        &self,
        category: ErrorCategory,
        provider: Option<&str>,
        path: Option<&str>,
        message: impl Into<String>,
    ) {
        self.emit(CoreEvent::Sync(SyncEvent::Error {
            category,
            provider: provider.map(str::to_string),
            path: path.map(str::to_string),
            message: message.into(),
        }));
    }

    /// Download `remote_path` into a staging file, then rename it over
    /// `target`. The target never holds partial content.
    pub async fn download_into_place(
        &self,
        provider: &dyn SyncProvider,
        remote_path: &str,
        target: &Path,
    ) -> BridgeResult<FileMetadata> {
        let staging_dir = self.staging_dir();
        self.fs.create_dir_all(&staging_dir).await?;
        let staged = staging_dir.join(Uuid::new_v4().to_string());

        if let Err(e) = provider.download_file(remote_path, &staged).await {
            self.fs.delete_file(&staged).await.ok();
            return Err(e);
        }

        if let Some(parent) = target.parent() {
            self.fs.create_dir_all(parent).await?;
        }
        if let Err(e) = self.fs.rename(&staged, target).await {
            self.fs.delete_file(&staged).await.ok();
            return Err(e);
        }

        debug!(remote_path, target = ?target, "Downloaded into place");
        self.fs.metadata(target).await
    }
}
