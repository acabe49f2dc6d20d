//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (filesystem, content
//! hashing, change notification, clock) and a [`SyncConfig`] into a
//! [`SyncEngine`]. Desktop apps typically enable the `desktop-shims` feature
//! (which depends on `bridge-desktop`) and call [`bootstrap_desktop`];
//! other hosts build a [`CoreConfig`] with their own bridges and use
//! [`SyncService::new`].
//!
//! ```ignore
//! use core_service::bootstrap_desktop;
//! use core_sync::SyncConfig;
//!
//! let service = bootstrap_desktop("/home/me/Sync", SyncConfig::default())?;
//! service.add_local_folder("nas", "/mnt/nas/backup").await?;
//! let mut events = service.events();
//! service.start().await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use core_runtime::config::{CoreConfig, CoreConfigBuilder};
pub use core_runtime::events::{CoreEvent, EventStream};
pub use core_sync::{
    ConflictRequest, ConflictStrategy, EngineState, EngineStatus, ManualDecision, SyncConfig,
    SyncEngine, SyncReport,
};

use bridge_traits::SyncProvider;
use core_runtime::events::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct SyncService {
    engine: SyncEngine,
    event_bus: Arc<EventBus>,
}

impl SyncService {
    /// Create a stopped service from explicit configuration.
    pub fn new(core: CoreConfig, sync: SyncConfig) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(core.event_buffer_size));
        let engine = SyncEngine::new(core, sync, Arc::clone(&event_bus))?;
        Ok(Self { engine, event_bus })
    }

    /// Access the underlying engine.
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Subscribe to engine events. Only events emitted after this call are
    /// delivered.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub async fn add_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn SyncProvider>,
    ) -> Result<()> {
        Ok(self.engine.add_provider(name, provider).await?)
    }

    /// Register a mounted directory as a provider.
    #[cfg(feature = "desktop-shims")]
    pub async fn add_local_folder(
        &self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<()> {
        let provider = Arc::new(bridge_desktop::LocalFolderProvider::new(path));
        self.add_provider(name, provider).await
    }

    pub async fn start(&self) -> Result<()> {
        Ok(self.engine.start().await?)
    }

    pub async fn stop(&self) -> Result<()> {
        Ok(self.engine.stop().await?)
    }

    pub async fn pause(&self) -> Result<()> {
        Ok(self.engine.pause().await?)
    }

    pub async fn resume(&self) -> Result<()> {
        Ok(self.engine.resume().await?)
    }

    pub async fn status(&self) -> EngineStatus {
        self.engine.status().await
    }
}

/// Convenience bootstrapper for desktop hosts.
///
/// Uses the `bridge-desktop` filesystem, SHA-256 hasher and native watcher.
#[cfg(feature = "desktop-shims")]
pub fn bootstrap_desktop(sync_root: impl Into<PathBuf>, sync: SyncConfig) -> Result<SyncService> {
    let sync_root = sync_root.into();
    let core = CoreConfig::builder().sync_root(sync_root.clone()).build()?;
    info!(sync_root = ?sync_root, "Bootstrapping desktop sync service");
    SyncService::new(core, sync)
}

/// [`bootstrap_desktop`] rooted at `~/Sync`.
#[cfg(feature = "desktop-shims")]
pub fn bootstrap_desktop_default(sync: SyncConfig) -> Result<SyncService> {
    bootstrap_desktop(bridge_desktop::default_sync_root(), sync)
}
