//! # Core Configuration Module
//!
//! Configuration for the sync core: where the sync root lives and which
//! platform bridges the engine runs on.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all necessary dependencies and settings. It enforces
//! fail-fast validation so a missing bridge is reported at build time rather
//! than on the first file event.
//!
//! ## Required Dependencies
//!
//! - `FileSystemAccess` - File I/O inside the sync root
//! - `ContentHasher` - Content digests for change and conflict detection
//! - `WatchSource` - Recursive change notifications
//!
//! When the `desktop-shims` feature is enabled, `bridge-desktop`
//! implementations are injected automatically for any of these that are not
//! provided. `Clock` always defaults to [`SystemClock`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .sync_root("/home/me/Sync")
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ### Configuration with Custom Bridges
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .sync_root("/data/share")
//!     .metadata_dir_name(".share-sync")
//!     .file_system(Arc::new(MyFileSystem))
//!     .hasher(Arc::new(MyHasher))
//!     .watch_source(Arc::new(MyPollingWatcher))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, ContentHasher, FileSystemAccess, SystemClock, WatchSource};
use std::path::PathBuf;
use std::sync::Arc;

/// Default name of the engine-owned directory inside the sync root.
pub const DEFAULT_METADATA_DIR_NAME: &str = ".sync";

/// Core configuration for the sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Directory mirrored to every provider
    pub sync_root: PathBuf,

    /// Hidden directory below `sync_root` holding engine state
    pub metadata_dir_name: String,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,

    pub file_system: Arc<dyn FileSystemAccess>,

    pub hasher: Arc<dyn ContentHasher>,

    pub watch_source: Arc<dyn WatchSource>,

    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("sync_root", &self.sync_root)
            .field("metadata_dir_name", &self.metadata_dir_name)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("file_system", &"FileSystemAccess { ... }")
            .field("hasher", &self.hasher.algorithm())
            .field("watch_source", &"WatchSource { ... }")
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Absolute path of the engine-owned metadata directory.
    pub fn metadata_dir(&self) -> PathBuf {
        self.sync_root.join(&self.metadata_dir_name)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Sync root is not empty
    /// - Metadata dir name is a single hidden path segment
    /// - Event buffer is non-zero
    pub fn validate(&self) -> Result<()> {
        if self.sync_root.as_os_str().is_empty() {
            return Err(Error::Config("Sync root cannot be empty".to_string()));
        }

        let name = self.metadata_dir_name.as_str();
        if name.is_empty() {
            return Err(Error::Config(
                "Metadata directory name cannot be empty".to_string(),
            ));
        }
        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(Error::Config(format!(
                "Metadata directory name must be a single path segment, got '{}'",
                name
            )));
        }
        if !name.starts_with('.') {
            return Err(Error::Config(format!(
                "Metadata directory name must be hidden (start with '.'), got '{}'",
                name
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg_attr(feature = "desktop-shims", allow(dead_code))]
fn capability_missing(capability: &str, purpose: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: enable the 'desktop-shims' feature to use the bridge-desktop default. \
             Other hosts: inject a platform-native adapter.",
            capability, purpose
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(capability_missing("FileSystemAccess", "local file I/O"))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_hasher() -> Result<Arc<dyn ContentHasher>> {
    Ok(Arc::new(bridge_desktop::Sha256Hasher::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_hasher() -> Result<Arc<dyn ContentHasher>> {
    Err(capability_missing("ContentHasher", "change detection"))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_watch_source() -> Result<Arc<dyn WatchSource>> {
    Ok(Arc::new(bridge_desktop::NotifyWatchSource::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_watch_source() -> Result<Arc<dyn WatchSource>> {
    Err(capability_missing("WatchSource", "local change notifications"))
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    sync_root: Option<PathBuf>,
    metadata_dir_name: Option<String>,
    event_buffer_size: Option<usize>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    hasher: Option<Arc<dyn ContentHasher>>,
    watch_source: Option<Arc<dyn WatchSource>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    /// Sets the sync root (required).
    pub fn sync_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.sync_root = Some(path.into());
        self
    }

    /// Sets the metadata directory name.
    ///
    /// Default: `.sync`
    pub fn metadata_dir_name(mut self, name: impl Into<String>) -> Self {
        self.metadata_dir_name = Some(name.into());
        self
    }

    /// Sets the event bus capacity.
    ///
    /// Default: 256
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    pub fn watch_source(mut self, source: Arc<dyn WatchSource>) -> Self {
        self.watch_source = Some(source);
        self
    }

    /// Overrides the time source, mainly for tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the sync root is missing or a value is invalid
    /// - [`Error::CapabilityMissing`] when a bridge is missing and no
    ///   desktop default is compiled in
    pub fn build(self) -> Result<CoreConfig> {
        let sync_root = self.sync_root.ok_or_else(|| {
            Error::Config("Sync root is required. Use .sync_root() to set it.".to_string())
        })?;

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let hasher = match self.hasher {
            Some(hasher) => hasher,
            None => provide_default_hasher()?,
        };

        let watch_source = match self.watch_source {
            Some(source) => source,
            None => provide_default_watch_source()?,
        };

        let config = CoreConfig {
            sync_root,
            metadata_dir_name: self
                .metadata_dir_name
                .unwrap_or_else(|| DEFAULT_METADATA_DIR_NAME.to_string()),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            file_system,
            hasher,
            watch_source,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{FileMetadata, WatchStream};
    use bytes::Bytes;
    use std::path::Path;

    struct NullFileSystem;

    #[async_trait]
    impl FileSystemAccess for NullFileSystem {
        async fn exists(&self, _path: &Path) -> BridgeResult<bool> {
            Ok(false)
        }
        async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata> {
            Err(bridge_traits::BridgeError::NotFound(path.display().to_string()))
        }
        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn read_file(&self, _path: &Path) -> BridgeResult<Bytes> {
            Ok(Bytes::new())
        }
        async fn write_file(&self, _path: &Path, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }
        async fn copy_file(&self, _from: &Path, _to: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn rename(&self, _from: &Path, _to: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_file(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn list_directory(&self, _path: &Path) -> BridgeResult<Vec<PathBuf>> {
            Ok(Vec::new())
        }
        async fn open_read_stream(
            &self,
            _path: &Path,
        ) -> BridgeResult<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
            Ok(Box::new(tokio::io::empty()))
        }
    }

    struct NullHasher;

    #[async_trait]
    impl ContentHasher for NullHasher {
        async fn hash_file(&self, _path: &Path) -> BridgeResult<String> {
            Ok("0".to_string())
        }
        fn algorithm(&self) -> &'static str {
            "null"
        }
    }

    struct NullWatchSource;

    #[async_trait]
    impl WatchSource for NullWatchSource {
        async fn watch(&self, _root: &Path) -> BridgeResult<WatchStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn builder_with_bridges() -> CoreConfigBuilder {
        CoreConfig::builder()
            .file_system(Arc::new(NullFileSystem))
            .hasher(Arc::new(NullHasher))
            .watch_source(Arc::new(NullWatchSource))
    }

    #[test]
    fn test_builder_with_all_required_fields() {
        let config = builder_with_bridges()
            .sync_root("/home/me/Sync")
            .build()
            .unwrap();

        assert_eq!(config.sync_root, PathBuf::from("/home/me/Sync"));
        assert_eq!(config.metadata_dir_name, ".sync");
        assert_eq!(config.metadata_dir(), PathBuf::from("/home/me/Sync/.sync"));
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
    }

    #[test]
    fn test_builder_requires_sync_root() {
        let result = builder_with_bridges().build();

        assert!(result.is_err());
        if let Err(Error::Config(msg)) = result {
            assert!(msg.contains("Sync root is required"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_validate_rejects_visible_metadata_dir() {
        let result = builder_with_bridges()
            .sync_root("/r")
            .metadata_dir_name("state")
            .build();

        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("hidden")));
    }

    #[test]
    fn test_validate_rejects_nested_metadata_dir() {
        let result = builder_with_bridges()
            .sync_root("/r")
            .metadata_dir_name(".a/b")
            .build();

        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("single path segment")));
    }

    #[test]
    fn test_validate_rejects_zero_event_buffer() {
        let result = builder_with_bridges()
            .sync_root("/r")
            .event_buffer_size(0)
            .build();

        assert!(result.is_err());
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_bridge_is_capability_error() {
        let result = CoreConfig::builder().sync_root("/r").build();

        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { capability, .. }) if capability == "FileSystemAccess"
        ));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let config = CoreConfig::builder()
            .sync_root(std::env::temp_dir())
            .build()
            .expect("desktop defaults should succeed");

        assert_eq!(config.hasher.algorithm(), "sha256");
    }

    #[test]
    fn test_config_debug_hides_bridges() {
        let config = builder_with_bridges().sync_root("/r").build().unwrap();
        let debug = format!("{:?}", config);

        assert!(debug.contains("FileSystemAccess { ... }"));
        assert!(debug.contains("null"));
    }
}
