//! # Host Bridge Traits
//!
//! Capability contracts between the sync core and the platform it runs on.
//!
//! ## Overview
//!
//! The core never touches the file system, the network or the OS change
//! notification API directly. Each of those is a trait here, implemented per
//! platform (`bridge-desktop` for desktop) and injected through
//! `core_runtime::config::CoreConfig`.
//!
//! ## Traits
//!
//! ### Remote side
//! - [`SyncProvider`](provider::SyncProvider) - Upload, download, delete, list and poll a remote store
//!
//! ### Local side
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O inside the sync root
//! - [`ContentHasher`](hashing::ContentHasher) - Streamed content digests
//! - [`WatchSource`](watch::WatchSource) - Recursive change notifications
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with a descriptive error when a required capability
//! is missing:
//!
//! ```ignore
//! let watch_source = config.watch_source.clone().ok_or_else(|| Error::CapabilityMissing {
//!     capability: "WatchSource".to_string(),
//!     message: "No change notification source provided.".to_string(),
//! })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert platform errors into it and include the offending path in the
//! message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across the
//! engine's watcher, drain and timer tasks.

pub mod error;
pub mod hashing;
pub mod provider;
pub mod storage;
pub mod time;
pub mod watch;

pub use error::BridgeError;

// Re-export commonly used types
pub use hashing::ContentHasher;
pub use provider::{ChangeKind, RemoteChange, RemoteFile, SyncProvider};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
pub use watch::{EntryHint, WatchEvent, WatchEventKind, WatchSource, WatchStream};
