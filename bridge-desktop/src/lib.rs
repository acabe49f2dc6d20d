//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `tokio::fs`
//! - `ContentHasher` using streamed SHA-256 (`sha2`)
//! - `WatchSource` using the `notify` crate's recommended backend
//! - `SyncProvider` for a mounted directory (`LocalFolderProvider`)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{LocalFolderProvider, NotifyWatchSource, Sha256Hasher, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let fs = TokioFileSystem::new();
//!     let nas = LocalFolderProvider::new("/mnt/nas/backup");
//!
//!     // Use in core configuration
//! }
//! ```

mod filesystem;
mod hasher;
mod local_provider;
mod watcher;

use std::path::PathBuf;

pub use filesystem::TokioFileSystem;
pub use hasher::Sha256Hasher;
pub use local_provider::LocalFolderProvider;
pub use watcher::NotifyWatchSource;

/// Conventional sync root for the current user: `~/Sync`.
///
/// Falls back to `./Sync` when the home directory cannot be determined.
pub fn default_sync_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Sync")
}
