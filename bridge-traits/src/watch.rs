//! File Change Notification Abstraction
//!
//! Native change notification differs per platform (inotify, FSEvents,
//! ReadDirectoryChangesW, polling). The engine consumes a flat stream of
//! [`WatchEvent`]s and derives everything else itself.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Raw kind reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventKind {
    Created,
    Modified,
    Removed,
}

/// What the platform knows about the entry at event time.
///
/// Removal events often cannot tell files from directories, in which case
/// the hint is [`EntryHint::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EntryHint {
    File,
    Directory,
    #[default]
    Unknown,
}

/// A single notification for an absolute path below the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub entry: EntryHint,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            entry: EntryHint::Unknown,
        }
    }

    pub fn with_entry(mut self, entry: EntryHint) -> Self {
        self.entry = entry;
        self
    }
}

/// Stream of notifications; dropping it stops the underlying watch.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Recursive file change notification source.
#[async_trait]
pub trait WatchSource: Send + Sync {
    /// Start watching `root` recursively
    async fn watch(&self, root: &Path) -> Result<WatchStream>;
}
