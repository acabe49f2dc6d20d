//! # Change Descriptors
//!
//! A [`ChangeDescriptor`] is the normalized record of one observed change,
//! whether it came from the local watcher or from a provider poll. The
//! relative path is the queue key.
//!
//! Paths inside the engine are always relative to the sync root and use `/`
//! as the separator, matching the remote path convention of
//! [`SyncProvider`](bridge_traits::SyncProvider).

use bridge_traits::{ChangeKind, RemoteChange};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Where a change was first observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "name")]
pub enum Origin {
    Local,
    Provider(String),
}

impl Origin {
    /// Provider that already holds this change, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Origin::Local => None,
            Origin::Provider(name) => Some(name),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => f.write_str("local"),
            Origin::Provider(name) => write!(f, "provider:{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDescriptor {
    /// Root-relative path, `/` separated
    pub path: String,
    pub kind: ChangeKind,
    pub origin: Origin,
    pub size: u64,
    /// Present for `Created`/`Modified`
    pub content_hash: Option<String>,
    /// Unix epoch milliseconds
    pub modified_at: i64,
    /// Unix epoch milliseconds
    pub enqueued_at: i64,
}

impl ChangeDescriptor {
    /// A local change without content (deletions, directory events).
    pub fn local(path: impl Into<String>, kind: ChangeKind, enqueued_at: i64) -> Self {
        Self {
            path: path.into(),
            kind,
            origin: Origin::Local,
            size: 0,
            content_hash: None,
            modified_at: 0,
            enqueued_at,
        }
    }

    /// Attach the stat and digest computed for a file change.
    pub fn with_content(mut self, hash: impl Into<String>, size: u64, modified_at: i64) -> Self {
        self.content_hash = Some(hash.into());
        self.size = size;
        self.modified_at = modified_at;
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Descriptor for a change a provider reported.
    pub fn from_remote(provider: &str, change: &RemoteChange, enqueued_at: i64) -> Self {
        Self {
            path: change.path.clone(),
            kind: change.kind,
            origin: Origin::Provider(provider.to_string()),
            size: change.size,
            content_hash: change.hash.clone(),
            modified_at: change.modified_at,
            enqueued_at,
        }
    }
}

/// Convert an absolute path below `root` into the engine's relative form.
///
/// Returns `None` for the root itself and for paths outside it.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Absolute location of a relative path inside `root`.
pub fn local_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
}

/// Check that a provider-reported path names an entry strictly below the
/// sync root.
///
/// The path must be non-empty and every `/`-separated segment must be a
/// plain file name: no empty, `.` or `..` segments, no roots or prefixes.
pub fn validate_remote_path(relative: &str) -> Result<(), String> {
    if relative.is_empty() {
        return Err("empty path".to_string());
    }
    for segment in relative.split('/') {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(format!("invalid path segment {:?} in {:?}", segment, relative)),
        }
    }
    Ok(())
}

/// Whether `path` is `dir` itself or lies below it.
pub fn is_within(path: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    path == dir
        || (path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/')
}
