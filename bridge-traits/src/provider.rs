//! Remote Storage Provider Abstraction
//!
//! A provider is any remote endpoint the engine mirrors the sync root to:
//! a cloud drive, a NAS mount, another directory. The engine only ever talks
//! to it through [`SyncProvider`].
//!
//! Remote paths are relative to the provider's root and always use `/` as
//! the separator, independent of the host platform.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{BridgeError, Result};

/// Kind of change observed on a path, locally or remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    DirCreated,
    DirDeleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::DirCreated => "dirCreated",
            ChangeKind::DirDeleted => "dirDeleted",
        }
    }

    /// Whether the change carries file content (and therefore a hash).
    pub fn carries_content(&self) -> bool {
        matches!(self, ChangeKind::Created | ChangeKind::Modified)
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, ChangeKind::DirCreated | ChangeKind::DirDeleted)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" | "add" => Ok(ChangeKind::Created),
            "modified" | "change" => Ok(ChangeKind::Modified),
            "deleted" | "unlink" => Ok(ChangeKind::Deleted),
            "dirCreated" | "addDir" => Ok(ChangeKind::DirCreated),
            "dirDeleted" | "unlinkDir" => Ok(ChangeKind::DirDeleted),
            _ => Err(BridgeError::OperationFailed(format!(
                "Unknown change kind: {}",
                s
            ))),
        }
    }
}

/// A file as listed by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Root-relative path, `/` separated
    pub path: String,
    /// Lowercase hex content digest
    pub hash: String,
    pub size: u64,
    /// Unix epoch milliseconds
    pub modified_at: i64,
}

/// A change reported by a provider since its previous `get_changes` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChange {
    pub path: String,
    pub kind: ChangeKind,
    /// Content digest; absent for deletions and directory changes
    pub hash: Option<String>,
    pub size: u64,
    /// Unix epoch milliseconds
    pub modified_at: i64,
}

impl RemoteChange {
    /// View a listed file as a creation, used by full sync.
    pub fn from_listing(file: RemoteFile) -> Self {
        Self {
            path: file.path,
            kind: ChangeKind::Created,
            hash: Some(file.hash),
            size: file.size,
            modified_at: file.modified_at,
        }
    }
}

/// Remote storage provider trait
///
/// Implementations must be safe to call from any task. Every operation is
/// attempted at most once per change by the engine; retries are the
/// provider's own concern.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::provider::SyncProvider;
///
/// async fn push(provider: &dyn SyncProvider, root: &Path, rel: &str) -> Result<()> {
///     provider.upload_file(&root.join(rel), rel).await
/// }
/// ```
#[async_trait]
pub trait SyncProvider: Send + Sync {
    /// Upload the local file at `local_path` to `remote_path`
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Download `remote_path` into `local_path`, creating or replacing it
    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Delete a remote file
    async fn delete_file(&self, remote_path: &str) -> Result<()>;

    /// Create a remote folder; succeeds if it already exists
    async fn create_folder(&self, remote_path: &str) -> Result<()>;

    /// Delete a remote folder and everything below it
    async fn delete_folder(&self, remote_path: &str) -> Result<()>;

    /// List every remote file
    async fn list_files(&self) -> Result<Vec<RemoteFile>>;

    /// Changes since the previous call
    async fn get_changes(&self) -> Result<Vec<RemoteChange>>;
}
