//! Provider backed by a directory on a mounted volume.
//!
//! Mirrors the sync root into another directory (a NAS share, an external
//! drive, a second local folder). Change detection diffs the directory
//! against the snapshot taken at the previous `list_files`/`get_changes`.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    hashing::ContentHasher,
    provider::{ChangeKind, RemoteChange, RemoteFile, SyncProvider},
    storage::FileSystemAccess,
};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{Sha256Hasher, TokioFileSystem};

pub struct LocalFolderProvider {
    root: PathBuf,
    fs: TokioFileSystem,
    hasher: Sha256Hasher,
    snapshot: Mutex<HashMap<String, RemoteFile>>,
}

impl LocalFolderProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fs: TokioFileSystem::new(),
            hasher: Sha256Hasher::new(),
            snapshot: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a `/`-separated remote path below the root, rejecting escapes.
    fn resolve(&self, remote_path: &str) -> Result<PathBuf> {
        let relative = Path::new(remote_path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if remote_path.is_empty() || escapes {
            return Err(BridgeError::OperationFailed(format!(
                "Invalid remote path: {}",
                remote_path
            )));
        }

        Ok(remote_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment)))
    }

    fn remote_path_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(segments.join("/"))
    }

    async fn describe(&self, path: &Path) -> Result<RemoteFile> {
        let metadata = self.fs.metadata(path).await?;
        let hash = self.hasher.hash_file(path).await?;
        let remote_path = self
            .remote_path_of(path)
            .ok_or_else(|| BridgeError::OperationFailed(format!("{:?} is outside the provider root", path)))?;

        Ok(RemoteFile {
            path: remote_path,
            hash,
            size: metadata.size,
            modified_at: metadata.modified_or_epoch(),
        })
    }

    async fn scan(&self) -> Result<HashMap<String, RemoteFile>> {
        if !self.fs.exists(&self.root).await? {
            return Ok(HashMap::new());
        }

        let mut files = HashMap::new();
        for path in self.fs.list_files_recursive(&self.root).await? {
            let file = self.describe(&path).await?;
            files.insert(file.path.clone(), file);
        }
        Ok(files)
    }
}

#[async_trait]
impl SyncProvider for LocalFolderProvider {
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let target = self.resolve(remote_path)?;
        self.fs.copy_file(local_path, &target).await?;

        let file = self.describe(&target).await?;
        self.snapshot.lock().await.insert(file.path.clone(), file);

        debug!(remote_path, "Uploaded to local folder provider");
        Ok(())
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let source = self.resolve(remote_path)?;
        self.fs.copy_file(&source, local_path).await?;
        debug!(remote_path, "Downloaded from local folder provider");
        Ok(())
    }

    async fn delete_file(&self, remote_path: &str) -> Result<()> {
        let target = self.resolve(remote_path)?;
        match self.fs.delete_file(&target).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.snapshot.lock().await.remove(remote_path);
        Ok(())
    }

    async fn create_folder(&self, remote_path: &str) -> Result<()> {
        let target = self.resolve(remote_path)?;
        self.fs.create_dir_all(&target).await
    }

    async fn delete_folder(&self, remote_path: &str) -> Result<()> {
        let target = self.resolve(remote_path)?;
        match self.fs.delete_dir_all(&target).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let prefix = format!("{}/", remote_path.trim_end_matches('/'));
        self.snapshot
            .lock()
            .await
            .retain(|path, _| !path.starts_with(&prefix));
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<RemoteFile>> {
        let current = self.scan().await?;
        let mut files: Vec<RemoteFile> = current.values().cloned().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        *self.snapshot.lock().await = current;
        info!(root = ?self.root, count = files.len(), "Listed local folder provider");
        Ok(files)
    }

    async fn get_changes(&self) -> Result<Vec<RemoteChange>> {
        let current = self.scan().await?;
        let mut snapshot = self.snapshot.lock().await;
        let mut changes = Vec::new();

        for (path, file) in &current {
            let kind = match snapshot.get(path) {
                None => ChangeKind::Created,
                Some(previous) if previous.hash != file.hash => ChangeKind::Modified,
                Some(_) => continue,
            };
            changes.push(RemoteChange {
                path: path.clone(),
                kind,
                hash: Some(file.hash.clone()),
                size: file.size,
                modified_at: file.modified_at,
            });
        }

        for (path, previous) in snapshot.iter() {
            if !current.contains_key(path) {
                changes.push(RemoteChange {
                    path: path.clone(),
                    kind: ChangeKind::Deleted,
                    hash: None,
                    size: 0,
                    modified_at: previous.modified_at,
                });
            }
        }

        changes.sort_by(|a, b| a.path.cmp(&b.path));
        *snapshot = current;
        Ok(changes)
    }
}
