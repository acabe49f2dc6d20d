//! Local File System Abstractions
//!
//! Platform-agnostic trait for the file I/O the sync engine performs inside
//! its sync root: stat, read, write, copy, rename, delete and listing.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
///
/// Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

impl FileMetadata {
    /// Modification time, or zero when the platform does not report one.
    pub fn modified_or_epoch(&self) -> i64 {
        self.modified_at.unwrap_or(0)
    }
}

/// File system access trait
///
/// Abstracts file I/O operations so the engine can run against:
/// - Desktop: Direct filesystem access via tokio
/// - Mobile: Sandboxed document directories
/// - Tests: Temporary directories
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn save_state(fs: &dyn FileSystemAccess, dir: &Path, data: &[u8]) -> Result<()> {
///     let tmp = dir.join("state.json.tmp");
///     fs.write_file(&tmp, Bytes::copy_from_slice(data)).await?;
///     fs.rename(&tmp, &dir.join("state.json")).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get file metadata
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating or truncating it
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Copy a file, overwriting the destination
    async fn copy_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Rename a file or directory, replacing the destination file if present
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;

    /// List directory contents (immediate children)
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Open a file for streaming reads
    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>>;

    /// Recursively list every regular file below `path`
    ///
    /// Directories are descended but not returned. The default implementation
    /// is built on [`list_directory`](Self::list_directory) and
    /// [`metadata`](Self::metadata).
    async fn list_files_recursive(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in self.list_directory(&dir).await? {
                if self.metadata(&entry).await?.is_directory {
                    pending.push(entry);
                } else {
                    files.push(entry);
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_metadata() {
        let metadata = FileMetadata {
            size: 1024,
            created_at: Some(1234567890),
            modified_at: Some(1234567900),
            is_directory: false,
        };

        assert_eq!(metadata.size, 1024);
        assert!(!metadata.is_directory);
        assert_eq!(metadata.modified_or_epoch(), 1234567900);
    }

    #[test]
    fn test_missing_modified_time_defaults_to_epoch() {
        let metadata = FileMetadata {
            size: 0,
            created_at: None,
            modified_at: None,
            is_directory: true,
        };

        assert_eq!(metadata.modified_or_epoch(), 0);
    }
}
