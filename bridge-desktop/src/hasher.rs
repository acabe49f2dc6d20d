//! SHA-256 content hashing with streamed reads.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    hashing::ContentHasher,
};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::debug;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Streams files through SHA-256 in fixed-size chunks so large files are
/// never held in memory.
#[derive(Debug, Clone, Default)]
pub struct Sha256Hasher;

impl Sha256Hasher {
    pub fn new() -> Self {
        Self
    }

    /// Hash an in-memory buffer with the same digest format as [`hash_file`](ContentHasher::hash_file)
    pub fn hash_bytes(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait]
impl ContentHasher for Sha256Hasher {
    async fn hash_file(&self, path: &Path) -> Result<String> {
        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BridgeError::NotFound(path.display().to_string())
            } else {
                BridgeError::Io(e)
            }
        })?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];
        let mut total = 0usize;

        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            total += read;
        }

        let digest = format!("{:x}", hasher.finalize());
        debug!(path = ?path, size = total, "Hashed file");
        Ok(digest)
    }

    fn algorithm(&self) -> &'static str {
        "sha256"
    }
}
