//! Content hashing capability.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// Computes a content digest for a local file.
///
/// The digest must be deterministic for identical bytes and is compared
/// verbatim against digests reported by providers, so every participant in
/// a sync root has to agree on the algorithm. Desktop uses SHA-256.
#[async_trait]
pub trait ContentHasher: Send + Sync {
    /// Lowercase hex digest of the file at `path`
    async fn hash_file(&self, path: &Path) -> Result<String>;

    /// Short algorithm name, e.g. `"sha256"`
    fn algorithm(&self) -> &'static str;
}
