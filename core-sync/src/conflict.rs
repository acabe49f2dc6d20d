//! # Conflict Detection and Resolution
//!
//! ## Overview
//!
//! A conflict exists when a provider reports content for a path whose local
//! copy hashes differently. The [`ConflictDetector`] compares the two digests
//! and, on mismatch, produces an ephemeral [`ConflictRecord`]. The
//! [`ConflictResolver`] consumes it immediately according to the configured
//! [`ConflictStrategy`]:
//!
//! - `Timestamp`: the later `modified_at` wins; remote wins ties
//! - `Newest`: remote always wins
//! - `Manual`: the host decides through a [`ConflictRequest`]
//! - `LocalWins`: local always wins
//!
//! When remote wins, the local file is first copied to
//! `<path>.backup.<unixtime>` (with a `-N` counter if that name is taken).
//! Backups are never deleted by the engine. When local wins, the local file
//! is uploaded to the provider that reported the conflict.
//!
//! ## Manual resolution
//!
//! The resolver sends a [`ConflictRequest`] on a channel of capacity one and
//! waits for the host's answer while holding the engine's processing lane, so
//! at most one conflict is ever pending. A dropped request or responder
//! counts as [`Resolution::Skip`].
//!
//! ```rust,ignore
//! let mut requests = engine.take_conflict_requests().await.expect("manual strategy");
//! while let Some(request) = requests.recv().await {
//!     let choice = ask_user(&request.conflict);
//!     request.respond(choice);
//! }
//! ```

use crate::config::ConflictStrategy;
use crate::context::SyncContext;
use crate::descriptor::relative_path;
use crate::{Result, SyncError};
use bridge_traits::SyncProvider;
use core_runtime::events::{ConflictEvent, ConflictOutcome, CoreEvent};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ============================================================================
// Types
// ============================================================================

/// One side of a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSnapshot {
    pub hash: String,
    pub size: u64,
    /// Unix epoch milliseconds
    pub modified_at: i64,
}

/// Divergent local and remote content for one path. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub provider: String,
    pub path: String,
    pub local: FileSnapshot,
    pub remote: FileSnapshot,
    /// Unix epoch milliseconds; 0 if never synced
    pub last_sync_at: i64,
}

/// Which side a conflict resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
    Skip,
}

/// Answer a host gives to a [`ConflictRequest`].
pub type ManualDecision = Resolution;

impl From<Resolution> for ConflictOutcome {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::KeepLocal => ConflictOutcome::KeptLocal,
            Resolution::KeepRemote => ConflictOutcome::KeptRemote,
            Resolution::Skip => ConflictOutcome::Skipped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictRequestId(Uuid);

impl ConflictRequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConflictRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A conflict waiting for the host's decision.
#[derive(Debug)]
pub struct ConflictRequest {
    pub id: ConflictRequestId,
    pub conflict: ConflictRecord,
    responder: oneshot::Sender<Resolution>,
}

impl ConflictRequest {
    /// Send the decision back to the engine.
    ///
    /// Returns `false` if the engine stopped waiting.
    pub fn respond(self, decision: ManualDecision) -> bool {
        self.responder.send(decision).is_ok()
    }
}

/// What the resolver did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionOutcome {
    pub resolution: Resolution,
    /// Absolute path of the local backup, when remote won
    pub backup_path: Option<PathBuf>,
}

// ============================================================================
// Detector
// ============================================================================

pub struct ConflictDetector {
    ctx: Arc<SyncContext>,
}

impl ConflictDetector {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Compare an existing local file with a remote report.
    ///
    /// Returns `None` when the hashes are equal. Emits
    /// [`ConflictEvent::Detected`] for every mismatch.
    #[instrument(skip(self, remote), fields(provider = %provider, path = %path))]
    pub async fn detect(
        &self,
        provider: &str,
        path: &str,
        remote: &FileSnapshot,
    ) -> Result<Option<ConflictRecord>> {
        let local_path = self.ctx.local_path(path);
        let failed = |message: String| SyncError::ConflictResolution {
            path: path.to_string(),
            message,
        };

        let local_hash = self
            .ctx
            .hasher
            .hash_file(&local_path)
            .await
            .map_err(|e| failed(format!("hashing local copy: {}", e)))?;

        if local_hash == remote.hash {
            debug!("Local and remote content match");
            return Ok(None);
        }

        let metadata = self
            .ctx
            .fs
            .metadata(&local_path)
            .await
            .map_err(|e| failed(format!("reading local metadata: {}", e)))?;
        let last_sync_at = self
            .ctx
            .metadata
            .get(path)
            .await
            .map(|record| record.last_sync_at)
            .unwrap_or(0);

        let conflict = ConflictRecord {
            provider: provider.to_string(),
            path: path.to_string(),
            local: FileSnapshot {
                hash: local_hash,
                size: metadata.size,
                modified_at: metadata.modified_or_epoch(),
            },
            remote: remote.clone(),
            last_sync_at,
        };

        info!(
            local_modified_at = conflict.local.modified_at,
            remote_modified_at = conflict.remote.modified_at,
            "Conflict detected"
        );
        self.ctx.emit(CoreEvent::Conflict(ConflictEvent::Detected {
            provider: conflict.provider.clone(),
            path: conflict.path.clone(),
            local_hash: conflict.local.hash.clone(),
            remote_hash: conflict.remote.hash.clone(),
            local_modified_at: conflict.local.modified_at,
            remote_modified_at: conflict.remote.modified_at,
        }));

        Ok(Some(conflict))
    }
}

// ============================================================================
// Resolver
// ============================================================================

pub struct ConflictResolver {
    ctx: Arc<SyncContext>,
    strategy: ConflictStrategy,
    requests: Option<mpsc::Sender<ConflictRequest>>,
}

impl ConflictResolver {
    /// Build a resolver. For [`ConflictStrategy::Manual`] the receiving end
    /// of the request channel is returned for the host.
    pub fn new(
        ctx: Arc<SyncContext>,
        strategy: ConflictStrategy,
    ) -> (Self, Option<mpsc::Receiver<ConflictRequest>>) {
        let (requests, receiver) = match strategy {
            ConflictStrategy::Manual => {
                let (tx, rx) = mpsc::channel(1);
                (Some(tx), Some(rx))
            }
            _ => (None, None),
        };

        (
            Self {
                ctx,
                strategy,
                requests,
            },
            receiver,
        )
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Decision for the non-interactive strategies.
    pub fn decide(strategy: ConflictStrategy, conflict: &ConflictRecord) -> Resolution {
        match strategy {
            ConflictStrategy::Timestamp => {
                if conflict.remote.modified_at >= conflict.local.modified_at {
                    Resolution::KeepRemote
                } else {
                    Resolution::KeepLocal
                }
            }
            ConflictStrategy::Newest => Resolution::KeepRemote,
            ConflictStrategy::LocalWins => Resolution::KeepLocal,
            ConflictStrategy::Manual => Resolution::Skip,
        }
    }

    /// Apply the strategy to `conflict` against the provider that reported it.
    ///
    /// Failures are returned as [`SyncError::ConflictResolution`] and are not
    /// retried.
    #[instrument(skip(self, conflict, provider, cancel), fields(provider = %conflict.provider, path = %conflict.path, strategy = %self.strategy))]
    pub async fn resolve(
        &self,
        conflict: &ConflictRecord,
        provider: &dyn SyncProvider,
        cancel: &CancellationToken,
    ) -> Result<ResolutionOutcome> {
        let resolution = match self.strategy {
            ConflictStrategy::Manual => self.ask(conflict, cancel).await,
            strategy => Self::decide(strategy, conflict),
        };

        let local_path = self.ctx.local_path(&conflict.path);
        let failed = |message: String| SyncError::ConflictResolution {
            path: conflict.path.clone(),
            message,
        };

        let backup_path = match resolution {
            Resolution::KeepRemote => {
                let backup = self
                    .backup(&local_path)
                    .await
                    .map_err(|e| failed(format!("backing up local copy: {}", e)))?;
                self.ctx
                    .download_into_place(provider, &conflict.path, &local_path)
                    .await
                    .map_err(|e| failed(format!("downloading remote copy: {}", e)))?;
                info!(backup = ?backup, "Remote copy kept, local copy backed up");
                Some(backup)
            }
            Resolution::KeepLocal => {
                provider
                    .upload_file(&local_path, &conflict.path)
                    .await
                    .map_err(|e| failed(format!("uploading local copy: {}", e)))?;
                info!("Local copy kept and uploaded");
                None
            }
            Resolution::Skip => {
                info!("Conflict left unresolved");
                None
            }
        };

        self.ctx.emit(CoreEvent::Conflict(ConflictEvent::Resolved {
            provider: conflict.provider.clone(),
            path: conflict.path.clone(),
            outcome: resolution.into(),
            backup_path: backup_path
                .as_deref()
                .and_then(|p| relative_path(&self.ctx.sync_root, p)),
        }));

        Ok(ResolutionOutcome {
            resolution,
            backup_path,
        })
    }

    async fn ask(&self, conflict: &ConflictRecord, cancel: &CancellationToken) -> Resolution {
        let Some(requests) = &self.requests else {
            return Resolution::Skip;
        };

        let (responder, answer) = oneshot::channel();
        let request = ConflictRequest {
            id: ConflictRequestId::new(),
            conflict: conflict.clone(),
            responder,
        };
        info!(request_id = %request.id, "Waiting for manual conflict decision");

        let exchange = async {
            if requests.send(request).await.is_err() {
                warn!("Conflict request channel closed");
                return Resolution::Skip;
            }
            answer.await.unwrap_or(Resolution::Skip)
        };

        tokio::select! {
            _ = cancel.cancelled() => Resolution::Skip,
            decision = exchange => decision,
        }
    }

    async fn backup(&self, local_path: &Path) -> bridge_traits::error::Result<PathBuf> {
        let stamp = self.ctx.clock.unix_timestamp();
        let mut counter = 0;
        let mut candidate = backup_path(local_path, stamp, counter);
        while self.ctx.fs.exists(&candidate).await? {
            counter += 1;
            candidate = backup_path(local_path, stamp, counter);
        }

        self.ctx.fs.copy_file(local_path, &candidate).await?;
        Ok(candidate)
    }
}

/// `<path>.backup.<unix_secs>`, or `<path>.backup.<unix_secs>-<counter>`
/// for a non-zero counter.
pub fn backup_path(local_path: &Path, unix_secs: i64, counter: u32) -> PathBuf {
    let mut name = OsString::from(local_path.as_os_str());
    if counter == 0 {
        name.push(format!(".backup.{}", unix_secs));
    } else {
        name.push(format!(".backup.{}-{}", unix_secs, counter));
    }
    PathBuf::from(name)
}
