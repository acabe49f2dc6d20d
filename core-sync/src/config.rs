//! # Engine Configuration
//!
//! Tunables for the sync engine. Platform bridges and the sync root live in
//! [`CoreConfig`](core_runtime::config::CoreConfig); everything about how
//! the engine behaves lives here.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{ConflictStrategy, PausePolicy, SyncConfig};
//! use std::time::Duration;
//!
//! let config = SyncConfig::default()
//!     .with_sync_interval(Duration::from_secs(60))
//!     .with_conflict_strategy(ConflictStrategy::Manual)
//!     .with_pause_policy(PausePolicy::SuspendAll);
//! config.validate()?;
//! ```

use crate::ignore::IgnoreRules;
use crate::pacer::PacingPolicy;
use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Shortest allowed periodic sync interval.
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// How a divergent file is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictStrategy {
    /// Later `modified_at` wins; remote wins ties.
    #[default]
    Timestamp,
    /// Remote always wins.
    Newest,
    /// The host decides through a [`ConflictRequest`](crate::conflict::ConflictRequest).
    Manual,
    /// Local always wins.
    LocalWins,
}

impl ConflictStrategy {
    /// Parse a strategy name, falling back to [`ConflictStrategy::LocalWins`]
    /// for anything unrecognised.
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "timestamp" => ConflictStrategy::Timestamp,
            "newest" => ConflictStrategy::Newest,
            "manual" => ConflictStrategy::Manual,
            "localwins" | "local-wins" | "local" => ConflictStrategy::LocalWins,
            other => {
                warn!(strategy = other, "Unknown conflict strategy, local copy will win");
                ConflictStrategy::LocalWins
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::Timestamp => "timestamp",
            ConflictStrategy::Newest => "newest",
            ConflictStrategy::Manual => "manual",
            ConflictStrategy::LocalWins => "localWins",
        }
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What pausing suspends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PausePolicy {
    /// Only the periodic remote poll stops; local changes keep flowing.
    #[default]
    SuspendPolling,
    /// The remote poll stops and queued local changes are held until resume.
    SuspendAll,
}

/// When a dispatched change is recorded as synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataCommit {
    /// Record after every provider was attempted, even if some failed.
    #[default]
    Optimistic,
    /// Record only when every attempted provider succeeded.
    RequireAllProviders,
}

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Period of the incremental sync timer
    pub sync_interval: Duration,

    /// Rate limit between drained items
    pub pacing: PacingPolicy,

    pub conflict_strategy: ConflictStrategy,

    pub pause_policy: PausePolicy,

    pub metadata_commit: MetadataCommit,

    /// Period of the background metadata flush
    pub metadata_flush_interval: Duration,

    /// Run a full sync right after `start`
    pub full_sync_on_start: bool,

    /// Enqueue local files that changed while the engine was stopped
    pub scan_local_on_start: bool,

    pub ignore: IgnoreRules,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            pacing: PacingPolicy::default(),
            conflict_strategy: ConflictStrategy::default(),
            pause_policy: PausePolicy::default(),
            metadata_commit: MetadataCommit::default(),
            metadata_flush_interval: Duration::from_secs(60),
            full_sync_on_start: true,
            scan_local_on_start: true,
            ignore: IgnoreRules::default(),
        }
    }
}

impl SyncConfig {
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_pacing(mut self, pacing: PacingPolicy) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    pub fn with_pause_policy(mut self, policy: PausePolicy) -> Self {
        self.pause_policy = policy;
        self
    }

    pub fn with_metadata_commit(mut self, commit: MetadataCommit) -> Self {
        self.metadata_commit = commit;
        self
    }

    pub fn with_metadata_flush_interval(mut self, interval: Duration) -> Self {
        self.metadata_flush_interval = interval;
        self
    }

    pub fn with_full_sync_on_start(mut self, enabled: bool) -> Self {
        self.full_sync_on_start = enabled;
        self
    }

    pub fn with_scan_local_on_start(mut self, enabled: bool) -> Self {
        self.scan_local_on_start = enabled;
        self
    }

    pub fn with_ignore(mut self, ignore: IgnoreRules) -> Self {
        self.ignore = ignore;
        self
    }

    /// Checks:
    /// - sync interval is at least one second
    /// - metadata flush interval is non-zero
    /// - pacing parameters are usable
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval < MIN_SYNC_INTERVAL {
            return Err(SyncError::Config(format!(
                "Sync interval must be at least {:?}, got {:?}",
                MIN_SYNC_INTERVAL, self.sync_interval
            )));
        }

        if self.metadata_flush_interval.is_zero() {
            return Err(SyncError::Config(
                "Metadata flush interval must be greater than 0".to_string(),
            ));
        }

        self.pacing.validate().map_err(SyncError::Config)
    }
}
