//! # Sync Engine Core
//!
//! Keeps a local folder synchronized with any number of remote storage
//! providers.
//!
//! ## Overview
//!
//! This module turns local filesystem activity into provider calls and
//! remote changes into local files:
//! - Watching the sync root and collapsing bursts of events per path
//! - Fanning each local change out to every registered provider
//! - Pulling remote listings and change feeds into the local folder
//! - Detecting and resolving divergent content
//! - Persisting what was last synced in a JSON metadata file
//!
//! ## Components
//!
//! - **Engine** (`engine`): Lifecycle, drain loop, full and incremental sync
//! - **State Machine** (`state`): `Stopped`, `Running` and `Paused`
//! - **Watcher** (`watcher`): Maps filesystem events to change descriptors
//! - **Change Queue** (`change_queue`): Per-path collapsing FIFO
//! - **Dispatcher** (`dispatcher`): Provider fan-out and metadata commit
//! - **Registry** (`registry`): Named provider set
//! - **Conflicts** (`conflict`): Detection, strategies and backups
//! - **Metadata Store** (`metadata_store`): Durable per-path sync records
//! - **Pacer** (`pacer`): Rate limiting between drained items
//! - **Ignore Rules** (`ignore`): Paths the engine never syncs

pub mod change_queue;
pub mod config;
pub mod conflict;
pub mod context;
pub mod descriptor;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod ignore;
pub mod metadata_store;
pub mod pacer;
pub mod registry;
pub mod state;
pub mod watcher;

pub use change_queue::ChangeQueue;
pub use config::{ConflictStrategy, MetadataCommit, PausePolicy, SyncConfig, MIN_SYNC_INTERVAL};
pub use conflict::{
    backup_path, ConflictDetector, ConflictRecord, ConflictRequest, ConflictRequestId,
    ConflictResolver, FileSnapshot, ManualDecision, Resolution, ResolutionOutcome,
};
pub use descriptor::{ChangeDescriptor, Origin};
pub use dispatcher::{DispatchReport, Dispatcher, SkipReason};
pub use engine::{EngineStatus, SyncEngine, SyncReport};
pub use error::{Result, SyncError};
pub use ignore::IgnoreRules;
pub use metadata_store::{FileMetadataRecord, MetadataStore, METADATA_FILE_NAME};
pub use pacer::{Pacer, PacingPolicy};
pub use registry::ProviderRegistry;
pub use state::EngineState;
