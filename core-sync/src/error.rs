use bridge_traits::BridgeError;
use core_runtime::events::ErrorCategory;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Watcher I/O error on {path}: {message}")]
    WatcherIo { path: String, message: String },

    #[error("Provider {provider} failed on {path}: {message}")]
    Provider {
        provider: String,
        path: String,
        message: String,
    },

    #[error("Conflict resolution failed for {path}: {message}")]
    ConflictResolution { path: String, message: String },

    #[error("Metadata I/O error: {0}")]
    MetadataIo(String),

    #[error("Sync root {path} is unavailable: {message}")]
    SyncRootUnavailable { path: String, message: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Provider {0} is not registered")]
    ProviderNotFound(String),

    #[error("Provider {0} is already registered")]
    ProviderExists(String),

    #[error("Invalid engine state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Event category used when this error is reported on the bus.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::WatcherIo { .. } => ErrorCategory::WatcherIo,
            SyncError::ConflictResolution { .. } => ErrorCategory::ConflictResolution,
            SyncError::MetadataIo(_) => ErrorCategory::MetadataIo,
            _ => ErrorCategory::Provider,
        }
    }
}
