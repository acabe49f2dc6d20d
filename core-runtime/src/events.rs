//! # Event Bus System
//!
//! Typed observation channel for the sync engine, built on `tokio::sync::broadcast`.
//! Hosts subscribe to learn what the engine is doing; the engine never waits
//! on a subscriber.
//!
//! ## Overview
//!
//! - **Event Types**: Strongly-typed enums per domain (engine lifecycle, sync
//!   activity, conflicts)
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Local Watcher├──────────────>│           │
//! └──────────────┘               │           │
//!                                │ EventBus  │
//! ┌──────────────┐     emit      │ (broadcast│     subscribe    ┌────────────┐
//! │  Dispatcher  ├──────────────>│  channel) ├─────────────────>│    Host    │
//! └──────────────┘               │           │                  └────────────┘
//!                                │           │
//! ┌──────────────┐     emit      │           │
//! │Conflict Res. ├──────────────>│           │
//! └──────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//! use tokio::sync::broadcast::error::RecvError;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! tokio::spawn(async move {
//!     loop {
//!         match stream.recv().await {
//!             Ok(CoreEvent::Sync(SyncEvent::Error { message, .. })) => eprintln!("{}", message),
//!             Ok(event) => println!("{}", event.description()),
//!             Err(RecvError::Lagged(n)) => eprintln!("Missed {} events", n),
//!             Err(RecvError::Closed) => break,
//!         }
//!     }
//! });
//! # }
//! ```
//!
//! ## Event Types
//!
//! ### Engine Events
//! - `Started` / `Stopped`: Lifecycle of a running session
//! - `Paused` / `Resumed`: Periodic remote polling suspended or restored
//! - `ProviderAdded` / `ProviderRemoved`: Registry changes
//!
//! ### Sync Events
//! - `LocalChange`: The watcher observed a change in the sync root
//! - `RemoteChange`: A provider reported a change
//! - `Progress`: Queue drain or full sync progress
//! - `Success`: A provider accepted a change
//! - `Error`: A per-item or per-provider failure
//! - `FileDownloaded`: A remote file landed in the sync root
//!
//! ### Conflict Events
//! - `Detected`: Local and remote content diverged
//! - `Resolved`: A strategy picked a winner
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; the subscriber continues with newer events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.

use bridge_traits::provider::ChangeKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Engine lifecycle and registry events
    Engine(EngineEvent),
    /// Change observation and delivery events
    Sync(SyncEvent),
    /// Conflict detection and resolution events
    Conflict(ConflictEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Engine(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Conflict(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Conflict(ConflictEvent::Detected { .. }) => EventSeverity::Warning,
            CoreEvent::Engine(EngineEvent::Started { .. })
            | CoreEvent::Engine(EngineEvent::Stopped { .. })
            | CoreEvent::Sync(SyncEvent::Success { .. })
            | CoreEvent::Sync(SyncEvent::FileDownloaded { .. })
            | CoreEvent::Conflict(ConflictEvent::Resolved { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Engine Events
// ============================================================================

/// Engine lifecycle and provider registry events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum EngineEvent {
    /// The engine entered `Running`.
    Started {
        /// Identifier of this run, fresh on every start.
        session_id: String,
        /// Absolute sync root being watched.
        sync_root: String,
    },
    /// The engine returned to `Stopped`.
    Stopped {
        session_id: String,
        /// Queued changes dropped by the stop.
        discarded: usize,
    },
    /// Periodic remote polling suspended.
    Paused,
    /// Periodic remote polling restored.
    Resumed,
    ProviderAdded {
        provider: String,
    },
    ProviderRemoved {
        provider: String,
    },
}

impl EngineEvent {
    fn description(&self) -> &str {
        match self {
            EngineEvent::Started { .. } => "Sync started",
            EngineEvent::Stopped { .. } => "Sync stopped",
            EngineEvent::Paused => "Sync paused",
            EngineEvent::Resumed => "Sync resumed",
            EngineEvent::ProviderAdded { .. } => "Provider added",
            EngineEvent::ProviderRemoved { .. } => "Provider removed",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Failure classes reported through [`SyncEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    /// Stat or hash of a local path failed; the change was dropped.
    WatcherIo,
    /// A provider call failed; other providers were unaffected.
    Provider,
    /// Backup, download or upload during conflict resolution failed.
    ConflictResolution,
    /// The metadata file could not be read or written.
    MetadataIo,
}

/// Events about individual changes moving through the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// The local watcher accepted a change into the queue.
    LocalChange {
        /// Path relative to the sync root, `/` separated.
        path: String,
        kind: ChangeKind,
        /// Content hash for file creations and modifications.
        hash: Option<String>,
    },
    /// A provider reported a change since its previous poll.
    RemoteChange {
        provider: String,
        path: String,
        kind: ChangeKind,
    },
    /// Progress of a drain or full sync pass.
    Progress {
        /// `"drain"` or `"fullSync"`.
        phase: String,
        /// Items handled so far in this pass.
        processed: u64,
        /// Items still waiting.
        remaining: u64,
    },
    /// A provider accepted a change.
    Success {
        provider: String,
        path: String,
        kind: ChangeKind,
    },
    /// A change could not be delivered or observed.
    Error {
        category: ErrorCategory,
        provider: Option<String>,
        path: Option<String>,
        message: String,
    },
    /// A remote file was written into the sync root.
    FileDownloaded {
        provider: String,
        path: String,
        size: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::LocalChange { .. } => "Local change detected",
            SyncEvent::RemoteChange { .. } => "Remote change detected",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::Success { .. } => "Change synced",
            SyncEvent::Error { .. } => "Sync error",
            SyncEvent::FileDownloaded { .. } => "File downloaded",
        }
    }
}

// ============================================================================
// Conflict Events
// ============================================================================

/// How a conflict ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictOutcome {
    /// Local content was uploaded over the remote copy.
    KeptLocal,
    /// Local content was backed up and replaced by the remote copy.
    KeptRemote,
    /// Nothing changed; the conflict stays until the next detection.
    Skipped,
}

/// Conflict lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ConflictEvent {
    /// Local and remote hashes differ for a path.
    Detected {
        provider: String,
        path: String,
        local_hash: String,
        remote_hash: String,
        /// Unix epoch milliseconds.
        local_modified_at: i64,
        /// Unix epoch milliseconds.
        remote_modified_at: i64,
    },
    /// A strategy resolved the conflict.
    Resolved {
        provider: String,
        path: String,
        outcome: ConflictOutcome,
        /// Backup of the local copy, when remote won.
        backup_path: Option<String>,
    },
}

impl ConflictEvent {
    fn description(&self) -> &str {
        match self {
            ConflictEvent::Detected { .. } => "Conflict detected",
            ConflictEvent::Resolved { .. } => "Conflict resolved",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, CoreEvent, EngineEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus
///     .emit(CoreEvent::Engine(EngineEvent::ProviderAdded {
///         provider: "nas".to_string(),
///     }))
///     .ok();
///
/// assert!(subscriber.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    ///
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    ///
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none. The engine ignores that error: nobody
    /// listening is a normal state.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future events.
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with additional filtering capabilities.
///
/// Hosts typically filter by domain or by [`EventSeverity`]:
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, EventSeverity};
///
/// let event_bus = EventBus::new(100);
/// let problems = EventStream::new(event_bus.subscribe())
///     .filter(|event| event.severity() >= EventSeverity::Warning);
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl EventStream {
    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn success(path: &str) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::Success {
            provider: "nas".to_string(),
            path: path.to_string(),
            kind: ChangeKind::Modified,
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);

        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);

        // Should error when no subscribers
        assert!(bus.emit(CoreEvent::Engine(EngineEvent::Paused)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Engine(EngineEvent::Started {
            session_id: "session-1".to_string(),
            sync_root: "/home/me/Sync".to_string(),
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Conflict(_)));

        bus.emit(success("a.txt")).ok();

        let conflict = CoreEvent::Conflict(ConflictEvent::Resolved {
            provider: "nas".to_string(),
            path: "a.txt".to_string(),
            outcome: ConflictOutcome::KeptRemote,
            backup_path: Some("a.txt.backup.1700000000".to_string()),
        });
        bus.emit(conflict.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), conflict);
    }

    #[tokio::test]
    async fn test_severity_filter_on_try_recv() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| event.severity() >= EventSeverity::Warning);

        bus.emit(success("a.txt")).ok();
        bus.emit(CoreEvent::Sync(SyncEvent::Error {
            category: ErrorCategory::Provider,
            provider: Some("nas".to_string()),
            path: Some("a.txt".to_string()),
            message: "offline".to_string(),
        }))
        .ok();

        let received = stream.try_recv().unwrap().unwrap();
        assert_eq!(received.severity(), EventSeverity::Error);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2); // Very small buffer
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(success(&format!("file-{}.txt", i))).ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let detected = CoreEvent::Conflict(ConflictEvent::Detected {
            provider: "nas".to_string(),
            path: "todo.txt".to_string(),
            local_hash: "aaa".to_string(),
            remote_hash: "bbb".to_string(),
            local_modified_at: 1,
            remote_modified_at: 2,
        });
        assert_eq!(detected.severity(), EventSeverity::Warning);
        assert_eq!(success("a").severity(), EventSeverity::Info);

        let progress = CoreEvent::Sync(SyncEvent::Progress {
            phase: "drain".to_string(),
            processed: 1,
            remaining: 4,
        });
        assert_eq!(progress.severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_event_description() {
        assert_eq!(
            CoreEvent::Engine(EngineEvent::Resumed).description(),
            "Sync resumed"
        );
        assert_eq!(success("a").description(), "Change synced");
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let handle1 = tokio::spawn(async move {
            for i in 0..10 {
                bus1.emit(success(&format!("a-{}", i))).ok();
            }
        });

        let handle2 = tokio::spawn(async move {
            for i in 0..10 {
                bus2.emit(CoreEvent::Sync(SyncEvent::Progress {
                    phase: "drain".to_string(),
                    processed: i,
                    remaining: 10 - i,
                }))
                .ok();
            }
        });

        handle1.await.ok();
        handle2.await.ok();

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Sync(SyncEvent::LocalChange {
            path: "docs/report.txt".to_string(),
            kind: ChangeKind::Created,
            hash: Some("abc123".to_string()),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Sync\""));
        assert!(json.contains("\"event\":\"LocalChange\""));
        assert!(json.contains("\"kind\":\"created\""));

        let deserialized: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[test]
    fn test_unit_variant_serialization() {
        let json = serde_json::to_string(&CoreEvent::Engine(EngineEvent::Paused)).unwrap();
        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CoreEvent::Engine(EngineEvent::Paused));
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());

        assert!(stream.try_recv().is_none());
    }
}
