//! Native change notifications via the `notify` crate.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    watch::{EntryHint, WatchEvent, WatchEventKind, WatchSource, WatchStream},
};
use futures::Stream;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// [`WatchSource`] backed by the platform's recommended `notify` backend
/// (inotify, FSEvents, ReadDirectoryChangesW).
#[derive(Debug, Clone, Default)]
pub struct NotifyWatchSource;

impl NotifyWatchSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WatchSource for NotifyWatchSource {
    async fn watch(&self, root: &Path) -> Result<WatchStream> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for mapped in map_event(&event) {
                    // Receiver gone means the stream was dropped.
                    if tx.send(mapped).is_err() {
                        break;
                    }
                }
            }
            Err(e) => warn!("File watcher error: {}", e),
        })
        .map_err(map_notify_error)?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(map_notify_error)?;

        info!(path = ?root, "Watching directory recursively");

        Ok(Box::pin(NotifyEventStream {
            rx,
            _watcher: watcher,
        }))
    }
}

/// Keeps the watcher alive for as long as the stream is polled.
struct NotifyEventStream {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
    _watcher: RecommendedWatcher,
}

impl Stream for NotifyEventStream {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

fn map_notify_error(e: notify::Error) -> BridgeError {
    match e.kind {
        notify::ErrorKind::Io(io) => BridgeError::Io(io),
        notify::ErrorKind::PathNotFound => BridgeError::NotFound(format!("{:?}", e.paths)),
        _ => BridgeError::OperationFailed(format!("File watcher error: {}", e)),
    }
}

/// Translate one `notify` event into zero or more watch events.
///
/// Renames become a removal of the old path plus a creation of the new one.
/// Access and metadata-only events are dropped.
fn map_event(event: &Event) -> Vec<WatchEvent> {
    match &event.kind {
        EventKind::Create(kind) => {
            let entry = match kind {
                CreateKind::File => EntryHint::File,
                CreateKind::Folder => EntryHint::Directory,
                _ => EntryHint::Unknown,
            };
            each_path(event, WatchEventKind::Created, entry)
        }
        EventKind::Remove(kind) => {
            let entry = match kind {
                RemoveKind::File => EntryHint::File,
                RemoveKind::Folder => EntryHint::Directory,
                _ => EntryHint::Unknown,
            };
            each_path(event, WatchEventKind::Removed, entry)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            each_path(event, WatchEventKind::Removed, EntryHint::Unknown)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            each_path(event, WatchEventKind::Created, EntryHint::Unknown)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut events = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                events.push(WatchEvent::new(WatchEventKind::Removed, from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                events.push(WatchEvent::new(WatchEventKind::Created, to.clone()));
            }
            events
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => each_path(event, WatchEventKind::Modified, EntryHint::Unknown),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn each_path(event: &Event, kind: WatchEventKind, entry: EntryHint) -> Vec<WatchEvent> {
    event
        .paths
        .iter()
        .map(|path| WatchEvent::new(kind, path.clone()).with_entry(entry))
        .collect()
}
