//! # Change Queue
//!
//! Pending local changes, at most one per path.
//!
//! ## Overview
//!
//! The queue is FIFO by the time a path was first dirtied. Enqueuing a
//! descriptor for a path that is already waiting replaces the waiting
//! descriptor in place, so the queue length is bounded by the number of
//! distinct dirty paths rather than the raw event count. Duplicate OS
//! notifications collapse for free.
//!
//! A single drain loop consumes the queue; [`ChangeQueue::notified`] wakes it
//! whenever something new arrives.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let queue = ChangeQueue::new();
//! queue.enqueue(first).await;
//! queue.enqueue(second_for_same_path).await; // replaces `first`
//! assert_eq!(queue.len().await, 1);
//! ```

use crate::descriptor::ChangeDescriptor;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, Notify};
use tracing::trace;

#[derive(Default)]
struct QueueInner {
    order: VecDeque<String>,
    items: HashMap<String, ChangeDescriptor>,
}

/// Per-path collapsing FIFO.
#[derive(Default)]
pub struct ChangeQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor, replacing any waiting one for the same path.
    ///
    /// Returns `true` when an existing entry was replaced.
    pub async fn enqueue(&self, descriptor: ChangeDescriptor) -> bool {
        let replaced = {
            let mut inner = self.inner.lock().await;
            let path = descriptor.path.clone();
            let replaced = inner.items.insert(path.clone(), descriptor).is_some();
            if !replaced {
                inner.order.push_back(path);
            }
            replaced
        };

        trace!(replaced, "Enqueued change");
        self.notify.notify_one();
        replaced
    }

    /// Take the oldest waiting descriptor.
    pub async fn pop(&self) -> Option<ChangeDescriptor> {
        let mut inner = self.inner.lock().await;
        while let Some(path) = inner.order.pop_front() {
            if let Some(descriptor) = inner.items.remove(&path) {
                return Some(descriptor);
            }
        }
        None
    }

    /// Drop everything waiting and return how many entries were discarded.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let discarded = inner.items.len();
        inner.items.clear();
        inner.order.clear();
        discarded
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.items.is_empty()
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.inner.lock().await.items.contains_key(path)
    }

    /// Wait until something is enqueued or [`wake`](Self::wake) is called.
    ///
    /// A notification sent while nobody waits is kept for the next call.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Wake the drain loop without enqueuing anything.
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}
