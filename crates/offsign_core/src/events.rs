//! Typed event bus for sync lifecycle notifications.
//!
//! Fire-and-forget, in-process pub/sub with no queuing guarantees beyond
//! each subscriber's own channel: a listener registered after an event
//! fires never sees it. There is no history and no replay.

use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

/// A sync lifecycle event with an immutable detail payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A sync pass started over a queue snapshot.
    SyncStarted {
        /// Number of submissions in the snapshot.
        pending: usize,
    },
    /// One submission of the snapshot was processed.
    SyncProgress {
        /// Submissions processed so far in this pass.
        completed: usize,
        /// Total submissions in the snapshot.
        total: usize,
    },
    /// The pass finished processing its snapshot.
    SyncCompleted {
        /// Submissions delivered successfully.
        synced: usize,
        /// Wall-clock duration of the pass.
        duration: Duration,
    },
    /// The pass could not run or aborted before its snapshot completed.
    SyncFailed {
        /// Description of the failure.
        error: String,
    },
    /// The connectivity signal changed.
    OnlineStatusChanged {
        /// New online state.
        online: bool,
    },
}

/// Synchronous in-process publish/subscribe for [`SyncEvent`]s.
///
/// Subscribers that have been dropped are pruned on the next emit.
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to every live subscriber.
    pub fn emit(&self, event: SyncEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
