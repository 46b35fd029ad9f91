//! Platform-independent connectivity signal.

use tokio::sync::watch;

/// An online/offline signal the synchronizer subscribes to.
///
/// Platform glue (a browser online/offline listener, a NetworkMonitor, a
/// test harness) owns a `Connectivity` and flips it; the sync manager holds
/// [`watch::Receiver`]s and reacts to transitions. This keeps the core
/// testable without any UI-runtime global.
#[derive(Debug)]
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    /// Creates a signal with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Reports a connectivity change. Setting the current value again is a
    /// no-op for subscribers.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|state| {
            let changed = *state != online;
            *state = online;
            changed
        });
    }

    /// Returns the current state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
