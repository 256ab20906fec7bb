//! Single-slot holder of the latest status frame.
//!
//! Built on a `tokio::sync::watch` channel, used without a runtime: the
//! publisher half is not `Clone`, so exactly one writer (the active
//! watchdog) exists per cache, while any number of readers copy the last
//! complete frame out. A read observes either the previous or the next
//! frame, never a mix.

use cbaiv_protocol::StatusFrame;
use tokio::sync::watch;

/// Create an empty cache and its sole writer.
pub fn status_cache() -> (StatusPublisher, StatusCache) {
    let (tx, rx) = watch::channel(None);
    (StatusPublisher { tx }, StatusCache { rx })
}

/// Write half of a status cache.
#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<Option<StatusFrame>>,
}

impl StatusPublisher {
    /// Replace the cached frame.
    pub fn publish(&self, frame: StatusFrame) {
        self.tx.send_replace(Some(frame));
    }
}

/// Read half of a status cache.
#[derive(Debug, Clone)]
pub struct StatusCache {
    rx: watch::Receiver<Option<StatusFrame>>,
}

impl StatusCache {
    /// Copy of the most recent frame, or `None` if nothing has been
    /// published yet.
    pub fn latest(&self) -> Option<StatusFrame> {
        *self.rx.borrow()
    }

    pub fn has_data(&self) -> bool {
        self.rx.borrow().is_some()
    }
}
