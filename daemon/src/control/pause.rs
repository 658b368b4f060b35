//! Pause flag shared between command issuers and the supervisor

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

type StatusSubscriber = Box<dyn Fn(bool) + Send + Sync>;

/// Gates whether the capture device is open
///
/// Subscribers are called synchronously, on the caller's thread, whenever the
/// flag actually changes.
pub struct PauseController {
    paused: AtomicBool,
    /// Bumped on every actual change of `paused`
    epoch: AtomicU64,
    subscribers: Mutex<Vec<StatusSubscriber>>,
}

impl PauseController {
    pub fn new(paused: bool) -> Self {
        Self {
            paused: AtomicBool::new(paused),
            epoch: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Number of pause/resume changes so far
    ///
    /// A reader that saw an unpaused flag and a different epoch than last
    /// time knows a pause came and went in between.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Set the flag; returns whether it changed
    ///
    /// Setting the current value again is a no-op and notifies nobody.
    pub fn set_paused(&self, paused: bool) -> bool {
        if self.paused.swap(paused, Ordering::AcqRel) == paused {
            debug!(paused, "pause flag unchanged");
            return false;
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);

        info!(paused, "listener {}", if paused { "paused" } else { "resumed" });
        for subscriber in self.subscribers.lock().iter() {
            subscriber(paused);
        }
        true
    }

    /// Register a callback for pause flag changes
    pub fn subscribe(&self, subscriber: impl Fn(bool) + Send + Sync + 'static) {
        self.subscribers.lock().push(Box::new(subscriber));
    }
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new(false)
    }
}
