//! Control module: commands from the tray/UI layer into the listener
//!
//! `ListenerHandle` is the one object shared between the supervisor thread
//! and command issuers (IPC server, signal handler). It carries the pause
//! flag, the running flag, the hot-swappable config and the counters.

mod pause;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::broadcast;
use tracing::info;

use crate::config::{ConfigStore, ListenerConfig};
use crate::events::ListenerEvent;
use crate::state::State;

pub use pause::PauseController;

/// Counters and mirrors published by the decision loop
#[derive(Debug, Default)]
pub struct ListenerStats {
    pub activations: AtomicU64,
    pub device_errors: AtomicU64,
    pub overruns: AtomicU64,
    /// Chunks left over from a previous capture and discarded on reopen
    pub discarded: AtomicU64,
    pub glitches: AtomicU64,
    active: AtomicBool,
    capturing: AtomicBool,
}

impl ListenerStats {
    pub fn set_state(&self, state: State) {
        self.active.store(state == State::Active, Ordering::Release);
    }

    pub fn state(&self) -> State {
        if self.active.load(Ordering::Acquire) {
            State::Active
        } else {
            State::Idle
        }
    }

    pub fn set_capturing(&self, capturing: bool) {
        self.capturing.store(capturing, Ordering::Release);
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }
}

struct Shared {
    pause: PauseController,
    running: AtomicBool,
    config: ConfigStore,
    stats: ListenerStats,
    event_tx: broadcast::Sender<ListenerEvent>,
    /// Bumped on every command so a parked supervisor wakes early
    generation: Mutex<u64>,
    changed: Condvar,
}

/// Cloneable handle to a running listener
#[derive(Clone)]
pub struct ListenerHandle {
    inner: Arc<Shared>,
}

impl ListenerHandle {
    /// Create a handle; the listener starts running and unpaused
    pub fn new(config: ListenerConfig, event_tx: broadcast::Sender<ListenerEvent>) -> Self {
        let status_tx = event_tx.clone();
        let handle = Self {
            inner: Arc::new(Shared {
                pause: PauseController::default(),
                running: AtomicBool::new(true),
                config: ConfigStore::new(config),
                stats: ListenerStats::default(),
                event_tx,
                generation: Mutex::new(0),
                changed: Condvar::new(),
            }),
        };

        handle.subscribe_status(move |paused| {
            let _ = status_tx.send(ListenerEvent::StatusChanged { paused });
        });
        handle
    }

    /// Close the capture device and stop listening until resumed
    pub fn pause(&self) -> bool {
        let changed = self.inner.pause.set_paused(true);
        self.notify();
        changed
    }

    /// Reopen the capture device
    pub fn resume(&self) -> bool {
        let changed = self.inner.pause.set_paused(false);
        self.notify();
        changed
    }

    /// Changes counter of the pause flag, see `PauseController::epoch`
    pub fn pause_epoch(&self) -> u64 {
        self.inner.pause.epoch()
    }

    /// Ask the supervisor to close the device and exit
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::AcqRel) {
            info!("listener stop requested");
        }
        self.notify();
    }

    /// Atomically replace the listener configuration
    ///
    /// An open activation window survives the swap; the new phrases apply
    /// from the next utterance.
    pub fn reload_config(&self, config: ListenerConfig) -> Arc<ListenerConfig> {
        info!(
            wake_phrase = %config.wake_phrase,
            trigger_phrase = %config.trigger_phrase,
            timeout_ms = config.activation_timeout.as_millis() as u64,
            apps = config.apps.len(),
            "listener configuration reloaded"
        );
        self.inner.config.replace(config);
        let _ = self.inner.event_tx.send(ListenerEvent::ConfigReloaded);
        self.notify();
        self.inner.config.snapshot()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.pause.is_paused()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// The configuration store shared with the supervisor and launcher
    pub fn config(&self) -> &ConfigStore {
        &self.inner.config
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.inner.stats
    }

    pub fn events(&self) -> &broadcast::Sender<ListenerEvent> {
        &self.inner.event_tx
    }

    /// Register a synchronous pause-status observer
    pub fn subscribe_status(&self, subscriber: impl Fn(bool) + Send + Sync + 'static) {
        self.inner.pause.subscribe(subscriber);
    }

    /// Block the calling thread for up to `timeout`, returning early when a
    /// command arrives
    pub fn park(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut generation = self.inner.generation.lock();
        let seen = *generation;
        while *generation == seen {
            if self
                .inner
                .changed
                .wait_until(&mut generation, deadline)
                .timed_out()
            {
                break;
            }
        }
    }

    fn notify(&self) {
        *self.inner.generation.lock() += 1;
        self.inner.changed.notify_all();
    }
}
