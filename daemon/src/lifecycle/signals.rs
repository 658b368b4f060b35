//! Unix signal handling: SIGTERM/SIGINT shut down, SIGHUP reloads

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// What a received signal asks the daemon to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    Shutdown,
    Reload,
}

/// Registered handlers for the daemon's signals
pub struct SignalListener {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

impl SignalListener {
    /// Register the handlers
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next signal
    pub async fn recv(&mut self) -> LifecycleSignal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                debug!("received SIGTERM");
                LifecycleSignal::Shutdown
            }
            _ = self.sigint.recv() => {
                debug!("received SIGINT");
                LifecycleSignal::Shutdown
            }
            _ = self.sighup.recv() => {
                debug!("received SIGHUP");
                LifecycleSignal::Reload
            }
        }
    }
}
