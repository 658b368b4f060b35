//! spoken-shortcuts-daemon: launches apps on a spoken wake -> trigger sequence
//!
//! This daemon runs unattended and provides:
//! - Microphone capture on the audio backend's thread, handed off through a
//!   bounded queue
//! - Streaming speech decoding and a two-phase wake/trigger state machine
//! - Pause/resume that releases the microphone while idle
//! - IPC server for the tray/settings app (pause, resume, reload, status,
//!   login autostart)
//!
//! Out of scope here: the tray UI, settings UI and app discovery.

mod audio;
mod config;
mod control;
mod decoder;
mod events;
mod ipc;
mod launcher;
mod lifecycle;
mod state;
mod supervisor;

use std::thread;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audio::CpalCapture;
use crate::config::{Config, ListenerConfig};
use crate::control::ListenerHandle;
use crate::decoder::Vocabulary;
use crate::events::ListenerEvent;
use crate::ipc::Server;
use crate::launcher::AppLauncher;
use crate::lifecycle::{Autostart, LifecycleSignal, SignalListener};
use crate::supervisor::{Supervisor, SupervisorSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "spoken-shortcuts-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.config_file, "configuration loaded");

    let listener_config = ListenerConfig::load_or_default(&config.config_file);
    info!(
        wake_phrase = %listener_config.wake_phrase,
        trigger_phrase = %listener_config.trigger_phrase,
        timeout_ms = listener_config.activation_timeout.as_millis() as u64,
        apps = listener_config.apps.len(),
        "listener configuration"
    );

    // Without a decoder there is nothing to listen with
    let decoder = match decoder::open(&config.model_dir, &Vocabulary::for_config(&listener_config)) {
        Ok(decoder) => decoder,
        Err(e) => {
            error!(error = %e, model_dir = ?config.model_dir, "speech decoder unavailable");
            return Err(e).context("cannot start listening without a speech decoder");
        }
    };

    // Listener events -> IPC subscribers
    let (event_tx, _) = broadcast::channel::<ListenerEvent>(64);
    let handle = ListenerHandle::new(listener_config, event_tx);

    // Create IPC server
    let autostart = Autostart::for_current_exe(config.autostart_file.clone())?;
    let server = Server::new(
        &config.socket_path,
        handle.clone(),
        config.config_file.clone(),
        autostart,
    )?;

    let mut signals = SignalListener::new().context("failed to install signal handlers")?;
    let config_file = config.config_file.clone();

    // Run the supervisor on a dedicated thread; the capture stream is created
    // there because it cannot cross threads
    let (stopped_tx, stopped_rx) = oneshot::channel::<()>();
    let supervisor_handle = handle.clone();
    let input_device = config.input_device.clone();
    let supervisor_thread = thread::Builder::new()
        .name("listener-supervisor".to_string())
        .spawn(move || {
            let launcher = AppLauncher::new(supervisor_handle.config().clone());
            let source = CpalCapture::new(input_device);
            Supervisor::new(
                source,
                decoder,
                launcher,
                supervisor_handle,
                SupervisorSettings::default(),
            )
            .run();
            let _ = stopped_tx.send(());
        })
        .context("failed to spawn supervisor thread")?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Supervisor exited (stop command)
        _ = stopped_rx => {
            info!("listener stopped");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // SIGHUP reloads the listener config; SIGTERM/SIGINT shut down
        _ = async {
            while signals.recv().await == LifecycleSignal::Reload {
                handle.reload_config(ListenerConfig::load_or_default(&config_file));
            }
        } => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    handle.stop();
    server.shutdown().await;

    match tokio::task::spawn_blocking(move || supervisor_thread.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => warn!("supervisor thread panicked"),
        Err(e) => warn!(?e, "failed to join supervisor thread"),
    }

    info!("spoken-shortcuts-daemon stopped");

    Ok(())
}
