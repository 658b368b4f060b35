//! Supervisor loop: owns the capture device lifecycle and the decision loop
//!
//! Runs on a dedicated thread. While running and unpaused it keeps the
//! capture source open and feeds chunks through the decoder into the state
//! machine. Device failures close the source, wait a fixed backoff and retry
//! forever. Pausing closes the device; stopping closes it and returns.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::audio::{AudioChunk, CaptureSource, ChunkSink, ChunkStream, DeviceError, IngestionQueue};
use crate::config::ListenerConfig;
use crate::control::ListenerHandle;
use crate::decoder::{Decoder, Vocabulary};
use crate::events::ListenerEvent;
use crate::launcher::ActionDispatcher;
use crate::state::{Transition, WakeTriggerMachine};

/// Timing and sizing knobs for the supervisor
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Longest a dequeue waits before the loop re-checks flags and timeouts
    pub dequeue_timeout: Duration,
    /// Re-check interval while paused
    pub paused_poll_interval: Duration,
    /// Wait between device open attempts after a failure
    pub retry_backoff: Duration,
    /// Chunks buffered between capture and decoding
    pub queue_capacity: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_millis(500),
            paused_poll_interval: Duration::from_millis(250),
            retry_backoff: Duration::from_secs(2),
            queue_capacity: crate::audio::DEFAULT_CAPACITY,
        }
    }
}

/// Why the consume loop returned
#[derive(Debug)]
enum Exit {
    Paused,
    Stopped,
    Fault(DeviceError),
}

/// Drives capture, decoding and detection for the lifetime of the process
pub struct Supervisor<S, D, A> {
    source: S,
    decoder: D,
    dispatcher: A,
    machine: WakeTriggerMachine,
    handle: ListenerHandle,
    sink: ChunkSink,
    stream: ChunkStream,
    settings: SupervisorSettings,
    /// Consecutive device failures
    failures: u32,
    /// Pause epoch seen by the decision loop
    pause_epoch: u64,
    /// Audio fed to the decoder since the device was last opened
    fed: Duration,
    /// Config whose phrases the decoder vocabulary was built from
    vocabulary_source: Arc<ListenerConfig>,
}

impl<S, D, A> Supervisor<S, D, A>
where
    S: CaptureSource,
    D: Decoder,
    A: ActionDispatcher,
{
    pub fn new(
        source: S,
        decoder: D,
        dispatcher: A,
        handle: ListenerHandle,
        settings: SupervisorSettings,
    ) -> Self {
        let (sink, stream) = IngestionQueue::with_capacity(settings.queue_capacity);
        let machine = WakeTriggerMachine::new(handle.events().clone());
        let vocabulary_source = handle.config().snapshot();

        Self {
            source,
            decoder,
            dispatcher,
            machine,
            handle,
            sink,
            stream,
            settings,
            failures: 0,
            pause_epoch: 0,
            fed: Duration::ZERO,
            vocabulary_source,
        }
    }

    /// Run until the handle is stopped; the device is closed on return
    pub fn run(mut self) {
        info!("supervisor started");

        while self.handle.is_running() {
            if self.handle.is_paused() {
                self.close();
                self.handle.park(self.settings.paused_poll_interval);
                continue;
            }

            if let Err(e) = self.open() {
                self.device_failed(e);
                continue;
            }

            match self.consume() {
                Exit::Paused => {
                    info!("capture paused, releasing device");
                    self.close();
                }
                Exit::Stopped => break,
                Exit::Fault(e) => self.device_failed(e),
            }
        }

        self.close();
        info!("supervisor stopped");
    }

    fn open(&mut self) -> Result<(), DeviceError> {
        let stale = self.stream.drain();
        if stale > 0 {
            let total = self.handle.stats().discarded.fetch_add(stale as u64, Ordering::Relaxed)
                + stale as u64;
            warn!(stale, total, "discarded audio left over from previous capture");
        }

        self.source.open(self.sink.clone())?;

        self.failures = 0;
        self.fed = Duration::ZERO;
        self.pause_epoch = self.handle.pause_epoch();
        self.decoder.reset();
        self.machine.rearm();

        // A window that ran out while the device was closed is not revived
        let config = self.handle.config().snapshot();
        let expired = self.machine.tick(&config, Instant::now());
        self.apply(expired);

        self.handle.stats().set_capturing(true);
        let _ = self.handle.events().send(ListenerEvent::CaptureStarted);
        info!(
            wake_phrase = %config.wake_phrase,
            trigger_phrase = %config.trigger_phrase,
            "listening"
        );
        Ok(())
    }

    fn close(&mut self) {
        let was_open = self.source.is_open();
        self.source.close();

        if was_open {
            debug!(audio_ms = self.fed.as_millis() as u64, "capture closed");
            self.handle.stats().set_capturing(false);
            let _ = self.handle.events().send(ListenerEvent::CaptureStopped);
        }
    }

    /// Dequeue -> decode -> step until paused, stopped or the device faults
    fn consume(&mut self) -> Exit {
        loop {
            if !self.handle.is_running() {
                return Exit::Stopped;
            }
            // Epoch is read before the flag so a pause landing in between is
            // never mistaken for a completed resume
            let epoch = self.handle.pause_epoch();
            if self.handle.is_paused() {
                return Exit::Paused;
            }
            if epoch != self.pause_epoch {
                self.pause_epoch = epoch;
                debug!("resumed without releasing the device");
                self.machine.rearm();
            }

            let config = self.handle.config().snapshot();
            self.sync_vocabulary(&config);

            match self.stream.recv_timeout(self.settings.dequeue_timeout) {
                Ok(Some(chunk)) => self.step(&config, &chunk),
                Ok(None) => {}
                Err(e) => return Exit::Fault(e),
            }

            let expired = self.machine.tick(&config, Instant::now());
            self.apply(expired);
            self.report_overruns();
        }
    }

    fn step(&mut self, config: &ListenerConfig, chunk: &AudioChunk) {
        if chunk.is_empty() {
            return;
        }
        self.fed += chunk.duration();

        if let Some(utterance) = self.decoder.feed(chunk) {
            let transition = self.machine.observe(config, &utterance, Instant::now());
            self.apply(transition);
        }
    }

    fn apply(&mut self, transition: Option<Transition>) {
        self.handle.stats().set_state(self.machine.state());

        if transition == Some(Transition::Activated) {
            self.handle.stats().activations.fetch_add(1, Ordering::Relaxed);
            self.dispatcher.dispatch();
            self.handle.pause();
            info!("activation dispatched, paused until resumed");
        }
    }

    fn sync_vocabulary(&mut self, config: &Arc<ListenerConfig>) {
        if Arc::ptr_eq(config, &self.vocabulary_source) {
            return;
        }
        if config.phrases_differ(&self.vocabulary_source) {
            self.decoder.set_vocabulary(&Vocabulary::for_config(config));
        }
        self.vocabulary_source = Arc::clone(config);
    }

    fn report_overruns(&mut self) {
        let dropped = self.stream.take_new_overruns();
        if dropped > 0 {
            let total = self.stream.overruns();
            self.handle.stats().overruns.store(total, Ordering::Relaxed);
            warn!(dropped, total, "ingestion queue full, dropped audio");
            let _ = self.handle.events().send(ListenerEvent::Overrun { dropped, total });
        }

        let glitches = self.stream.glitches();
        let previous = self.handle.stats().glitches.swap(glitches, Ordering::Relaxed);
        if glitches > previous {
            warn!(count = glitches - previous, "audio device reported xruns");
        }
    }

    /// Close, log and wait out the backoff
    fn device_failed(&mut self, e: DeviceError) {
        self.close();
        self.failures += 1;
        self.handle.stats().device_errors.fetch_add(1, Ordering::Relaxed);

        error!(
            attempt = self.failures,
            error = %e,
            retry_in_ms = self.settings.retry_backoff.as_millis() as u64,
            "capture device error, retrying"
        );
        let _ = self.handle.events().send(ListenerEvent::DeviceError {
            message: e.to_string(),
            attempt: self.failures,
        });

        self.handle.park(self.settings.retry_backoff);
    }
}
