//! Bounded hand-off between the capture callback and the decision loop
//!
//! The producer side never blocks: a full queue drops the incoming chunk and
//! counts it as an overrun. The consumer side blocks with a timeout so the
//! decision loop keeps servicing timeouts and shutdown while no audio arrives.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use super::capture::DeviceError;
use super::chunk::AudioChunk;

/// Default number of chunks held before overruns start (~4 s of audio)
pub const DEFAULT_CAPACITY: usize = 16;

/// Counters shared by both ends of the queue
#[derive(Debug, Default)]
struct Counters {
    overruns: AtomicU64,
    glitches: AtomicU64,
}

/// Constructor for the two ends of the ingestion queue
pub struct IngestionQueue;

impl IngestionQueue {
    /// Create a queue holding at most `capacity` chunks
    pub fn with_capacity(capacity: usize) -> (ChunkSink, ChunkStream) {
        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded(capacity.max(1));
        let (fault_tx, fault_rx) = crossbeam_channel::bounded(1);
        let counters = Arc::new(Counters::default());

        let sink = ChunkSink {
            chunk_tx,
            fault_tx,
            counters: Arc::clone(&counters),
        };
        let stream = ChunkStream {
            chunk_rx,
            fault_rx,
            counters,
            reported_overruns: 0,
        };
        (sink, stream)
    }
}

/// Producer end, owned by the capture callback
#[derive(Debug, Clone)]
pub struct ChunkSink {
    chunk_tx: Sender<AudioChunk>,
    fault_tx: Sender<DeviceError>,
    counters: Arc<Counters>,
}

impl ChunkSink {
    /// Enqueue a chunk without blocking
    ///
    /// Returns `false` when the chunk was dropped because the queue is full
    /// or the consumer is gone.
    pub fn push(&self, chunk: AudioChunk) -> bool {
        match self.chunk_tx.try_send(chunk) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.counters.overruns.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Record a non-fatal device status report (xrun, backend warning)
    pub fn note_glitch(&self) {
        self.counters.glitches.fetch_add(1, Ordering::Relaxed);
    }

    /// Surface a fatal device error to the decision loop
    ///
    /// Only the first fault per open is kept; later ones describe the same
    /// broken stream.
    pub fn report_fault(&self, error: DeviceError) {
        let _ = self.fault_tx.try_send(error);
    }
}

/// Consumer end, owned by the decision loop
#[derive(Debug)]
pub struct ChunkStream {
    chunk_rx: Receiver<AudioChunk>,
    fault_rx: Receiver<DeviceError>,
    counters: Arc<Counters>,
    reported_overruns: u64,
}

impl ChunkStream {
    /// Wait up to `timeout` for the next chunk
    ///
    /// `Ok(None)` means no data arrived in time. A fault reported by the
    /// capture side takes priority over queued audio.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<AudioChunk>, DeviceError> {
        if let Ok(fault) = self.fault_rx.try_recv() {
            return Err(fault);
        }

        match self.chunk_rx.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Timeout) => match self.fault_rx.try_recv() {
                Ok(fault) => Err(fault),
                Err(_) => Ok(None),
            },
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::StreamClosed),
        }
    }

    /// Discard queued chunks and faults left over from a previous open
    pub fn drain(&self) -> usize {
        while self.fault_rx.try_recv().is_ok() {}
        self.chunk_rx.try_iter().count()
    }

    /// Total chunks dropped since the queue was created
    pub fn overruns(&self) -> u64 {
        self.counters.overruns.load(Ordering::Relaxed)
    }

    /// Overruns since the previous call, for periodic reporting
    pub fn take_new_overruns(&mut self) -> u64 {
        let total = self.overruns();
        let new = total - self.reported_overruns;
        self.reported_overruns = total;
        new
    }

    /// Total non-fatal device status reports
    pub fn glitches(&self) -> u64 {
        self.counters.glitches.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.chunk_rx.is_empty()
    }
}
