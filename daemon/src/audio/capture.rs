//! Capture source contract
//!
//! A capture source owns the physical input device. While open it delivers
//! `AudioChunk`s into a `ChunkSink` from its own execution context.

use super::queue::ChunkSink;

/// Errors raised by the audio device
///
/// All of these are transient from the supervisor's point of view: the
/// device is closed and reopened after a backoff.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no input device available")]
    NoDevice,

    #[error("input device '{0}' not found")]
    DeviceNotFound(String),

    #[error("input device does not support a usable capture format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to open input stream: {0}")]
    Open(String),

    #[error("input device disconnected: {0}")]
    Disconnected(String),

    #[error("audio backend error: {0}")]
    Backend(String),

    #[error("capture stream closed")]
    StreamClosed,
}

/// An input device that can be opened and closed repeatedly
pub trait CaptureSource {
    /// Acquire the device and start delivering chunks into `sink`
    ///
    /// Opening an already open source is a no-op.
    fn open(&mut self, sink: ChunkSink) -> Result<(), DeviceError>;

    /// Release the device
    ///
    /// Idempotent; the device handle is gone when this returns.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}
