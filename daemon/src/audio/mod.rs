//! Audio module: capture source, PCM chunks and the ingestion queue
//!
//! The capture callback and the decision loop share nothing but the
//! ingestion queue.

mod capture;
mod chunk;
mod cpal_source;
mod queue;

pub use capture::{CaptureSource, DeviceError};
pub use chunk::{AudioChunk, SAMPLE_RATE};
pub use cpal_source::CpalCapture;
pub use queue::{ChunkSink, ChunkStream, IngestionQueue, DEFAULT_CAPACITY};
