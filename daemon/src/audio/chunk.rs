//! PCM block definitions
//!
//! Provides the fixed capture format and the `AudioChunk` unit that moves
//! from the capture callback, through the ingestion queue, into the decoder.

use std::time::Duration;

/// Capture sample rate in Hz
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per chunk (250 ms at 16 kHz)
pub const BLOCK_SIZE: usize = 4_000;

/// A fixed-size block of 16-bit mono PCM at `SAMPLE_RATE`
///
/// Chunks are moved, never cloned, on their way from the capture context to
/// the decoder, so each one is consumed exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct AudioChunk {
    samples: Box<[i16]>,
}

impl AudioChunk {
    /// Wrap a block of samples
    pub fn new(samples: impl Into<Box<[i16]>>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    /// A block of `BLOCK_SIZE` zero samples
    #[cfg(test)]
    pub fn silence() -> Self {
        Self::new(vec![0i16; BLOCK_SIZE])
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration of this chunk
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.samples.len() as u64 * 1_000_000 / SAMPLE_RATE as u64)
    }
}

/// Accumulates arbitrary-length sample runs into `BLOCK_SIZE` chunks
///
/// Lives inside the capture callback; the only allocation is the block that
/// gets handed off.
#[derive(Debug)]
pub struct BlockAssembler {
    pending: Vec<i16>,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    /// Append samples, calling `emit` for every completed block
    pub fn push(&mut self, samples: &[i16], mut emit: impl FnMut(AudioChunk)) {
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (BLOCK_SIZE - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == BLOCK_SIZE {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(BLOCK_SIZE));
                emit(AudioChunk::new(block));
            }
        }
    }
}

impl Default for BlockAssembler {
    fn default() -> Self {
        Self::new()
    }
}
