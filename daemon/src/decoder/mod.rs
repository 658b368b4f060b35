//! Streaming speech decoder boundary
//!
//! The decoder turns 16 kHz PCM chunks into finalized utterances. It keeps
//! its own accumulation state between calls and returns text only when it
//! detects the end of an utterance.

use std::path::Path;

#[cfg(feature = "vosk")]
mod vosk;

use crate::audio::AudioChunk;
use crate::config::ListenerConfig;

/// Token the recognizer emits for out-of-vocabulary speech
pub const UNKNOWN_TOKEN: &str = "[unk]";

/// One finalized unit of recognized text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    text: String,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// False for silence and for utterances made only of unknown tokens
    pub fn is_meaningful(&self) -> bool {
        self.text
            .split_whitespace()
            .any(|word| !word.eq_ignore_ascii_case(UNKNOWN_TOKEN))
    }

    /// Case-insensitive substring match against a configured phrase
    pub fn contains_phrase(&self, phrase: &str) -> bool {
        !phrase.is_empty() && self.text.to_lowercase().contains(&phrase.to_lowercase())
    }
}

/// The closed set of phrases the recognizer is biased toward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    phrases: Vec<String>,
}

impl Vocabulary {
    pub fn for_config(config: &ListenerConfig) -> Self {
        let mut phrases = vec![config.wake_phrase.clone()];
        if config.trigger_phrase != config.wake_phrase {
            phrases.push(config.trigger_phrase.clone());
        }
        phrases.push(UNKNOWN_TOKEN.to_string());
        Self { phrases }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

/// Errors building a decoder
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("speech model not found or unreadable at {0}")]
    ModelUnavailable(String),

    #[error("failed to create recognizer")]
    RecognizerUnavailable,

    #[error("no speech decoder backend compiled in (rebuild with --features vosk)")]
    BackendMissing,
}

/// A streaming speech decoder
pub trait Decoder {
    /// Accumulate a chunk; returns the utterance when one is finalized
    fn feed(&mut self, chunk: &AudioChunk) -> Option<Utterance>;

    /// Forget any partially accumulated audio
    fn reset(&mut self) {}

    /// Re-bias recognition after the phrases changed
    fn set_vocabulary(&mut self, _vocabulary: &Vocabulary) {}
}

impl<D: Decoder + ?Sized> Decoder for Box<D> {
    fn feed(&mut self, chunk: &AudioChunk) -> Option<Utterance> {
        (**self).feed(chunk)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn set_vocabulary(&mut self, vocabulary: &Vocabulary) {
        (**self).set_vocabulary(vocabulary)
    }
}

/// Open the compiled-in decoder backend
///
/// Failure here is fatal for the daemon: nothing can be detected without a
/// decoder.
pub fn open(
    model_dir: &Path,
    vocabulary: &Vocabulary,
) -> Result<Box<dyn Decoder + Send>, DecoderError> {
    #[cfg(feature = "vosk")]
    {
        let decoder = vosk::VoskDecoder::open(model_dir, vocabulary)?;
        Ok(Box::new(decoder))
    }

    #[cfg(not(feature = "vosk"))]
    {
        let _ = (model_dir, vocabulary);
        Err(DecoderError::BackendMissing)
    }
}
