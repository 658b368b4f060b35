//! Vosk-backed streaming decoder

use std::path::Path;

use tracing::{debug, info, warn};
use vosk::{CompleteResult, DecodingState, Model, Recognizer};

use super::{Decoder, DecoderError, Utterance, Vocabulary};
use crate::audio::{AudioChunk, SAMPLE_RATE};

pub struct VoskDecoder {
    model: Model,
    recognizer: Recognizer,
}

impl VoskDecoder {
    /// Load the model and build a grammar-restricted recognizer
    pub fn open(model_dir: &Path, vocabulary: &Vocabulary) -> Result<Self, DecoderError> {
        let unavailable = || DecoderError::ModelUnavailable(model_dir.display().to_string());

        let path = model_dir.to_str().ok_or_else(unavailable)?;
        let model = Model::new(path).ok_or_else(unavailable)?;
        let recognizer = build_recognizer(&model, vocabulary)?;

        info!(?model_dir, phrases = ?vocabulary.phrases(), "speech model loaded");
        Ok(Self { model, recognizer })
    }
}

/// Restrict recognition to the vocabulary, or fall back to the full model
/// when the grammar is rejected
fn build_recognizer(model: &Model, vocabulary: &Vocabulary) -> Result<Recognizer, DecoderError> {
    let sample_rate = SAMPLE_RATE as f32;

    match Recognizer::new_with_grammar(model, sample_rate, vocabulary.phrases()) {
        Some(recognizer) => Ok(recognizer),
        None => {
            warn!(
                phrases = ?vocabulary.phrases(),
                "recognizer rejected restricted grammar, falling back to unrestricted recognition"
            );
            Recognizer::new(model, sample_rate).ok_or(DecoderError::RecognizerUnavailable)
        }
    }
}

impl Decoder for VoskDecoder {
    fn feed(&mut self, chunk: &AudioChunk) -> Option<Utterance> {
        match self.recognizer.accept_waveform(chunk.samples()) {
            Ok(DecodingState::Finalized) => {
                let text = match self.recognizer.result() {
                    CompleteResult::Single(single) => single.text.to_string(),
                    CompleteResult::Multiple(multiple) => multiple
                        .alternatives
                        .first()
                        .map(|alt| alt.text.to_string())
                        .unwrap_or_default(),
                };
                Some(Utterance::new(text))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = ?e, "decoder rejected audio chunk");
                None
            }
        }
    }

    fn reset(&mut self) {
        self.recognizer.reset();
    }

    fn set_vocabulary(&mut self, vocabulary: &Vocabulary) {
        match build_recognizer(&self.model, vocabulary) {
            Ok(recognizer) => {
                self.recognizer = recognizer;
                debug!(phrases = ?vocabulary.phrases(), "recognizer vocabulary updated");
            }
            Err(e) => warn!(error = %e, "keeping previous recognizer"),
        }
    }
}
