//! # Engine Interfaces
//!
//! The speech pipeline talks to three external engines: speech recognition, translation
//! and speech synthesis. Each one is reached through a narrow async trait so the pipeline
//! never depends on how a model is hosted.
//!
//! ## Key Components:
//! - **SpeechToText**: 16kHz float PCM → text pieces plus detected language
//! - **TranslationBackend / TranslationModel**: load a model by name, then translate text
//! - **SpeechSynthesizer**: text → incremental stream of 20ms PCM16 frames
//!
//! Concrete HTTP clients live in [`http`].

pub mod http;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::audio::AudioFrame;

pub use http::{HttpSpeechSynthesizer, HttpSpeechToText, HttpTranslationBackend};

/// Failure reported by an engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The engine could not be reached or the request failed in transit
    Transport(String),
    /// The engine answered with an error status
    Rejected { status: u16, message: String },
    /// The engine answered but the payload was unusable
    InvalidResponse(String),
    /// Local encoding of the request failed
    Encoding(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Transport(msg) => write!(f, "Engine transport error: {}", msg),
            EngineError::Rejected { status, message } => {
                write!(f, "Engine rejected request ({}): {}", status, message)
            }
            EngineError::InvalidResponse(msg) => write!(f, "Invalid engine response: {}", msg),
            EngineError::Encoding(msg) => write!(f, "Request encoding failed: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// Recognizer output for one segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Recognized text pieces in order
    pub pieces: Vec<String>,
    /// Language tag as reported by the recognizer, not yet normalized
    pub language: Option<String>,
}

impl TranscriptionResult {
    /// Pieces joined with single spaces and trimmed.
    pub fn text(&self) -> String {
        self.pieces
            .iter()
            .map(|piece| piece.trim())
            .filter(|piece| !piece.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Incremental synthesized audio.
pub type FrameStream = BoxStream<'static, Result<AudioFrame, EngineError>>;

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe mono 16kHz float PCM with deterministic decoding.
    async fn transcribe(&self, samples: &[f32]) -> Result<TranscriptionResult, EngineError>;
}

/// A loaded translation model for one language direction.
#[async_trait]
pub trait TranslationModel: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String, EngineError>;
}

/// Loads translation models by name.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn load(&self, model_name: &str) -> Result<Arc<dyn TranslationModel>, EngineError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start synthesizing `text`. Frames arrive on the returned stream as they are produced.
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        sample_rate: u32,
    ) -> Result<FrameStream, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_joins_and_trims_pieces() {
        let result = TranscriptionResult {
            pieces: vec![" Hello".to_string(), "world ".to_string(), "  ".to_string()],
            language: Some("en".to_string()),
        };
        assert_eq!(result.text(), "Hello world");
    }

    #[test]
    fn test_empty_pieces_give_empty_text() {
        assert_eq!(TranscriptionResult::default().text(), "");
        let blank = TranscriptionResult {
            pieces: vec!["   ".to_string(), String::new()],
            language: None,
        };
        assert!(blank.text().is_empty());
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::Rejected { status: 503, message: "busy".to_string() };
        assert_eq!(err.to_string(), "Engine rejected request (503): busy");
    }
}
