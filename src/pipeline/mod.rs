//! # Speech Pipeline
//!
//! Runs one voiced segment through recognition, translation and synthesis.
//!
//! ## Steps (per segment, strictly in order):
//! 1. **Transcribe** the segment (empty text ends processing quietly)
//! 2. **Normalize** detected and target languages
//! 3. **Translate**, pivoting through English when no direct model exists
//! 4. **Log** the translated line to the transcript file
//! 5. **Caption** the peer, if a caption channel is open
//! 6. **Synthesize** speech and enqueue 20ms frames for playback as they arrive
//!
//! Captions and transcript lines are best-effort: failures are logged and counted but never
//! stop the segment. Engine failures abort only the segment they happened in.

pub mod orchestrator;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engines::EngineError;
use crate::error::SinkError;
use crate::translation::TranslationError;

pub use orchestrator::{PipelineOrchestrator, SessionContext};
pub use stats::PipelineStats;

/// Caption sent to the peer once per translated segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "caption")]
pub struct CaptionMessage {
    pub src_lang: String,
    pub tgt_lang: String,
    pub text: String,
}

/// Text side channel to the peer.
pub trait CaptionSink: Send + Sync {
    fn is_open(&self) -> bool;
    fn send(&self, caption: &CaptionMessage) -> Result<(), SinkError>;
}

/// Why a segment was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    Transcription(EngineError),
    Translation(TranslationError),
    Synthesis(EngineError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Transcription(e) => write!(f, "Transcription failed: {}", e),
            PipelineError::Translation(e) => write!(f, "Translation failed: {}", e),
            PipelineError::Synthesis(e) => write!(f, "Synthesis failed: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Result of processing one segment.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    /// Nothing was recognized
    Skipped,
    /// Caption sent (if possible) and `frames` playback frames enqueued
    Delivered { src: String, tgt: String, frames: usize },
    Failed(PipelineError),
}

/// Synthesis voice for a normalized target language.
pub fn voice_for(language: &str) -> &'static str {
    match language {
        "no" => "nb-NO-IselinNeural",
        "pl" => "pl-PL-ZofiaNeural",
        _ => "en-US-AriaNeural",
    }
}
