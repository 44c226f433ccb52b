//! # Voice Activity Gate
//!
//! Classifies fixed 20ms chunks of 16kHz PCM16 audio as speech or non-speech.
//!
//! ## Key Features:
//! - **Stateless**: every chunk is judged on its own, no hangover between calls
//! - **Aggressiveness modes**: 0 (permissive) to 3 (strict), fixed at construction
//! - **Energy + zero crossings**: loud broadband hiss is rejected by its crossing rate
//!
//! The gate sits behind the `SpeechDetector` trait so the segmenter can be driven by a
//! scripted detector in tests.

use tracing::trace;

use super::frame::{pcm16_to_f32, AudioError};
use super::resample::SPEECH_SAMPLE_RATE;

/// Samples per chunk at the speech rate (20ms).
pub const CHUNK_SAMPLES: usize = 320;

/// Bytes per chunk (20ms of mono PCM16 at 16kHz).
pub const CHUNK_BYTES: usize = CHUNK_SAMPLES * 2;

/// Default aggressiveness mode.
pub const DEFAULT_MODE: u8 = 2;

/// Per-mode RMS threshold. A chunk must be louder than this to count as speech.
const RMS_THRESHOLDS: [f32; 4] = [0.005, 0.010, 0.020, 0.035];

/// Per-mode zero-crossing ceiling, as a fraction of adjacent sample pairs.
const ZCR_CEILINGS: [f32; 4] = [0.50, 0.40, 0.35, 0.30];

/// Anything that can decide whether a 20ms chunk contains speech.
pub trait SpeechDetector: Send + Sync {
    /// ## Parameters:
    /// - **chunk**: Exactly `CHUNK_BYTES` of PCM16 little-endian audio
    /// - **sample_rate**: Must be 16000
    ///
    /// ## Returns:
    /// - **Err(AudioError)**: Wrong chunk size or rate (a caller bug, never padded)
    fn is_speech(&self, chunk: &[u8], sample_rate: u32) -> Result<bool, AudioError>;
}

/// Energy and zero-crossing based gate.
#[derive(Debug, Clone, Copy)]
pub struct EnergyGate {
    mode: u8,
    rms_threshold: f32,
    zcr_ceiling: f32,
}

impl EnergyGate {
    /// Create a gate for aggressiveness `mode` (0-3).
    pub fn new(mode: u8) -> Result<Self, AudioError> {
        let index = mode as usize;
        if index >= RMS_THRESHOLDS.len() {
            return Err(AudioError::InvalidFormat(format!(
                "VAD aggressiveness must be between 0 and 3, got {}",
                mode
            )));
        }
        Ok(Self {
            mode,
            rms_threshold: RMS_THRESHOLDS[index],
            zcr_ceiling: ZCR_CEILINGS[index],
        })
    }

    #[cfg(test)]
    pub fn mode(&self) -> u8 {
        self.mode
    }
}

impl Default for EnergyGate {
    fn default() -> Self {
        Self {
            mode: DEFAULT_MODE,
            rms_threshold: RMS_THRESHOLDS[DEFAULT_MODE as usize],
            zcr_ceiling: ZCR_CEILINGS[DEFAULT_MODE as usize],
        }
    }
}

impl SpeechDetector for EnergyGate {
    fn is_speech(&self, chunk: &[u8], sample_rate: u32) -> Result<bool, AudioError> {
        if sample_rate != SPEECH_SAMPLE_RATE {
            return Err(AudioError::InvalidFormat(format!(
                "VAD only accepts {} Hz audio, got {} Hz",
                SPEECH_SAMPLE_RATE, sample_rate
            )));
        }
        if chunk.len() != CHUNK_BYTES {
            return Err(AudioError::InvalidLength(format!(
                "VAD chunk must be {} bytes, got {}",
                CHUNK_BYTES,
                chunk.len()
            )));
        }

        let samples = pcm16_to_f32(chunk);
        let rms = calculate_rms(&samples);
        let zcr = zero_crossing_rate(&samples);
        let voiced = rms > self.rms_threshold && zcr < self.zcr_ceiling;

        trace!(rms, zcr, voiced, mode = self.mode, "vad chunk");
        Ok(voiced)
    }
}

/// Root-mean-square level of normalized samples.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Fraction of adjacent sample pairs whose sign differs.
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}
