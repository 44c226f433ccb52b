//! # Speech Segment Accumulation
//!
//! Turns a stream of inbound audio frames into voiced segments ready for recognition.
//!
//! ## Per-frame Pipeline:
//! 1. Downmix to mono, resample to 16kHz, encode to PCM16
//! 2. Cut into 20ms (640 byte) chunks, dropping any shorter remainder
//! 3. Keep chunks the speech detector marks as voiced
//! 4. Once the buffer holds the minimum segment duration, hand the whole buffer off
//!
//! ## State Machine:
//! ```text
//! Idle --voiced chunk--> Accumulating{bytes} --threshold--> (submit) --> Idle
//!                                  \--finish()--> Idle (partial discarded)
//! ```
//! A submitted segment is never resubmitted and nothing carries over into the next one.

use std::sync::Arc;
use tracing::{debug, trace};

use super::frame::{f32_to_pcm16, pcm16_to_f32, AudioError, AudioFrame, BYTES_PER_SAMPLE};
use super::resample::{RateConverter, SPEECH_SAMPLE_RATE};
use super::vad::{SpeechDetector, CHUNK_BYTES};

/// Segmenter tuning.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Minimum voiced audio before a segment is submitted (milliseconds)
    pub min_segment_ms: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self { min_segment_ms: 1000 }
    }
}

impl SegmenterConfig {
    /// Minimum segment size in bytes of 16kHz mono PCM16, rounded down to whole chunks.
    pub fn min_segment_bytes(&self) -> usize {
        let bytes = SPEECH_SAMPLE_RATE as usize * self.min_segment_ms as usize / 1000 * BYTES_PER_SAMPLE;
        (bytes / CHUNK_BYTES).max(1) * CHUNK_BYTES
    }
}

/// A contiguous run of voiced 16kHz mono PCM16 audio.
#[derive(Debug, Clone, PartialEq)]
pub struct VoicedSegment {
    /// Per-session submission order, starting at 1
    pub sequence: u64,
    /// PCM16 little-endian samples at 16kHz
    pub pcm: Vec<u8>,
}

impl VoicedSegment {
    /// Normalized float samples for the recognizer.
    pub fn to_f32(&self) -> Vec<f32> {
        pcm16_to_f32(&self.pcm)
    }

    pub fn duration_ms(&self) -> u64 {
        (self.pcm.len() / BYTES_PER_SAMPLE) as u64 * 1000 / SPEECH_SAMPLE_RATE as u64
    }
}

/// Accumulator state.
#[derive(Debug, Clone, PartialEq)]
pub enum AccumulatorState {
    Idle,
    Accumulating { buffer: Vec<u8> },
}

/// Buffers voiced chunks for one session.
pub struct SegmentAccumulator {
    detector: Arc<dyn SpeechDetector>,
    converter: RateConverter,
    state: AccumulatorState,
    min_segment_bytes: usize,
    next_sequence: u64,
}

impl SegmentAccumulator {
    pub fn new(detector: Arc<dyn SpeechDetector>, config: &SegmenterConfig) -> Self {
        Self {
            detector,
            converter: RateConverter::new(),
            state: AccumulatorState::Idle,
            min_segment_bytes: config.min_segment_bytes(),
            next_sequence: 1,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &AccumulatorState {
        &self.state
    }

    /// Bytes of voiced audio currently buffered.
    pub fn buffered_bytes(&self) -> usize {
        match &self.state {
            AccumulatorState::Idle => 0,
            AccumulatorState::Accumulating { buffer } => buffer.len(),
        }
    }

    /// Feed one inbound frame of any rate and channel count.
    ///
    /// ## Returns:
    /// - **Ok(Some(segment))**: The buffer crossed the threshold and was handed off
    /// - **Ok(None)**: Still accumulating (or nothing voiced)
    /// - **Err(AudioError)**: The frame could not be converted
    pub fn push_frame(&mut self, frame: &AudioFrame) -> Result<Option<VoicedSegment>, AudioError> {
        let mono = frame.to_mono_f32();
        let speech_rate = self.converter.convert(&mono, frame.sample_rate(), SPEECH_SAMPLE_RATE)?;
        let pcm = f32_to_pcm16(&speech_rate);
        self.push_speech_pcm(&pcm)
    }

    /// Feed PCM16 bytes already at 16kHz mono.
    pub fn push_speech_pcm(&mut self, pcm: &[u8]) -> Result<Option<VoicedSegment>, AudioError> {
        let dropped = pcm.len() % CHUNK_BYTES;
        if dropped > 0 {
            trace!(dropped, "dropping partial chunk");
        }

        for chunk in pcm.chunks_exact(CHUNK_BYTES) {
            if !self.detector.is_speech(chunk, SPEECH_SAMPLE_RATE)? {
                continue;
            }
            match &mut self.state {
                AccumulatorState::Idle => {
                    let mut buffer = Vec::with_capacity(self.min_segment_bytes + CHUNK_BYTES * 8);
                    buffer.extend_from_slice(chunk);
                    self.state = AccumulatorState::Accumulating { buffer };
                }
                AccumulatorState::Accumulating { buffer } => buffer.extend_from_slice(chunk),
            }
        }

        if self.buffered_bytes() < self.min_segment_bytes {
            return Ok(None);
        }

        match std::mem::replace(&mut self.state, AccumulatorState::Idle) {
            AccumulatorState::Accumulating { buffer } => {
                let segment = VoicedSegment {
                    sequence: self.next_sequence,
                    pcm: buffer,
                };
                self.next_sequence += 1;
                debug!(
                    segment = segment.sequence,
                    bytes = segment.pcm.len(),
                    duration_ms = segment.duration_ms(),
                    "voiced segment ready"
                );
                Ok(Some(segment))
            }
            AccumulatorState::Idle => Ok(None),
        }
    }

    /// End of stream. Discards any partial segment and returns how many bytes were dropped.
    pub fn finish(&mut self) -> usize {
        match std::mem::replace(&mut self.state, AccumulatorState::Idle) {
            AccumulatorState::Idle => 0,
            AccumulatorState::Accumulating { buffer } => {
                debug!(bytes = buffer.len(), "discarding partial segment");
                buffer.len()
            }
        }
    }
}
