//! # Audio Frames and PCM Conversion
//!
//! Defines the `AudioFrame` exchanged with the transport layer and the conversions between
//! 16-bit PCM bytes and normalized float samples used by the speech pipeline.
//!
//! ## Conversion Rules:
//! - **Decode**: `sample / 32768.0`, so every i16 maps into [-1.0, 1.0)
//! - **Encode**: `round(x * 32768.0)` clipped to [-32768, 32767]
//! - Clipping only happens on the encode path: +1.0 has no i16 counterpart

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::Cursor;

/// Full-scale divisor shared by both conversion directions.
pub const PCM16_FULL_SCALE: f32 = 32768.0;

/// Bytes per 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Errors raised while handling raw audio.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Byte buffer does not hold a whole number of samples/frames
    InvalidLength(String),
    /// Sample rate or channel count is unusable
    InvalidFormat(String),
    /// The resampler rejected the conversion
    Resample(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::InvalidLength(msg) => write!(f, "Invalid audio length: {}", msg),
            AudioError::InvalidFormat(msg) => write!(f, "Invalid audio format: {}", msg),
            AudioError::Resample(msg) => write!(f, "Resampling failed: {}", msg),
        }
    }
}

impl std::error::Error for AudioError {}

/// One block of PCM16 little-endian audio.
///
/// Inbound frames come from the transport and may be interleaved multi-channel.
/// Outbound frames are produced by synthesis and are always mono.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<u8>,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    /// Create a frame after checking the byte length matches the channel layout.
    pub fn new(samples: Vec<u8>, sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidFormat("sample rate must be greater than 0".to_string()));
        }
        if channels == 0 {
            return Err(AudioError::InvalidFormat("channel count must be greater than 0".to_string()));
        }
        let block = BYTES_PER_SAMPLE * channels as usize;
        if samples.len() % block != 0 {
            return Err(AudioError::InvalidLength(format!(
                "{} bytes is not a multiple of {} ({} channel(s) of 16-bit samples)",
                samples.len(),
                block,
                channels
            )));
        }
        Ok(Self { samples, sample_rate, channels })
    }

    /// Create a mono frame. Used by the synthesis side where the layout is fixed.
    pub fn mono(samples: Vec<u8>, sample_rate: u32) -> Self {
        Self { samples, sample_rate, channels: 1 }
    }

    #[cfg(test)]
    pub fn bytes(&self) -> &[u8] {
        &self.samples
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (one sample per channel).
    #[cfg(test)]
    pub fn frame_count(&self) -> usize {
        self.samples.len() / (BYTES_PER_SAMPLE * self.channels as usize)
    }

    /// Duration of this frame in milliseconds.
    #[cfg(test)]
    pub fn duration_ms(&self) -> f64 {
        self.frame_count() as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Average all channels into a single normalized float signal.
    pub fn to_mono_f32(&self) -> Vec<f32> {
        let channels = self.channels as usize;
        let interleaved = pcm16_to_f32(&self.samples);
        if channels == 1 {
            return interleaved;
        }
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Decode PCM16 little-endian bytes into normalized floats.
///
/// A trailing odd byte cannot form a sample and is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / BYTES_PER_SAMPLE);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / PCM16_FULL_SCALE);
    }
    samples
}

/// Encode a single normalized float to a clipped i16.
pub fn f32_to_i16(sample: f32) -> i16 {
    let scaled = (sample * PCM16_FULL_SCALE).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encode normalized floats into PCM16 little-endian bytes, clipping out-of-range values.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * BYTES_PER_SAMPLE];
    for (slot, &sample) in bytes.chunks_exact_mut(BYTES_PER_SAMPLE).zip(samples) {
        LittleEndian::write_i16(slot, f32_to_i16(sample));
    }
    bytes
}

/// Re-chunks an arbitrary byte stream into fixed-size frames.
///
/// Synthesis services deliver audio in network-sized pieces. Playback wants exact
/// 20ms frames, so bytes are held back until a full frame is available. Whatever is
/// left when the stream ends is shorter than a frame and gets dropped.
#[derive(Debug)]
pub struct FrameChunker {
    frame_bytes: usize,
    pending: Vec<u8>,
}

impl FrameChunker {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes: frame_bytes.max(BYTES_PER_SAMPLE),
            pending: Vec::with_capacity(frame_bytes * 2),
        }
    }

    /// Bytes needed for one frame of `frame_ms` mono PCM16 at `sample_rate`.
    pub fn frame_bytes_for(sample_rate: u32, frame_ms: u32) -> usize {
        (sample_rate as usize * frame_ms as usize / 1000) * BYTES_PER_SAMPLE
    }

    /// Add bytes and return every complete frame now available, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let complete = self.pending.len() / self.frame_bytes;
        if complete == 0 {
            return Vec::new();
        }
        let rest = self.pending.split_off(complete * self.frame_bytes);
        let ready = std::mem::replace(&mut self.pending, rest);
        ready.chunks_exact(self.frame_bytes).map(<[u8]>::to_vec).collect()
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_decode_known_values() {
        let samples: [i16; 5] = [0, 16384, -16384, 32767, -32768];
        let mut bytes = Vec::new();
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let decoded = pcm16_to_f32(&bytes);
        assert_eq!(decoded.len(), 5);
        assert_eq!(decoded[0], 0.0);
        assert_eq!(decoded[1], 0.5);
        assert_eq!(decoded[2], -0.5);
        assert_eq!(decoded[4], -1.0);
        assert!(decoded.iter().all(|s| (-1.0..1.0).contains(s)));
    }

    #[test]
    fn test_float_round_trip_within_one_step() {
        let step = 1.0 / PCM16_FULL_SCALE;
        let inputs: Vec<f32> = (0..=2000).map(|i| -1.0 + i as f32 / 1000.0).collect();
        let decoded = pcm16_to_f32(&f32_to_pcm16(&inputs));
        for (original, restored) in inputs.iter().zip(decoded.iter()) {
            assert!(
                (original - restored).abs() <= step,
                "round trip error too large: {} vs {}",
                original,
                restored
            );
        }
    }

    #[test]
    fn test_encode_clips_at_full_scale() {
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), i16::MIN);
        assert_eq!(f32_to_i16(3.5), i16::MAX);
        assert_eq!(f32_to_i16(-7.0), i16::MIN);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_frame_rejects_partial_samples() {
        assert!(AudioFrame::new(vec![0u8; 7], 16000, 1).is_err());
        assert!(AudioFrame::new(vec![0u8; 6], 16000, 2).is_err());
        assert!(AudioFrame::new(vec![0u8; 8], 16000, 2).is_ok());
        assert!(AudioFrame::new(vec![0u8; 8], 0, 1).is_err());
        assert!(AudioFrame::new(vec![0u8; 8], 16000, 0).is_err());
    }

    #[test]
    fn test_downmix_averages_channels() {
        let mut bytes = Vec::new();
        for (left, right) in [(16384i16, 0i16), (-16384, -16384)] {
            bytes.extend_from_slice(&left.to_le_bytes());
            bytes.extend_from_slice(&right.to_le_bytes());
        }
        let frame = AudioFrame::new(bytes, 48000, 2).unwrap();
        assert_eq!(frame.frame_count(), 2);
        assert_eq!(frame.to_mono_f32(), vec![0.25, -0.5]);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::mono(vec![0u8; 1920], 48000);
        assert!((frame.duration_ms() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_chunker_holds_partial_frames() {
        let mut chunker = FrameChunker::new(4);
        assert!(chunker.push(&[1, 2, 3]).is_empty());
        assert_eq!(chunker.pending_len(), 3);

        let frames = chunker.push(&[4, 5, 6, 7, 8, 9]);
        assert_eq!(frames, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        assert_eq!(chunker.pending_len(), 1);
    }

    #[test]
    fn test_chunker_frame_size_for_20ms() {
        assert_eq!(FrameChunker::frame_bytes_for(48000, 20), 1920);
        assert_eq!(FrameChunker::frame_bytes_for(16000, 20), 640);
    }
}
