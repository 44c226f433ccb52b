//! # Audio Processing Module
//!
//! Everything between raw transport bytes and the speech pipeline.
//!
//! ## Key Components:
//! - **Frames**: PCM16 frames, float conversion, downmixing, 20ms re-chunking
//! - **Resampler**: Stateless rate conversion to 16kHz (speech) and 48kHz (playback)
//! - **Voice Activity Gate**: Per-chunk speech/non-speech decisions
//! - **Segmenter**: Accumulates voiced chunks into one-second segments
//! - **Playback Queue**: Unbounded FIFO feeding the outbound audio
//!
//! ## Internal Audio Format:
//! - **Sample Rate**: 16kHz for detection and recognition, 48kHz for playback
//! - **Bit Depth**: 16-bit PCM, little-endian
//! - **Channels**: Mono

pub mod frame;      // AudioFrame, PCM16 <-> f32, FrameChunker
pub mod playback;   // Outbound frame queue
pub mod resample;   // rubato-based rate conversion
pub mod segmenter;  // Voiced segment accumulation
pub mod vad;        // Voice activity gate

pub use frame::{AudioError, AudioFrame, FrameChunker};
pub use playback::PlaybackQueue;
pub use resample::{resample, SPEECH_SAMPLE_RATE};
pub use segmenter::{SegmentAccumulator, SegmenterConfig, VoicedSegment};
pub use vad::{EnergyGate, SpeechDetector};
