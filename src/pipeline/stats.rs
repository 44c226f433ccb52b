//! Process-wide pipeline counters. Lock-free, shared by every session.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{PipelineError, SegmentOutcome};

#[derive(Debug, Default)]
pub struct PipelineStats {
    segments_submitted: AtomicU64,
    segments_delivered: AtomicU64,
    segments_skipped: AtomicU64,
    segments_failed: AtomicU64,
    transcription_failures: AtomicU64,
    translation_failures: AtomicU64,
    synthesis_failures: AtomicU64,
    segments_discarded_on_close: AtomicU64,
    partial_bytes_discarded: AtomicU64,
    captions_sent: AtomicU64,
    caption_failures: AtomicU64,
    transcript_failures: AtomicU64,
    frames_enqueued: AtomicU64,
    frames_undelivered: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub segments_submitted: u64,
    pub segments_delivered: u64,
    pub segments_skipped: u64,
    pub segments_failed: u64,
    pub transcription_failures: u64,
    pub translation_failures: u64,
    pub synthesis_failures: u64,
    pub segments_discarded_on_close: u64,
    pub partial_bytes_discarded: u64,
    pub captions_sent: u64,
    pub caption_failures: u64,
    pub transcript_failures: u64,
    pub frames_enqueued: u64,
    pub frames_undelivered: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment_submitted(&self) {
        bump(&self.segments_submitted, 1);
    }

    pub fn segment_discarded_on_close(&self) {
        bump(&self.segments_discarded_on_close, 1);
    }

    pub fn partial_discarded(&self, bytes: usize) {
        bump(&self.partial_bytes_discarded, bytes as u64);
    }

    pub fn caption_sent(&self) {
        bump(&self.captions_sent, 1);
    }

    pub fn caption_failed(&self) {
        bump(&self.caption_failures, 1);
    }

    pub fn transcript_failed(&self) {
        bump(&self.transcript_failures, 1);
    }

    pub fn frame_enqueued(&self) {
        bump(&self.frames_enqueued, 1);
    }

    pub fn frame_undelivered(&self) {
        bump(&self.frames_undelivered, 1);
    }

    /// Count a finished segment.
    pub fn record(&self, outcome: &SegmentOutcome) {
        match outcome {
            SegmentOutcome::Skipped => bump(&self.segments_skipped, 1),
            SegmentOutcome::Delivered { .. } => bump(&self.segments_delivered, 1),
            SegmentOutcome::Failed(error) => {
                bump(&self.segments_failed, 1);
                let by_kind = match error {
                    PipelineError::Transcription(_) => &self.transcription_failures,
                    PipelineError::Translation(_) => &self.translation_failures,
                    PipelineError::Synthesis(_) => &self.synthesis_failures,
                };
                bump(by_kind, 1);
            }
        }
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        PipelineStatsSnapshot {
            segments_submitted: get(&self.segments_submitted),
            segments_delivered: get(&self.segments_delivered),
            segments_skipped: get(&self.segments_skipped),
            segments_failed: get(&self.segments_failed),
            transcription_failures: get(&self.transcription_failures),
            translation_failures: get(&self.translation_failures),
            synthesis_failures: get(&self.synthesis_failures),
            segments_discarded_on_close: get(&self.segments_discarded_on_close),
            partial_bytes_discarded: get(&self.partial_bytes_discarded),
            captions_sent: get(&self.captions_sent),
            caption_failures: get(&self.caption_failures),
            transcript_failures: get(&self.transcript_failures),
            frames_enqueued: get(&self.frames_enqueued),
            frames_undelivered: get(&self.frames_undelivered),
        }
    }
}
