//! # Pipeline Orchestrator
//!
//! Sequential per-segment processing. One orchestrator is shared by every session; all
//! per-session state (target language, caption channel, playback queue) arrives through
//! a `SessionContext`.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::stats::PipelineStats;
use super::{voice_for, CaptionMessage, CaptionSink, PipelineError, SegmentOutcome};
use crate::audio::frame::f32_to_pcm16;
use crate::audio::{resample, AudioFrame, PlaybackQueue, VoicedSegment};
use crate::engines::{EngineError, SpeechSynthesizer, SpeechToText};
use crate::language::{normalize, normalize_str};
use crate::transcript::TranscriptSink;
use crate::translation::TranslationEngineCache;

/// Per-session handles the pipeline writes to.
#[derive(Clone)]
pub struct SessionContext {
    pub session_id: String,
    /// Normalized target language
    pub target_lang: String,
    pub captions: Option<Arc<dyn CaptionSink>>,
    pub playback: Arc<PlaybackQueue>,
}

pub struct PipelineOrchestrator {
    stt: Arc<dyn SpeechToText>,
    translator: Arc<TranslationEngineCache>,
    tts: Arc<dyn SpeechSynthesizer>,
    transcripts: Arc<dyn TranscriptSink>,
    stats: Arc<PipelineStats>,
    output_sample_rate: u32,
}

impl PipelineOrchestrator {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        translator: Arc<TranslationEngineCache>,
        tts: Arc<dyn SpeechSynthesizer>,
        transcripts: Arc<dyn TranscriptSink>,
        stats: Arc<PipelineStats>,
        output_sample_rate: u32,
    ) -> Self {
        Self {
            stt,
            translator,
            tts,
            transcripts,
            stats,
            output_sample_rate,
        }
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn translator(&self) -> &Arc<TranslationEngineCache> {
        &self.translator
    }

    pub fn transcripts(&self) -> &Arc<dyn TranscriptSink> {
        &self.transcripts
    }

    /// Run one segment through every step. Never panics on collaborator failure; the
    /// outcome says what happened.
    pub async fn process(&self, segment: &VoicedSegment, ctx: &SessionContext) -> SegmentOutcome {
        let started = Instant::now();

        // 1. Transcribe
        let samples = segment.to_f32();
        let transcription = match self.stt.transcribe(&samples).await {
            Ok(result) => result,
            Err(e) => {
                error!(session_id = %ctx.session_id, segment = segment.sequence, error = %e, "transcription failed");
                return SegmentOutcome::Failed(PipelineError::Transcription(e));
            }
        };
        let text = transcription.text();
        if text.is_empty() {
            debug!(session_id = %ctx.session_id, segment = segment.sequence, "empty transcript, skipping");
            return SegmentOutcome::Skipped;
        }

        // 2. Normalize
        let src = normalize(transcription.language.as_deref());
        let tgt = normalize_str(&ctx.target_lang);
        debug!(
            session_id = %ctx.session_id,
            segment = segment.sequence,
            src = %src,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transcribed"
        );

        // 3. Translate
        let translated = match self.translator.translate(&text, &src, &tgt).await {
            Ok(translated) => translated,
            Err(e) => {
                error!(
                    session_id = %ctx.session_id,
                    segment = segment.sequence,
                    src = %src,
                    tgt = %tgt,
                    error = %e,
                    "translation failed, segment dropped"
                );
                // Keep the raw speech in the transcript so the gap can be diagnosed.
                self.log_line(ctx, &src, &src, &text).await;
                return SegmentOutcome::Failed(PipelineError::Translation(e));
            }
        };

        // 4. Log
        self.log_line(ctx, &src, &tgt, &translated).await;

        // 5. Caption
        if let Some(sink) = ctx.captions.as_ref().filter(|sink| sink.is_open()) {
            let caption = CaptionMessage {
                src_lang: src.clone(),
                tgt_lang: tgt.clone(),
                text: translated.clone(),
            };
            match sink.send(&caption) {
                Ok(()) => self.stats.caption_sent(),
                Err(e) => {
                    warn!(session_id = %ctx.session_id, segment = segment.sequence, error = %e, "caption not delivered");
                    self.stats.caption_failed();
                }
            }
        }

        // 6. Synthesize
        let frames = match self.synthesize_into(&translated, &tgt, ctx).await {
            Ok(frames) => frames,
            Err((frames, e)) => {
                error!(
                    session_id = %ctx.session_id,
                    segment = segment.sequence,
                    frames_queued = frames,
                    error = %e,
                    "synthesis failed"
                );
                return SegmentOutcome::Failed(e);
            }
        };

        info!(
            session_id = %ctx.session_id,
            segment = segment.sequence,
            src = %src,
            tgt = %tgt,
            frames,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "segment delivered"
        );
        SegmentOutcome::Delivered { src, tgt, frames }
    }

    async fn log_line(&self, ctx: &SessionContext, src: &str, tgt: &str, text: &str) {
        if let Err(e) = self.transcripts.append(src, tgt, text).await {
            warn!(session_id = %ctx.session_id, error = %e, "transcript write failed");
            self.stats.transcript_failed();
        }
    }

    /// Stream synthesized frames into the playback queue as they arrive.
    ///
    /// On failure returns how many frames were already queued; those stay queued.
    async fn synthesize_into(
        &self,
        text: &str,
        language: &str,
        ctx: &SessionContext,
    ) -> Result<usize, (usize, PipelineError)> {
        let voice = voice_for(language);
        let mut stream = self
            .tts
            .synthesize(text, voice, self.output_sample_rate)
            .await
            .map_err(|e| (0, PipelineError::Synthesis(e)))?;

        let mut queued = 0;
        while let Some(item) = stream.next().await {
            let frame = item.map_err(|e| (queued, PipelineError::Synthesis(e)))?;
            let frame = self.to_output_rate(frame).map_err(|e| (queued, e))?;
            ctx.playback.push(frame);
            self.stats.frame_enqueued();
            queued += 1;
        }
        Ok(queued)
    }

    fn to_output_rate(&self, frame: AudioFrame) -> Result<AudioFrame, PipelineError> {
        if frame.sample_rate() == self.output_sample_rate && frame.channels() == 1 {
            return Ok(frame);
        }
        let samples = resample(&frame.to_mono_f32(), frame.sample_rate(), self.output_sample_rate)
            .map_err(|e| PipelineError::Synthesis(EngineError::InvalidResponse(e.to_string())))?;
        Ok(AudioFrame::mono(f32_to_pcm16(&samples), self.output_sample_rate))
    }
}
