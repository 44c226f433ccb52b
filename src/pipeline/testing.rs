//! In-memory collaborators for pipeline and session tests.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{CaptionMessage, CaptionSink, PipelineOrchestrator, PipelineStats, SessionContext};
use crate::audio::frame::f32_to_pcm16;
use crate::audio::{AudioFrame, FrameChunker, PlaybackQueue, VoicedSegment};
use crate::engines::{
    EngineError, FrameStream, SpeechSynthesizer, SpeechToText, TranscriptionResult,
    TranslationBackend, TranslationModel,
};
use crate::error::SinkError;
use crate::transcript::TranscriptSink;
use crate::translation::{TranslationEngineCache, TranslationTable};

/// `ms` milliseconds of a loud 220Hz tone at 16kHz, which the energy gate treats as speech.
pub(crate) fn voiced_pcm(ms: usize) -> Vec<u8> {
    let samples: Vec<f32> = (0..16 * ms)
        .map(|i| 0.3 * (2.0 * PI * 220.0 * i as f32 / 16000.0).sin())
        .collect();
    f32_to_pcm16(&samples)
}

pub(crate) fn segment(sequence: u64) -> VoicedSegment {
    VoicedSegment { sequence, pcm: voiced_pcm(1000) }
}

// --- speech-to-text -------------------------------------------------------

enum SttMode {
    Fixed { text: String, language: Option<String> },
    Counting { language: String },
    Failing,
}

pub(crate) struct FakeStt {
    mode: SttMode,
    calls: AtomicUsize,
    first_call_delay: Duration,
}

impl FakeStt {
    pub(crate) fn fixed(text: &str, language: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            mode: SttMode::Fixed {
                text: text.to_string(),
                language: language.map(str::to_string),
            },
            calls: AtomicUsize::new(0),
            first_call_delay: Duration::ZERO,
        })
    }

    /// Returns "segment N" for the Nth call; the first call is slow.
    pub(crate) fn counting(language: &str, first_call_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mode: SttMode::Counting { language: language.to_string() },
            calls: AtomicUsize::new(0),
            first_call_delay,
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            mode: SttMode::Failing,
            calls: AtomicUsize::new(0),
            first_call_delay: Duration::ZERO,
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    async fn transcribe(&self, samples: &[f32]) -> Result<TranscriptionResult, EngineError> {
        assert!(!samples.is_empty());
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == 1 && !self.first_call_delay.is_zero() {
            tokio::time::sleep(self.first_call_delay).await;
        }
        match &self.mode {
            SttMode::Fixed { text, language } => Ok(TranscriptionResult {
                pieces: vec![text.clone()],
                language: language.clone(),
            }),
            SttMode::Counting { language } => Ok(TranscriptionResult {
                pieces: vec!["segment".to_string(), call.to_string()],
                language: Some(language.clone()),
            }),
            SttMode::Failing => Err(EngineError::Transport("recognizer offline".to_string())),
        }
    }
}

// --- translation ----------------------------------------------------------

struct FixedModel(String);

#[async_trait]
impl TranslationModel for FixedModel {
    async fn translate(&self, _text: &str) -> Result<String, EngineError> {
        Ok(self.0.clone())
    }
}

pub(crate) struct FakeTranslator {
    output: Option<String>,
    loads: AtomicU64,
}

impl FakeTranslator {
    pub(crate) fn fixed(output: &str) -> Arc<Self> {
        Arc::new(Self { output: Some(output.to_string()), loads: AtomicU64::new(0) })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self { output: None, loads: AtomicU64::new(0) })
    }
}

#[async_trait]
impl TranslationBackend for FakeTranslator {
    async fn load(&self, model_name: &str) -> Result<Arc<dyn TranslationModel>, EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match &self.output {
            Some(output) => Ok(Arc::new(FixedModel(output.clone()))),
            None => Err(EngineError::Rejected {
                status: 404,
                message: format!("{} not found", model_name),
            }),
        }
    }
}

// --- synthesis ------------------------------------------------------------

pub(crate) struct FakeTts {
    frames: usize,
    fail_after: Option<usize>,
    rate: Option<u32>,
    calls: Mutex<Vec<(String, String, u32)>>,
}

impl FakeTts {
    pub(crate) fn frames(frames: usize) -> Arc<Self> {
        Arc::new(Self { frames, fail_after: None, rate: None, calls: Mutex::new(Vec::new()) })
    }

    pub(crate) fn failing_after(frames: usize) -> Arc<Self> {
        Arc::new(Self {
            frames,
            fail_after: Some(frames),
            rate: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Produces frames at `rate` regardless of what was requested.
    pub(crate) fn at_rate(rate: u32) -> Arc<Self> {
        Arc::new(Self { frames: 3, fail_after: None, rate: Some(rate), calls: Mutex::new(Vec::new()) })
    }

    pub(crate) fn calls(&self) -> Vec<(String, String, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeTts {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        sample_rate: u32,
    ) -> Result<FrameStream, EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), voice.to_string(), sample_rate));

        let rate = self.rate.unwrap_or(sample_rate);
        let frame_bytes = FrameChunker::frame_bytes_for(rate, 20);
        let mut items: Vec<Result<AudioFrame, EngineError>> = (0..self.frames)
            .map(|_| Ok(AudioFrame::mono(vec![0u8; frame_bytes], rate)))
            .collect();
        if self.fail_after.is_some() {
            items.push(Err(EngineError::Transport("stream reset".to_string())));
        }
        Ok(stream::iter(items).boxed())
    }
}

// --- side channels --------------------------------------------------------

/// Records captions along with the playback queue length at send time.
pub(crate) struct RecordingCaptions {
    open: AtomicBool,
    fail: bool,
    queue: Mutex<Option<Arc<PlaybackQueue>>>,
    sent: Mutex<Vec<(CaptionMessage, usize)>>,
}

impl RecordingCaptions {
    fn build(open: bool, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(open),
            fail,
            queue: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn open() -> Arc<Self> {
        Self::build(true, false)
    }

    pub(crate) fn closed() -> Arc<Self> {
        Self::build(false, false)
    }

    pub(crate) fn failing() -> Arc<Self> {
        Self::build(true, true)
    }

    pub(crate) fn watch(&self, queue: Arc<PlaybackQueue>) {
        *self.queue.lock().unwrap() = Some(queue);
    }

    pub(crate) fn sent(&self) -> Vec<(CaptionMessage, usize)> {
        self.sent.lock().unwrap().clone()
    }
}

impl CaptionSink for RecordingCaptions {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, caption: &CaptionMessage) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Write("data channel buffer full".to_string()));
        }
        let queued = self.queue.lock().unwrap().as_ref().map_or(0, |q| q.len());
        self.sent.lock().unwrap().push((caption.clone(), queued));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryTranscript {
    lines: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl MemoryTranscript {
    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl TranscriptSink for MemoryTranscript {
    async fn append(&self, src_lang: &str, tgt_lang: &str, text: &str) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Write("disk full".to_string()));
        }
        self.lines
            .lock()
            .unwrap()
            .push(format!("{}->{}: {}", src_lang, tgt_lang, text));
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

// --- harness --------------------------------------------------------------

/// An orchestrator wired to fakes, with a session targeting Norwegian.
pub(crate) struct Harness {
    pub(crate) orchestrator: Arc<PipelineOrchestrator>,
    pub(crate) ctx: SessionContext,
    pub(crate) captions: Arc<RecordingCaptions>,
    pub(crate) transcripts: Arc<MemoryTranscript>,
    pub(crate) tts: Arc<FakeTts>,
    pub(crate) stats: Arc<PipelineStats>,
    translator: Arc<FakeTranslator>,
}

impl Harness {
    pub(crate) fn new(stt: Arc<FakeStt>, translator: Arc<FakeTranslator>) -> Self {
        Self::build(stt, translator, FakeTts::frames(3), RecordingCaptions::open())
    }

    pub(crate) fn with_caption_sink(
        stt: Arc<FakeStt>,
        translator: Arc<FakeTranslator>,
        captions: Arc<RecordingCaptions>,
    ) -> Self {
        Self::build(stt, translator, FakeTts::frames(3), captions)
    }

    pub(crate) fn with_tts(stt: Arc<FakeStt>, translator: Arc<FakeTranslator>, tts: Arc<FakeTts>) -> Self {
        Self::build(stt, translator, tts, RecordingCaptions::open())
    }

    fn build(
        stt: Arc<FakeStt>,
        translator: Arc<FakeTranslator>,
        tts: Arc<FakeTts>,
        captions: Arc<RecordingCaptions>,
    ) -> Self {
        let stats = Arc::new(PipelineStats::new());
        let transcripts = Arc::new(MemoryTranscript::default());
        let cache = Arc::new(TranslationEngineCache::new(
            translator.clone(),
            TranslationTable::default(),
        ));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            stt,
            cache,
            tts.clone(),
            transcripts.clone(),
            stats.clone(),
            48000,
        ));

        let playback = Arc::new(PlaybackQueue::new());
        captions.watch(playback.clone());
        let ctx = SessionContext {
            session_id: "test-session".to_string(),
            target_lang: "no".to_string(),
            captions: Some(captions.clone()),
            playback,
        };

        Self { orchestrator, ctx, captions, transcripts, tts, stats, translator }
    }

    pub(crate) fn ctx_with_target(&self, target_lang: &str) -> SessionContext {
        SessionContext { target_lang: target_lang.to_string(), ..self.ctx.clone() }
    }

    pub(crate) fn translator_loads(&self) -> u64 {
        self.translator.loads.load(Ordering::SeqCst)
    }
}
