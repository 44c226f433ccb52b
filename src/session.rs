//! # Interpreter Session Management
//!
//! A session is one connected peer: its inbound audio, segment accumulator, pipeline
//! worker and playback queue. Sessions are the unit of concurrency. Nothing is shared
//! between them except the translation cache and the pipeline counters.
//!
//! ## Per-session Tasks:
//! - **ingest**: inbound frames → accumulator → segment channel (never waits on processing)
//! - **worker**: one segment at a time, in submission order, through the pipeline
//! - **playback pump**: playback queue → transport
//!
//! ## Session Lifecycle:
//! 1. **Active**: Receiving audio and producing output
//! 2. **Closed**: Connection gone. Queued segments are discarded, the in-flight segment
//!    finishes, the partial segment in the accumulator is dropped.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::{
    AudioError, AudioFrame, EnergyGate, PlaybackQueue, SegmentAccumulator, SegmenterConfig,
    SpeechDetector, VoicedSegment,
};
use crate::error::{AppError, SinkError};
use crate::language::normalize_str;
use crate::pipeline::{CaptionSink, PipelineOrchestrator, SegmentOutcome, SessionContext};
use crate::translation::ConfigurationError;

/// Outbound audio side of the transport.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, frame: AudioFrame) -> Result<(), SinkError>;
}

/// Why a session could not be created or fed.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Concurrent session limit reached
    LimitReached(usize),
    /// The requested target language cannot be served
    Route(ConfigurationError),
    /// Declared audio format or received bytes are unusable
    InvalidAudio(AudioError),
    /// The session is already closed
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::LimitReached(max) => {
                write!(f, "Maximum concurrent sessions ({}) reached", max)
            }
            SessionError::Route(e) => write!(f, "{}", e),
            SessionError::InvalidAudio(e) => write!(f, "{}", e),
            SessionError::Closed => write!(f, "Session is closed"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        SessionError::InvalidAudio(err)
    }
}

/// Session setup failures surface as HTTP errors before the WebSocket upgrade.
impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::LimitReached(_) => AppError::ServiceUnavailable(err.to_string()),
            SessionError::Route(e) => e.into(),
            SessionError::InvalidAudio(e) => AppError::BadRequest(e.to_string()),
            SessionError::Closed => AppError::BadRequest(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

/// What the client asked for when connecting.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Target language tag as sent by the client, normalized on creation
    pub target_lang: String,
    /// Sample rate of inbound PCM
    pub input_rate: u32,
    /// Interleaved channels in inbound PCM
    pub channels: u16,
}

/// Server-wide defaults applied to every new session.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub vad_aggressiveness: u8,
    pub segmenter: SegmenterConfig,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            vad_aggressiveness: crate::audio::vad::DEFAULT_MODE,
            segmenter: SegmenterConfig::default(),
        }
    }
}

/// One connected peer.
pub struct Session {
    pub id: String,
    /// Normalized target language
    pub target_lang: String,
    pub input_rate: u32,
    pub channels: u16,
    pub created_at: DateTime<Utc>,
    closed: Arc<AtomicBool>,
    playback: Arc<PlaybackQueue>,
    frames_tx: Mutex<Option<mpsc::UnboundedSender<AudioFrame>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
}

/// Snapshot for the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub target_lang: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub playback_queued: usize,
}

impl Session {
    /// Spawn the session's tasks. Must be called inside a tokio runtime.
    pub fn start(
        id: String,
        request: &SessionRequest,
        detector: Arc<dyn SpeechDetector>,
        segmenter: &SegmenterConfig,
        orchestrator: Arc<PipelineOrchestrator>,
        captions: Option<Arc<dyn CaptionSink>>,
        output: Arc<dyn FrameSink>,
    ) -> Arc<Self> {
        let target_lang = normalize_str(&request.target_lang);
        let closed = Arc::new(AtomicBool::new(false));
        let playback = Arc::new(PlaybackQueue::new());
        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<AudioFrame>();
        let (segments_tx, segments_rx) = mpsc::unbounded_channel::<VoicedSegment>();

        let ctx = SessionContext {
            session_id: id.clone(),
            target_lang: target_lang.clone(),
            captions,
            playback: playback.clone(),
        };

        let accumulator = SegmentAccumulator::new(detector, segmenter);
        let ingest = tokio::spawn(run_ingest(
            id.clone(),
            frames_rx,
            accumulator,
            segments_tx,
            orchestrator.clone(),
        ));
        let worker = tokio::spawn(run_worker(segments_rx, ctx, orchestrator.clone(), closed.clone()));
        let pump = tokio::spawn(run_playback(id.clone(), playback.clone(), output, orchestrator));

        info!(session_id = %id, target_lang = %target_lang, input_rate = request.input_rate, channels = request.channels, "session started");

        Arc::new(Self {
            id,
            target_lang,
            input_rate: request.input_rate,
            channels: request.channels,
            created_at: Utc::now(),
            closed,
            playback,
            frames_tx: Mutex::new(Some(frames_tx)),
            tasks: Mutex::new(vec![ingest, worker, pump]),
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        })
    }

    /// Hand one block of interleaved PCM16 from the transport to the ingest task.
    pub fn push_pcm(&self, bytes: Vec<u8>) -> Result<(), SessionError> {
        let len = bytes.len() as u64;
        let frame = AudioFrame::new(bytes, self.input_rate, self.channels)?;
        self.push_frame(frame)?;
        self.bytes_received.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    pub fn push_frame(&self, frame: AudioFrame) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let sender = self.frames_tx.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) if tx.send(frame).is_ok() => {
                self.frames_received.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            _ => Err(SessionError::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_closed() {
            SessionStatus::Closed
        } else {
            SessionStatus::Active
        }
    }

    /// Stop the session. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender ends the ingest task, which drops the segment sender in turn.
        self.frames_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.playback.close();
        info!(
            session_id = %self.id,
            frames = self.frames_received.load(Ordering::Relaxed),
            "session closed"
        );
    }

    /// Wait for all session tasks to finish. Intended for use after `close`.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(session_id = %self.id, error = %e, "session task ended abnormally");
            }
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            target_lang: self.target_lang.clone(),
            status: self.status(),
            created_at: self.created_at,
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            playback_queued: self.playback.len(),
        }
    }
}

async fn run_ingest(
    session_id: String,
    mut frames_rx: mpsc::UnboundedReceiver<AudioFrame>,
    mut accumulator: SegmentAccumulator,
    segments_tx: mpsc::UnboundedSender<VoicedSegment>,
    orchestrator: Arc<PipelineOrchestrator>,
) {
    while let Some(frame) = frames_rx.recv().await {
        match accumulator.push_frame(&frame) {
            Ok(Some(segment)) => {
                orchestrator.stats().segment_submitted();
                if segments_tx.send(segment).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(session_id = %session_id, error = %e, "inbound frame rejected"),
        }
    }

    let dropped = accumulator.finish();
    if dropped > 0 {
        debug!(session_id = %session_id, bytes = dropped, "partial segment discarded at end of stream");
    }
    orchestrator.stats().partial_discarded(dropped);
}

async fn run_worker(
    mut segments_rx: mpsc::UnboundedReceiver<VoicedSegment>,
    ctx: SessionContext,
    orchestrator: Arc<PipelineOrchestrator>,
    closed: Arc<AtomicBool>,
) {
    while let Some(segment) = segments_rx.recv().await {
        if closed.load(Ordering::SeqCst) {
            debug!(session_id = %ctx.session_id, segment = segment.sequence, "session closed, discarding queued segment");
            orchestrator.stats().segment_discarded_on_close();
            continue;
        }

        let outcome = orchestrator.process(&segment, &ctx).await;
        match &outcome {
            SegmentOutcome::Skipped => {
                debug!(session_id = %ctx.session_id, segment = segment.sequence, "segment skipped")
            }
            SegmentOutcome::Delivered { frames, .. } => {
                debug!(session_id = %ctx.session_id, segment = segment.sequence, frames, "segment complete")
            }
            SegmentOutcome::Failed(e) => {
                warn!(session_id = %ctx.session_id, segment = segment.sequence, error = %e, "segment dropped")
            }
        }
        orchestrator.stats().record(&outcome);
    }
}

async fn run_playback(
    session_id: String,
    playback: Arc<PlaybackQueue>,
    output: Arc<dyn FrameSink>,
    orchestrator: Arc<PipelineOrchestrator>,
) {
    while let Some(frame) = playback.pop().await {
        if let Err(e) = output.deliver(frame) {
            warn!(session_id = %session_id, error = %e, "playback frame not delivered");
            orchestrator.stats().frame_undelivered();
        }
    }
    debug!(session_id = %session_id, "playback pump stopped");
}

/// Tracks live sessions and enforces the concurrent session limit.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_concurrent_sessions: usize,
    orchestrator: Arc<PipelineOrchestrator>,
    defaults: SessionDefaults,
}

/// Summary of session manager state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionManagerSummary {
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub sessions: Vec<SessionInfo>,
}

impl SessionManager {
    pub fn new(
        max_concurrent_sessions: usize,
        orchestrator: Arc<PipelineOrchestrator>,
        defaults: SessionDefaults,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
            orchestrator,
            defaults,
        }
    }

    pub fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        &self.orchestrator
    }

    /// Check a request without creating anything.
    ///
    /// ## Returns:
    /// - **Err(LimitReached)**: no capacity left
    /// - **Err(Route)**: the target language cannot be reached from the configured languages
    /// - **Err(InvalidAudio)**: zero sample rate or channel count
    pub fn validate(&self, request: &SessionRequest) -> Result<(), SessionError> {
        if self.active_session_count() >= self.max_concurrent_sessions {
            return Err(SessionError::LimitReached(self.max_concurrent_sessions));
        }
        if request.input_rate == 0 || request.channels == 0 {
            return Err(SessionError::InvalidAudio(AudioError::InvalidFormat(format!(
                "unsupported input format: {} Hz, {} channel(s)",
                request.input_rate, request.channels
            ))));
        }
        let target = normalize_str(&request.target_lang);
        self.orchestrator
            .translator()
            .table()
            .validate_target(&target)
            .map_err(SessionError::Route)
    }

    /// Validate the request and start a new session.
    pub fn create_session(
        &self,
        request: &SessionRequest,
        captions: Option<Arc<dyn CaptionSink>>,
        output: Arc<dyn FrameSink>,
    ) -> Result<Arc<Session>, SessionError> {
        self.validate(request)?;
        let detector: Arc<dyn SpeechDetector> =
            Arc::new(EnergyGate::new(self.defaults.vad_aggressiveness)?);

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check under the write lock so two racing creates cannot both take the last slot.
        if sessions.len() >= self.max_concurrent_sessions {
            return Err(SessionError::LimitReached(self.max_concurrent_sessions));
        }

        let session = Session::start(
            Uuid::new_v4().to_string(),
            request,
            detector,
            &self.defaults.segmenter,
            self.orchestrator.clone(),
            captions,
            output,
        );
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    /// Close and forget a session.
    pub fn remove_session(&self, session_id: &str) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        if let Some(session) = &removed {
            session.close();
        }
        removed
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Close every session and wait for their tasks, used during shutdown.
    ///
    /// Queued segments are discarded but a pipeline step already in flight runs to completion.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in &drained {
            session.close();
        }
        join_all(drained.iter().map(|session| session.join())).await;
        drained.len()
    }

    pub fn summary(&self) -> SessionManagerSummary {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut infos: Vec<SessionInfo> = sessions.values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        SessionManagerSummary {
            active_sessions: sessions.len(),
            max_sessions: self.max_concurrent_sessions,
            sessions: infos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::*;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingOutput {
        frames: Mutex<Vec<AudioFrame>>,
    }

    impl FrameSink for RecordingOutput {
        fn deliver(&self, frame: AudioFrame) -> Result<(), SinkError> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    fn request(target: &str) -> SessionRequest {
        SessionRequest { target_lang: target.to_string(), input_rate: 16000, channels: 1 }
    }

    fn manager(harness: &Harness, max: usize) -> SessionManager {
        SessionManager::new(max, harness.orchestrator.clone(), SessionDefaults::default())
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_segments_are_delivered_in_order() {
        let harness = Harness::new(FakeStt::counting("en", Duration::from_millis(80)), FakeTranslator::fixed("x"));
        let manager = manager(&harness, 4);
        let output = Arc::new(RecordingOutput::default());
        let session = manager
            .create_session(&request("en"), Some(harness.captions.clone()), output.clone())
            .unwrap();

        session.push_pcm(voiced_pcm(1000)).unwrap();
        session.push_pcm(voiced_pcm(1000)).unwrap();

        wait_for(|| harness.captions.sent().len() == 2).await;
        let texts: Vec<String> = harness.captions.sent().into_iter().map(|(c, _)| c.text).collect();
        assert_eq!(texts, vec!["segment 1", "segment 2"]);

        wait_for(|| output.frames.lock().unwrap().len() == 6).await;
        manager.remove_session(&session.id);
        session.join().await;
        assert_eq!(harness.stats.snapshot().segments_delivered, 2);
    }

    #[tokio::test]
    async fn test_close_discards_queued_segments() {
        let stt = FakeStt::counting("en", Duration::from_millis(150));
        let harness = Harness::new(stt.clone(), FakeTranslator::fixed("x"));
        let manager = manager(&harness, 4);
        let session = manager
            .create_session(&request("en"), None, Arc::new(RecordingOutput::default()))
            .unwrap();

        for _ in 0..3 {
            session.push_pcm(voiced_pcm(1000)).unwrap();
        }
        wait_for(|| harness.stats.snapshot().segments_submitted == 3).await;

        manager.remove_session(&session.id);
        session.join().await;

        let stats = harness.stats.snapshot();
        assert_eq!(stats.segments_delivered, 1);
        assert_eq!(stats.segments_discarded_on_close, 2);
        assert_eq!(stt.calls(), 1);
    }

    #[tokio::test]
    async fn test_partial_segment_dropped_on_close() {
        let harness = Harness::new(FakeStt::fixed("hello", Some("en")), FakeTranslator::fixed("x"));
        let manager = manager(&harness, 4);
        let session = manager
            .create_session(&request("en"), None, Arc::new(RecordingOutput::default()))
            .unwrap();

        session.push_pcm(voiced_pcm(500)).unwrap();
        session.close();
        session.join().await;

        let stats = harness.stats.snapshot();
        assert_eq!(stats.segments_submitted, 0);
        assert_eq!(stats.partial_bytes_discarded, 16000);
        assert!(matches!(session.push_pcm(voiced_pcm(20)), Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn test_session_limit_enforced() {
        let harness = Harness::new(FakeStt::fixed("hello", Some("en")), FakeTranslator::fixed("x"));
        let manager = manager(&harness, 1);
        let output: Arc<dyn FrameSink> = Arc::new(RecordingOutput::default());

        let first = manager.create_session(&request("no"), None, output.clone()).unwrap();
        assert_eq!(manager.active_session_count(), 1);
        assert!(matches!(
            manager.create_session(&request("no"), None, output.clone()),
            Err(SessionError::LimitReached(1))
        ));

        manager.remove_session(&first.id);
        assert!(manager.create_session(&request("no"), None, output).is_ok());
        assert_eq!(manager.close_all().await, 1);
        assert_eq!(manager.active_session_count(), 0);
    }

    #[tokio::test]
    async fn test_unroutable_target_rejected_at_setup() {
        let harness = Harness::new(FakeStt::fixed("hello", Some("en")), FakeTranslator::fixed("x"));
        let manager = manager(&harness, 4);

        let result = manager.create_session(
            &request("de-DE"),
            None,
            Arc::new(RecordingOutput::default()),
        );
        assert!(matches!(result, Err(SessionError::Route(ConfigurationError::NoRoute { .. }))));
        assert_eq!(manager.active_session_count(), 0);
    }

    #[test]
    fn test_setup_errors_map_to_http_errors() {
        let full: AppError = SessionError::LimitReached(2).into();
        assert!(matches!(full, AppError::ServiceUnavailable(ref m) if m.contains("(2)")));

        let no_route: AppError = SessionError::Route(ConfigurationError::NoRoute {
            src: "en".to_string(),
            tgt: "de".to_string(),
        })
        .into();
        assert!(matches!(no_route, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_misaligned_pcm_rejected() {
        let harness = Harness::new(FakeStt::fixed("hello", Some("en")), FakeTranslator::fixed("x"));
        let manager = manager(&harness, 4);
        let session = manager
            .create_session(
                &SessionRequest { target_lang: "nb".to_string(), input_rate: 48000, channels: 2 },
                None,
                Arc::new(RecordingOutput::default()),
            )
            .unwrap();

        assert_eq!(session.target_lang, "no");
        assert!(matches!(session.push_pcm(vec![0u8; 6]), Err(SessionError::InvalidAudio(_))));
        assert!(session.push_pcm(vec![0u8; 3840]).is_ok());
        assert_eq!(session.info().frames_received, 1);
        manager.close_all().await;
    }

    #[tokio::test]
    async fn test_close_all_waits_for_in_flight_segment() {
        let stt = FakeStt::counting("en", Duration::from_millis(200));
        let harness = Harness::new(stt.clone(), FakeTranslator::fixed("x"));
        let manager = manager(&harness, 4);
        manager
            .create_session(&request("no"), None, Arc::new(RecordingOutput::default()))
            .unwrap();
        let session = manager
            .create_session(&request("no"), None, Arc::new(RecordingOutput::default()))
            .unwrap();

        session.push_pcm(voiced_pcm(1000)).unwrap();
        session.push_pcm(voiced_pcm(1000)).unwrap();
        wait_for(|| stt.calls() == 1 && harness.stats.snapshot().segments_submitted == 2).await;

        assert_eq!(manager.close_all().await, 2);
        assert_eq!(manager.active_session_count(), 0);

        let stats = harness.stats.snapshot();
        assert_eq!(stats.segments_delivered, 1);
        assert_eq!(stats.segments_discarded_on_close, 1);
        assert_eq!(harness.transcripts.lines().len(), 1);
        assert!(matches!(session.push_pcm(voiced_pcm(20)), Err(SessionError::Closed)));
    }
}
