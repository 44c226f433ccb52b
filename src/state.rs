//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket connection.
//!
//! ## What lives here:
//! - **Configuration**: `Arc<RwLock<AppConfig>>`, read on every request
//! - **Sessions**: the `SessionManager`, which keeps live sessions behind its own `RwLock`
//! - **Pipeline**: the orchestrator shared by all sessions (engines, translation cache,
//!   transcript log, counters)
//! - **Start time**: for uptime reporting

use anyhow::Result;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crate::config::AppConfig;
use crate::engines::{HttpSpeechSynthesizer, HttpSpeechToText, HttpTranslationBackend};
use crate::pipeline::{PipelineOrchestrator, PipelineStats};
use crate::session::SessionManager;
use crate::transcript::FileTranscriptLog;
use crate::translation::TranslationEngineCache;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub sessions: Arc<SessionManager>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the HTTP engine adapters, translation cache and transcript log from `config`.
    ///
    /// No engine is contacted here. Translation models load lazily on first use.
    pub fn new(config: AppConfig) -> Result<Self> {
        let timeout = config.request_timeout();
        let stt = Arc::new(HttpSpeechToText::new(
            &config.engines.stt_url,
            &config.engines.stt_model,
            timeout,
        )?);
        let backend = Arc::new(HttpTranslationBackend::new(&config.engines.translation_url, timeout)?);
        let tts = Arc::new(HttpSpeechSynthesizer::new(&config.engines.tts_url, timeout)?);

        let translator = Arc::new(TranslationEngineCache::new(backend, config.translation_table()));
        let transcripts = Arc::new(FileTranscriptLog::new(&config.transcripts.log_dir));

        let orchestrator = Arc::new(PipelineOrchestrator::new(
            stt,
            translator,
            tts,
            transcripts,
            Arc::new(PipelineStats::new()),
            config.audio.output_sample_rate,
        ));

        Ok(Self::with_orchestrator(config, orchestrator))
    }

    /// Build state around an existing orchestrator.
    pub fn with_orchestrator(config: AppConfig, orchestrator: Arc<PipelineOrchestrator>) -> Self {
        let sessions = Arc::new(SessionManager::new(
            config.performance.max_concurrent_sessions,
            orchestrator,
            config.session_defaults(),
        ));
        Self {
            config: Arc::new(RwLock::new(config)),
            sessions,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        self.sessions.orchestrator()
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        self.orchestrator().stats()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
