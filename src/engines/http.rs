//! # HTTP Engine Clients
//!
//! `reqwest` clients for model servers reachable over HTTP.
//!
//! ## Endpoints:
//! - **Speech-to-text**: `POST {stt_url}/v1/audio/transcriptions` (OpenAI-compatible multipart)
//! - **Translation**: `POST {translation_url}/models/load` and `POST {translation_url}/translate`
//! - **Synthesis**: `POST {tts_url}/synthesize`, answered with a chunked raw PCM16 body
//!
//! Synthesized audio is re-chunked into 20ms frames while the body is still arriving, so
//! playback can start before synthesis has finished.

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    EngineError, FrameStream, SpeechSynthesizer, SpeechToText, TranscriptionResult,
    TranslationBackend, TranslationModel,
};
use crate::audio::frame::f32_to_i16;
use crate::audio::{AudioFrame, FrameChunker, SPEECH_SAMPLE_RATE};

/// Duration of each synthesized playback frame.
pub const FRAME_MS: u32 = 20;

/// Token budget for one translated segment.
const MAX_NEW_TOKENS: u32 = 256;

fn build_client(timeout: Duration) -> Result<reqwest::Client, EngineError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EngineError::Transport(format!("failed to build HTTP client: {}", e)))
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Turn a non-2xx response into `EngineError::Rejected` with the body as message.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(EngineError::Rejected { status: status.as_u16(), message })
}

fn transport_error(e: reqwest::Error) -> EngineError {
    EngineError::Transport(e.to_string())
}

/// Encode mono float PCM as a 16-bit WAV file in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, EngineError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)
        .map_err(|e| EngineError::Encoding(e.to_string()))?;
    for &sample in samples {
        writer
            .write_sample(f32_to_i16(sample))
            .map_err(|e| EngineError::Encoding(e.to_string()))?;
    }
    writer.finalize().map_err(|e| EngineError::Encoding(e.to_string()))?;
    Ok(cursor.into_inner())
}

// ---------------------------------------------------------------------------
// Speech-to-text
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<TranscriptionSegment>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionSegment {
    text: String,
}

impl From<TranscriptionResponse> for TranscriptionResult {
    fn from(response: TranscriptionResponse) -> Self {
        let pieces = if response.segments.is_empty() {
            vec![response.text]
        } else {
            response.segments.into_iter().map(|s| s.text).collect()
        };
        TranscriptionResult { pieces, language: response.language }
    }
}

/// OpenAI-compatible transcription client.
pub struct HttpSpeechToText {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpSpeechToText {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: endpoint(base_url, "v1/audio/transcriptions"),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe(&self, samples: &[f32]) -> Result<TranscriptionResult, EngineError> {
        let wav = encode_wav(samples, SPEECH_SAMPLE_RATE)?;
        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("segment.wav")
            .mime_str("audio/wav")
            .map_err(|e| EngineError::Encoding(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("temperature", "0");

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response).await?;
        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;

        Ok(body.into())
    }
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct LoadRequest<'a> {
    model: &'a str,
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    model: &'a str,
    text: &'a str,
    max_new_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    text: String,
}

/// Loads models on a translation server. Each loaded model shares the same HTTP client.
pub struct HttpTranslationBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTranslationBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TranslationBackend for HttpTranslationBackend {
    async fn load(&self, model_name: &str) -> Result<Arc<dyn TranslationModel>, EngineError> {
        debug!(model = model_name, "loading translation model");
        let response = self
            .client
            .post(endpoint(&self.base_url, "models/load"))
            .json(&LoadRequest { model: model_name })
            .send()
            .await
            .map_err(transport_error)?;
        ensure_success(response).await?;

        Ok(Arc::new(HttpTranslationModel {
            client: self.client.clone(),
            url: endpoint(&self.base_url, "translate"),
            model: model_name.to_string(),
        }))
    }
}

struct HttpTranslationModel {
    client: reqwest::Client,
    url: String,
    model: String,
}

#[async_trait]
impl TranslationModel for HttpTranslationModel {
    async fn translate(&self, text: &str) -> Result<String, EngineError> {
        let request = TranslateRequest {
            model: &self.model,
            text,
            max_new_tokens: MAX_NEW_TOKENS,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response).await?;
        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;
        Ok(body.text.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
    sample_rate: u32,
    format: &'static str,
}

/// Streaming speech synthesis client.
pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    url: String,
}

impl HttpSpeechSynthesizer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: endpoint(base_url, "synthesize"),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        sample_rate: u32,
    ) -> Result<FrameStream, EngineError> {
        let request = SynthesizeRequest { text, voice, sample_rate, format: "s16le" };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response).await?;

        Ok(rechunk_body(response.bytes_stream(), sample_rate))
    }
}

/// Re-chunk a raw PCM16 byte stream into 20ms mono frames as bytes arrive.
///
/// A body error ends the stream after yielding the error. A trailing partial frame is dropped.
pub fn rechunk_body<S, B, E>(body: S, sample_rate: u32) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let chunker = FrameChunker::new(FrameChunker::frame_bytes_for(sample_rate, FRAME_MS));
    let state = (Box::pin(body), chunker, VecDeque::<Vec<u8>>::new(), false);

    stream::unfold(state, move |(mut body, mut chunker, mut ready, mut done)| async move {
        loop {
            if let Some(frame) = ready.pop_front() {
                let frame = AudioFrame::mono(frame, sample_rate);
                return Some((Ok(frame), (body, chunker, ready, done)));
            }
            if done {
                return None;
            }
            match body.next().await {
                Some(Ok(bytes)) => ready.extend(chunker.push(bytes.as_ref())),
                Some(Err(e)) => {
                    warn!(error = %e, "synthesis stream interrupted");
                    done = true;
                    let err = EngineError::Transport(e.to_string());
                    return Some((Err(err), (body, chunker, ready, done)));
                }
                None => {
                    if chunker.pending_len() > 0 {
                        debug!(bytes = chunker.pending_len(), "dropping trailing partial frame");
                    }
                    done = true;
                }
            }
        }
    })
    .boxed()
}
