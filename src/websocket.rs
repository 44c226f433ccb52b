//! # WebSocket Interpreter Transport
//!
//! Clients connect to `/ws/interpret` and stream microphone audio. The server answers with
//! captions and synthesized speech in the target language.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: `GET /ws/interpret?target_lang=no&sample_rate=48000&channels=1`.
//!    Unsupported targets are refused with 400 before the upgrade, a full server with 503.
//! 2. **Hello**: The server sends a `hello` message with the session id and transcript path
//! 3. **Audio Streaming**: Binary messages carry PCM16 LE interleaved audio at the declared format
//! 4. **Results**: `caption` text messages, then binary 48kHz mono PCM16 frames of 20ms
//! 5. **Control**: `ping` → `pong`, `end_session` closes the session
//!
//! Each connection is exactly one session. When the socket goes away the session is closed.

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

use crate::audio::AudioFrame;
use crate::error::{AppError, SinkError};
use crate::language::normalize;
use crate::pipeline::{CaptionMessage, CaptionSink};
use crate::session::{FrameSink, Session, SessionError, SessionManager, SessionRequest};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
const CHANNEL_READY: &str = "captions-channel-ready";

/// Control messages from the client.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        timestamp: Option<u64>,
    },

    #[serde(rename = "end_session")]
    EndSession,
}

/// Text messages sent to the client. Captions use `CaptionMessage` directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sent once when the connection opens
    #[serde(rename = "hello")]
    Hello {
        message: String,
        session_id: String,
        target_lang: String,
        /// Transcript file the session's translations are appended to
        log_path: String,
        input_sample_rate: u32,
        input_channels: u16,
        output_sample_rate: u32,
    },

    #[serde(rename = "pong")]
    Pong { timestamp: Option<u64> },

    #[serde(rename = "session_status")]
    SessionStatus { session_id: String, status: String },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub target_lang: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// Outbound item queued for the socket actor.
#[derive(Debug)]
pub enum Outbound {
    Text(String),
    Audio(Vec<u8>),
}

/// Caption and playback sink backed by the connection's outbound queue.
///
/// Session tasks never touch the socket directly. They push here, and the actor drains the
/// queue on its own context.
#[derive(Clone)]
pub struct WsOutbound {
    tx: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl WsOutbound {
    fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbound = Self {
            tx,
            open: Arc::new(AtomicBool::new(true)),
        };
        (outbound, rx)
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn push(&self, item: Outbound) -> Result<(), SinkError> {
        if !self.is_open() {
            return Err(SinkError::Closed);
        }
        self.tx.send(item).map_err(|_| SinkError::Closed)
    }
}

impl CaptionSink for WsOutbound {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn send(&self, caption: &CaptionMessage) -> Result<(), SinkError> {
        let json = serde_json::to_string(caption).map_err(|e| SinkError::Write(e.to_string()))?;
        self.push(Outbound::Text(json))
    }
}

impl FrameSink for WsOutbound {
    fn deliver(&self, frame: AudioFrame) -> Result<(), SinkError> {
        self.push(Outbound::Audio(frame.into_bytes()))
    }
}

/// WebSocket actor for one interpreter session.
pub struct InterpreterSocket {
    session: Arc<Session>,
    sessions: Arc<SessionManager>,
    outbound: WsOutbound,
    outbound_rx: Option<mpsc::UnboundedReceiver<Outbound>>,
    hello: ServerMessage,
    last_heartbeat: Instant,
}

impl InterpreterSocket {
    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(session_id = %self.session.id, error = %e, "failed to encode message"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!(session_id = %self.session.id, code, "{}", message);
        self.send_message(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn handle_audio(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        match self.session.push_pcm(data.to_vec()) {
            Ok(()) => {}
            Err(SessionError::Closed) => ctx.stop(),
            Err(e) => self.send_error(ctx, "audio_error", &e.to_string()),
        }
    }

    fn handle_control(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping { timestamp }) => {
                self.last_heartbeat = Instant::now();
                self.send_message(ctx, &ServerMessage::Pong { timestamp });
            }
            Ok(ClientMessage::EndSession) => {
                info!(session_id = %self.session.id, "client ended session");
                self.send_message(
                    ctx,
                    &ServerMessage::SessionStatus {
                        session_id: self.session.id.clone(),
                        status: "ended".to_string(),
                    },
                );
                ctx.close(Some(ws::CloseCode::Normal.into()));
                ctx.stop();
            }
            Err(e) => self.send_error(ctx, "invalid_message", &format!("Invalid message: {}", e)),
        }
    }
}

impl Actor for InterpreterSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session.id, "WebSocket connection started");

        if let Some(rx) = self.outbound_rx.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
        let hello = self.hello.clone();
        self.send_message(ctx, &hello);

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = %act.session.id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.outbound.mark_closed();
        self.sessions.remove_session(&self.session.id);
        info!(session_id = %self.session.id, "WebSocket connection stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for InterpreterSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => self.handle_audio(&data, ctx),
            Ok(ws::Message::Text(text)) => self.handle_control(&text, ctx),
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session.id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session.id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<Outbound> for InterpreterSocket {
    fn handle(&mut self, item: Outbound, ctx: &mut Self::Context) {
        match item {
            Outbound::Text(text) => ctx.text(text),
            Outbound::Audio(bytes) => ctx.binary(bytes),
        }
    }

    // The queue ends when the session drops its sinks. The client decides when to hang up.
    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!(session_id = %self.session.id, "outbound queue drained");
    }
}

/// `GET /ws/interpret`: validate the request, create the session, upgrade.
pub async fn interpret_websocket(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<ConnectQuery>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let config = state.get_config();
    let query = query.into_inner();
    let request = SessionRequest {
        target_lang: normalize(query.target_lang.as_deref()),
        input_rate: query.sample_rate.unwrap_or(config.audio.default_input_rate),
        channels: query.channels.unwrap_or(config.audio.default_channels),
    };
    info!(
        peer = ?req.connection_info().peer_addr(),
        target_lang = %request.target_lang,
        "New interpreter connection request"
    );

    let (outbound, outbound_rx) = WsOutbound::channel();
    let session = state
        .sessions
        .create_session(&request, Some(Arc::new(outbound.clone())), Arc::new(outbound.clone()))
        .map_err(|e| {
            warn!(error = %e, "interpreter session refused");
            AppError::from(e)
        })?;

    let hello = ServerMessage::Hello {
        message: CHANNEL_READY.to_string(),
        session_id: session.id.clone(),
        target_lang: session.target_lang.clone(),
        log_path: state.orchestrator().transcripts().location(),
        input_sample_rate: session.input_rate,
        input_channels: session.channels,
        output_sample_rate: config.audio.output_sample_rate,
    };

    let actor = InterpreterSocket {
        session: session.clone(),
        sessions: state.sessions.clone(),
        outbound,
        outbound_rx: Some(outbound_rx),
        hello,
        last_heartbeat: Instant::now(),
    };

    ws::start(actor, &req, stream).map_err(|e| {
        // Handshake failed, so the actor will never run its cleanup.
        state.sessions.remove_session(&session.id);
        e
    })
}
