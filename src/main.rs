//! # Realtime Interpreter Backend
//!
//! Speech-to-speech interpretation over WebSocket: a client streams microphone audio in one
//! language and receives captions and synthesized speech in another.
//!
//! ## Request Flow:
//! 1. **Transport**: `websocket.rs` accepts `/ws/interpret` and creates a `Session`
//! 2. **Segmentation**: `audio/` gates voiced audio and cuts it into segments
//! 3. **Pipeline**: `pipeline/` recognizes, translates (with English pivoting) and synthesizes
//! 4. **Playback**: synthesized frames flow back through the session's playback queue
//!
//! ## Other Endpoints:
//! - `GET /health`, `GET /api/v1/health`: liveness and headline counters
//! - `GET /api/v1/metrics`: pipeline counters, sessions and translation cache contents
//! - `GET /api/v1/config`: effective configuration
//!
//! Run with `--print-config` to dump the effective configuration as TOML and exit.

mod audio;
mod config;
mod engines;
mod error;
mod handlers;
mod health;
mod language;
mod pipeline;
mod session;
mod state;
mod transcript;
mod translation;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = AppConfig::load()?;
    if std::env::args().any(|arg| arg == "--print-config") {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_tracing()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        stt = %config.engines.stt_url,
        translation = %config.engines.translation_url,
        tts = %config.engines.tts_url,
        languages = ?config.translation_table().languages(),
        "Engines configured"
    );

    let app_state = AppState::new(config.clone())?;
    let bind_addr = config.bind_address();

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/ws/interpret", web::get().to(websocket::interpret_websocket))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Each in-flight segment makes at most three engine calls.
    let grace = config.request_timeout() * 3;
    match tokio::time::timeout(grace, app_state.sessions.close_all()).await {
        Ok(closed) if closed > 0 => warn!("Closed {} active session(s) during shutdown", closed),
        Ok(_) => {}
        Err(_) => warn!("Sessions still busy after {:?}, exiting anyway", grace),
    }
    info!(stats = ?app_state.stats().snapshot(), "Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime_interpreter=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()),
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
