//! # Configuration Management
//!
//! Loads the interpreter's settings from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__PORT, APP_ENGINES__STT_URL, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! `HOST` and `PORT` are honored as well, for deployment platforms that set them.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::audio::SegmenterConfig;
use crate::language::DEFAULT_LANGUAGE;
use crate::session::SessionDefaults;
use crate::translation::{table::default_pairs, ModelPair, TranslationTable};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engines: EnginesConfig,
    pub translation: TranslationConfig,
    pub audio: AudioConfig,
    pub transcripts: TranscriptsConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where the speech services live.
///
/// ## Fields:
/// - `stt_url`: OpenAI-compatible transcription server (`/v1/audio/transcriptions`)
/// - `stt_model`: Recognizer model name passed with every request
/// - `translation_url`: Machine translation server (`/models/load`, `/translate`)
/// - `tts_url`: Speech synthesis server (`/synthesize`, streams raw PCM16)
/// - `request_timeout_secs`: Per-request timeout for all three
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginesConfig {
    pub stt_url: String,
    pub stt_model: String,
    pub translation_url: String,
    pub tts_url: String,
    pub request_timeout_secs: u64,
}

/// The translation model table and the pivot language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub bridge_language: String,
    pub pairs: Vec<ModelPair>,
}

/// Audio handling settings.
///
/// ## Fields:
/// - `default_input_rate` / `default_channels`: Assumed when the client does not declare them
/// - `vad_aggressiveness`: 0 (least) to 3 (most aggressive) speech gating
/// - `min_segment_ms`: Voiced audio needed before a segment is submitted
/// - `output_sample_rate`: Rate of synthesized audio sent back to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub default_input_rate: u32,
    pub default_channels: u16,
    pub vad_aggressiveness: u8,
    pub min_segment_ms: u32,
    pub output_sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptsConfig {
    pub log_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            engines: EnginesConfig {
                stt_url: "http://127.0.0.1:8000".to_string(),
                stt_model: "small".to_string(),
                translation_url: "http://127.0.0.1:8001".to_string(),
                tts_url: "http://127.0.0.1:8002".to_string(),
                request_timeout_secs: 30,
            },
            translation: TranslationConfig {
                bridge_language: DEFAULT_LANGUAGE.to_string(),
                pairs: default_pairs(),
            },
            audio: AudioConfig {
                default_input_rate: 48000,
                default_channels: 1,
                vad_aggressiveness: crate::audio::vad::DEFAULT_MODE,
                min_segment_ms: 1000,
                output_sample_rate: 48000,
            },
            transcripts: TranscriptsConfig {
                log_dir: "logs".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment, in that order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_ENGINES__TTS_URL=http://tts:9000`: Override the synthesis server
    /// - `APP_PERFORMANCE__MAX_CONCURRENT_SESSIONS=4`: Lower the session limit
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Field names contain underscores, so nesting uses a double underscore.
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the values make sense before anything is started.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.audio.vad_aggressiveness > 3 {
            return Err(anyhow::anyhow!(
                "VAD aggressiveness must be between 0 and 3, got {}",
                self.audio.vad_aggressiveness
            ));
        }

        if self.audio.min_segment_ms < 20 {
            return Err(anyhow::anyhow!(
                "Minimum segment length must be at least 20ms, got {}ms",
                self.audio.min_segment_ms
            ));
        }

        if self.audio.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Output sample rate must be greater than 0"));
        }

        if self.audio.default_input_rate == 0 || self.audio.default_channels == 0 {
            return Err(anyhow::anyhow!("Default input format must have a non-zero rate and channel count"));
        }

        if self.engines.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Engine request timeout must be greater than 0"));
        }

        // An empty tag would normalize to the default language and hide the mistake.
        if self.translation.bridge_language.trim().is_empty() {
            return Err(anyhow::anyhow!("Bridge language cannot be empty"));
        }

        self.translation_table()
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid translation table: {}", e))?;

        Ok(())
    }

    pub fn translation_table(&self) -> TranslationTable {
        TranslationTable::new(&self.translation.bridge_language, &self.translation.pairs)
    }

    pub fn session_defaults(&self) -> SessionDefaults {
        SessionDefaults {
            vad_aggressiveness: self.audio.vad_aggressiveness,
            segmenter: SegmenterConfig {
                min_segment_ms: self.audio.min_segment_ms,
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.engines.request_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Render as a `config.toml` document (used by `--print-config`).
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.translation.bridge_language, "en");
        assert_eq!(config.audio.output_sample_rate, 48000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.vad_aggressiveness = 4;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.min_segment_ms = 10;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.output_sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.translation.bridge_language = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_one_way_pair_fails_validation() {
        let mut config = AppConfig::default();
        config
            .translation
            .pairs
            .push(ModelPair::new("de", "en", "Helsinki-NLP/opus-mt-de-en"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid translation table"));

        config
            .translation
            .pairs
            .push(ModelPair::new("en", "de", "Helsinki-NLP/opus-mt-en-de"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_layer() {
        let file = r#"
            [server]
            port = 9090

            [audio]
            min_segment_ms = 1500

            [[translation.pairs]]
            src = "en"
            tgt = "pl"
            model = "custom/en-pl"

            [[translation.pairs]]
            src = "pl"
            tgt = "en"
            model = "custom/pl-en"
        "#;
        let config: AppConfig = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .add_source(config::File::from_str(file, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.audio.min_segment_ms, 1500);
        assert_eq!(config.translation_table().model_for("en", "pl"), Some("custom/en-pl"));
        assert_eq!(config.translation_table().model_for("pl", "en"), Some("custom/pl-en"));
    }

    #[test]
    fn test_printed_config_loads_back() {
        let mut original = AppConfig::default();
        original.engines.stt_model = "large-v3".to_string();
        let rendered = original.to_toml().unwrap();
        assert!(rendered.contains("[[translation.pairs]]"));

        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.engines.stt_model, "large-v3");
        assert_eq!(parsed.translation.pairs, original.translation.pairs);
    }

    #[test]
    fn test_session_defaults_follow_audio_section() {
        let mut config = AppConfig::default();
        config.audio.vad_aggressiveness = 3;
        config.audio.min_segment_ms = 500;
        let defaults = config.session_defaults();
        assert_eq!(defaults.vad_aggressiveness, 3);
        assert_eq!(defaults.segmenter.min_segment_ms, 500);
    }
}
