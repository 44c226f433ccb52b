//! # Translation Module
//!
//! Routes text between languages using per-direction translation models.
//!
//! ## Key Components:
//! - **Translation Table**: Which model serves which `(src, tgt)` pair, and route planning
//! - **Engine Cache**: Process-wide, load-once cache of model handles
//!
//! ## Routing:
//! Pairs without a direct model pivot through the bridge language ("en"), never more than
//! one hop. A pair that cannot be routed is a configuration error and is reported at startup
//! or when a session is set up, never in the middle of a conversation.

pub mod cache;
pub mod table;

use serde::Serialize;
use std::fmt;

use crate::engines::EngineError;

pub use cache::TranslationEngineCache;
pub use table::{ModelPair, TranslationTable};

/// The translation table cannot serve a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConfigurationError {
    /// No direct model and no pivot path for the pair
    NoRoute { src: String, tgt: String },
    /// The table itself is malformed
    InvalidTable(String),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::NoRoute { src, tgt } => {
                write!(f, "No translation route from '{}' to '{}'", src, tgt)
            }
            ConfigurationError::InvalidTable(msg) => write!(f, "Invalid translation table: {}", msg),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Translation failures.
#[derive(Debug, Clone, PartialEq)]
pub enum TranslationError {
    /// Routing problem, detected before any model is touched
    Configuration(ConfigurationError),
    /// Loading the model for a pair failed. Memoized until restart.
    ModelUnavailable { src: String, tgt: String, reason: String },
    /// A loaded model failed on this text
    Engine { src: String, tgt: String, source: EngineError },
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationError::Configuration(err) => write!(f, "{}", err),
            TranslationError::ModelUnavailable { src, tgt, reason } => {
                write!(f, "Translation model {}->{} unavailable: {}", src, tgt, reason)
            }
            TranslationError::Engine { src, tgt, source } => {
                write!(f, "Translation {}->{} failed: {}", src, tgt, source)
            }
        }
    }
}

impl std::error::Error for TranslationError {}

impl From<ConfigurationError> for TranslationError {
    fn from(err: ConfigurationError) -> Self {
        TranslationError::Configuration(err)
    }
}
