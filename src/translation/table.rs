//! # Translation Table
//!
//! Maps each supported `(src, tgt)` direction to a model name and plans routes.
//!
//! ## Route Planning:
//! - `src == tgt` → **Identity**, no model involved
//! - direct model present → **Direct**
//! - neither side is the bridge, and both `src→bridge` and `bridge→tgt` exist → **Pivot**
//! - anything else → `ConfigurationError::NoRoute`

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::ConfigurationError;
use crate::language::{normalize_str, DEFAULT_LANGUAGE};

/// One configured translation direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPair {
    pub src: String,
    pub tgt: String,
    pub model: String,
}

impl ModelPair {
    pub fn new(src: &str, tgt: &str, model: &str) -> Self {
        Self {
            src: src.to_string(),
            tgt: tgt.to_string(),
            model: model.to_string(),
        }
    }
}

/// Built-in directions: Norwegian and Polish to and from English.
pub fn default_pairs() -> Vec<ModelPair> {
    vec![
        ModelPair::new("no", "en", "Helsinki-NLP/opus-mt-no-en"),
        ModelPair::new("pl", "en", "Helsinki-NLP/opus-mt-pl-en"),
        ModelPair::new("en", "pl", "Helsinki-NLP/opus-mt-en-pl"),
        ModelPair::new("en", "no", "Helsinki-NLP/opus-mt-en-no"),
    ]
}

/// A single model call in a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub src: String,
    pub tgt: String,
    pub model: String,
}

/// How a pair is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Identity,
    Direct(Hop),
    Pivot(Hop, Hop),
}

impl Route {
    /// Model calls in execution order.
    pub fn hops(&self) -> Vec<&Hop> {
        match self {
            Route::Identity => Vec::new(),
            Route::Direct(hop) => vec![hop],
            Route::Pivot(first, second) => vec![first, second],
        }
    }
}

/// Direction → model lookup with the bridge language used for pivoting.
#[derive(Debug, Clone)]
pub struct TranslationTable {
    bridge: String,
    models: HashMap<(String, String), String>,
}

impl TranslationTable {
    /// Build a table. Language codes are normalized, so `nb` and `nn` entries collapse onto `no`.
    /// When two entries normalize to the same direction the first one wins.
    pub fn new(bridge: &str, pairs: &[ModelPair]) -> Self {
        let mut models = HashMap::new();
        for pair in pairs {
            models
                .entry((normalize_str(&pair.src), normalize_str(&pair.tgt)))
                .or_insert_with(|| pair.model.clone());
        }
        Self {
            bridge: normalize_str(bridge),
            models,
        }
    }

    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    pub fn model_for(&self, src: &str, tgt: &str) -> Option<&str> {
        self.models
            .get(&(src.to_string(), tgt.to_string()))
            .map(String::as_str)
    }

    /// Every language that appears in the table, bridge included.
    pub fn languages(&self) -> BTreeSet<String> {
        let mut languages: BTreeSet<String> = self
            .models
            .keys()
            .flat_map(|(src, tgt)| [src.clone(), tgt.clone()])
            .collect();
        languages.insert(self.bridge.clone());
        languages
    }

    /// Configured directions, sorted for stable output.
    pub fn pairs(&self) -> Vec<ModelPair> {
        let mut pairs: Vec<ModelPair> = self
            .models
            .iter()
            .map(|((src, tgt), model)| ModelPair::new(src, tgt, model))
            .collect();
        pairs.sort_by(|a, b| (&a.src, &a.tgt).cmp(&(&b.src, &b.tgt)));
        pairs
    }

    fn hop(&self, src: &str, tgt: &str) -> Option<Hop> {
        self.model_for(src, tgt).map(|model| Hop {
            src: src.to_string(),
            tgt: tgt.to_string(),
            model: model.to_string(),
        })
    }

    /// Plan the route for normalized `src` and `tgt`.
    pub fn plan(&self, src: &str, tgt: &str) -> Result<Route, ConfigurationError> {
        if src == tgt {
            return Ok(Route::Identity);
        }
        if let Some(hop) = self.hop(src, tgt) {
            return Ok(Route::Direct(hop));
        }
        if src != self.bridge && tgt != self.bridge {
            if let (Some(first), Some(second)) =
                (self.hop(src, &self.bridge), self.hop(&self.bridge, tgt))
            {
                return Ok(Route::Pivot(first, second));
            }
        }
        Err(ConfigurationError::NoRoute {
            src: src.to_string(),
            tgt: tgt.to_string(),
        })
    }

    /// Startup check: every non-bridge language needs a model to and from the bridge.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.bridge.is_empty() {
            return Err(ConfigurationError::InvalidTable("bridge language is empty".to_string()));
        }
        if self.models.values().any(|model| model.trim().is_empty()) {
            return Err(ConfigurationError::InvalidTable("model name is empty".to_string()));
        }
        for language in self.languages() {
            if language == self.bridge {
                continue;
            }
            if self.model_for(&language, &self.bridge).is_none() {
                return Err(ConfigurationError::NoRoute {
                    src: language,
                    tgt: self.bridge.clone(),
                });
            }
            if self.model_for(&self.bridge, &language).is_none() {
                return Err(ConfigurationError::NoRoute {
                    src: self.bridge.clone(),
                    tgt: language,
                });
            }
        }
        Ok(())
    }

    /// Session setup check: speech in any configured language can reach `target`.
    pub fn validate_target(&self, target: &str) -> Result<(), ConfigurationError> {
        if target == self.bridge {
            return Ok(());
        }
        self.plan(&self.bridge, target).map(|_| ())
    }
}

impl Default for TranslationTable {
    fn default() -> Self {
        Self::new(DEFAULT_LANGUAGE, &default_pairs())
    }
}
