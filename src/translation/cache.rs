//! # Translation Engine Cache
//!
//! Process-wide cache of loaded translation models, keyed by `(src, tgt)`.
//!
//! ## Key Features:
//! - **Load once**: concurrent first requests for a pair share one in-flight load
//! - **Failure memoization**: a failed load is remembered and returned immediately afterwards
//! - **Append-only**: entries are never evicted or refreshed while the process runs
//! - **Pivoting**: routes planned by the table are executed hop by hop
//!
//! ## Entry Lifecycle:
//! (absent) → Loading → Loaded | Failed

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use super::table::{Route, TranslationTable};
use super::{ConfigurationError, TranslationError};
use crate::engines::{TranslationBackend, TranslationModel};

type LoadResult = Result<Arc<dyn TranslationModel>, TranslationError>;
type ModelCell = Arc<OnceCell<LoadResult>>;

/// Reported state of one cache entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheEntryStatus {
    /// First load still in flight
    Loading,
    /// Model ready for inference
    Loaded,
    /// Load failed; not retried until restart
    Failed { message: String },
}

/// Snapshot of one entry for the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntrySummary {
    pub src: String,
    pub tgt: String,
    pub model: Option<String>,
    #[serde(flatten)]
    pub status: CacheEntryStatus,
}

pub struct TranslationEngineCache {
    backend: Arc<dyn TranslationBackend>,
    table: TranslationTable,
    cells: Mutex<HashMap<(String, String), ModelCell>>,
    load_attempts: AtomicU64,
}

impl TranslationEngineCache {
    pub fn new(backend: Arc<dyn TranslationBackend>, table: TranslationTable) -> Self {
        Self {
            backend,
            table,
            cells: Mutex::new(HashMap::new()),
            load_attempts: AtomicU64::new(0),
        }
    }

    pub fn table(&self) -> &TranslationTable {
        &self.table
    }

    /// Number of backend load calls made so far.
    pub fn load_attempts(&self) -> u64 {
        self.load_attempts.load(Ordering::Relaxed)
    }

    fn cell(&self, src: &str, tgt: &str) -> ModelCell {
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells
            .entry((src.to_string(), tgt.to_string()))
            .or_default()
            .clone()
    }

    /// Get the model for a direct pair, loading it on first use.
    ///
    /// A pair missing from the table fails with a configuration error before the backend
    /// is contacted.
    pub async fn model(&self, src: &str, tgt: &str) -> LoadResult {
        let model_name = self.table.model_for(src, tgt).ok_or_else(|| {
            ConfigurationError::NoRoute {
                src: src.to_string(),
                tgt: tgt.to_string(),
            }
        })?;

        let cell = self.cell(src, tgt);
        let result = cell
            .get_or_init(|| async {
                self.load_attempts.fetch_add(1, Ordering::Relaxed);
                let started = Instant::now();
                match self.backend.load(model_name).await {
                    Ok(model) => {
                        info!(
                            src,
                            tgt,
                            model = model_name,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "translation model loaded"
                        );
                        Ok(model)
                    }
                    Err(e) => {
                        error!(src, tgt, model = model_name, error = %e, "translation model failed to load");
                        Err(TranslationError::ModelUnavailable {
                            src: src.to_string(),
                            tgt: tgt.to_string(),
                            reason: e.to_string(),
                        })
                    }
                }
            })
            .await;

        result.clone()
    }

    /// Translate `text` between normalized language codes, pivoting when needed.
    pub async fn translate(&self, text: &str, src: &str, tgt: &str) -> Result<String, TranslationError> {
        let route = self.table.plan(src, tgt)?;
        if route == Route::Identity {
            return Ok(text.to_string());
        }

        let mut current = text.to_string();
        for hop in route.hops() {
            let model = self.model(&hop.src, &hop.tgt).await?;
            current = model
                .translate(&current)
                .await
                .map_err(|source| TranslationError::Engine {
                    src: hop.src.clone(),
                    tgt: hop.tgt.clone(),
                    source,
                })?;
            debug!(src = %hop.src, tgt = %hop.tgt, "translation hop complete");
        }
        Ok(current)
    }

    /// Current entries, sorted by pair.
    pub fn snapshot(&self) -> Vec<CacheEntrySummary> {
        let cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<CacheEntrySummary> = cells
            .iter()
            .map(|((src, tgt), cell)| {
                let status = match cell.get() {
                    None => CacheEntryStatus::Loading,
                    Some(Ok(_)) => CacheEntryStatus::Loaded,
                    Some(Err(e)) => CacheEntryStatus::Failed { message: e.to_string() },
                };
                CacheEntrySummary {
                    src: src.clone(),
                    tgt: tgt.clone(),
                    model: self.table.model_for(src, tgt).map(str::to_string),
                    status,
                }
            })
            .collect();
        entries.sort_by(|a, b| (&a.src, &a.tgt).cmp(&(&b.src, &b.tgt)));
        entries
    }
}
