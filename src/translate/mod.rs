//! Translation pipeline: content-addressed cache, size-bounded batching,
//! backend adapters and the orchestrator that ties them together.

pub mod batch;
pub mod cache;
pub mod chat;
pub mod orchestrator;
pub mod sqlite_cache;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::BackendError;
use crate::properties::PropertiesDocument;

pub use batch::{Batch, BatchRequestBuilder, SizeUnit};
pub use cache::{CacheEntry, CacheLookup, CacheStore, ContentCache, MemoryStore};
pub use chat::ChatCompletionsBackend;
pub use orchestrator::{RunState, TranslationOrchestrator};
pub use sqlite_cache::SqliteStore;

/// Backend adapter contract. One call translates one batch.
///
/// Implementations must return exactly one line per input text, in input
/// order. Fewer lines is tolerated by the orchestrator as a partial result;
/// an empty `texts` slice must fail with [`BackendError::EmptyInput`].
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn translate_batch(
        &self,
        texts: &[String],
        target_language: &str,
    ) -> Result<Vec<String>, BackendError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "backend"
    }
}

#[async_trait]
impl<T: TranslationBackend + ?Sized> TranslationBackend for Arc<T> {
    async fn translate_batch(
        &self,
        texts: &[String],
        target_language: &str,
    ) -> Result<Vec<String>, BackendError> {
        (**self).translate_batch(texts, target_language).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Offline backend: tags every text with the target language instead of
/// translating it. Used for dry runs.
pub struct StubBackend;

#[async_trait]
impl TranslationBackend for StubBackend {
    async fn translate_batch(
        &self,
        texts: &[String],
        target_language: &str,
    ) -> Result<Vec<String>, BackendError> {
        if texts.is_empty() {
            return Err(BackendError::EmptyInput);
        }
        Ok(texts
            .iter()
            .map(|t| format!("[{target_language}] {t}"))
            .collect())
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// A batch whose backend response came back short. The missing keys were
/// filled with empty values and were not cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialBatch {
    pub batch_index: usize,
    pub requested: usize,
    pub received: usize,
    pub missing_keys: Vec<String>,
}

/// Result of one translation run (one document, one target language).
#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    pub run_id: String,
    pub language: String,
    /// Same key set and key order as the input document.
    pub document: PropertiesDocument,
    pub cache_hits: usize,
    pub backend_translated: usize,
    pub backend_calls: usize,
    pub partial: Vec<PartialBatch>,
}

impl TranslationOutcome {
    /// True when no batch came back short and every key has a translation.
    pub fn is_complete(&self) -> bool {
        self.partial.is_empty() && self.document.values().all(|v| !v.is_empty())
    }

    /// Keys left with an empty value, in document order. Retrying the run
    /// sends only these to the backend, since everything else is cached.
    pub fn untranslated_keys(&self) -> Vec<&str> {
        self.document
            .iter()
            .filter(|(_, v)| v.is_empty())
            .map(|(k, _)| k)
            .collect()
    }
}
