//! Translation run orchestration:
//! Init → CacheLookup → (BatchTranslate)? → Merge → CacheWrite → Done.
//! BatchTranslate is skipped when every value is cached, so a fully cached
//! document never touches the backend. Batches run strictly one at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::batch::BatchRequestBuilder;
use super::cache::ContentCache;
use super::{PartialBatch, TranslationBackend, TranslationOutcome};
use crate::error::{BackendError, TranslateError};
use crate::metrics::{metric_names, MetricsRegistry, RunIds};
use crate::properties::PropertiesDocument;

/// Default bound on a single backend batch call.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Stages of a single translation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Init,
    CacheLookup,
    BatchTranslate,
    Merge,
    CacheWrite,
    Done,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Init => "Init",
            RunState::CacheLookup => "CacheLookup",
            RunState::BatchTranslate => "BatchTranslate",
            RunState::Merge => "Merge",
            RunState::CacheWrite => "CacheWrite",
            RunState::Done => "Done",
            RunState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

impl RunState {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Init, RunState::CacheLookup)
                | (RunState::CacheLookup, RunState::BatchTranslate)
                | (RunState::CacheLookup, RunState::Merge) // all hits
                | (RunState::BatchTranslate, RunState::Merge)
                | (RunState::Merge, RunState::CacheWrite)
                | (RunState::CacheWrite, RunState::Done)
                // Any unfinished stage can fail
                | (
                    RunState::Init
                        | RunState::CacheLookup
                        | RunState::BatchTranslate
                        | RunState::Merge
                        | RunState::CacheWrite,
                    RunState::Failed
                )
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

/// Tracks and logs the stage of one run.
struct RunTracker {
    state: RunState,
    run_id: String,
}

impl RunTracker {
    fn new(run_id: String) -> Self {
        Self {
            state: RunState::Init,
            run_id,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid run transition: {} -> {}",
            self.state,
            next
        );
        debug!(run_id = %self.run_id, from = %self.state, to = %next, "run_transition");
        self.state = next;
    }

    fn fail(&mut self, error: &TranslateError) {
        warn!(run_id = %self.run_id, stage = %self.state, error = %error, "translation run failed");
        self.advance(RunState::Failed);
    }
}

/// Coordinates cache, batching and backend for translation runs.
///
/// Holds its cache and backend as explicit dependencies; construct once and
/// reuse across runs. The cache handle may be shared with other orchestrators.
pub struct TranslationOrchestrator<B> {
    cache: ContentCache,
    backend: B,
    batcher: BatchRequestBuilder,
    request_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl<B: TranslationBackend> TranslationOrchestrator<B> {
    pub fn new(cache: ContentCache, backend: B, batcher: BatchRequestBuilder) -> Self {
        Self {
            cache,
            backend,
            batcher,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    /// Bound each backend call; expiry surfaces as [`BackendError::Timeout`].
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Translate `document` into `target_language`, reusing cached values.
    pub async fn translate(
        &self,
        document: &PropertiesDocument,
        target_language: &str,
    ) -> Result<TranslationOutcome, TranslateError> {
        self.translate_with_cancel(document, target_language, &CancellationToken::new())
            .await
    }

    /// Translate into each language in turn. Stops at the first hard error.
    pub async fn translate_all<S: AsRef<str>>(
        &self,
        document: &PropertiesDocument,
        target_languages: &[S],
    ) -> Result<Vec<TranslationOutcome>, TranslateError> {
        let mut outcomes = Vec::with_capacity(target_languages.len());
        for language in target_languages {
            outcomes.push(self.translate(document, language.as_ref()).await?);
        }
        Ok(outcomes)
    }

    /// Like [`translate`](Self::translate), but aborts when `cancel` fires.
    /// An aborted run writes nothing to the cache.
    pub async fn translate_with_cancel(
        &self,
        document: &PropertiesDocument,
        target_language: &str,
        cancel: &CancellationToken,
    ) -> Result<TranslationOutcome, TranslateError> {
        let ids = RunIds::new();
        let mut tracker = RunTracker::new(ids.run_id.clone());
        let total = self.metrics.span(metric_names::RUN_TOTAL);

        let result = self
            .run(document, target_language, cancel, &ids, &mut tracker)
            .await;
        match &result {
            Ok(outcome) => {
                tracker.advance(RunState::Done);
                let elapsed_us = total.finish();
                info!(
                    run_id = %ids.run_id,
                    language = target_language,
                    keys = outcome.document.len(),
                    cache_hits = outcome.cache_hits,
                    translated = outcome.backend_translated,
                    backend_calls = outcome.backend_calls,
                    partial_batches = outcome.partial.len(),
                    elapsed_ms = (elapsed_us / 1000.0) as u64,
                    "translation run complete"
                );
            }
            Err(e) => tracker.fail(e),
        }
        debug_assert!(tracker.state.is_terminal());
        result
    }

    /// Remove every cached translation.
    pub fn reset_cache(&self) -> Result<usize, TranslateError> {
        Ok(self.cache.reset()?)
    }

    async fn run(
        &self,
        document: &PropertiesDocument,
        target_language: &str,
        cancel: &CancellationToken,
        ids: &RunIds,
        tracker: &mut RunTracker,
    ) -> Result<TranslationOutcome, TranslateError> {
        tracker.advance(RunState::CacheLookup);
        let span = self.metrics.span(metric_names::CACHE_LOOKUP);
        let lookup = self.cache.lookup_many(document, target_language)?;
        span.finish();
        self.metrics
            .increment(metric_names::CACHE_HITS, lookup.hits.len() as u64);
        self.metrics
            .increment(metric_names::CACHE_MISSES, lookup.misses.len() as u64);

        let mut api_results = PropertiesDocument::new();
        let mut partial = Vec::new();
        let mut backend_calls = 0;

        if !lookup.misses.is_empty() {
            tracker.advance(RunState::BatchTranslate);
            let batches = self.batcher.build(&lookup.misses, target_language);
            info!(
                run_id = %ids.run_id,
                backend = self.backend.name(),
                misses = lookup.misses.len(),
                batches = batches.len(),
                "translating cache misses"
            );

            for batch in &batches {
                if cancel.is_cancelled() {
                    return Err(TranslateError::Cancelled);
                }

                let span = self.metrics.span(metric_names::BACKEND_BATCH);
                let call = tokio::time::timeout(
                    self.request_timeout,
                    self.backend.translate_batch(&batch.texts, target_language),
                );
                let response = tokio::select! {
                    r = call => r,
                    _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
                };
                span.finish();
                backend_calls += 1;
                self.metrics.increment(metric_names::BACKEND_CALLS, 1);

                let lines = match response {
                    Ok(Ok(lines)) => lines,
                    Ok(Err(source)) => {
                        return Err(TranslateError::Backend {
                            batch_index: batch.index,
                            source,
                        })
                    }
                    Err(_elapsed) => {
                        return Err(TranslateError::Backend {
                            batch_index: batch.index,
                            source: BackendError::Timeout {
                                after_ms: self.request_timeout.as_millis() as u64,
                            },
                        })
                    }
                };

                if lines.len() > batch.len() {
                    warn!(
                        run_id = %ids.run_id,
                        batch_index = batch.index,
                        requested = batch.len(),
                        received = lines.len(),
                        "backend returned extra lines, ignoring surplus"
                    );
                }

                let received = lines.len().min(batch.len());
                // Scatter by position; keys past the last returned line get the empty marker.
                let mut lines = lines.into_iter();
                for key in &batch.keys {
                    api_results.insert(key.as_str(), lines.next().unwrap_or_default());
                }

                if received < batch.len() {
                    let p = PartialBatch {
                        batch_index: batch.index,
                        requested: batch.len(),
                        received,
                        missing_keys: batch.keys[received..].to_vec(),
                    };
                    warn!(
                        run_id = %ids.run_id,
                        batch_index = p.batch_index,
                        requested = p.requested,
                        received = p.received,
                        missing = p.missing_keys.len(),
                        "partial batch result, padding missing keys"
                    );
                    self.metrics.increment(metric_names::PARTIAL_BATCHES, 1);
                    partial.push(p);
                }
            }
        }

        tracker.advance(RunState::Merge);
        let merged = lookup.hits.merge(&api_results).in_order_of(document);
        debug_assert_eq!(merged.len(), document.len());
        debug_assert!(document.keys().all(|k| merged.contains_key(k)));

        if cancel.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }

        tracker.advance(RunState::CacheWrite);
        let span = self.metrics.span(metric_names::CACHE_WRITE);
        // Only fresh backend output is written; cache hits are never rewritten.
        let written = self
            .cache
            .store_many(&lookup.misses, &api_results, target_language)?;
        span.finish();
        self.metrics
            .increment(metric_names::CACHE_ROWS_WRITTEN, written as u64);

        Ok(TranslationOutcome {
            run_id: ids.run_id.clone(),
            language: target_language.to_string(),
            document: merged,
            cache_hits: lookup.hits.len(),
            backend_translated: api_results.values().filter(|v| !v.is_empty()).count(),
            backend_calls,
            partial,
        })
    }
}
