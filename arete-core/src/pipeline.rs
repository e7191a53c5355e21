//! The RAG pipeline orchestrator.
//!
//! Sequences retrieval, re-ranking, diversification, context composition,
//! generation and validation for one query, caching whole results.
//!
//! Failure policy:
//! - retrieval adapters, re-ranking and diversification degrade: the failure
//!   becomes a warning and the best earlier output is used instead;
//! - an empty candidate list ends the run early with a fallback response;
//! - composition and generation failures abort the run with a
//!   [`PipelineError`], as does a missing composer or generator.

use crate::cache::{CacheStats, PipelineCache, cache_key};
use crate::collaborators::{
    ContextComposer, DenseRetriever, Diversifier, GraphTraverser, HybridRepository, Reranker,
    ResponseGenerator, SparseRetriever,
};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, StageError};
use crate::types::{
    NO_RESULTS_ERROR, PipelineMetrics, PipelineResult, PipelineStage, SearchResult, UserContext,
    average_relevance,
};
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default number of cached results.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Which collaborators are configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorAvailability {
    pub dense_retrieval: bool,
    pub sparse_retrieval: bool,
    pub graph_traversal: bool,
    pub reranking: bool,
    pub diversification: bool,
    pub context_composition: bool,
    pub response_generation: bool,
    pub unified_retrieval: bool,
}

/// Operational snapshot returned by [`RagPipeline::get_pipeline_stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub config: PipelineConfig,
    pub cache: CacheStats,
    pub collaborators: CollaboratorAvailability,
}

/// Builder for [`RagPipeline`].
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: PipelineConfig,
    cache_capacity: Option<usize>,
    dense: Option<Arc<dyn DenseRetriever>>,
    sparse: Option<Arc<dyn SparseRetriever>>,
    graph: Option<Arc<dyn GraphTraverser>>,
    repository: Option<Arc<dyn HybridRepository>>,
    reranker: Option<Arc<dyn Reranker>>,
    diversifier: Option<Arc<dyn Diversifier>>,
    composer: Option<Arc<dyn ContextComposer>>,
    generator: Option<Arc<dyn ResponseGenerator>>,
}

impl RagPipelineBuilder {
    /// Configuration used when a call does not supply its own.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache_capacity(mut self, max_entries: usize) -> Self {
        self.cache_capacity = Some(max_entries);
        self
    }

    pub fn dense(mut self, dense: Arc<dyn DenseRetriever>) -> Self {
        self.dense = Some(dense);
        self
    }

    pub fn sparse(mut self, sparse: Arc<dyn SparseRetriever>) -> Self {
        self.sparse = Some(sparse);
        self
    }

    pub fn graph(mut self, graph: Arc<dyn GraphTraverser>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn HybridRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn diversifier(mut self, diversifier: Arc<dyn Diversifier>) -> Self {
        self.diversifier = Some(diversifier);
        self
    }

    pub fn composer(mut self, composer: Arc<dyn ContextComposer>) -> Self {
        self.composer = Some(composer);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn ResponseGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn build(self) -> RagPipeline {
        RagPipeline {
            config: self.config,
            dense: self.dense,
            sparse: self.sparse,
            graph: self.graph,
            repository: self.repository,
            reranker: self.reranker,
            diversifier: self.diversifier,
            composer: self.composer,
            generator: self.generator,
            cache: Mutex::new(PipelineCache::new(
                self.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
            )),
        }
    }
}

/// Sequential RAG orchestrator with a result cache.
pub struct RagPipeline {
    config: PipelineConfig,
    dense: Option<Arc<dyn DenseRetriever>>,
    sparse: Option<Arc<dyn SparseRetriever>>,
    graph: Option<Arc<dyn GraphTraverser>>,
    repository: Option<Arc<dyn HybridRepository>>,
    reranker: Option<Arc<dyn Reranker>>,
    diversifier: Option<Arc<dyn Diversifier>>,
    composer: Option<Arc<dyn ContextComposer>>,
    generator: Option<Arc<dyn ResponseGenerator>>,
    cache: Mutex<PipelineCache>,
}

impl std::fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPipeline")
            .field("config", &self.config)
            .field("collaborators", &self.availability())
            .finish()
    }
}

/// Await `fut`, turning an elapsed `timeout` into [`StageError::Timeout`].
async fn call<T, F>(timeout: Option<Duration>, fut: F) -> Result<T, StageError>
where
    F: Future<Output = Result<T, StageError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(StageError::Timeout {
                timeout_secs: limit.as_secs(),
            })),
        None => fut.await,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Drop later results that refer to an already-seen chunk.
pub fn deduplicate(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.chunk.chunk_id.clone()))
        .collect()
}

fn truncated(results: &[SearchResult], cap: usize) -> Vec<SearchResult> {
    results.iter().take(cap).cloned().collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl RagPipeline {
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn lock_cache(&self) -> MutexGuard<'_, PipelineCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn availability(&self) -> CollaboratorAvailability {
        CollaboratorAvailability {
            dense_retrieval: self.dense.is_some(),
            sparse_retrieval: self.sparse.is_some(),
            graph_traversal: self.graph.is_some(),
            reranking: self.reranker.is_some(),
            diversification: self.diversifier.is_some(),
            context_composition: self.composer.is_some(),
            response_generation: self.generator.is_some(),
            unified_retrieval: self.repository.is_some(),
        }
    }

    /// Run one query through every stage.
    ///
    /// Uses the pipeline's own configuration when `config` is `None`.
    pub async fn execute_pipeline(
        &self,
        query: &str,
        config: Option<&PipelineConfig>,
        user_context: Option<&UserContext>,
    ) -> Result<PipelineResult, PipelineError> {
        let config = config.unwrap_or(&self.config).clone();
        config.validate()?;
        let no_context = UserContext::new();
        let user_context = user_context.unwrap_or(&no_context);

        let composer = self.composer.as_ref().ok_or(PipelineError::NotConfigured {
            stage: PipelineStage::ContextComposition,
        })?;
        let generator = self.generator.as_ref().ok_or(PipelineError::NotConfigured {
            stage: PipelineStage::ResponseGeneration,
        })?;

        let key = config
            .enable_cache
            .then(|| cache_key(query, &config, user_context));
        if let Some(key) = &key {
            let cached = self.lock_cache().get(key, config.cache_ttl());
            if let Some(hit) = cached {
                debug!(query, "Pipeline cache hit");
                return Ok(hit);
            }
        }

        let request_id = Uuid::new_v4();
        let timeout = config.stage_timeout();
        let mut metrics = PipelineMetrics::default();
        let mut warnings = Vec::new();
        info!(%request_id, query, "Starting pipeline run");

        // Retrieval
        let start = Instant::now();
        let retrieved = self.retrieve(query, &config, &mut warnings).await;
        metrics.retrieval_ms = elapsed_ms(start);
        metrics.retrieved_results = retrieved.len();

        if retrieved.is_empty() {
            error!(%request_id, query, "Retrieval produced no candidates");
            metrics.total_ms = metrics.stage_total_ms();
            let mut result = PipelineResult::failed(
                query,
                config,
                PipelineStage::Retrieval,
                NO_RESULTS_ERROR,
            );
            result.request_id = request_id;
            result.metrics = metrics;
            result.warnings = warnings;
            return Ok(result);
        }

        // Re-ranking
        let reranked = match &self.reranker {
            Some(reranker) if config.enable_reranking => {
                let start = Instant::now();
                let outcome = call(
                    timeout,
                    reranker.rerank_results(
                        query,
                        retrieved.clone(),
                        config.max_reranked_results,
                        config.domain_boost_factor,
                    ),
                )
                .await;
                metrics.rerank_ms = elapsed_ms(start);
                match outcome {
                    Ok(results) if !results.is_empty() => results,
                    Ok(_) => {
                        warn!(reranker = reranker.name(), "Re-ranker returned no results");
                        warnings.push(format!(
                            "Re-ranking ({}) returned no results; using retrieval order",
                            reranker.name()
                        ));
                        truncated(&retrieved, config.max_reranked_results)
                    }
                    Err(e) => {
                        warn!(reranker = reranker.name(), error = %e, "Re-ranking failed");
                        warnings.push(format!(
                            "Re-ranking ({}) failed: {e}; using retrieval order",
                            reranker.name()
                        ));
                        truncated(&retrieved, config.max_reranked_results)
                    }
                }
            }
            _ => retrieved.clone(),
        };
        metrics.reranked_results = reranked.len();

        // Diversification
        let diversified = match &self.diversifier {
            Some(diversifier) if config.enable_diversification => {
                let start = Instant::now();
                let outcome = call(
                    timeout,
                    diversifier.diversify_results(
                        query,
                        reranked.clone(),
                        config.max_diversified_results,
                        config.diversity_similarity_threshold,
                    ),
                )
                .await;
                metrics.diversify_ms = elapsed_ms(start);
                match outcome {
                    Ok(results) if !results.is_empty() => results,
                    Ok(_) => {
                        warn!(
                            diversifier = diversifier.name(),
                            "Diversifier returned no results"
                        );
                        warnings.push(format!(
                            "Diversification ({}) returned no results; using ranked order",
                            diversifier.name()
                        ));
                        truncated(&reranked, config.max_diversified_results)
                    }
                    Err(e) => {
                        warn!(
                            diversifier = diversifier.name(),
                            error = %e,
                            "Diversification failed"
                        );
                        warnings.push(format!(
                            "Diversification ({}) failed: {e}; using ranked order",
                            diversifier.name()
                        ));
                        truncated(&reranked, config.max_diversified_results)
                    }
                }
            }
            _ => reranked.clone(),
        };
        metrics.diversified_results = diversified.len();

        // Context composition
        let start = Instant::now();
        let context = call(
            timeout,
            composer.compose_context(&diversified, query, &config),
        )
        .await
        .map_err(|source| {
            error!(
                %request_id,
                composer = composer.name(),
                error = %source,
                "Context composition failed"
            );
            PipelineError::StageFailed {
                stage: PipelineStage::ContextComposition,
                source,
            }
        })?;
        metrics.compose_ms = elapsed_ms(start);
        metrics.context_tokens = context.token_count;
        metrics.citations_available = context.citations.len();

        // Generation
        let start = Instant::now();
        let mut response = call(
            timeout,
            generator.generate_response(&context, query, &config, user_context),
        )
        .await
        .map_err(|source| {
            error!(
                %request_id,
                generator = generator.name(),
                error = %source,
                "Response generation failed"
            );
            PipelineError::StageFailed {
                stage: PipelineStage::ResponseGeneration,
                source,
            }
        })?;
        metrics.generate_ms = elapsed_ms(start);

        // Validation
        if config.enable_validation {
            let start = Instant::now();
            let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut response.citations)
                .into_iter()
                .partition(|c| context.contains_chunk(&c.chunk_id));
            for citation in dropped {
                warnings.push(format!(
                    "Dropped citation '{}' that is not part of the composed context",
                    citation.chunk_id
                ));
            }
            response.citations = kept;

            if response.validation.accuracy_score < config.citation_accuracy_threshold {
                warnings.push(format!(
                    "Response accuracy {:.2} is below the citation threshold {:.2}",
                    response.validation.accuracy_score, config.citation_accuracy_threshold
                ));
            }
            metrics.validate_ms = elapsed_ms(start);
        }

        let used: HashSet<&str> = response
            .citations
            .iter()
            .filter(|c| context.contains_chunk(&c.chunk_id))
            .map(|c| c.chunk_id.as_str())
            .collect();
        metrics.citations_used = used.len().min(metrics.citations_available);
        metrics.citation_coverage = (metrics.citations_used as f32
            / metrics.citations_available.max(1) as f32)
            .clamp(0.0, 1.0);
        metrics.average_relevance_score = average_relevance(&diversified);
        metrics.validation_accuracy = response.validation.accuracy_score;
        metrics.total_ms = metrics.stage_total_ms();

        info!(
            %request_id,
            retrieved = metrics.retrieved_results,
            diversified = metrics.diversified_results,
            citations = metrics.citations_used,
            total_ms = metrics.total_ms,
            warnings = warnings.len(),
            "Pipeline run completed"
        );

        let result = PipelineResult {
            request_id,
            created_at: Utc::now(),
            query: query.to_string(),
            response,
            config,
            metrics,
            stage_completed: PipelineStage::Completed,
            retrieval_results: retrieved,
            reranked_results: reranked,
            diversified_results: diversified,
            context: Some(context),
            errors: Vec::new(),
            warnings,
        };

        if let Some(key) = key {
            self.lock_cache().insert(key, result.clone());
        }
        Ok(result)
    }

    /// Candidate retrieval: the unified repository when configured, otherwise
    /// a concurrent fan-out over the individual adapters.
    async fn retrieve(
        &self,
        query: &str,
        config: &PipelineConfig,
        warnings: &mut Vec<String>,
    ) -> Vec<SearchResult> {
        let timeout = config.stage_timeout();

        if let Some(repository) = &self.repository {
            let outcome = call(
                timeout,
                repository.hybrid_search(
                    query,
                    config.max_retrieval_results,
                    config.sparse_weight,
                    config.dense_weight,
                    config.graph_weight,
                ),
            )
            .await;
            return match outcome {
                Ok(results) => {
                    let mut results = deduplicate(results);
                    results.truncate(config.max_retrieval_results);
                    results
                }
                Err(e) => {
                    warn!(
                        repository = repository.name(),
                        error = %e,
                        "Unified retrieval failed"
                    );
                    warnings.push(format!(
                        "Unified retrieval ({}) failed: {e}",
                        repository.name()
                    ));
                    Vec::new()
                }
            };
        }

        let limit = config.retrieval_limit;
        let dense = async {
            match &self.dense {
                Some(d) if config.dense_weight > 0.0 => {
                    Some((d.name().to_string(), call(timeout, d.search(query, limit)).await))
                }
                _ => None,
            }
        };
        let sparse = async {
            match &self.sparse {
                Some(s) if config.sparse_weight > 0.0 => {
                    Some((s.name().to_string(), call(timeout, s.search(query, limit)).await))
                }
                _ => None,
            }
        };
        let graph = async {
            match &self.graph {
                Some(g) if config.graph_weight > 0.0 => {
                    Some((g.name().to_string(), call(timeout, g.traverse(query, limit)).await))
                }
                _ => None,
            }
        };
        let (dense, sparse, graph) = tokio::join!(dense, sparse, graph);

        let mut merged = Vec::new();
        for (adapter, outcome) in [dense, sparse, graph].into_iter().flatten() {
            match outcome {
                Ok(results) => merged.extend(results),
                Err(e) => {
                    warn!(adapter = adapter.as_str(), error = %e, "Retrieval adapter failed");
                    warnings.push(format!("Retrieval adapter '{adapter}' failed: {e}"));
                }
            }
        }

        let mut merged = deduplicate(merged);
        merged.truncate(config.max_retrieval_results);
        merged
    }

    /// Run several queries concurrently. Output order matches `queries`.
    ///
    /// A query whose run fails, or panics, yields a fallback result instead
    /// of affecting its siblings.
    pub async fn execute_pipeline_batch(
        &self,
        queries: &[String],
        config: Option<&PipelineConfig>,
        user_context: Option<&UserContext>,
    ) -> Vec<PipelineResult> {
        let effective = config.unwrap_or(&self.config);
        let limiter = effective
            .max_concurrent_pipelines
            .filter(|&n| n > 0)
            .map(Semaphore::new);
        let limiter = limiter.as_ref();

        let runs = queries.iter().map(|query| async move {
            let _permit = match limiter {
                Some(semaphore) => semaphore.acquire().await.ok(),
                None => None,
            };

            let outcome = AssertUnwindSafe(self.execute_pipeline(query, config, user_context))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    error!(query = query.as_str(), error = %e, "Batch query failed");
                    // Only a stage failure happens after earlier stages have run.
                    let stage = match &e {
                        PipelineError::StageFailed { stage, .. } => stage.previous(),
                        PipelineError::NotConfigured { .. }
                        | PipelineError::InvalidConfig { .. } => PipelineStage::NotStarted,
                    };
                    PipelineResult::failed(query, effective.clone(), stage, e.to_string())
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(
                        query = query.as_str(),
                        panic = message.as_str(),
                        "Batch query panicked"
                    );
                    PipelineResult::failed(
                        query,
                        effective.clone(),
                        PipelineStage::NotStarted,
                        StageError::Panicked { message }.to_string(),
                    )
                }
            }
        });

        futures::future::join_all(runs).await
    }

    /// Configuration, cache occupancy and collaborator availability.
    pub fn get_pipeline_stats(&self) -> PipelineStats {
        PipelineStats {
            config: self.config.clone(),
            cache: self.lock_cache().stats(),
            collaborators: self.availability(),
        }
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
        info!("Pipeline cache cleared");
    }
}
