//! Capability traits for the services the pipeline orchestrates.
//!
//! Each stage is backed by at most one implementation, held by the
//! orchestrator as `Option<Arc<dyn Trait>>`. Implementations live outside the
//! orchestrator: the local ones in [`crate::rag`], or adapters around remote
//! vector stores, graph databases and LLM providers.

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::types::{ContextResult, ResponseResult, SearchResult, UserContext};
use async_trait::async_trait;

/// Similarity search over vector embeddings.
#[async_trait]
pub trait DenseRetriever: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, StageError>;
}

/// Keyword / term-frequency search.
#[async_trait]
pub trait SparseRetriever: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, StageError>;
}

/// Retrieval by walking relationships in a knowledge graph.
#[async_trait]
pub trait GraphTraverser: Send + Sync {
    fn name(&self) -> &str;

    async fn traverse(&self, query: &str, limit: usize)
    -> Result<Vec<SearchResult>, StageError>;
}

/// A single store that blends dense, sparse and graph retrieval itself.
///
/// When configured it supersedes the individual retrieval adapters.
#[async_trait]
pub trait HybridRepository: Send + Sync {
    fn name(&self) -> &str;

    async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
        sparse_weight: f32,
        dense_weight: f32,
        graph_weight: f32,
    ) -> Result<Vec<SearchResult>, StageError>;
}

/// Re-orders candidates with a more accurate relevance model.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    async fn rerank_results(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        max_results: usize,
        domain_boost: f32,
    ) -> Result<Vec<SearchResult>, StageError>;
}

/// Drops redundant candidates from a ranked list.
#[async_trait]
pub trait Diversifier: Send + Sync {
    fn name(&self) -> &str;

    async fn diversify_results(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        max_results: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchResult>, StageError>;
}

/// Merges passages into a token-bounded context with citations.
#[async_trait]
pub trait ContextComposer: Send + Sync {
    fn name(&self) -> &str;

    async fn compose_context(
        &self,
        results: &[SearchResult],
        query: &str,
        config: &PipelineConfig,
    ) -> Result<ContextResult, StageError>;
}

/// Produces the final answer from a composed context.
///
/// `validation.accuracy_score` must be filled in even when
/// `config.enable_validation` is off.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_response(
        &self,
        context: &ContextResult,
        query: &str,
        config: &PipelineConfig,
        user_context: &UserContext,
    ) -> Result<ResponseResult, StageError>;
}
