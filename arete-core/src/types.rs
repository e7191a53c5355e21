//! Data model shared by the orchestrator and its collaborators.

use crate::config::PipelineConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Caller-supplied context such as `student_level`.
///
/// A `BTreeMap` so that iteration order, and therefore the cache key, is stable.
pub type UserContext = BTreeMap<String, String>;

/// Apology returned whenever no grounded answer can be produced.
pub const FALLBACK_MESSAGE: &str = "I apologize, but I could not find enough relevant material \
    to answer that question. Please try rephrasing it or ask about a different \
    philosophical topic.";

/// Error recorded when retrieval produces no candidates.
pub const NO_RESULTS_ERROR: &str = "No relevant documents found";

/// Which retrieval modality produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    Dense,
    Sparse,
    Graph,
    Hybrid,
}

impl fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalSource::Dense => write!(f, "dense"),
            RetrievalSource::Sparse => write!(f, "sparse"),
            RetrievalSource::Graph => write!(f, "graph"),
            RetrievalSource::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Reference to a retrieved chunk of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub document_id: String,
    pub title: String,
    pub author: String,
    pub text: String,
}

/// A scored passage. Higher scores are better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: ChunkRef,
    pub score: f32,
    pub source: RetrievalSource,
}

impl SearchResult {
    pub fn new(chunk: ChunkRef, score: f32, source: RetrievalSource) -> Self {
        Self {
            chunk,
            score,
            source,
        }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk.chunk_id
    }

    /// Copy of this result carrying a different score.
    pub fn rescored(&self, score: f32) -> Self {
        Self {
            chunk: self.chunk.clone(),
            score,
            source: self.source,
        }
    }
}

/// A citation embedded in a composed context as `[marker]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based marker as it appears in the context text.
    pub marker: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub title: String,
    pub author: String,
    /// Passage text as it was placed in the context (possibly truncated).
    pub text: String,
}

impl Citation {
    pub fn label(&self) -> String {
        format!("[{}] {} ({})", self.marker, self.title, self.author)
    }
}

/// Output of context composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextResult {
    pub query: String,
    pub context_text: String,
    pub token_count: usize,
    pub citations: Vec<Citation>,
    pub truncated: bool,
}

impl ContextResult {
    pub fn citation(&self, marker: usize) -> Option<&Citation> {
        self.citations.iter().find(|c| c.marker == marker)
    }

    pub fn contains_chunk(&self, chunk_id: &str) -> bool {
        self.citations.iter().any(|c| c.chunk_id == chunk_id)
    }
}

/// Quality assessment attached to a generated response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseValidation {
    pub is_valid: bool,
    /// 0.0 to 1.0.
    pub accuracy_score: f32,
    /// 0.0 to 1.0.
    pub citation_coverage: f32,
    pub issues: Vec<String>,
}

impl ResponseValidation {
    /// Neutral assessment used when validation is switched off.
    pub fn unchecked(citation_coverage: f32) -> Self {
        Self {
            is_valid: true,
            accuracy_score: 1.0,
            citation_coverage: citation_coverage.clamp(0.0, 1.0),
            issues: Vec::new(),
        }
    }

    pub fn invalid(issue: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            accuracy_score: 0.0,
            citation_coverage: 0.0,
            issues: vec![issue.into()],
        }
    }
}

/// Output of response generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseResult {
    pub response_text: String,
    pub citations: Vec<Citation>,
    pub validation: ResponseValidation,
    pub token_count: usize,
}

impl ResponseResult {
    /// The fixed apology carrying `error` as its only validation issue.
    pub fn fallback(error: impl Into<String>) -> Self {
        Self {
            response_text: FALLBACK_MESSAGE.to_string(),
            citations: Vec::new(),
            validation: ResponseValidation::invalid(error),
            token_count: 0,
        }
    }
}

/// Stages of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    NotStarted,
    Retrieval,
    Reranking,
    Diversification,
    ContextComposition,
    ResponseGeneration,
    Validation,
    Completed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::NotStarted => "not started",
            PipelineStage::Retrieval => "retrieval",
            PipelineStage::Reranking => "reranking",
            PipelineStage::Diversification => "diversification",
            PipelineStage::ContextComposition => "context composition",
            PipelineStage::ResponseGeneration => "response generation",
            PipelineStage::Validation => "validation",
            PipelineStage::Completed => "completed",
        };
        f.write_str(name)
    }
}

impl PipelineStage {
    /// The stage that runs immediately before this one.
    pub fn previous(self) -> Self {
        match self {
            PipelineStage::NotStarted | PipelineStage::Retrieval => PipelineStage::NotStarted,
            PipelineStage::Reranking => PipelineStage::Retrieval,
            PipelineStage::Diversification => PipelineStage::Reranking,
            PipelineStage::ContextComposition => PipelineStage::Diversification,
            PipelineStage::ResponseGeneration => PipelineStage::ContextComposition,
            PipelineStage::Validation => PipelineStage::ResponseGeneration,
            PipelineStage::Completed => PipelineStage::Validation,
        }
    }
}

/// Timings, counts and quality numbers for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub retrieval_ms: u64,
    pub rerank_ms: u64,
    pub diversify_ms: u64,
    pub compose_ms: u64,
    pub generate_ms: u64,
    pub validate_ms: u64,
    pub total_ms: u64,

    pub retrieved_results: usize,
    pub reranked_results: usize,
    pub diversified_results: usize,
    pub context_tokens: usize,
    pub citations_available: usize,
    pub citations_used: usize,

    pub average_relevance_score: f32,
    pub citation_coverage: f32,
    pub validation_accuracy: f32,
}

impl PipelineMetrics {
    pub fn stage_total_ms(&self) -> u64 {
        self.retrieval_ms
            + self.rerank_ms
            + self.diversify_ms
            + self.compose_ms
            + self.generate_ms
            + self.validate_ms
    }
}

/// Mean score of `results`, or 0.0 for an empty slice.
pub fn average_relevance(results: &[SearchResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(|r| r.score).sum::<f32>() / results.len() as f32
}

/// Everything a caller gets back from one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub query: String,
    pub response: ResponseResult,
    pub config: PipelineConfig,
    pub metrics: PipelineMetrics,
    /// Last stage that finished.
    pub stage_completed: PipelineStage,
    pub retrieval_results: Vec<SearchResult>,
    pub reranked_results: Vec<SearchResult>,
    pub diversified_results: Vec<SearchResult>,
    pub context: Option<ContextResult>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PipelineResult {
    /// A well-formed result for a run that stopped at `stage` because of `error`.
    pub fn failed(
        query: &str,
        config: PipelineConfig,
        stage: PipelineStage,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            request_id: Uuid::new_v4(),
            created_at: Utc::now(),
            query: query.to_string(),
            response: ResponseResult::fallback(error.clone()),
            config,
            metrics: PipelineMetrics::default(),
            stage_completed: stage,
            retrieval_results: Vec::new(),
            reranked_results: Vec::new(),
            diversified_results: Vec::new(),
            context: None,
            errors: vec![error],
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.stage_completed == PipelineStage::Completed
    }
}
