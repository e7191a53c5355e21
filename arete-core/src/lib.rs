//! # arete-core: Retrieval-augmented answering over a philosophy corpus
//!
//! The centre of this crate is [`RagPipeline`], an orchestrator that runs a
//! query through retrieval, re-ranking, diversification, context
//! composition, response generation and validation. Each stage is delegated
//! to a collaborator behind a capability trait (see [`collaborators`]), so
//! any stage can be backed by a remote service or by the offline
//! implementations in [`rag`].
//!
//! Whole results are cached by a signature of the query, the settings that
//! affect the answer and the caller's user context.

// Foundation
pub mod config;
pub mod error;
pub mod types;

// Orchestration
pub mod cache;
pub mod collaborators;
pub mod pipeline;

// Local collaborators
pub mod corpus;
pub mod rag;

// Re-exports
pub use cache::{CacheStats, PipelineCache, cache_key};
pub use config::{AreteConfig, CacheConfig, CompositionStrategy, CorpusConfig, PipelineConfig};
pub use corpus::{Corpus, Passage};
pub use error::{AreteError, CorpusError, PipelineError, Result, StageError};
pub use pipeline::{CollaboratorAvailability, PipelineStats, RagPipeline, RagPipelineBuilder};
pub use rag::local_pipeline;
pub use types::{
    ChunkRef, Citation, ContextResult, PipelineMetrics, PipelineResult, PipelineStage,
    ResponseResult, ResponseValidation, RetrievalSource, SearchResult, UserContext,
};
