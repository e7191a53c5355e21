//! Local, offline implementations of every pipeline collaborator.

pub mod context;
pub mod generator;
pub mod graph;
pub mod grounding;
pub mod hybrid;
pub mod reranker;
pub mod retriever;
pub mod text;

pub use context::BudgetedComposer;
pub use generator::ExtractiveGenerator;
pub use graph::LinkGraphTraverser;
pub use grounding::CitationValidator;
pub use hybrid::CorpusRepository;
pub use reranker::{JaccardDiversifier, LexicalReranker};
pub use retriever::{Bm25SparseRetriever, HashedDenseRetriever};

use crate::config::AreteConfig;
use crate::corpus::Corpus;
use crate::error::CorpusError;
use crate::pipeline::RagPipeline;
use std::sync::Arc;

/// Build a pipeline over `corpus` using the local collaborators.
///
/// Retrieval goes through [`CorpusRepository`] when
/// `corpus.use_unified_retrieval` is set, otherwise through the three
/// separate adapters.
pub fn local_pipeline(
    corpus: Arc<Corpus>,
    config: &AreteConfig,
) -> Result<RagPipeline, CorpusError> {
    let dimensions = config.corpus.embedding_dimensions;
    let mut builder = RagPipeline::builder()
        .config(config.pipeline.clone())
        .cache_capacity(config.cache.max_entries)
        .reranker(Arc::new(LexicalReranker::default()))
        .diversifier(Arc::new(JaccardDiversifier))
        .composer(Arc::new(BudgetedComposer))
        .generator(Arc::new(ExtractiveGenerator));

    if config.corpus.use_unified_retrieval {
        builder = builder.repository(Arc::new(CorpusRepository::build(corpus, dimensions)?));
    } else {
        builder = builder
            .dense(Arc::new(HashedDenseRetriever::new(corpus.clone(), dimensions)))
            .sparse(Arc::new(Bm25SparseRetriever::build(corpus.clone())?))
            .graph(Arc::new(LinkGraphTraverser::new(corpus)));
    }

    Ok(builder.build())
}
