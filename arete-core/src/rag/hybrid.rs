//! Unified hybrid retrieval over a corpus.
//!
//! Runs dense, sparse and graph retrieval, normalises each modality's scores
//! to `[0, 1]`, and blends them by weight per passage.

use crate::collaborators::{DenseRetriever, GraphTraverser, HybridRepository, SparseRetriever};
use crate::corpus::Corpus;
use crate::error::{CorpusError, StageError};
use crate::rag::graph::LinkGraphTraverser;
use crate::rag::retriever::{Bm25SparseRetriever, HashedDenseRetriever};
use crate::types::{ChunkRef, RetrievalSource, SearchResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Hybrid repository composed of the three local retrievers.
pub struct CorpusRepository {
    dense: HashedDenseRetriever,
    sparse: Bm25SparseRetriever,
    graph: LinkGraphTraverser,
}

impl CorpusRepository {
    pub fn build(corpus: Arc<Corpus>, embedding_dimensions: usize) -> Result<Self, CorpusError> {
        Ok(Self {
            dense: HashedDenseRetriever::new(corpus.clone(), embedding_dimensions),
            sparse: Bm25SparseRetriever::build(corpus.clone())?,
            graph: LinkGraphTraverser::new(corpus),
        })
    }
}

/// Divide every score by the list maximum.
fn normalise(results: Vec<SearchResult>) -> Vec<(ChunkRef, f32)> {
    let max = results.iter().map(|r| r.score).fold(0.0f32, f32::max);
    results
        .into_iter()
        .map(|r| {
            let score = if max > 0.0 { r.score / max } else { 0.0 };
            (r.chunk, score)
        })
        .collect()
}

#[async_trait]
impl HybridRepository for CorpusRepository {
    fn name(&self) -> &str {
        "corpus-hybrid"
    }

    async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
        sparse_weight: f32,
        dense_weight: f32,
        graph_weight: f32,
    ) -> Result<Vec<SearchResult>, StageError> {
        let dense = async {
            if dense_weight > 0.0 {
                self.dense.search(query, limit).await
            } else {
                Ok(Vec::new())
            }
        };
        let sparse = async {
            if sparse_weight > 0.0 {
                self.sparse.search(query, limit).await
            } else {
                Ok(Vec::new())
            }
        };
        let graph = async {
            if graph_weight > 0.0 {
                self.graph.traverse(query, limit).await
            } else {
                Ok(Vec::new())
            }
        };
        let (dense, sparse, graph) = tokio::join!(dense, sparse, graph);

        let mut merged: HashMap<String, (ChunkRef, f32)> = HashMap::new();
        for (results, weight) in [
            (dense?, dense_weight),
            (sparse?, sparse_weight),
            (graph?, graph_weight),
        ] {
            for (chunk, score) in normalise(results) {
                merged
                    .entry(chunk.chunk_id.clone())
                    .and_modify(|(_, combined)| *combined += score * weight)
                    .or_insert((chunk, score * weight));
            }
        }

        let mut results: Vec<SearchResult> = merged
            .into_values()
            .map(|(chunk, score)| SearchResult::new(chunk, score, RetrievalSource::Hybrid))
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id().cmp(b.chunk_id()))
        });
        results.truncate(limit);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository() -> CorpusRepository {
        CorpusRepository::build(Arc::new(Corpus::builtin().unwrap()), 256).unwrap()
    }

    #[tokio::test]
    async fn test_hybrid_search_blends_and_tags() {
        let repo = repository();
        let results = repo
            .hybrid_search("Can virtue be taught?", 5, 0.3, 0.5, 0.2)
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 5);
        assert!(results.iter().all(|r| r.source == RetrievalSource::Hybrid));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        // Each normalised modality contributes at most its weight.
        assert!(results.iter().all(|r| r.score <= 1.0 + 1e-5));
    }

    #[tokio::test]
    async fn test_hybrid_search_unique_chunks() {
        let repo = repository();
        let results = repo
            .hybrid_search("virtue knowledge soul", 12, 1.0, 1.0, 1.0)
            .await
            .unwrap();
        let mut ids: Vec<_> = results.iter().map(|r| r.chunk_id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), results.len());
    }

    #[tokio::test]
    async fn test_zero_weights_skip_modalities() {
        let repo = repository();
        let results = repo
            .hybrid_search("categorical imperative", 5, 1.0, 0.0, 0.0)
            .await
            .unwrap();
        assert_eq!(results[0].chunk_id(), "groundwork-421");
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_normalise_handles_zero_max() {
        let chunk = ChunkRef {
            chunk_id: "a".into(),
            document_id: "d".into(),
            title: "t".into(),
            author: "x".into(),
            text: "y".into(),
        };
        let out = normalise(vec![SearchResult::new(chunk, 0.0, RetrievalSource::Dense)]);
        assert_eq!(out[0].1, 0.0);
    }
}
