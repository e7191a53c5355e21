//! Re-ranking and diversification of retrieved candidates.

use crate::collaborators::{Diversifier, Reranker};
use crate::error::StageError;
use crate::rag::text::{jaccard, query_overlap, term_set, tokenize};
use crate::types::SearchResult;
use async_trait::async_trait;
use std::collections::HashSet;

/// Blends the retrieval score with query-term overlap, boosting passages
/// whose title or author the query names.
pub struct LexicalReranker {
    /// Weight of the original retrieval score (the rest goes to overlap).
    pub retrieval_weight: f32,
}

impl Default for LexicalReranker {
    fn default() -> Self {
        Self {
            retrieval_weight: 0.5,
        }
    }
}

impl LexicalReranker {
    fn names_source(query_terms: &HashSet<String>, result: &SearchResult) -> bool {
        tokenize(&result.chunk.author)
            .iter()
            .chain(tokenize(&result.chunk.title).iter())
            .any(|t| query_terms.contains(t))
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    fn name(&self) -> &str {
        "lexical-reranker"
    }

    async fn rerank_results(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        max_results: usize,
        domain_boost: f32,
    ) -> Result<Vec<SearchResult>, StageError> {
        let query_terms = term_set(query);
        let weight = self.retrieval_weight.clamp(0.0, 1.0);

        let mut reranked: Vec<SearchResult> = results
            .iter()
            .map(|r| {
                let overlap = query_overlap(&query_terms, &r.chunk.text);
                let mut score = weight * r.score + (1.0 - weight) * overlap;
                if Self::names_source(&query_terms, r) {
                    score *= domain_boost;
                }
                r.rescored(score)
            })
            .collect();

        // Stable sort keeps retrieval order among ties.
        reranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        reranked.truncate(max_results);
        Ok(reranked)
    }
}

/// Greedy redundancy filter: a candidate is kept only when its term-set
/// Jaccard similarity to every kept candidate is below the threshold.
#[derive(Debug, Default)]
pub struct JaccardDiversifier;

#[async_trait]
impl Diversifier for JaccardDiversifier {
    fn name(&self) -> &str {
        "jaccard-diversifier"
    }

    async fn diversify_results(
        &self,
        _query: &str,
        results: Vec<SearchResult>,
        max_results: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchResult>, StageError> {
        let mut kept: Vec<(SearchResult, HashSet<String>)> = Vec::new();
        for result in results {
            if kept.len() >= max_results {
                break;
            }
            let terms = term_set(&result.chunk.text);
            if kept
                .iter()
                .all(|(_, other)| jaccard(&terms, other) < similarity_threshold)
            {
                kept.push((result, terms));
            }
        }
        Ok(kept.into_iter().map(|(r, _)| r).collect())
    }
}
