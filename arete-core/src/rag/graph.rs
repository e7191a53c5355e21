//! Knowledge-graph traversal over passage links.

use crate::collaborators::GraphTraverser;
use crate::corpus::Corpus;
use crate::error::StageError;
use crate::rag::text::{query_overlap, term_set};
use crate::types::{RetrievalSource, SearchResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Score multiplier applied to passages reached over one link.
const NEIGHBOUR_DECAY: f32 = 0.5;

/// Seeds with the passages that best match the query lexically, then walks
/// one hop along their `related` links.
pub struct LinkGraphTraverser {
    corpus: Arc<Corpus>,
    seed_count: usize,
}

impl LinkGraphTraverser {
    pub fn new(corpus: Arc<Corpus>) -> Self {
        Self {
            corpus,
            seed_count: 3,
        }
    }

    pub fn with_seed_count(mut self, seed_count: usize) -> Self {
        self.seed_count = seed_count.max(1);
        self
    }
}

#[async_trait]
impl GraphTraverser for LinkGraphTraverser {
    fn name(&self) -> &str {
        "link-graph"
    }

    async fn traverse(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, StageError> {
        let query_terms = term_set(query);

        let mut seeds: Vec<(&str, f32)> = self
            .corpus
            .passages()
            .iter()
            .map(|p| {
                let text = format!("{} {} {}", p.title, p.author, p.text);
                (p.id.as_str(), query_overlap(&query_terms, &text))
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();
        seeds.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        seeds.truncate(self.seed_count);

        // Keep the best score seen for each passage.
        let mut scores: HashMap<&str, f32> = HashMap::new();
        for (id, score) in &seeds {
            let entry = scores.entry(*id).or_insert(0.0);
            *entry = entry.max(*score);
            for neighbour in self.corpus.neighbours(id) {
                let entry = scores.entry(neighbour.id.as_str()).or_insert(0.0);
                *entry = entry.max(score * NEIGHBOUR_DECAY);
            }
        }

        let mut ranked: Vec<(&str, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked.truncate(limit);

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| {
                self.corpus
                    .get(id)
                    .map(|p| SearchResult::new(p.to_chunk(), score, RetrievalSource::Graph))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Passage;

    fn passage(id: &str, text: &str, related: &[&str]) -> Passage {
        Passage {
            id: id.into(),
            document_id: "doc".into(),
            title: "T".into(),
            author: "A".into(),
            text: text.into(),
            related: related.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_traversal_reaches_linked_passage() {
        let corpus = Arc::new(
            Corpus::new(vec![
                passage("seed", "virtue is knowledge", &["linked"]),
                passage("linked", "recollection and the slave boy", &[]),
                passage("unrelated", "the categorical imperative", &[]),
            ])
            .unwrap(),
        );
        let traverser = LinkGraphTraverser::new(corpus).with_seed_count(1);
        let results = traverser.traverse("virtue", 10).await.unwrap();

        let ids: Vec<_> = results.iter().map(|r| r.chunk_id()).collect();
        assert_eq!(ids, vec!["seed", "linked"]);
        assert!((results[1].score - results[0].score * NEIGHBOUR_DECAY).abs() < 1e-6);
        assert!(results.iter().all(|r| r.source == RetrievalSource::Graph));
    }

    #[tokio::test]
    async fn test_no_seeds_no_results() {
        let corpus = Arc::new(Corpus::builtin().unwrap());
        let traverser = LinkGraphTraverser::new(corpus);
        assert!(traverser.traverse("quantum chromodynamics", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_limit_respected() {
        let corpus = Arc::new(Corpus::builtin().unwrap());
        let traverser = LinkGraphTraverser::new(corpus);
        let results = traverser.traverse("virtue Plato Aristotle", 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
