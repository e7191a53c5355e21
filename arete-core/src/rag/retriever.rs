//! Dense and sparse retrieval over a [`Corpus`].
//!
//! The dense retriever uses hashed term-frequency embeddings rather than a
//! neural embedding model; the sparse retriever is a BM25 index held in RAM
//! by Tantivy.

use crate::collaborators::{DenseRetriever, SparseRetriever};
use crate::corpus::Corpus;
use crate::error::{CorpusError, StageError};
use crate::rag::text::{sanitize_query, tokenize};
use crate::types::{RetrievalSource, SearchResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, doc};

// ---------------------------------------------------------------------------
// Hashed embeddings
// ---------------------------------------------------------------------------

/// Bag-of-words embedder: each term is hashed to a dimension and its
/// frequency accumulated; the vector is L2-normalised.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for term in tokenize(text) {
            vector[djb2(&term) % self.dimensions] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn djb2(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Vector-similarity retriever with precomputed passage embeddings.
pub struct HashedDenseRetriever {
    corpus: Arc<Corpus>,
    embedder: HashedEmbedder,
    vectors: HashMap<String, Vec<f32>>,
}

impl HashedDenseRetriever {
    pub fn new(corpus: Arc<Corpus>, dimensions: usize) -> Self {
        let embedder = HashedEmbedder::new(dimensions);
        let vectors = corpus
            .passages()
            .iter()
            .map(|p| {
                let text = format!("{} {} {}", p.title, p.author, p.text);
                (p.id.clone(), embedder.embed(&text))
            })
            .collect();
        Self {
            corpus,
            embedder,
            vectors,
        }
    }

    pub fn indexed_count(&self) -> usize {
        self.vectors.len()
    }
}

#[async_trait]
impl DenseRetriever for HashedDenseRetriever {
    fn name(&self) -> &str {
        "hashed-dense"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, StageError> {
        let query_embedding = self.embedder.embed(query);

        let mut scored: Vec<(&str, f32)> = self
            .vectors
            .iter()
            .map(|(id, vec)| (id.as_str(), cosine_similarity(&query_embedding, vec)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .filter_map(|(id, score)| {
                self.corpus
                    .get(id)
                    .map(|p| SearchResult::new(p.to_chunk(), score, RetrievalSource::Dense))
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// BM25
// ---------------------------------------------------------------------------

/// Full-text BM25 retriever over an in-RAM Tantivy index.
pub struct Bm25SparseRetriever {
    corpus: Arc<Corpus>,
    index: Index,
    reader: IndexReader,
    id_field: Field,
    content_field: Field,
}

impl std::fmt::Debug for Bm25SparseRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bm25SparseRetriever")
            .field("passages", &self.corpus.len())
            .finish()
    }
}

impl Bm25SparseRetriever {
    pub fn build(corpus: Arc<Corpus>) -> Result<Self, CorpusError> {
        let index_err = |e: tantivy::TantivyError| CorpusError::Index {
            message: e.to_string(),
        };

        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, 20_000_000)
            .map_err(index_err)?;

        for passage in corpus.passages() {
            let content = format!("{} {} {}", passage.title, passage.author, passage.text);
            writer
                .add_document(doc!(
                    id_field => passage.id.as_str(),
                    content_field => content,
                ))
                .map_err(index_err)?;
        }
        writer.commit().map_err(index_err)?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(index_err)?;
        reader.reload().map_err(index_err)?;

        tracing::debug!(passages = corpus.len(), "Built BM25 index");
        Ok(Self {
            corpus,
            index,
            reader,
            id_field,
            content_field,
        })
    }

    fn search_index(&self, query: &str, limit: usize) -> tantivy::Result<Vec<(String, f32)>> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let parsed = parser.parse_query(query)?;
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc.get_first(self.id_field).and_then(|v| v.as_str()) {
                hits.push((id.to_string(), score));
            }
        }
        Ok(hits)
    }
}

#[async_trait]
impl SparseRetriever for Bm25SparseRetriever {
    fn name(&self) -> &str {
        "bm25"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, StageError> {
        let sanitized = sanitize_query(query);
        if sanitized.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let hits = self
            .search_index(&sanitized, limit)
            .map_err(|e| StageError::unavailable(self.name(), e.to_string()))?;

        Ok(hits
            .into_iter()
            .filter_map(|(id, score)| {
                self.corpus
                    .get(&id)
                    .map(|p| SearchResult::new(p.to_chunk(), score, RetrievalSource::Sparse))
            })
            .collect())
    }
}
