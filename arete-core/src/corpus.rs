//! Passage corpus backing the local retrieval collaborators.

use crate::error::CorpusError;
use crate::types::ChunkRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const BUILTIN_CORPUS: &str = include_str!("../data/philosophy_corpus.json");

/// One retrievable passage of a source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub document_id: String,
    pub title: String,
    pub author: String,
    pub text: String,
    /// Ids of passages linked to this one in the knowledge graph.
    #[serde(default)]
    pub related: Vec<String>,
}

impl Passage {
    pub fn to_chunk(&self) -> ChunkRef {
        ChunkRef {
            chunk_id: self.id.clone(),
            document_id: self.document_id.clone(),
            title: self.title.clone(),
            author: self.author.clone(),
            text: self.text.clone(),
        }
    }
}

/// Immutable, validated collection of passages.
#[derive(Debug, Clone)]
pub struct Corpus {
    passages: Vec<Passage>,
    index: HashMap<String, usize>,
}

impl Corpus {
    /// Build a corpus, rejecting duplicate ids and links to unknown passages.
    pub fn new(passages: Vec<Passage>) -> Result<Self, CorpusError> {
        let mut index = HashMap::with_capacity(passages.len());
        for (i, passage) in passages.iter().enumerate() {
            if index.insert(passage.id.clone(), i).is_some() {
                return Err(CorpusError::DuplicatePassage {
                    id: passage.id.clone(),
                });
            }
        }
        for passage in &passages {
            if let Some(target) = passage.related.iter().find(|t| !index.contains_key(*t)) {
                return Err(CorpusError::DanglingLink {
                    id: passage.id.clone(),
                    target: target.clone(),
                });
            }
        }
        Ok(Self { passages, index })
    }

    pub fn from_json(json: &str) -> Result<Self, CorpusError> {
        let passages: Vec<Passage> = serde_json::from_str(json)?;
        Self::new(passages)
    }

    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        if !path.exists() {
            return Err(CorpusError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let corpus = Self::from_json(&content)?;
        tracing::info!(
            path = %path.display(),
            passages = corpus.len(),
            "Loaded passage corpus"
        );
        Ok(corpus)
    }

    /// The bundled classical-philosophy sample corpus.
    pub fn builtin() -> Result<Self, CorpusError> {
        Self::from_json(BUILTIN_CORPUS)
    }

    pub fn get(&self, id: &str) -> Option<&Passage> {
        self.index.get(id).map(|&i| &self.passages[i])
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    /// Passages linked from `id`, in link order.
    pub fn neighbours(&self, id: &str) -> Vec<&Passage> {
        self.get(id)
            .map(|p| p.related.iter().filter_map(|r| self.get(r)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(id: &str, related: &[&str]) -> Passage {
        Passage {
            id: id.into(),
            document_id: "doc".into(),
            title: "Title".into(),
            author: "Author".into(),
            text: format!("text of {id}"),
            related: related.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_builtin_corpus_loads() {
        let corpus = Corpus::builtin().unwrap();
        assert!(corpus.len() >= 10);
        let meno = corpus.get("meno-87c").unwrap();
        assert_eq!(meno.author, "Plato");
        assert!(!corpus.neighbours("meno-87c").is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = Corpus::new(vec![passage("a", &[]), passage("a", &[])]).unwrap_err();
        assert!(matches!(err, CorpusError::DuplicatePassage { id } if id == "a"));
    }

    #[test]
    fn test_dangling_link_rejected() {
        let err = Corpus::new(vec![passage("a", &["missing"])]).unwrap_err();
        assert!(matches!(err, CorpusError::DanglingLink { target, .. } if target == "missing"));
    }

    #[test]
    fn test_neighbours_in_link_order() {
        let corpus = Corpus::new(vec![
            passage("a", &["c", "b"]),
            passage("b", &[]),
            passage("c", &[]),
        ])
        .unwrap();
        let ids: Vec<_> = corpus.neighbours("a").iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert!(corpus.neighbours("unknown").is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Corpus::load(Path::new("/nonexistent/corpus.json")).unwrap_err();
        assert!(matches!(err, CorpusError::FileNotFound { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        let json = serde_json::to_string(&vec![passage("x", &[])]).unwrap();
        std::fs::write(&path, json).unwrap();
        let corpus = Corpus::load(&path).unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.get("x").unwrap().to_chunk().chunk_id, "x");
    }
}
