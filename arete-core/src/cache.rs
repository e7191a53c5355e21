//! In-memory cache of whole pipeline results.
//!
//! Entries live in a map keyed by a request signature, with a parallel index
//! of insertion timestamps used for TTL expiry and oldest-first eviction.
//! Timestamps use `tokio::time::Instant` so a paused test clock drives expiry.

use crate::config::{CompositionStrategy, PipelineConfig};
use crate::types::{PipelineResult, UserContext};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// The subset of a request that determines its cached answer.
#[derive(Serialize)]
struct CacheKeyFields<'a> {
    query: &'a str,
    retrieval_limit: usize,
    max_retrieval_results: usize,
    max_reranked_results: usize,
    max_diversified_results: usize,
    max_context_tokens: usize,
    max_response_tokens: usize,
    temperature: f32,
    composition_strategy: CompositionStrategy,
    enable_reranking: bool,
    enable_diversification: bool,
    user_context: &'a UserContext,
}

/// Derive the cache key for a request.
///
/// Stable across processes and independent of object identity: two requests
/// with the same query, cache-relevant settings and user context share a key.
pub fn cache_key(query: &str, config: &PipelineConfig, user_context: &UserContext) -> String {
    let fields = CacheKeyFields {
        query,
        retrieval_limit: config.retrieval_limit,
        max_retrieval_results: config.max_retrieval_results,
        max_reranked_results: config.max_reranked_results,
        max_diversified_results: config.max_diversified_results,
        max_context_tokens: config.max_context_tokens,
        max_response_tokens: config.max_response_tokens,
        temperature: config.temperature,
        composition_strategy: config.composition_strategy,
        enable_reranking: config.enable_reranking,
        enable_diversification: config.enable_diversification,
        user_context,
    };
    // Struct fields serialize in declaration order and UserContext is a BTreeMap.
    let canonical = serde_json::to_vec(&fields).unwrap_or_else(|_| query.as_bytes().to_vec());

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    format!("{:x}", hasher.finalize())
}

/// Occupancy snapshot for operational visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub oldest_entry_age_secs: Option<f64>,
}

/// Bounded result cache with per-entry expiry.
#[derive(Debug)]
pub struct PipelineCache {
    entries: HashMap<String, PipelineResult>,
    inserted_at: HashMap<String, Instant>,
    max_entries: usize,
}

impl PipelineCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            inserted_at: HashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Look up a live entry. An entry older than `ttl` is removed and reported absent.
    pub fn get(&mut self, key: &str, ttl: Duration) -> Option<PipelineResult> {
        let inserted = *self.inserted_at.get(key)?;
        if inserted.elapsed() > ttl {
            debug!(key, "Cache entry expired");
            self.remove(key);
            return None;
        }
        self.entries.get(key).cloned()
    }

    /// Store a result, evicting the oldest entries while over capacity.
    pub fn insert(&mut self, key: String, result: PipelineResult) {
        self.inserted_at.insert(key.clone(), Instant::now());
        self.entries.insert(key.clone(), result);

        while self.entries.len() > self.max_entries {
            let Some(oldest) = self.oldest_key_except(&key) else {
                break;
            };
            debug!(key = oldest.as_str(), "Evicting oldest cache entry");
            self.remove(&oldest);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<PipelineResult> {
        self.inserted_at.remove(key);
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.inserted_at.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn oldest_entry_age(&self) -> Option<Duration> {
        self.inserted_at.values().min().map(|t| t.elapsed())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            max_entries: self.max_entries,
            oldest_entry_age_secs: self.oldest_entry_age().map(|d| d.as_secs_f64()),
        }
    }

    // The entry just written never counts as oldest, even on a timestamp tie.
    fn oldest_key_except(&self, newest: &str) -> Option<String> {
        self.inserted_at
            .iter()
            .filter(|(k, _)| k.as_str() != newest)
            .min_by_key(|(_, t)| **t)
            .map(|(k, _)| k.clone())
    }
}
