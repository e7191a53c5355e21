//! Configuration for the Arete pipeline.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.

use crate::error::PipelineError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How selected passages are ordered inside the composed context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionStrategy {
    /// Keep the order produced by the earlier stages.
    #[default]
    RelevanceRanked,
    /// Keep passages from the same document together.
    SourceGrouped,
}

/// Per-run pipeline settings. Never mutated while a run is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Results requested from each retrieval adapter.
    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,
    /// Cap on the merged retrieval list.
    #[serde(default = "default_max_retrieval_results")]
    pub max_retrieval_results: usize,
    #[serde(default = "default_sparse_weight")]
    pub sparse_weight: f32,
    #[serde(default = "default_dense_weight")]
    pub dense_weight: f32,
    #[serde(default = "default_graph_weight")]
    pub graph_weight: f32,

    #[serde(default = "default_true")]
    pub enable_reranking: bool,
    #[serde(default = "default_max_reranked_results")]
    pub max_reranked_results: usize,
    /// Multiplier the re-ranker applies to domain-relevant passages.
    #[serde(default = "default_domain_boost")]
    pub domain_boost_factor: f32,

    #[serde(default = "default_true")]
    pub enable_diversification: bool,
    #[serde(default = "default_max_diversified_results")]
    pub max_diversified_results: usize,
    #[serde(default = "default_similarity_threshold")]
    pub diversity_similarity_threshold: f32,

    #[serde(default)]
    pub composition_strategy: CompositionStrategy,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_true")]
    pub enable_validation: bool,
    #[serde(default = "default_citation_accuracy_threshold")]
    pub citation_accuracy_threshold: f32,

    #[serde(default = "default_true")]
    pub enable_cache: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Timeout applied to every collaborator call. `None` waits forever.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: Option<u64>,
    /// Upper bound on pipelines in flight during batch execution.
    #[serde(default)]
    pub max_concurrent_pipelines: Option<usize>,
}

fn default_true() -> bool {
    true
}
fn default_retrieval_limit() -> usize {
    20
}
fn default_max_retrieval_results() -> usize {
    30
}
fn default_sparse_weight() -> f32 {
    0.3
}
fn default_dense_weight() -> f32 {
    0.5
}
fn default_graph_weight() -> f32 {
    0.2
}
fn default_max_reranked_results() -> usize {
    15
}
fn default_domain_boost() -> f32 {
    1.2
}
fn default_max_diversified_results() -> usize {
    8
}
fn default_similarity_threshold() -> f32 {
    0.85
}
fn default_max_context_tokens() -> usize {
    3000
}
fn default_max_response_tokens() -> usize {
    800
}
fn default_temperature() -> f32 {
    0.3
}
fn default_citation_accuracy_threshold() -> f32 {
    0.7
}
fn default_cache_ttl() -> u64 {
    3600
}
fn default_stage_timeout() -> Option<u64> {
    Some(30)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retrieval_limit: default_retrieval_limit(),
            max_retrieval_results: default_max_retrieval_results(),
            sparse_weight: default_sparse_weight(),
            dense_weight: default_dense_weight(),
            graph_weight: default_graph_weight(),
            enable_reranking: true,
            max_reranked_results: default_max_reranked_results(),
            domain_boost_factor: default_domain_boost(),
            enable_diversification: true,
            max_diversified_results: default_max_diversified_results(),
            diversity_similarity_threshold: default_similarity_threshold(),
            composition_strategy: CompositionStrategy::default(),
            max_context_tokens: default_max_context_tokens(),
            max_response_tokens: default_max_response_tokens(),
            temperature: default_temperature(),
            enable_validation: true,
            citation_accuracy_threshold: default_citation_accuracy_threshold(),
            enable_cache: true,
            cache_ttl_secs: default_cache_ttl(),
            stage_timeout_secs: default_stage_timeout(),
            max_concurrent_pipelines: None,
        }
    }
}

impl PipelineConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }

    /// Reject settings no run could sensibly use.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |message: String| Err(PipelineError::InvalidConfig { message });

        for (name, weight) in [
            ("sparse_weight", self.sparse_weight),
            ("dense_weight", self.dense_weight),
            ("graph_weight", self.graph_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return invalid(format!("{name} must be a non-negative number, got {weight}"));
            }
        }
        if self.sparse_weight + self.dense_weight + self.graph_weight <= 0.0 {
            return invalid("at least one retrieval weight must be positive".into());
        }

        for (name, value) in [
            ("retrieval_limit", self.retrieval_limit),
            ("max_retrieval_results", self.max_retrieval_results),
            ("max_reranked_results", self.max_reranked_results),
            ("max_diversified_results", self.max_diversified_results),
            ("max_context_tokens", self.max_context_tokens),
            ("max_response_tokens", self.max_response_tokens),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be greater than zero"));
            }
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return invalid(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            ));
        }
        for (name, value) in [
            ("diversity_similarity_threshold", self.diversity_similarity_threshold),
            ("citation_accuracy_threshold", self.citation_accuracy_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.domain_boost_factor.is_nan() || self.domain_boost_factor <= 0.0 {
            return invalid(format!(
                "domain_boost_factor must be positive, got {}",
                self.domain_boost_factor
            ));
        }
        if self.max_concurrent_pipelines == Some(0) {
            return invalid("max_concurrent_pipelines must be at least 1 when set".into());
        }
        Ok(())
    }
}

/// Settings for the process-wide pipeline cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached results before the oldest is evicted.
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

fn default_cache_entries() -> usize {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

/// Where passages come from and how the local pipeline retrieves them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// JSON corpus file. The built-in sample corpus is used when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Use the unified hybrid repository instead of separate adapters.
    #[serde(default = "default_true")]
    pub use_unified_retrieval: bool,
    /// Dimensionality of the hashed dense embeddings.
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
}

fn default_embedding_dimensions() -> usize {
    256
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: None,
            use_unified_retrieval: true,
            embedding_dimensions: default_embedding_dimensions(),
        }
    }
}

/// Top-level configuration file layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AreteConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
}

impl AreteConfig {
    /// Render as TOML, as written by `arete config init`.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Path of the user-level config file, if the platform has a config dir.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "arete", "arete")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".arete").join("config.toml")
}

/// Load configuration from all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&AreteConfig>,
) -> Result<AreteConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AreteConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // ARETE_PIPELINE__TEMPERATURE, ARETE_CACHE__MAX_ENTRIES, ...
    figment = figment.merge(Env::prefixed("ARETE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load configuration from one explicit TOML file layered over defaults.
pub fn load_config_file(path: &Path) -> Result<AreteConfig, Box<figment::Error>> {
    Figment::from(Serialized::defaults(AreteConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ARETE_").split("__"))
        .extract()
        .map_err(Box::new)
}
