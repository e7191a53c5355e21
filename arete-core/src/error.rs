//! Error types for the Arete pipeline core.
//!
//! Collaborator calls fail with [`StageError`]; the orchestrator decides per
//! stage whether that failure degrades or aborts the run. Aborts and
//! programmer errors surface as [`PipelineError`].

use crate::types::PipelineStage;
use std::path::PathBuf;

/// Top-level error type for the Arete core library.
#[derive(Debug, thiserror::Error)]
pub enum AreteError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure reported by a single collaborator call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    #[error("{service} returned an invalid response: {message}")]
    InvalidResponse { service: String, message: String },

    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Task panicked: {message}")]
    Panicked { message: String },
}

impl StageError {
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn invalid_response(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// Errors that abort a pipeline run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("No {stage} collaborator is configured")]
    NotConfigured { stage: PipelineStage },

    #[error("{stage} failed: {source}")]
    StageFailed {
        stage: PipelineStage,
        #[source]
        source: StageError,
    },

    #[error("Invalid pipeline configuration: {message}")]
    InvalidConfig { message: String },
}

impl PipelineError {
    /// The stage the error is attributed to, when there is one.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::NotConfigured { stage } | Self::StageFailed { stage, .. } => Some(*stage),
            Self::InvalidConfig { .. } => None,
        }
    }
}

/// Errors from loading or indexing a passage corpus.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("Corpus file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse corpus: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate passage id: {id}")]
    DuplicatePassage { id: String },

    #[error("Passage '{id}' links to unknown passage '{target}'")]
    DanglingLink { id: String, target: String },

    #[error("Index error: {message}")]
    Index { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, AreteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display() {
        let err = StageError::unavailable("bm25", "index closed");
        assert_eq!(err.to_string(), "bm25 unavailable: index closed");

        let err = StageError::Timeout { timeout_secs: 30 };
        assert_eq!(err.to_string(), "Timed out after 30s");
    }

    #[test]
    fn test_pipeline_error_stage() {
        let err = PipelineError::StageFailed {
            stage: PipelineStage::ContextComposition,
            source: StageError::invalid_response("composer", "empty"),
        };
        assert_eq!(err.stage(), Some(PipelineStage::ContextComposition));
        assert!(err.to_string().starts_with("context composition failed"));

        let err = PipelineError::InvalidConfig {
            message: "bad".into(),
        };
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn test_not_configured_display() {
        let err = PipelineError::NotConfigured {
            stage: PipelineStage::ResponseGeneration,
        };
        assert_eq!(
            err.to_string(),
            "No response generation collaborator is configured"
        );
    }

    #[test]
    fn test_arete_error_from_pipeline() {
        let err: AreteError = PipelineError::InvalidConfig {
            message: "x".into(),
        }
        .into();
        assert!(matches!(err, AreteError::Pipeline(_)));
    }
}
