//! Citation grounding checks for generated answers.

use crate::rag::text::sentences;
use crate::types::{ContextResult, ResponseValidation};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid regex"));

/// Citation markers (`[n]`) appearing in `text`, in order.
pub fn citation_markers(text: &str) -> Vec<usize> {
    MARKER
        .captures_iter(text)
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse().ok()))
        .collect()
}

/// Checks that every claim in an answer is tied to a source in its context.
pub struct CitationValidator {
    threshold: f32,
}

impl CitationValidator {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn validate(&self, response_text: &str, context: &ContextResult) -> ResponseValidation {
        let claims = sentences(response_text);
        let mut issues = Vec::new();
        let mut cited_markers = BTreeSet::new();
        let mut invalid_markers = BTreeSet::new();
        let mut supported = 0usize;

        for claim in &claims {
            let mut grounded = false;
            for marker in citation_markers(claim) {
                if context.citation(marker).is_some() {
                    grounded = true;
                    cited_markers.insert(marker);
                } else {
                    invalid_markers.insert(marker);
                }
            }
            if grounded {
                supported += 1;
            } else {
                let preview: String = claim.chars().take(60).collect();
                issues.push(format!("Uncited claim: {preview}"));
            }
        }

        for marker in &invalid_markers {
            issues.push(format!(
                "Citation [{marker}] does not match any source in the context"
            ));
        }
        if claims.is_empty() {
            issues.push("Response is empty".to_string());
        }

        let accuracy_score = if claims.is_empty() {
            0.0
        } else {
            supported as f32 / claims.len() as f32
        };
        let citation_coverage =
            (cited_markers.len() as f32 / context.citations.len().max(1) as f32).min(1.0);

        ResponseValidation {
            is_valid: !claims.is_empty()
                && invalid_markers.is_empty()
                && accuracy_score >= self.threshold,
            accuracy_score,
            citation_coverage,
            issues,
        }
    }
}
