//! Extractive response generation.
//!
//! Answers by quoting, for each cited passage, the sentence that best matches
//! the question, tagged with its citation marker. No language model is
//! involved, so answers are deterministic and always grounded.

use crate::collaborators::ResponseGenerator;
use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::rag::grounding::CitationValidator;
use crate::rag::text::{estimate_tokens, query_overlap, sentences, term_set};
use crate::types::{Citation, ContextResult, ResponseResult, ResponseValidation, UserContext};
use async_trait::async_trait;
use std::collections::HashSet;

/// User-context key selecting the answer register.
pub const STUDENT_LEVEL_KEY: &str = "student_level";

#[derive(Debug, Default)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    /// The sentence of `text` sharing the most terms with the query.
    fn best_sentence(query_terms: &HashSet<String>, text: &str) -> Option<(String, f32)> {
        let mut best: Option<(String, f32)> = None;
        for sentence in sentences(text) {
            let overlap = query_overlap(query_terms, &sentence);
            if best.as_ref().is_none_or(|(_, score)| overlap > *score) {
                best = Some((sentence, overlap));
            }
        }
        best
    }

    /// Plain-language lead-in for beginners; the quote continues the sentence.
    fn simplify(cited: &str) -> String {
        let mut chars = cited.chars();
        match chars.next() {
            Some(first) => format!("Put simply, {}{}", first.to_lowercase(), chars.as_str()),
            None => String::new(),
        }
    }

    fn cite(sentence: &str, marker: usize) -> String {
        let body = sentence.trim_end_matches(['.', '?', '!']).trim_end();
        format!("{body} [{marker}].")
    }
}

#[async_trait]
impl ResponseGenerator for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive-generator"
    }

    async fn generate_response(
        &self,
        context: &ContextResult,
        query: &str,
        config: &PipelineConfig,
        user_context: &UserContext,
    ) -> Result<ResponseResult, StageError> {
        let query_terms = term_set(query);
        let beginner = user_context
            .get(STUDENT_LEVEL_KEY)
            .is_some_and(|level| level.eq_ignore_ascii_case("beginner"));

        let mut parts: Vec<String> = Vec::new();
        let mut used: Vec<Citation> = Vec::new();
        let mut tokens = 0usize;

        for citation in &context.citations {
            let Some((sentence, overlap)) = Self::best_sentence(&query_terms, &citation.text)
            else {
                continue;
            };
            // Past the first source, only quote passages that touch the question.
            if !parts.is_empty() && overlap == 0.0 {
                continue;
            }

            let mut cited = Self::cite(&sentence, citation.marker);
            if parts.is_empty() && beginner {
                cited = Self::simplify(&cited);
            }
            let cost = estimate_tokens(&cited) + 1;
            if tokens + cost > config.max_response_tokens {
                if parts.is_empty() {
                    return Err(StageError::invalid_response(
                        self.name(),
                        format!(
                            "response budget of {} tokens fits no sentence",
                            config.max_response_tokens
                        ),
                    ));
                }
                break;
            }

            tokens += cost;
            parts.push(cited);
            used.push(citation.clone());
        }

        if parts.is_empty() {
            return Err(StageError::invalid_response(
                self.name(),
                "context contains no quotable text",
            ));
        }

        let response_text = parts.join(" ");
        let validation = if config.enable_validation {
            CitationValidator::new(config.citation_accuracy_threshold)
                .validate(&response_text, context)
        } else {
            let coverage = used.len() as f32 / context.citations.len().max(1) as f32;
            ResponseValidation::unchecked(coverage)
        };

        Ok(ResponseResult {
            token_count: estimate_tokens(&response_text),
            response_text,
            citations: used,
            validation,
        })
    }
}
