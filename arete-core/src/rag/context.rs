//! Context composition with a token budget and citation bookkeeping.

use crate::collaborators::ContextComposer;
use crate::config::{CompositionStrategy, PipelineConfig};
use crate::error::StageError;
use crate::rag::text::estimate_tokens;
use crate::types::{Citation, ContextResult, SearchResult};
use async_trait::async_trait;

const SEPARATOR: &str = "\n\n---\n\n";

/// Token-aware context builder.
///
/// Each passage is emitted as a `[n] Title (Author)` header followed by its
/// text. Passages are added until the budget is exhausted; the first passage
/// is cut down to fit rather than producing an empty context.
#[derive(Debug, Default)]
pub struct BudgetedComposer;

impl BudgetedComposer {
    fn ordered<'a>(
        results: &'a [SearchResult],
        strategy: CompositionStrategy,
    ) -> Vec<&'a SearchResult> {
        match strategy {
            CompositionStrategy::RelevanceRanked => results.iter().collect(),
            CompositionStrategy::SourceGrouped => {
                let mut documents: Vec<&str> = Vec::new();
                for r in results {
                    if !documents.contains(&r.chunk.document_id.as_str()) {
                        documents.push(&r.chunk.document_id);
                    }
                }
                documents
                    .into_iter()
                    .flat_map(|doc| results.iter().filter(move |r| r.chunk.document_id == doc))
                    .collect()
            }
        }
    }
}

fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * 4;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

#[async_trait]
impl ContextComposer for BudgetedComposer {
    fn name(&self) -> &str {
        "budgeted-composer"
    }

    async fn compose_context(
        &self,
        results: &[SearchResult],
        query: &str,
        config: &PipelineConfig,
    ) -> Result<ContextResult, StageError> {
        if results.is_empty() {
            return Err(StageError::invalid_response(
                self.name(),
                "no passages to compose",
            ));
        }

        let budget = config.max_context_tokens;
        let mut context_text = String::new();
        let mut citations: Vec<Citation> = Vec::new();
        let mut truncated = false;

        for result in Self::ordered(results, config.composition_strategy) {
            let marker = citations.len() + 1;
            let header = format!(
                "[{}] {} ({})\n",
                marker, result.chunk.title, result.chunk.author
            );
            let separator = if context_text.is_empty() {
                ""
            } else {
                SEPARATOR
            };
            let fixed_tokens = estimate_tokens(&context_text)
                + estimate_tokens(separator)
                + estimate_tokens(&header);

            let mut text = result.chunk.text.clone();
            if fixed_tokens + estimate_tokens(&text) > budget {
                truncated = true;
                if !citations.is_empty() || fixed_tokens >= budget {
                    break;
                }
                text = truncate_to_tokens(&text, budget - fixed_tokens);
            }

            context_text.push_str(separator);
            context_text.push_str(&header);
            context_text.push_str(&text);
            citations.push(Citation {
                marker,
                chunk_id: result.chunk.chunk_id.clone(),
                document_id: result.chunk.document_id.clone(),
                title: result.chunk.title.clone(),
                author: result.chunk.author.clone(),
                text,
            });
        }

        if citations.is_empty() {
            return Err(StageError::invalid_response(
                self.name(),
                format!("context budget of {budget} tokens fits no passage"),
            ));
        }

        Ok(ContextResult {
            query: query.to_string(),
            token_count: estimate_tokens(&context_text),
            context_text,
            citations,
            truncated,
        })
    }
}
