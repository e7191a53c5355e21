//! Small lexical helpers shared by the local collaborators.

use std::collections::HashSet;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "does", "do", "for", "from", "how",
    "in", "into", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "what",
    "when", "which", "who", "why", "with", "according",
];

/// Lowercased alphanumeric terms of `text`, stopwords removed, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

pub fn term_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard similarity of two term sets. Two empty sets are identical.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f32 / union as f32
}

/// Fraction of query terms that occur in `text`.
pub fn query_overlap(query_terms: &HashSet<String>, text: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms = term_set(text);
    query_terms.intersection(&text_terms).count() as f32 / query_terms.len() as f32
}

/// Strip characters with meaning in query syntax, keeping plain terms.
pub fn sanitize_query(query: &str) -> String {
    tokenize(query).join(" ")
}

/// Split text into sentences on terminal punctuation.
pub fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '?' | '!') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    out
}

/// Rough token estimate at ~4 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_stopwords_and_punctuation() {
        assert_eq!(
            tokenize("What is virtue, according to Plato?"),
            vec!["virtue", "plato"]
        );
    }

    #[test]
    fn test_jaccard() {
        let a = term_set("virtue knowledge soul");
        let b = term_set("virtue knowledge habit");
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-6);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 1.0);
    }

    #[test]
    fn test_query_overlap() {
        let q = term_set("virtue Plato");
        assert_eq!(query_overlap(&q, "Plato wrote about virtue."), 1.0);
        assert_eq!(query_overlap(&q, "Kant on duty."), 0.0);
        assert_eq!(query_overlap(&HashSet::new(), "anything"), 0.0);
    }

    #[test]
    fn test_sanitize_query() {
        assert_eq!(sanitize_query("virtue: \"Plato\" (Meno)?"), "virtue plato meno");
    }

    #[test]
    fn test_sentences() {
        let s = sentences("Virtue is knowledge. Can it be taught? Perhaps");
        assert_eq!(s, vec!["Virtue is knowledge.", "Can it be taught?", "Perhaps"]);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
