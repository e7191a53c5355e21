//! Property-based tests for the cache, retrieval merging and quality metrics.

use proptest::prelude::*;

use arete_core::collaborators::{Diversifier, Reranker};
use arete_core::pipeline::deduplicate;
use arete_core::rag::text::{estimate_tokens, jaccard, term_set};
use arete_core::rag::{JaccardDiversifier, LexicalReranker, local_pipeline};
use arete_core::types::{NO_RESULTS_ERROR, PipelineResult};
use arete_core::{
    ChunkRef, Corpus, PipelineCache, PipelineConfig, PipelineStage, RetrievalSource, SearchResult,
    UserContext, cache_key,
};
use std::collections::HashSet;
use std::sync::Arc;

fn result(id: u8, score: f32) -> SearchResult {
    SearchResult::new(
        ChunkRef {
            chunk_id: format!("chunk-{id}"),
            document_id: format!("doc-{}", id % 3),
            title: "Republic".into(),
            author: "Plato".into(),
            text: format!("passage {id} on justice and the soul"),
        },
        score,
        RetrievalSource::Dense,
    )
}

fn placeholder(query: &str) -> PipelineResult {
    PipelineResult::failed(
        query,
        PipelineConfig::default(),
        PipelineStage::Retrieval,
        NO_RESULTS_ERROR,
    )
}

// --- Cache properties ---

proptest! {
    #[test]
    fn cache_never_exceeds_capacity(
        capacity in 1usize..10,
        keys in prop::collection::vec("[a-z]{1,6}", 0..40),
    ) {
        let mut cache = PipelineCache::new(capacity);
        for key in &keys {
            cache.insert(key.clone(), placeholder(key));
            prop_assert!(cache.len() <= capacity);
        }
    }

    #[test]
    fn cache_keeps_newest_insert(
        capacity in 1usize..5,
        keys in prop::collection::vec("[a-z]{1,6}", 1..20),
    ) {
        let mut cache = PipelineCache::new(capacity);
        for key in &keys {
            cache.insert(key.clone(), placeholder(key));
            prop_assert!(cache.contains_key(key));
        }
    }

    #[test]
    fn cache_key_is_deterministic(
        query in "[a-zA-Z ?]{0,40}",
        level in "[a-z]{0,10}",
    ) {
        let mut user = UserContext::new();
        user.insert("student_level".into(), level);
        let config = PipelineConfig::default();
        prop_assert_eq!(
            cache_key(&query, &config, &user),
            cache_key(&query, &config.clone(), &user.clone())
        );
    }

    #[test]
    fn cache_key_separates_queries(a in "[a-z]{1,20}", b in "[a-z]{1,20}") {
        prop_assume!(a != b);
        let config = PipelineConfig::default();
        let user = UserContext::new();
        prop_assert_ne!(cache_key(&a, &config, &user), cache_key(&b, &config, &user));
    }
}

// --- Retrieval merging ---

proptest! {
    #[test]
    fn deduplicate_yields_unique_chunks(ids in prop::collection::vec(0u8..20, 0..60)) {
        let merged: Vec<SearchResult> = ids.iter().map(|&id| result(id, 0.5)).collect();
        let unique = deduplicate(merged);

        let seen: HashSet<&str> = unique.iter().map(SearchResult::chunk_id).collect();
        prop_assert_eq!(seen.len(), unique.len());

        let distinct: HashSet<u8> = ids.iter().copied().collect();
        prop_assert_eq!(unique.len(), distinct.len());
    }

    #[test]
    fn deduplicate_preserves_first_seen_order(ids in prop::collection::vec(0u8..10, 0..30)) {
        let merged: Vec<SearchResult> = ids.iter().map(|&id| result(id, 0.5)).collect();
        let unique = deduplicate(merged);

        let mut expected = Vec::new();
        for id in &ids {
            let chunk_id = format!("chunk-{id}");
            if !expected.contains(&chunk_id) {
                expected.push(chunk_id);
            }
        }
        let actual: Vec<String> = unique.iter().map(|r| r.chunk_id().to_string()).collect();
        prop_assert_eq!(actual, expected);
    }
}

// --- Local collaborators ---

proptest! {
    #[test]
    fn reranker_respects_cap_and_order(
        scores in prop::collection::vec(0.0f32..1.0, 0..20),
        cap in 1usize..10,
    ) {
        let results: Vec<SearchResult> = scores
            .iter()
            .enumerate()
            .map(|(i, &s)| result(i as u8, s))
            .collect();
        let reranked = tokio_test::block_on(
            LexicalReranker::default().rerank_results("justice soul", results, cap, 1.2),
        )
        .unwrap();

        prop_assert!(reranked.len() <= cap);
        for pair in reranked.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn diversifier_never_grows_input(
        ids in prop::collection::vec(0u8..30, 0..20),
        cap in 1usize..10,
        threshold in 0.0f32..1.0,
    ) {
        let results = deduplicate(ids.iter().map(|&id| result(id, 0.5)).collect());
        let input_len = results.len();
        let diversified = tokio_test::block_on(
            JaccardDiversifier.diversify_results("justice", results, cap, threshold),
        )
        .unwrap();
        prop_assert!(diversified.len() <= cap.min(input_len));
    }

    #[test]
    fn jaccard_is_bounded_and_symmetric(a in "[a-z ]{0,60}", b in "[a-z ]{0,60}") {
        let (a, b) = (term_set(&a), term_set(&b));
        let ab = jaccard(&a, &b);
        prop_assert!((0.0..=1.0).contains(&ab));
        prop_assert_eq!(ab, jaccard(&b, &a));
    }

    #[test]
    fn token_estimate_is_monotonic(a in ".{0,200}", b in ".{0,200}") {
        let joined = format!("{a}{b}");
        prop_assert!(estimate_tokens(&joined) >= estimate_tokens(&a));
    }
}

// --- End-to-end metrics ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn metrics_stay_consistent(
        query in "(virtue|justice|duty|happiness|soul|knowledge)( [a-z]{2,8}){0,4}",
        max_diversified in 1usize..8,
    ) {
        let corpus = Arc::new(Corpus::builtin().unwrap());
        let pipeline = local_pipeline(corpus, &Default::default()).unwrap();
        let config = PipelineConfig {
            max_diversified_results: max_diversified,
            enable_cache: false,
            ..Default::default()
        };

        let result = tokio_test::block_on(pipeline.execute_pipeline(&query, Some(&config), None));
        let Ok(result) = result else {
            // A fatal stage error is a valid outcome; metrics only apply to results.
            return Ok(());
        };
        let metrics = &result.metrics;
        prop_assert_eq!(metrics.retrieved_results, result.retrieval_results.len());
        prop_assert!((0.0..=1.0).contains(&metrics.citation_coverage));
        prop_assert!(metrics.citations_used <= metrics.citations_available);
        prop_assert!(result.diversified_results.len() <= max_diversified);
        prop_assert_eq!(metrics.total_ms, metrics.stage_total_ms());
    }
}
