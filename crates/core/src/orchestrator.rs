use crate::embeddings::{embed_query, Embedder};
use crate::models::{
    RankingConfig, ScoreBreakdown, SearchCandidate, SearchFilters, SearchQuery, SearchResult,
};
use crate::ranking::{
    build_snippet, extract_highlights, map_confidence, score_candidates, ScoredCandidate,
};
use crate::retry::RetryPolicy;
use crate::traits::{ChunkStore, KeywordHit, KeywordIndex, VectorHit, VectorIndex};
use crate::SearchError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Fuses keyword and vector retrieval into one ranked, cited result list.
///
/// Holds only handles to shared indices; every call is a pure function of
/// the query, the index contents at call time, and the configuration.
pub struct HybridRanker<K, V, S, E>
where
    K: KeywordIndex,
    V: VectorIndex,
    S: ChunkStore,
    E: Embedder + ?Sized,
{
    keyword: Arc<K>,
    vector: Arc<V>,
    store: Arc<S>,
    embedder: Arc<E>,
    retry: RetryPolicy,
    config: RankingConfig,
}

impl<K, V, S, E> HybridRanker<K, V, S, E>
where
    K: KeywordIndex + Send + Sync,
    V: VectorIndex + Send + Sync,
    S: ChunkStore + Send + Sync,
    E: Embedder + ?Sized,
{
    pub fn new(keyword: Arc<K>, vector: Arc<V>, store: Arc<S>, embedder: Arc<E>) -> Self {
        Self {
            keyword,
            vector,
            store,
            embedder,
            retry: RetryPolicy::default(),
            config: RankingConfig::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_config(mut self, config: RankingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    pub async fn hybrid_search(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<SearchResult>, SearchError> {
        query.validate()?;

        let fetch = query
            .top_k
            .saturating_mul(self.config.candidate_multiplier.max(1));
        let filter = query.document_filter();

        let (keyword_hits, vector_hits) = tokio::try_join!(
            self.keyword.search_keyword(&query.text, fetch, filter),
            self.semantic_hits(&query.text, fetch)
        )?;

        let keyword_count = keyword_hits.len();
        let vector_count = vector_hits.len();
        let candidates = self.merge_candidates(keyword_hits, vector_hits, filter).await?;
        debug!(
            query = %query.text,
            keyword_count,
            vector_count,
            candidate_count = candidates.len(),
            "hybrid candidates merged"
        );

        Ok(score_candidates(candidates, query.alpha)
            .into_iter()
            .take(query.top_k)
            .map(|scored| self.build_result(&query.text, scored))
            .collect())
    }

    async fn semantic_hits(&self, text: &str, fetch: usize) -> Result<Vec<VectorHit>, SearchError> {
        let query_vector = embed_query(self.embedder.as_ref(), &self.retry, text).await?;
        self.vector.query_vector(&query_vector, fetch).await
    }

    /// Unions both hit lists by chunk id (keyword order first, then
    /// vector-only hits), hydrates rows, and drops filtered documents.
    async fn merge_candidates(
        &self,
        keyword_hits: Vec<KeywordHit>,
        vector_hits: Vec<VectorHit>,
        filter: Option<&SearchFilters>,
    ) -> Result<Vec<SearchCandidate>, SearchError> {
        let mut order: Vec<String> = Vec::with_capacity(keyword_hits.len() + vector_hits.len());
        let mut keyword_scores = HashMap::with_capacity(keyword_hits.len());
        let mut vector_scores = HashMap::with_capacity(vector_hits.len());

        for hit in keyword_hits {
            if keyword_scores.insert(hit.chunk_id.clone(), hit.score).is_none() {
                order.push(hit.chunk_id);
            }
        }
        for hit in vector_hits {
            if !keyword_scores.contains_key(&hit.chunk_id)
                && !vector_scores.contains_key(&hit.chunk_id)
            {
                order.push(hit.chunk_id.clone());
            }
            vector_scores.entry(hit.chunk_id).or_insert(hit.similarity);
        }

        if order.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows: HashMap<String, _> = self
            .store
            .chunks_by_ids(&order)
            .await?
            .into_iter()
            .map(|chunk| (chunk.id.clone(), chunk))
            .collect();

        let mut candidates = Vec::with_capacity(order.len());
        for chunk_id in order {
            let Some(chunk) = rows.remove(&chunk_id) else {
                let violation = SearchError::ConsistencyViolation(format!(
                    "indexed chunk {chunk_id} has no stored row"
                ));
                error!(%violation, chunk_id = %chunk_id, "excluding orphaned index entry");
                continue;
            };
            if filter.is_some_and(|filter| !filter.allows(&chunk.document_id)) {
                continue;
            }
            candidates.push(SearchCandidate {
                keyword_score: keyword_scores.get(&chunk_id).copied().unwrap_or(0.0),
                vector_score: vector_scores.get(&chunk_id).copied().unwrap_or(0.0),
                chunk,
            });
        }
        Ok(candidates)
    }

    fn build_result(&self, query: &str, scored: ScoredCandidate) -> SearchResult {
        let highlights =
            extract_highlights(query, &scored.chunk.text, self.config.min_highlight_len);
        let snippet = build_snippet(&scored.chunk.text, &highlights, self.config.snippet_window);
        let confidence =
            map_confidence(scored.hybrid, &scored.chunk.text, self.config.obligation_boost);
        let chunk = scored.chunk;

        SearchResult {
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            filename: chunk.filename,
            page_number: chunk.page_number,
            section: chunk.section,
            snippet,
            highlights,
            scores: ScoreBreakdown {
                keyword: scored.keyword_norm,
                vector: scored.vector_norm,
                hybrid: scored.hybrid,
            },
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use crate::error::EmbeddingError;
    use crate::models::{Chunk, Document};
    use crate::stores::{MemoryStore, MemoryVectorIndex};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type OfflineRanker = HybridRanker<MemoryStore, MemoryVectorIndex, MemoryStore, HashEmbedder>;

    fn chunk(id: &str, document_id: &str, page_number: u32, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: document_id.to_string(),
            filename: "Specs.txt".to_string(),
            page_number,
            section: None,
            text: text.to_string(),
            char_start: 0,
            char_end: text.chars().count(),
            content_hash: String::new(),
        }
    }

    fn document(id: &str) -> Document {
        Document {
            id: id.to_string(),
            filename: "Specs.txt".to_string(),
            file_hash: format!("hash-{id}"),
            pages_count: 2,
            uploaded_at: Utc::now(),
        }
    }

    async fn build(
        corpus: &[(&str, &str, u32, &str)],
    ) -> (OfflineRanker, Arc<MemoryStore>, Arc<MemoryVectorIndex>) {
        let store = Arc::new(MemoryStore::new());
        let vectors = Arc::new(MemoryVectorIndex::new());
        let embedder = HashEmbedder::default();

        let mut by_document: HashMap<&str, Vec<Chunk>> = HashMap::new();
        for (id, document_id, page, text) in corpus {
            by_document
                .entry(*document_id)
                .or_default()
                .push(chunk(id, document_id, *page, text));
            vectors.upsert(id, embedder.embed(text)).expect("upsert");
        }
        let mut documents: Vec<_> = by_document.into_iter().collect();
        documents.sort_by_key(|(id, _)| *id);
        for (document_id, chunks) in documents {
            store
                .insert_document(document(document_id), Vec::new(), chunks)
                .await
                .expect("insert");
        }

        let ranker = HybridRanker::new(
            Arc::clone(&store),
            Arc::clone(&vectors),
            Arc::clone(&store),
            Arc::new(embedder),
        )
        .with_retry_policy(RetryPolicy::immediate(1));
        (ranker, store, vectors)
    }

    const LIQUIDATED: &str = "Liquidated damages: $2,000 per calendar day.";
    const SUBMITTALS: &str = "Submittals due 14 days after award.";

    #[tokio::test]
    async fn liquidated_damages_scenario() {
        let (ranker, store, _) = build(&[
            ("c1", "doc1", 1, LIQUIDATED),
            ("c2", "doc1", 2, SUBMITTALS),
        ])
        .await;

        let keyword = store
            .search_keyword("liquidated damages", 5, None)
            .await
            .expect("keyword search");
        assert_eq!(keyword[0].chunk_id, "c1");

        let query = SearchQuery::new("What are the liquidated damages?", 2, 0.5);
        let first = ranker.hybrid_search(&query).await.expect("search");
        let second = ranker.hybrid_search(&query).await.expect("search");
        assert!(!first.is_empty());
        assert_eq!(first, second);

        let c1 = first
            .iter()
            .find(|result| result.chunk_id == "c1")
            .expect("c1 is a keyword hit");
        assert!(c1.confidence >= c1.scores.hybrid);
        assert_eq!(c1.highlights, vec!["damages".to_string(), "liquidated".to_string()]);
        assert_eq!(c1.snippet, LIQUIDATED);
        assert_eq!(c1.scores.keyword, 1.0);
    }

    #[tokio::test]
    async fn obligation_language_adds_fixed_boost() {
        let (ranker, _, _) = build(&[
            ("c1", "doc1", 1, LIQUIDATED),
            ("c3", "doc1", 3, "Contractor shall submit shop drawings."),
        ])
        .await;

        let results = ranker
            .hybrid_search(&SearchQuery::new("shop drawings", 5, 0.3))
            .await
            .expect("search");
        let shop = results
            .iter()
            .find(|result| result.chunk_id == "c3")
            .expect("c3 present");
        let expected = (shop.scores.hybrid + 0.15).min(1.0);
        assert!((shop.confidence - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn filter_removes_excluded_documents_and_keeps_bounds() {
        let (ranker, _, _) = build(&[
            ("a1", "doc-a", 1, "Performance bond required at award."),
            ("a2", "doc-a", 2, "Payment bond of 100 percent."),
            ("b1", "doc-b", 1, "Bid bond of five percent required."),
        ])
        .await;

        let query = SearchQuery::new("bond required", 5, 0.5)
            .with_filters(SearchFilters::for_documents(["doc-a"]));
        let results = ranker.hybrid_search(&query).await.expect("search");
        assert!(!results.is_empty());
        assert!(results.iter().all(|result| result.document_id == "doc-a"));
        for result in &results {
            for score in [result.scores.keyword, result.scores.vector, result.scores.hybrid] {
                assert!((0.0..=1.0).contains(&score), "score {score} out of bounds");
            }
        }
    }

    /// Returns canned hits and ignores any document filter.
    struct CannedHits {
        keyword: Vec<KeywordHit>,
        vector: Vec<VectorHit>,
    }

    #[async_trait]
    impl KeywordIndex for CannedHits {
        async fn search_keyword(
            &self,
            _query: &str,
            top_k: usize,
            _filter: Option<&SearchFilters>,
        ) -> Result<Vec<KeywordHit>, SearchError> {
            Ok(self.keyword.iter().take(top_k).cloned().collect())
        }
    }

    #[async_trait]
    impl VectorIndex for CannedHits {
        async fn upsert_vector(
            &self,
            _chunk_id: &str,
            _vector: Vec<f32>,
        ) -> Result<(), SearchError> {
            Ok(())
        }

        async fn remove_vectors(&self, _chunk_ids: &[String]) -> Result<usize, SearchError> {
            Ok(0)
        }

        async fn query_vector(
            &self,
            _vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<VectorHit>, SearchError> {
            Ok(self.vector.iter().take(top_k).cloned().collect())
        }
    }

    #[tokio::test]
    async fn excluded_top_scorer_does_not_compress_survivor_scores() {
        let (_, store, _) = build(&[
            ("a1", "doc-a", 1, "Performance bond required at award."),
            ("a2", "doc-a", 2, "Payment bond of 100 percent."),
            ("b1", "doc-b", 1, "Bid bond of five percent required."),
        ])
        .await;
        let keyword_hit = |id: &str, score: f64| KeywordHit {
            chunk_id: id.to_string(),
            score,
        };
        let vector_hit = |id: &str, similarity: f64| VectorHit {
            chunk_id: id.to_string(),
            similarity,
        };
        let canned = Arc::new(CannedHits {
            keyword: vec![keyword_hit("b1", 9.0), keyword_hit("a1", 3.0), keyword_hit("a2", 1.0)],
            vector: vec![vector_hit("b1", 0.99), vector_hit("a1", 0.6), vector_hit("a2", 0.2)],
        });
        let ranker = HybridRanker::new(
            Arc::clone(&canned),
            Arc::clone(&canned),
            store,
            Arc::new(HashEmbedder::default()),
        );

        let query = SearchQuery::new("bond required", 5, 0.5)
            .with_filters(SearchFilters::for_documents(["doc-a"]));
        let results = ranker.hybrid_search(&query).await.expect("search");

        let scores: Vec<(&str, f64, f64)> = results
            .iter()
            .map(|result| (result.chunk_id.as_str(), result.scores.keyword, result.scores.vector))
            .collect();
        assert_eq!(scores, vec![("a1", 1.0, 1.0), ("a2", 0.0, 0.0)]);
        assert_eq!(results[0].scores.hybrid, 1.0);
    }

    #[tokio::test]
    async fn results_are_truncated_and_sorted() {
        let (ranker, _, _) = build(&[
            ("c1", "doc1", 1, "bond bond bond schedule"),
            ("c2", "doc1", 2, "bond schedule"),
            ("c3", "doc1", 3, "insurance certificate"),
            ("c4", "doc1", 4, "alternates and allowances"),
        ])
        .await;

        let results = ranker
            .hybrid_search(&SearchQuery::new("bond", 2, 0.0))
            .await
            .expect("search");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "c1");
        assert!(results[0].scores.hybrid >= results[1].scores.hybrid);
    }

    #[tokio::test]
    async fn orphaned_vectors_are_excluded() {
        let (ranker, _, vectors) = build(&[("c1", "doc1", 1, LIQUIDATED)]).await;
        vectors
            .upsert("ghost", HashEmbedder::default().embed("ghost"))
            .expect("upsert");

        let results = ranker
            .hybrid_search(&SearchQuery::new("calendar day", 5, 0.5))
            .await
            .expect("search");
        assert!(results.iter().all(|result| result.chunk_id != "ghost"));
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn empty_indices_yield_empty_results() {
        let (ranker, _, _) = build(&[]).await;
        let results = ranker
            .hybrid_search(&SearchQuery::new("anything", 3, 0.5))
            .await
            .expect("search");
        assert!(results.is_empty());
    }

    struct CountingKeywordIndex {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeywordIndex for CountingKeywordIndex {
        async fn search_keyword(
            &self,
            _query: &str,
            _top_k: usize,
            _filter: Option<&SearchFilters>,
        ) -> Result<Vec<KeywordHit>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct RejectingEmbedder;

    #[async_trait]
    impl Embedder for RejectingEmbedder {
        fn dimensions(&self) -> usize {
            64
        }

        fn model_name(&self) -> &str {
            "rejecting"
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Permanent("invalid api key".to_string()))
        }
    }

    #[tokio::test]
    async fn invalid_parameters_fail_before_index_access() {
        let keyword = Arc::new(CountingKeywordIndex {
            calls: AtomicUsize::new(0),
        });
        let ranker = HybridRanker::new(
            Arc::clone(&keyword),
            Arc::new(MemoryVectorIndex::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(HashEmbedder::default()),
        );

        for query in [
            SearchQuery::new("bond", 5, 1.2),
            SearchQuery::new("bond", 5, -0.01),
            SearchQuery::new("bond", 0, 0.5),
        ] {
            assert!(matches!(
                ranker.hybrid_search(&query).await,
                Err(SearchError::InputValidation(_))
            ));
        }
        assert_eq!(keyword.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_rejection_fails_the_whole_query() {
        let embedder: Arc<dyn Embedder> = Arc::new(RejectingEmbedder);
        let ranker = HybridRanker::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryVectorIndex::new()),
            Arc::new(MemoryStore::new()),
            embedder,
        );
        let result = ranker
            .hybrid_search(&SearchQuery::new("bond", 5, 0.5))
            .await;
        assert!(matches!(result, Err(SearchError::ProviderPermanent(_))));
    }
}
