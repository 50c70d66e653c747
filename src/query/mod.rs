//! Search and ranking over a subject's question bank.
//!
//! Two read-only views are provided:
//! - semantic search: the questions of one subject most similar to a free-text query
//! - the leaderboard: a subject's questions ranked by how often they recurred
//!
//! # Usage
//!
//! ```ignore
//! use question_bank::query::{BruteForceSearchEngine, SearchEngine, SearchQuery};
//!
//! let engine = BruteForceSearchEngine::new(embedding_provider, storage.clone());
//! let query = SearchQuery::new("newton's laws".to_string(), subject.id, Some(5));
//! for result in engine.search(&query).await? {
//!     println!("{} - Score: {:.3}", result.question.content, result.score);
//! }
//!
//! for question in leaderboard(&*storage, subject.id, None).await? {
//!     println!("{}x {}", question.occurrence_count, question.content);
//! }
//! ```
//!
//! Text normalization is automatically applied to queries before embedding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::embedding::{normalize_text, EmbeddingError, EmbeddingProvider};
use crate::models::{Question, SearchResult, SubjectId};
use crate::similarity::cosine_similarity;
use crate::storage::{QuestionStore, StorageError};

/// Default number of search hits.
pub const DEFAULT_TOP_K: usize = 10;

/// Default number of leaderboard entries.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 50;

/// Errors that can occur during query processing.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Storage access failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid query parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Search query parameters.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// The search query text (will be normalized and embedded)
    pub query: String,

    /// Subject whose questions are searched
    pub subject_id: SubjectId,

    /// Maximum number of results to return
    pub top_k: usize,
}

impl SearchQuery {
    /// Create a new search query; `top_k` defaults to 10.
    pub fn new(query: String, subject_id: SubjectId, top_k: Option<usize>) -> Self {
        Self {
            query,
            subject_id,
            top_k: top_k.unwrap_or(DEFAULT_TOP_K),
        }
    }
}

/// Trait for search and ranking engines.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Execute a search query and return ranked results.
    ///
    /// # Returns
    /// Search results sorted by relevance (highest score first)
    ///
    /// # Errors
    /// Returns `QueryError` if the search fails
    async fn search(&self, query: &SearchQuery) -> QueryResult<Vec<SearchResult>>;
}

/// Brute-force search engine.
///
/// Retrieves every question of the subject, computes cosine similarity with
/// the query embedding and keeps the top-k.
pub struct BruteForceSearchEngine<E, S>
where
    E: EmbeddingProvider,
    S: QuestionStore,
{
    embedding_provider: E,
    storage: Arc<S>,
}

impl<E, S> BruteForceSearchEngine<E, S>
where
    E: EmbeddingProvider,
    S: QuestionStore,
{
    pub fn new(embedding_provider: E, storage: Arc<S>) -> Self {
        Self {
            embedding_provider,
            storage,
        }
    }
}

#[async_trait]
impl<E, S> SearchEngine for BruteForceSearchEngine<E, S>
where
    E: EmbeddingProvider,
    S: QuestionStore,
{
    async fn search(&self, query: &SearchQuery) -> QueryResult<Vec<SearchResult>> {
        let normalized_query = normalize_text(&query.query);
        if normalized_query.is_empty() {
            return Err(QueryError::InvalidQuery("query text is empty".to_string()));
        }

        let query_embedding = self.embedding_provider.embed(&normalized_query).await?;
        let questions = self.storage.list_questions(query.subject_id).await?;
        let scanned = questions.len();

        let mut results: Vec<SearchResult> = questions
            .into_iter()
            .filter_map(|question| {
                match cosine_similarity(&query_embedding, &question.embedding) {
                    Ok(score) => Some(SearchResult::new(question, score)),
                    Err(e) => {
                        warn!(question_id = question.id, "Skipping question: {}", e);
                        None
                    }
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(query.top_k);

        debug!(
            subject_id = query.subject_id,
            scanned,
            returned = results.len(),
            "Search complete"
        );
        Ok(results)
    }
}

/// A subject's questions ranked by occurrence count, most frequent first.
///
/// Questions with equal counts keep the order in which the subject first saw
/// them. `limit` defaults to 50.
pub async fn leaderboard<S>(
    storage: &S,
    subject_id: SubjectId,
    limit: Option<usize>,
) -> QueryResult<Vec<Question>>
where
    S: QuestionStore + ?Sized,
{
    let subject = storage.get_subject(subject_id).await?;
    let mut by_id: HashMap<_, _> = storage
        .list_questions(subject_id)
        .await?
        .into_iter()
        .map(|q| (q.id, q))
        .collect();

    let mut ranked: Vec<Question> = subject
        .questions
        .iter()
        .filter_map(|id| by_id.remove(&id))
        .collect();

    ranked.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count));
    ranked.truncate(limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT));
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewQuestion, RelevanceLevel};
    use crate::storage::memory::MemoryStorage;
    use std::sync::Mutex;

    // Mock EmbeddingProvider returning a fixed vector per query text
    struct MockEmbeddingProvider {
        vectors: HashMap<String, Vec<f32>>,
        calls: Arc<Mutex<Vec<String>>>,
        should_fail: bool,
    }

    impl MockEmbeddingProvider {
        fn new() -> Self {
            Self {
                vectors: HashMap::new(),
                calls: Arc::new(Mutex::new(Vec::new())),
                should_fail: false,
            }
        }

        fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
            self.vectors.insert(text.to_string(), vector);
            self
        }

        fn with_failure(mut self) -> Self {
            self.should_fail = true;
            self
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.lock().unwrap().push(text.to_string());
            if self.should_fail {
                return Err(EmbeddingError::ApiError("Mock embedding failure".to_string()));
            }
            Ok(self.vectors.get(text).cloned().unwrap_or_else(|| vec![1.0, 0.0]))
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }
    }

    async fn add(
        storage: &MemoryStorage,
        subject_id: SubjectId,
        content: &str,
        embedding: Vec<f32>,
    ) -> i64 {
        let id = storage
            .create_question(&NewQuestion {
                subject_id,
                content: content.to_string(),
                embedding,
                question_number: None,
                identifier: None,
                marks: None,
            })
            .await
            .unwrap();
        storage.add_subject_reference(subject_id, id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_search_ranks_by_score() {
        let storage = Arc::new(MemoryStorage::new());
        let physics = storage.create_subject("Physics").await.unwrap().id;
        let far = add(&storage, physics, "Explain thermodynamics.", vec![0.0, 1.0]).await;
        let near = add(&storage, physics, "State Newton's second law.", vec![1.0, 0.1]).await;
        let mid = add(&storage, physics, "Define momentum.", vec![1.0, 1.0]).await;

        let engine = BruteForceSearchEngine::new(MockEmbeddingProvider::new(), storage.clone());
        let results = engine
            .search(&SearchQuery::new("Newton".to_string(), physics, None))
            .await
            .unwrap();

        let ids: Vec<_> = results.iter().map(|r| r.question.id).collect();
        assert_eq!(ids, vec![near, mid, far]);
        assert_eq!(results[0].relevance, RelevanceLevel::Identical);
        assert_eq!(results[2].relevance, RelevanceLevel::Relevant);
    }

    #[tokio::test]
    async fn test_search_respects_top_k_and_subject() {
        let storage = Arc::new(MemoryStorage::new());
        let physics = storage.create_subject("Physics").await.unwrap().id;
        let chemistry = storage.create_subject("Chemistry").await.unwrap().id;
        add(&storage, physics, "Define force.", vec![1.0, 0.0]).await;
        add(&storage, physics, "Define work.", vec![0.8, 0.2]).await;
        add(&storage, chemistry, "Define molarity.", vec![1.0, 0.0]).await;

        let engine = BruteForceSearchEngine::new(MockEmbeddingProvider::new(), storage.clone());
        let results = engine
            .search(&SearchQuery::new("define".to_string(), physics, Some(1)))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].question.subject_id, physics);
        assert_eq!(results[0].question.content, "Define force.");
    }

    #[tokio::test]
    async fn test_search_normalizes_query() {
        let storage = Arc::new(MemoryStorage::new());
        let physics = storage.create_subject("Physics").await.unwrap().id;
        let provider = MockEmbeddingProvider::new();
        let calls = provider.calls.clone();

        let engine = BruteForceSearchEngine::new(provider, storage);
        engine
            .search(&SearchQuery::new("  Newton's   LAWS ".to_string(), physics, None))
            .await
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["newton's laws".to_string()]);
    }

    #[tokio::test]
    async fn test_search_skips_mismatched_dimensions() {
        let storage = Arc::new(MemoryStorage::new());
        let physics = storage.create_subject("Physics").await.unwrap().id;
        add(&storage, physics, "Legacy question.", vec![1.0, 0.0, 0.0]).await;
        let valid = add(&storage, physics, "Define power.", vec![0.5, 0.5]).await;

        let engine = BruteForceSearchEngine::new(MockEmbeddingProvider::new(), storage.clone());
        let results = engine
            .search(&SearchQuery::new("power".to_string(), physics, None))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].question.id, valid);
    }

    #[tokio::test]
    async fn test_search_errors() {
        let storage = Arc::new(MemoryStorage::new());
        let physics = storage.create_subject("Physics").await.unwrap().id;

        let engine = BruteForceSearchEngine::new(MockEmbeddingProvider::new(), storage.clone());
        let err = engine
            .search(&SearchQuery::new("   ".to_string(), physics, None))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));

        let failing = BruteForceSearchEngine::new(
            MockEmbeddingProvider::new().with_failure(),
            storage.clone(),
        );
        let err = failing
            .search(&SearchQuery::new("force".to_string(), physics, None))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_search_uses_query_vector() {
        let storage = Arc::new(MemoryStorage::new());
        let physics = storage.create_subject("Physics").await.unwrap().id;
        add(&storage, physics, "Define force.", vec![1.0, 0.0]).await;
        let heat = add(&storage, physics, "Define heat.", vec![0.0, 1.0]).await;

        let provider = MockEmbeddingProvider::new().with_vector("heat", vec![0.1, 1.0]);
        let engine = BruteForceSearchEngine::new(provider, storage.clone());
        let results = engine
            .search(&SearchQuery::new("Heat".to_string(), physics, None))
            .await
            .unwrap();

        assert_eq!(results[0].question.id, heat);
    }

    #[tokio::test]
    async fn test_leaderboard_orders_by_occurrence() {
        let storage = MemoryStorage::new();
        let physics = storage.create_subject("Physics").await.unwrap().id;
        let a = add(&storage, physics, "Define force.", vec![1.0, 0.0]).await;
        let b = add(&storage, physics, "Define work.", vec![0.0, 1.0]).await;
        let c = add(&storage, physics, "Define power.", vec![1.0, 1.0]).await;

        storage.increment_occurrence(c).await.unwrap();
        storage.increment_occurrence(c).await.unwrap();
        storage.increment_occurrence(b).await.unwrap();

        let ranked = leaderboard(&storage, physics, None).await.unwrap();
        let ids: Vec<_> = ranked.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![c, b, a]);
        assert_eq!(ranked[0].occurrence_count, 3);
    }

    #[tokio::test]
    async fn test_leaderboard_ties_keep_reference_order() {
        let storage = MemoryStorage::new();
        let physics = storage.create_subject("Physics").await.unwrap().id;
        let first = add(&storage, physics, "Define force.", vec![1.0, 0.0]).await;
        let second = add(&storage, physics, "Define work.", vec![0.0, 1.0]).await;
        let third = add(&storage, physics, "Define power.", vec![1.0, 1.0]).await;

        let ranked = leaderboard(&storage, physics, Some(2)).await.unwrap();
        let ids: Vec<_> = ranked.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![first, second]);
        assert!(!ids.contains(&third));
    }

    #[tokio::test]
    async fn test_leaderboard_unknown_subject() {
        let storage = MemoryStorage::new();
        let err = leaderboard(&storage, 7, None).await.unwrap_err();
        assert!(matches!(err, QueryError::Storage(StorageError::NotFound(_))));
    }
}
