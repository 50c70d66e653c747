//! Question Bank - semantic deduplication and recurrence tracking for exam papers.
//!
//! Questions extracted from uploaded papers are embedded, compared against
//! the questions already known for the same subject, and either stored as new
//! questions or counted as recurrences of an existing one.
//!
//! # Architecture
//!
//! - **similarity**: cosine similarity with explicit dimension checks
//! - **models**: core data structures (Question, Subject, IngestionResult, etc.)
//! - **embedding**: text embedding providers and normalization
//! - **storage**: corpus persistence (in-memory and SQLite)
//! - **provider**: sources of extracted question candidates
//! - **recurrence**: new-vs-recurrence classification with occurrence counting
//! - **index**: per-subject, duplicate-free question reference lists
//! - **ingestion**: batch driver tying the above together
//! - **query**: semantic search and occurrence leaderboard
//! - **config**: recurrence threshold and TOML settings
//!
//! # Workflow
//!
//! For each candidate of a paper, in order:
//!
//! 1. Normalize and embed the question text
//! 2. Scan the subject's questions for the most similar one
//! 3. At or above the threshold: increment its occurrence count
//! 4. Otherwise: store a new question with a count of 1
//! 5. Make sure the subject references the question exactly once
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use question_bank::{
//!     config::RecurrenceConfig,
//!     embedding::gemini::GeminiEmbedding,
//!     ingestion::QuestionCorpusIngestor,
//!     models::QuestionCandidate,
//!     storage::sqlite::SqliteStorage,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(SqliteStorage::open("questions.db")?);
//!     let embedding = GeminiEmbedding::new(api_key, None);
//!     let ingestor =
//!         QuestionCorpusIngestor::connect(embedding, storage, RecurrenceConfig::default()).await?;
//!
//!     let candidates = vec![QuestionCandidate::new("State Newton's second law of motion")];
//!     let result = ingestor.ingest_into(&candidates, "Physics").await?;
//!     println!("new: {}, recurrent: {}", result.new_count(), result.recurrence_count());
//!     Ok(())
//! }
//! ```

// Public modules
pub mod config;
pub mod embedding;
pub mod index;
pub mod ingestion;
pub mod models;
pub mod provider;
pub mod query;
pub mod recurrence;
pub mod similarity;
pub mod storage;

// Re-export commonly used types at the crate root
pub use config::{RecurrenceConfig, Settings};
pub use embedding::EmbeddingProvider;
pub use index::SubjectQuestionIndex;
pub use ingestion::QuestionCorpusIngestor;
pub use models::{
    EmbeddingConfig, IngestionResult, Question, QuestionCandidate, RelevanceLevel, SearchResult,
    Subject,
};
pub use query::{SearchEngine, SearchQuery};
pub use recurrence::{LinearScanResolver, RecurrenceResolver, Resolution};
pub use similarity::cosine_similarity;
pub use storage::QuestionStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model name
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

/// Default embedding dimension for text-embedding-004
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
