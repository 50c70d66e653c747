//! Storage layer abstraction and implementations.
//!
//! This module defines the corpus operations the recurrence engine needs:
//! reading a subject's questions, creating questions, incrementing occurrence
//! counters and recording subject references. Two backends are provided: an
//! in-memory store and a SQLite store.
//!
//! All methods take `&self`; implementations use interior mutability so a
//! single store can be shared through an `Arc` by the ingestor, the resolver
//! and the subject index.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{EmbeddingConfig, NewQuestion, Question, QuestionId, Subject, SubjectId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error
    #[error("Query execution failed: {0}")]
    QueryError(String),

    /// Data serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Schema or migration error
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Duplicate entry (e.g., subject name already taken)
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// A write would break a corpus invariant
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Other unexpected errors
    #[error("Unexpected storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for question corpus backends.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Initialize the storage (create tables, indexes, etc.).
    ///
    /// This should be idempotent and safe to call multiple times.
    async fn initialize(&self) -> StorageResult<()>;

    /// Store the embedding configuration shared by every question in the corpus.
    async fn store_config(&self, config: &EmbeddingConfig) -> StorageResult<()>;

    /// Retrieve the embedding configuration, or None if not set.
    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>>;

    /// Create a subject with an empty question list.
    ///
    /// # Errors
    /// Returns `StorageError::DuplicateEntry` if the name is already taken
    async fn create_subject(&self, name: &str) -> StorageResult<Subject>;

    /// Get a subject (with its ordered question references) by id.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if the subject doesn't exist
    async fn get_subject(&self, id: SubjectId) -> StorageResult<Subject>;

    /// Look a subject up by its unique name.
    async fn find_subject_by_name(&self, name: &str) -> StorageResult<Option<Subject>>;

    /// All subjects, ordered by id.
    async fn list_subjects(&self) -> StorageResult<Vec<Subject>>;

    /// Every question belonging to `subject_id`, with embeddings, ordered by id.
    ///
    /// An unknown subject simply has no questions.
    async fn list_questions(&self, subject_id: SubjectId) -> StorageResult<Vec<Question>>;

    /// Get a question by its ID.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if the question doesn't exist
    async fn get_question(&self, id: QuestionId) -> StorageResult<Question>;

    /// Persist a new question with an occurrence count of 1.
    ///
    /// # Returns
    /// The assigned question ID
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if the owning subject doesn't exist
    async fn create_question(&self, question: &NewQuestion) -> StorageResult<QuestionId>;

    /// Atomically add one to a question's occurrence count.
    ///
    /// # Returns
    /// The count after the increment
    async fn increment_occurrence(&self, id: QuestionId) -> StorageResult<u32>;

    /// Append `question_id` to the subject's reference list.
    ///
    /// Idempotent: an existing reference is left where it is.
    ///
    /// # Errors
    /// Returns `StorageError::ConstraintViolation` if the question belongs to
    /// another subject, `StorageError::NotFound` if either record is missing
    async fn add_subject_reference(
        &self,
        subject_id: SubjectId,
        question_id: QuestionId,
    ) -> StorageResult<()>;

    /// Total number of questions across all subjects.
    async fn count_questions(&self) -> StorageResult<usize>;
}

#[async_trait]
impl<T: QuestionStore + ?Sized> QuestionStore for std::sync::Arc<T> {
    async fn initialize(&self) -> StorageResult<()> {
        (**self).initialize().await
    }

    async fn store_config(&self, config: &EmbeddingConfig) -> StorageResult<()> {
        (**self).store_config(config).await
    }

    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        (**self).get_config().await
    }

    async fn create_subject(&self, name: &str) -> StorageResult<Subject> {
        (**self).create_subject(name).await
    }

    async fn get_subject(&self, id: SubjectId) -> StorageResult<Subject> {
        (**self).get_subject(id).await
    }

    async fn find_subject_by_name(&self, name: &str) -> StorageResult<Option<Subject>> {
        (**self).find_subject_by_name(name).await
    }

    async fn list_subjects(&self) -> StorageResult<Vec<Subject>> {
        (**self).list_subjects().await
    }

    async fn list_questions(&self, subject_id: SubjectId) -> StorageResult<Vec<Question>> {
        (**self).list_questions(subject_id).await
    }

    async fn get_question(&self, id: QuestionId) -> StorageResult<Question> {
        (**self).get_question(id).await
    }

    async fn create_question(&self, question: &NewQuestion) -> StorageResult<QuestionId> {
        (**self).create_question(question).await
    }

    async fn increment_occurrence(&self, id: QuestionId) -> StorageResult<u32> {
        (**self).increment_occurrence(id).await
    }

    async fn add_subject_reference(
        &self,
        subject_id: SubjectId,
        question_id: QuestionId,
    ) -> StorageResult<()> {
        (**self).add_subject_reference(subject_id, question_id).await
    }

    async fn count_questions(&self) -> StorageResult<usize> {
        (**self).count_questions().await
    }
}
