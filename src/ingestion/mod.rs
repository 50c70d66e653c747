//! Ingestion module.
//!
//! Drives one paper's extracted questions through embedding, recurrence
//! resolution and the subject index, producing an [`IngestionResult`].
//!
//! # Usage Patterns
//!
//! ## Primary: Adding Papers to an Existing Question Bank
//! Connect to a database that already has questions and an embedding
//! configuration:
//!
//! ```ignore
//! use question_bank::config::RecurrenceConfig;
//! use question_bank::embedding::gemini::GeminiEmbedding;
//! use question_bank::ingestion::QuestionCorpusIngestor;
//! use question_bank::provider::json::JsonFileCandidateProvider;
//! use question_bank::storage::sqlite::SqliteStorage;
//!
//! let storage = Arc::new(SqliteStorage::open("questions.db")?);
//! let embedding = GeminiEmbedding::new(api_key, None);
//! let ingestor = QuestionCorpusIngestor::connect(embedding, storage, RecurrenceConfig::default()).await?;
//!
//! let candidates = JsonFileCandidateProvider::from_file("paper.json").await?;
//! let result = ingestor.ingest_from_provider(&candidates, subject_id).await?;
//! println!("New: {}, Recurrent: {}", result.new_count(), result.recurrence_count());
//! ```
//!
//! The ingestor:
//! - Validates that the provider matches the stored embedding configuration
//! - Processes candidates one at a time, in input order, so a later candidate
//!   sees the questions and counts written by earlier ones
//! - Records per-candidate failures in the result instead of aborting
//! - Serializes batches for the same subject
//!
//! ## Secondary: Creating a New Question Bank
//!
//! ```ignore
//! let storage = Arc::new(SqliteStorage::open("new.db")?);
//! let ingestor = QuestionCorpusIngestor::initialize_new(embedding, storage, RecurrenceConfig::default()).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, RecurrenceConfig};
use crate::embedding::{collapse_whitespace, normalize_text, EmbeddingProvider};
use crate::index::{IndexError, SubjectQuestionIndex};
use crate::models::{
    CandidateFailure, EmbeddingConfig, FailureKind, IngestionResult, NewQuestion,
    QuestionCandidate, QuestionId, RecurrenceDetail, SubjectId,
};
use crate::provider::{CandidateProvider, ProviderError};
use crate::recurrence::{LinearScanResolver, RecurrenceError, RecurrenceResolver, Resolution};
use crate::storage::{QuestionStore, StorageError};

/// Errors that prevent a batch from starting.
///
/// Failures of individual candidates are reported inside [`IngestionResult`].
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Provider operation failed
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Invalid recurrence configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No subject with the given name
    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Per-subject mutual exclusion.
///
/// Batches for the same subject run one after another; batches for different
/// subjects do not contend.
#[derive(Debug, Default)]
pub struct SubjectLocks {
    locks: Mutex<HashMap<SubjectId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SubjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, subject_id: SubjectId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(subject_id).or_default())
    }

    /// Wait until no other batch holds `subject_id`.
    pub async fn acquire(&self, subject_id: SubjectId) -> OwnedMutexGuard<()> {
        self.entry(subject_id).lock_owned().await
    }

    /// Take the lock only if it is free.
    pub fn try_acquire(&self, subject_id: SubjectId) -> Option<OwnedMutexGuard<()>> {
        self.entry(subject_id).try_lock_owned().ok()
    }
}

/// Outcome of a single candidate, before it is folded into the result.
enum Outcome {
    New(QuestionId),
    Recurrence(RecurrenceDetail),
    Skipped,
}

/// Ingests extracted questions into a subject's question bank.
///
/// Holds the injected embedding client, the shared store and the resolver.
/// `ingest` takes `&self`, so one ingestor can be shared between tasks
/// through an `Arc`.
pub struct QuestionCorpusIngestor<E, S, R = LinearScanResolver<S>>
where
    E: EmbeddingProvider,
    S: QuestionStore,
    R: RecurrenceResolver,
{
    embedding_provider: E,
    storage: Arc<S>,
    resolver: R,
    index: SubjectQuestionIndex<S>,
    locks: SubjectLocks,
}

impl<E, S> QuestionCorpusIngestor<E, S>
where
    E: EmbeddingProvider,
    S: QuestionStore,
{
    fn extract_config(provider: &E) -> EmbeddingConfig {
        EmbeddingConfig {
            model_name: provider.model_name().to_string(),
            dimension: provider.dimension(),
        }
    }

    fn build(
        embedding_provider: E,
        storage: Arc<S>,
        config: RecurrenceConfig,
    ) -> Result<Self, IngestionError> {
        Ok(Self {
            embedding_provider,
            resolver: LinearScanResolver::new(Arc::clone(&storage), config)?,
            index: SubjectQuestionIndex::new(Arc::clone(&storage)),
            storage,
            locks: SubjectLocks::new(),
        })
    }

    /// Connect to an existing question bank.
    ///
    /// **This is the primary constructor.** The provider must produce the
    /// same model and dimension as the embeddings already stored.
    ///
    /// # Errors
    /// Returns `IngestionError::InvalidInput` if:
    /// - The storage has no embedding configuration
    /// - The provider's configuration doesn't match the stored configuration
    ///
    /// Returns `IngestionError::Config` for an out-of-range threshold
    pub async fn connect(
        embedding_provider: E,
        storage: Arc<S>,
        config: RecurrenceConfig,
    ) -> Result<Self, IngestionError> {
        config.validate()?;

        let stored_config = storage.get_config().await?.ok_or_else(|| {
            IngestionError::InvalidInput(
                "Storage has no embedding configuration. Use initialize_new() for new storage."
                    .to_string(),
            )
        })?;

        let provider_config = Self::extract_config(&embedding_provider);

        if provider_config.model_name != stored_config.model_name {
            return Err(IngestionError::InvalidInput(format!(
                "Embedding model mismatch: provider uses '{}' but storage has '{}'",
                provider_config.model_name, stored_config.model_name
            )));
        }

        if provider_config.dimension != stored_config.dimension {
            return Err(IngestionError::InvalidInput(format!(
                "Embedding dimension mismatch: provider has {} but storage has {}",
                provider_config.dimension, stored_config.dimension
            )));
        }

        Self::build(embedding_provider, storage, config)
    }

    /// Initialize a new question bank with the provider's embedding config.
    ///
    /// **Use this only when setting up a new database.**
    pub async fn initialize_new(
        embedding_provider: E,
        storage: Arc<S>,
        config: RecurrenceConfig,
    ) -> Result<Self, IngestionError> {
        config.validate()?;

        storage.initialize().await?;
        storage
            .store_config(&Self::extract_config(&embedding_provider))
            .await?;

        Self::build(embedding_provider, storage, config)
    }
}

impl<E, S, R> QuestionCorpusIngestor<E, S, R>
where
    E: EmbeddingProvider,
    S: QuestionStore,
    R: RecurrenceResolver,
{
    /// Replace the recurrence resolver, e.g. with an index-backed one.
    pub fn with_resolver<R2: RecurrenceResolver>(
        self,
        resolver: R2,
    ) -> QuestionCorpusIngestor<E, S, R2> {
        QuestionCorpusIngestor {
            embedding_provider: self.embedding_provider,
            storage: self.storage,
            resolver,
            index: self.index,
            locks: self.locks,
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Ingest one paper's candidates into `subject_id`.
    ///
    /// Candidates are handled strictly in order. A failing candidate is
    /// recorded in the result and the batch continues; nothing already
    /// committed is rolled back.
    pub async fn ingest(
        &self,
        candidates: &[QuestionCandidate],
        subject_id: SubjectId,
    ) -> IngestionResult {
        let _guard = self.locks.acquire(subject_id).await;
        info!(subject_id, candidates = candidates.len(), "Starting ingestion");

        let mut result = IngestionResult::new(subject_id);

        for (candidate_index, candidate) in candidates.iter().enumerate() {
            match self.ingest_candidate(candidate_index, candidate, subject_id).await {
                Ok(Outcome::New(question_id)) => result.record_new(question_id),
                Ok(Outcome::Recurrence(detail)) => result.record_recurrence(detail),
                Ok(Outcome::Skipped) => {
                    debug!(candidate_index, "Skipping candidate with empty content");
                    result.record_skipped();
                }
                Err(failure) => {
                    warn!(
                        candidate_index,
                        kind = ?failure.kind,
                        "Failed to ingest candidate: {}",
                        failure.message
                    );
                    result.record_failure(failure);
                }
            }
        }

        info!(
            subject_id,
            processed = result.total_processed,
            new = result.new_count(),
            recurrent = result.recurrence_count(),
            skipped = result.skipped_empty,
            failed = result.failed(),
            "Ingestion finished"
        );

        result
    }

    /// Ingest into the subject called `subject_name`.
    ///
    /// # Errors
    /// Returns `IngestionError::SubjectNotFound` if no such subject exists
    pub async fn ingest_into(
        &self,
        candidates: &[QuestionCandidate],
        subject_name: &str,
    ) -> Result<IngestionResult, IngestionError> {
        let subject = self
            .storage
            .find_subject_by_name(subject_name)
            .await?
            .ok_or_else(|| IngestionError::SubjectNotFound(subject_name.to_string()))?;

        Ok(self.ingest(candidates, subject.id).await)
    }

    /// Fetch candidates from `provider` and ingest them.
    ///
    /// # Errors
    /// Returns `IngestionError::Provider` if the candidates cannot be fetched
    pub async fn ingest_from_provider<P>(
        &self,
        provider: &P,
        subject_id: SubjectId,
    ) -> Result<IngestionResult, IngestionError>
    where
        P: CandidateProvider + ?Sized,
    {
        let candidates = provider.fetch_candidates().await?;
        debug!(
            provider = provider.name(),
            count = candidates.len(),
            "Fetched candidates"
        );
        Ok(self.ingest(&candidates, subject_id).await)
    }

    async fn ingest_candidate(
        &self,
        candidate_index: usize,
        candidate: &QuestionCandidate,
        subject_id: SubjectId,
    ) -> Result<Outcome, CandidateFailure> {
        let content = collapse_whitespace(&candidate.content);
        if content.is_empty() {
            return Ok(Outcome::Skipped);
        }

        let fail = |kind: FailureKind, message: String| CandidateFailure {
            candidate_index,
            identifier: candidate.identifier.clone(),
            kind,
            message,
        };

        let embedding = self
            .embedding_provider
            .embed(&normalize_text(&content))
            .await
            .map_err(|e| fail(FailureKind::EmbeddingUnavailable, e.to_string()))?;

        let expected = self.embedding_provider.dimension();
        if embedding.len() != expected {
            return Err(fail(
                FailureKind::InvalidEmbedding,
                format!(
                    "Provider returned {} dimensions, expected {}",
                    embedding.len(),
                    expected
                ),
            ));
        }

        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(fail(
                FailureKind::InvalidEmbedding,
                "Provider returned a vector with non-finite components".to_string(),
            ));
        }

        let resolution = self
            .resolver
            .resolve(&embedding, subject_id)
            .await
            .map_err(|e| match e {
                RecurrenceError::CorpusRead(_) => fail(FailureKind::CorpusRead, e.to_string()),
                RecurrenceError::CorpusWrite { .. } => {
                    fail(FailureKind::CorpusWrite, e.to_string())
                }
            })?;

        match resolution {
            Resolution::New { best_similarity } => {
                let question_id = self
                    .storage
                    .create_question(&NewQuestion {
                        subject_id,
                        content,
                        embedding,
                        question_number: candidate.number,
                        identifier: candidate.identifier.clone(),
                        marks: candidate.marks,
                    })
                    .await
                    .map_err(|e| fail(FailureKind::CorpusWrite, e.to_string()))?;

                self.add_reference(subject_id, question_id)
                    .await
                    .map_err(|(kind, message)| fail(kind, message))?;

                debug!(
                    candidate_index,
                    question_id,
                    best_similarity = ?best_similarity,
                    "Created new question"
                );
                Ok(Outcome::New(question_id))
            }
            Resolution::Recurrence {
                matched_question_id,
                similarity,
                occurrence_count,
            } => {
                self.add_reference(subject_id, matched_question_id)
                    .await
                    .map_err(|(kind, message)| fail(kind, message))?;

                Ok(Outcome::Recurrence(RecurrenceDetail {
                    candidate_index,
                    matched_question_id,
                    similarity,
                    occurrence_count,
                }))
            }
        }
    }

    async fn add_reference(
        &self,
        subject_id: SubjectId,
        question_id: QuestionId,
    ) -> Result<bool, (FailureKind, String)> {
        self.index
            .add_reference(subject_id, question_id)
            .await
            .map_err(|e| match e {
                IndexError::SubjectMismatch { .. } => (FailureKind::SubjectMismatch, e.to_string()),
                IndexError::Storage(_) => (FailureKind::CorpusWrite, e.to_string()),
            })
    }
}
