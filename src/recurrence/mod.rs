//! Recurrence detection.
//!
//! A [`RecurrenceResolver`] decides whether a candidate embedding is a new
//! question for its subject or a recurrence of one already in the corpus.
//! Detection and counting are one step: on a recurrence the matched question's
//! occurrence count is incremented before `resolve` returns.
//!
//! [`LinearScanResolver`] compares against every question in the subject. An
//! index-backed resolver can replace it without touching the ingestion code.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigResult, RecurrenceConfig};
use crate::models::{Question, QuestionId, SubjectId};
use crate::similarity::cosine_similarity;
use crate::storage::{QuestionStore, StorageError};

/// Errors that can occur while resolving a candidate.
#[derive(Debug, Error)]
pub enum RecurrenceError {
    /// The subject corpus could not be read
    #[error("Failed to read subject corpus: {0}")]
    CorpusRead(#[source] StorageError),

    /// The occurrence counter of the matched question could not be updated
    #[error("Failed to record occurrence of question {question_id}: {source}")]
    CorpusWrite {
        question_id: QuestionId,
        #[source]
        source: StorageError,
    },
}

/// Result type for recurrence resolution.
pub type RecurrenceResult<T> = Result<T, RecurrenceError>;

/// Outcome of resolving one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No existing question was similar enough.
    New {
        /// Highest positive similarity seen, `None` if there was none
        best_similarity: Option<f32>,
    },

    /// The candidate repeats an existing question.
    Recurrence {
        matched_question_id: QuestionId,
        similarity: f32,
        /// Occurrence count after this recurrence was recorded
        occurrence_count: u32,
    },
}

impl Resolution {
    pub fn is_new(&self) -> bool {
        matches!(self, Resolution::New { .. })
    }
}

/// Classifies candidates against a subject's corpus.
#[async_trait]
pub trait RecurrenceResolver: Send + Sync {
    /// Classify `embedding` within `subject_id`, incrementing the matched
    /// question's occurrence count on a recurrence.
    async fn resolve(&self, embedding: &[f32], subject_id: SubjectId)
        -> RecurrenceResult<Resolution>;
}

/// Find the most similar question, first one winning ties.
///
/// Only positive similarities qualify, so a candidate orthogonal to (or
/// opposite of) every question has no best match. Questions whose embedding
/// length differs from the candidate's are skipped.
pub fn best_match<'a>(
    embedding: &[f32],
    questions: &'a [Question],
) -> Option<(&'a Question, f32)> {
    let mut best: Option<(&Question, f32)> = None;
    let mut best_similarity = 0.0f32;

    for question in questions {
        let similarity = match cosine_similarity(embedding, &question.embedding) {
            Ok(similarity) => similarity,
            Err(e) => {
                warn!(question_id = question.id, "Skipping comparison: {}", e);
                continue;
            }
        };

        if similarity > best_similarity {
            best_similarity = similarity;
            best = Some((question, similarity));
        }
    }

    best
}

/// Brute-force resolver: scans every question of the subject.
pub struct LinearScanResolver<S: QuestionStore> {
    storage: Arc<S>,
    threshold: f32,
}

impl<S: QuestionStore> LinearScanResolver<S> {
    /// # Errors
    /// Returns `ConfigError::InvalidThreshold` if the threshold is NaN or
    /// outside `[0, 1]`
    pub fn new(storage: Arc<S>, config: RecurrenceConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            threshold: config.similarity_threshold,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

#[async_trait]
impl<S: QuestionStore> RecurrenceResolver for LinearScanResolver<S> {
    async fn resolve(
        &self,
        embedding: &[f32],
        subject_id: SubjectId,
    ) -> RecurrenceResult<Resolution> {
        let corpus = self
            .storage
            .list_questions(subject_id)
            .await
            .map_err(RecurrenceError::CorpusRead)?;

        if corpus.is_empty() {
            debug!(subject_id, "Empty corpus, candidate is new");
            return Ok(Resolution::New {
                best_similarity: None,
            });
        }

        let (question_id, similarity) = match best_match(embedding, &corpus) {
            Some((question, similarity)) => (question.id, similarity),
            None => {
                return Ok(Resolution::New {
                    best_similarity: None,
                })
            }
        };

        if similarity >= self.threshold {
            let occurrence_count = self
                .storage
                .increment_occurrence(question_id)
                .await
                .map_err(|source| RecurrenceError::CorpusWrite {
                    question_id,
                    source,
                })?;

            info!(
                subject_id,
                question_id,
                occurrence_count,
                "Found similar question with {:.2} similarity",
                similarity
            );

            return Ok(Resolution::Recurrence {
                matched_question_id: question_id,
                similarity,
                occurrence_count,
            });
        }

        debug!(
            subject_id,
            best_similarity = similarity,
            compared = corpus.len(),
            "No recurrence found"
        );
        Ok(Resolution::New {
            best_similarity: Some(similarity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::models::NewQuestion;
    use crate::storage::memory::MemoryStorage;

    async fn seed(storage: &MemoryStorage, subject_id: SubjectId, embedding: Vec<f32>) -> QuestionId {
        storage
            .create_question(&NewQuestion {
                subject_id,
                content: format!("question {:?}", embedding),
                embedding,
                question_number: None,
                identifier: None,
                marks: None,
            })
            .await
            .unwrap()
    }

    async fn setup() -> (Arc<MemoryStorage>, SubjectId) {
        let storage = Arc::new(MemoryStorage::new());
        let subject = storage.create_subject("Physics").await.unwrap();
        (storage, subject.id)
    }

    fn resolver(storage: &Arc<MemoryStorage>) -> LinearScanResolver<MemoryStorage> {
        LinearScanResolver::new(storage.clone(), RecurrenceConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_corpus_is_new() {
        let (storage, subject_id) = setup().await;
        let resolution = resolver(&storage).resolve(&[1.0, 0.0], subject_id).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::New {
                best_similarity: None
            }
        );
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let (storage, subject_id) = setup().await;
        let existing = seed(&storage, subject_id, vec![4.0, 3.0]).await;

        // cos((1, 0), (4, 3)) == 0.8 exactly
        let resolution = resolver(&storage).resolve(&[1.0, 0.0], subject_id).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Recurrence {
                matched_question_id: existing,
                similarity: 0.8,
                occurrence_count: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_below_threshold_is_new_and_untouched() {
        let (storage, subject_id) = setup().await;
        let existing = seed(&storage, subject_id, vec![0.0, 1.0]).await;

        let resolution = resolver(&storage).resolve(&[1.0, 0.2], subject_id).await.unwrap();
        assert!(resolution.is_new());
        assert_eq!(storage.get_question(existing).await.unwrap().occurrence_count, 1);
    }

    #[tokio::test]
    async fn test_picks_highest_similarity() {
        let (storage, subject_id) = setup().await;
        seed(&storage, subject_id, vec![0.9, 0.44]).await;
        let closest = seed(&storage, subject_id, vec![1.0, 0.05]).await;
        seed(&storage, subject_id, vec![0.0, 1.0]).await;

        match resolver(&storage).resolve(&[1.0, 0.0], subject_id).await.unwrap() {
            Resolution::Recurrence {
                matched_question_id,
                ..
            } => assert_eq!(matched_question_id, closest),
            other => panic!("Expected recurrence, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ties_go_to_first_question() {
        let (storage, subject_id) = setup().await;
        let first = seed(&storage, subject_id, vec![2.0, 0.0]).await;
        let second = seed(&storage, subject_id, vec![3.0, 0.0]).await;

        match resolver(&storage).resolve(&[1.0, 0.0], subject_id).await.unwrap() {
            Resolution::Recurrence {
                matched_question_id,
                ..
            } => assert_eq!(matched_question_id, first),
            other => panic!("Expected recurrence, got {:?}", other),
        }
        assert_eq!(storage.get_question(second).await.unwrap().occurrence_count, 1);
    }

    #[tokio::test]
    async fn test_scope_is_per_subject() {
        let (storage, physics) = setup().await;
        let chemistry = storage.create_subject("Chemistry").await.unwrap().id;
        seed(&storage, chemistry, vec![1.0, 0.0]).await;

        let resolution = resolver(&storage).resolve(&[1.0, 0.0], physics).await.unwrap();
        assert!(resolution.is_new());
    }

    #[tokio::test]
    async fn test_mismatched_dimensions_are_skipped() {
        let (storage, subject_id) = setup().await;
        seed(&storage, subject_id, vec![1.0, 0.0, 0.0]).await;
        let valid = seed(&storage, subject_id, vec![1.0, 0.1]).await;

        match resolver(&storage).resolve(&[1.0, 0.0], subject_id).await.unwrap() {
            Resolution::Recurrence {
                matched_question_id,
                ..
            } => assert_eq!(matched_question_id, valid),
            other => panic!("Expected recurrence, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_only_mismatched_dimensions_is_new() {
        let (storage, subject_id) = setup().await;
        seed(&storage, subject_id, vec![1.0, 0.0, 0.0]).await;

        let resolution = resolver(&storage).resolve(&[1.0, 0.0], subject_id).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::New {
                best_similarity: None
            }
        );
    }

    #[tokio::test]
    async fn test_custom_threshold() {
        let (storage, subject_id) = setup().await;
        seed(&storage, subject_id, vec![4.0, 3.0]).await;

        let strict = LinearScanResolver::new(storage.clone(), RecurrenceConfig::new(0.9).unwrap()).unwrap();
        assert_eq!(strict.threshold(), 0.9);
        assert!(strict.resolve(&[1.0, 0.0], subject_id).await.unwrap().is_new());
    }

    #[tokio::test]
    async fn test_counts_accumulate() {
        let (storage, subject_id) = setup().await;
        let existing = seed(&storage, subject_id, vec![1.0, 1.0]).await;
        let resolver = resolver(&storage);

        for expected in 2..=4 {
            match resolver.resolve(&[2.0, 2.0], subject_id).await.unwrap() {
                Resolution::Recurrence {
                    occurrence_count, ..
                } => assert_eq!(occurrence_count, expected),
                other => panic!("Expected recurrence, got {:?}", other),
            }
        }
        assert_eq!(storage.get_question(existing).await.unwrap().occurrence_count, 4);
    }

    #[tokio::test]
    async fn test_invalid_threshold_is_rejected() {
        let (storage, _) = setup().await;
        for threshold in [f32::NAN, -0.1, 1.5] {
            let config = RecurrenceConfig {
                similarity_threshold: threshold,
            };
            assert!(matches!(
                LinearScanResolver::new(storage.clone(), config),
                Err(ConfigError::InvalidThreshold(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_nan_candidate_is_never_a_recurrence() {
        let (storage, subject_id) = setup().await;
        let existing = seed(&storage, subject_id, vec![1.0, 0.0]).await;

        let resolution = resolver(&storage)
            .resolve(&[f32::NAN, 0.0], subject_id)
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::New {
                best_similarity: None
            }
        );
        assert_eq!(storage.get_question(existing).await.unwrap().occurrence_count, 1);
    }

    #[tokio::test]
    async fn test_huge_finite_candidate_still_matches() {
        let (storage, subject_id) = setup().await;
        let existing = seed(&storage, subject_id, vec![1.0, 1.0]).await;

        match resolver(&storage).resolve(&[1e20, 1e20], subject_id).await.unwrap() {
            Resolution::Recurrence {
                matched_question_id,
                occurrence_count,
                ..
            } => {
                assert_eq!(matched_question_id, existing);
                assert_eq!(occurrence_count, 2);
            }
            other => panic!("Expected recurrence, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_vector_is_new_even_at_zero_threshold() {
        let (storage, subject_id) = setup().await;
        let existing = seed(&storage, subject_id, vec![1.0, 0.0]).await;

        let permissive =
            LinearScanResolver::new(storage.clone(), RecurrenceConfig::new(0.0).unwrap()).unwrap();
        let resolution = permissive.resolve(&[0.0, 0.0], subject_id).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::New {
                best_similarity: None
            }
        );
        assert_eq!(storage.get_question(existing).await.unwrap().occurrence_count, 1);
    }
}
