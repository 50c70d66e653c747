//! Per-subject question reference list.
//!
//! Each subject owns an insertion-ordered, duplicate-free list of the
//! questions seen in its papers. Adding a reference that is already present
//! is a no-op, so a question matched twice in one paper is listed once.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::models::{QuestionId, SubjectId};
use crate::storage::{QuestionStore, StorageError};

#[derive(Debug, Error)]
pub enum IndexError {
    /// The question is owned by another subject
    #[error("Question {question_id} belongs to subject {owner}, not {subject_id}")]
    SubjectMismatch {
        subject_id: SubjectId,
        question_id: QuestionId,
        owner: SubjectId,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Maintains subject reference lists on top of a [`QuestionStore`].
pub struct SubjectQuestionIndex<S: QuestionStore> {
    storage: Arc<S>,
}

impl<S: QuestionStore> Clone for SubjectQuestionIndex<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: QuestionStore> SubjectQuestionIndex<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Append `question_id` to the subject's list unless it is already there.
    ///
    /// # Returns
    /// `true` if the reference was appended, `false` if it was already present
    ///
    /// # Errors
    /// Returns `IndexError::SubjectMismatch` if the question belongs to a
    /// different subject
    pub async fn add_reference(
        &self,
        subject_id: SubjectId,
        question_id: QuestionId,
    ) -> IndexResult<bool> {
        let subject = self.storage.get_subject(subject_id).await?;
        if subject.questions.contains(question_id) {
            debug!(subject_id, question_id, "Reference already present");
            return Ok(false);
        }

        let question = self.storage.get_question(question_id).await?;
        if question.subject_id != subject_id {
            return Err(IndexError::SubjectMismatch {
                subject_id,
                question_id,
                owner: question.subject_id,
            });
        }

        self.storage
            .add_subject_reference(subject_id, question_id)
            .await?;
        debug!(subject_id, question_id, "Reference appended");
        Ok(true)
    }

    /// The subject's question references in first-seen order.
    pub async fn references(&self, subject_id: SubjectId) -> IndexResult<Vec<QuestionId>> {
        let subject = self.storage.get_subject(subject_id).await?;
        Ok(subject.questions.into())
    }
}
