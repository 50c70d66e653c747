//! In-memory storage implementation.
//!
//! Keeps the whole corpus behind a single mutex. Useful for tests, one-shot
//! CLI runs and as the reference behavior for other backends.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{QuestionStore, StorageError, StorageResult};
use crate::models::{
    EmbeddingConfig, NewQuestion, Question, QuestionId, QuestionRefs, Subject, SubjectId,
};

#[derive(Debug, Default)]
struct MemoryState {
    config: Option<EmbeddingConfig>,
    subjects: BTreeMap<SubjectId, Subject>,
    questions: BTreeMap<QuestionId, Question>,
    next_subject_id: SubjectId,
    next_question_id: QuestionId,
}

/// Corpus held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StorageError::Other("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl QuestionStore for MemoryStorage {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn store_config(&self, config: &EmbeddingConfig) -> StorageResult<()> {
        self.lock()?.config = Some(config.clone());
        Ok(())
    }

    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        Ok(self.lock()?.config.clone())
    }

    async fn create_subject(&self, name: &str) -> StorageResult<Subject> {
        let mut state = self.lock()?;
        let name = name.trim();
        if state.subjects.values().any(|s| s.name == name) {
            return Err(StorageError::DuplicateEntry(format!("subject '{}'", name)));
        }

        state.next_subject_id += 1;
        let subject = Subject {
            id: state.next_subject_id,
            name: name.to_string(),
            questions: QuestionRefs::new(),
        };
        state.subjects.insert(subject.id, subject.clone());
        Ok(subject)
    }

    async fn get_subject(&self, id: SubjectId) -> StorageResult<Subject> {
        self.lock()?
            .subjects
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("Subject {} not found", id)))
    }

    async fn find_subject_by_name(&self, name: &str) -> StorageResult<Option<Subject>> {
        let name = name.trim();
        Ok(self
            .lock()?
            .subjects
            .values()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn list_subjects(&self) -> StorageResult<Vec<Subject>> {
        Ok(self.lock()?.subjects.values().cloned().collect())
    }

    async fn list_questions(&self, subject_id: SubjectId) -> StorageResult<Vec<Question>> {
        Ok(self
            .lock()?
            .questions
            .values()
            .filter(|q| q.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn get_question(&self, id: QuestionId) -> StorageResult<Question> {
        self.lock()?
            .questions
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("Question {} not found", id)))
    }

    async fn create_question(&self, question: &NewQuestion) -> StorageResult<QuestionId> {
        let mut state = self.lock()?;
        if !state.subjects.contains_key(&question.subject_id) {
            return Err(StorageError::NotFound(format!(
                "Subject {} not found",
                question.subject_id
            )));
        }

        state.next_question_id += 1;
        let id = state.next_question_id;
        state.questions.insert(id, question.clone().into_question(id));
        Ok(id)
    }

    async fn increment_occurrence(&self, id: QuestionId) -> StorageResult<u32> {
        let mut state = self.lock()?;
        let question = state
            .questions
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("Question {} not found", id)))?;
        question.occurrence_count = question.occurrence_count.saturating_add(1);
        Ok(question.occurrence_count)
    }

    async fn add_subject_reference(
        &self,
        subject_id: SubjectId,
        question_id: QuestionId,
    ) -> StorageResult<()> {
        let mut state = self.lock()?;
        let owner = state
            .questions
            .get(&question_id)
            .map(|q| q.subject_id)
            .ok_or_else(|| StorageError::NotFound(format!("Question {} not found", question_id)))?;
        if owner != subject_id {
            return Err(StorageError::ConstraintViolation(format!(
                "Question {} belongs to subject {}, not {}",
                question_id, owner, subject_id
            )));
        }

        let subject = state
            .subjects
            .get_mut(&subject_id)
            .ok_or_else(|| StorageError::NotFound(format!("Subject {} not found", subject_id)))?;
        subject.questions.insert(question_id);
        Ok(())
    }

    async fn count_questions(&self) -> StorageResult<usize> {
        Ok(self.lock()?.questions.len())
    }
}
