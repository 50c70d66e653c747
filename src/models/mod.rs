//! Core data models for the question bank.
//!
//! This module contains the records the recurrence engine reads and writes
//! (questions and subjects), the candidate shape produced by question
//! extraction, and the per-batch ingestion report.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Storage-assigned identifier of a question.
pub type QuestionId = i64;

/// Storage-assigned identifier of a subject.
pub type SubjectId = i64;

/// One distinct exam question, deduplicated at the semantic level.
///
/// Everything except `occurrence_count` is fixed at creation. A recurrence
/// never rewrites `content`; it only bumps the counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    /// Unique identifier (database primary key)
    pub id: QuestionId,

    /// Owning subject; questions are only ever compared within their subject
    pub subject_id: SubjectId,

    /// Normalized question text from the first occurrence
    pub content: String,

    /// Embedding of the content, produced when the question was created
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,

    /// Question number as printed on the first paper it appeared in
    pub question_number: Option<u32>,

    /// Full identifier from the first paper (e.g. "1a")
    pub identifier: Option<String>,

    /// Marks allocated on the first paper
    pub marks: Option<f32>,

    /// How many times this question has been seen (always >= 1)
    pub occurrence_count: u32,
}

/// Insert payload for a question that was classified as new.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQuestion {
    pub subject_id: SubjectId,
    pub content: String,
    pub embedding: Vec<f32>,
    pub question_number: Option<u32>,
    pub identifier: Option<String>,
    pub marks: Option<f32>,
}

impl NewQuestion {
    /// Materialize the stored record once storage has assigned an id.
    pub fn into_question(self, id: QuestionId) -> Question {
        Question {
            id,
            subject_id: self.subject_id,
            content: self.content,
            embedding: self.embedding,
            question_number: self.question_number,
            identifier: self.identifier,
            marks: self.marks,
            occurrence_count: 1,
        }
    }
}

/// Insertion-ordered set of question references.
///
/// The ordered list is what callers see; the hash set answers membership
/// without scanning the list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<QuestionId>", into = "Vec<QuestionId>")]
pub struct QuestionRefs {
    order: Vec<QuestionId>,
    members: HashSet<QuestionId>,
}

impl QuestionRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id` unless it is already present.
    ///
    /// Returns `true` if the reference was added.
    pub fn insert(&mut self, id: QuestionId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push(id);
        true
    }

    pub fn contains(&self, id: QuestionId) -> bool {
        self.members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn as_slice(&self) -> &[QuestionId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = QuestionId> + '_ {
        self.order.iter().copied()
    }
}

impl PartialEq for QuestionRefs {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl From<Vec<QuestionId>> for QuestionRefs {
    fn from(ids: Vec<QuestionId>) -> Self {
        let mut refs = Self::new();
        for id in ids {
            refs.insert(id);
        }
        refs
    }
}

impl From<QuestionRefs> for Vec<QuestionId> {
    fn from(refs: QuestionRefs) -> Self {
        refs.order
    }
}

/// Aggregation boundary for deduplication (e.g. a course).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subject {
    /// Unique identifier (database primary key)
    pub id: SubjectId,

    /// Unique subject name
    pub name: String,

    /// Questions seen for this subject, in the order they were first seen
    pub questions: QuestionRefs,
}

/// A question extracted from an uploaded paper, not yet classified.
///
/// Mirrors the JSON objects produced by the extraction step:
/// `{"number": 1, "identifier": "1a", "content": "...", "marks": 7}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuestionCandidate {
    #[serde(default)]
    pub number: Option<u32>,

    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub marks: Option<f32>,
}

impl QuestionCandidate {
    /// Candidate with content only; handy for tests and ad-hoc ingestion.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Why a single candidate could not be processed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The embedding provider errored or timed out
    EmbeddingUnavailable,

    /// The provider returned a vector of the wrong dimension
    InvalidEmbedding,

    /// The subject corpus could not be read
    CorpusRead,

    /// Creating the question, incrementing its counter or recording the
    /// subject reference failed
    CorpusWrite,

    /// The matched question belongs to a different subject
    SubjectMismatch,
}

/// A candidate that failed; earlier and later candidates are unaffected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateFailure {
    /// Position of the candidate in the input batch
    pub candidate_index: usize,

    /// Identifier of the candidate, when the extractor supplied one
    pub identifier: Option<String>,

    pub kind: FailureKind,

    /// Human-readable cause
    pub message: String,
}

/// A candidate classified as a recurrence of an existing question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurrenceDetail {
    pub candidate_index: usize,
    pub matched_question_id: QuestionId,
    pub similarity: f32,

    /// Occurrence count of the matched question after the increment
    pub occurrence_count: u32,
}

/// Summary of one document's worth of candidates.
///
/// A result with failures means the batch partially succeeded; every
/// candidate that did succeed has been committed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IngestionResult {
    pub subject_id: SubjectId,

    /// Every candidate examined, including skipped and failed ones
    pub total_processed: usize,

    /// Questions created by this batch, in creation order
    pub new_questions: Vec<QuestionId>,

    pub recurrences: Vec<RecurrenceDetail>,

    /// Candidates dropped because their content was empty
    pub skipped_empty: usize,

    pub failures: Vec<CandidateFailure>,
}

impl IngestionResult {
    pub fn new(subject_id: SubjectId) -> Self {
        Self {
            subject_id,
            ..Self::default()
        }
    }

    pub fn record_new(&mut self, question_id: QuestionId) {
        self.total_processed += 1;
        self.new_questions.push(question_id);
    }

    pub fn record_recurrence(&mut self, detail: RecurrenceDetail) {
        self.total_processed += 1;
        self.recurrences.push(detail);
    }

    pub fn record_skipped(&mut self) {
        self.total_processed += 1;
        self.skipped_empty += 1;
    }

    pub fn record_failure(&mut self, failure: CandidateFailure) {
        self.total_processed += 1;
        self.failures.push(failure);
    }

    pub fn new_count(&self) -> usize {
        self.new_questions.len()
    }

    pub fn recurrence_count(&self) -> usize {
        self.recurrences.len()
    }

    /// Candidates classified as either new or recurrent.
    pub fn succeeded(&self) -> usize {
        self.new_count() + self.recurrence_count()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// `true` when at least one candidate failed.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Relevance classification for search results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelevanceLevel {
    /// Extremely high similarity (cosine similarity > 0.95)
    Identical,

    /// Very high similarity (cosine similarity > 0.85)
    HighlySimilar,

    /// Moderate similarity (cosine similarity > 0.70)
    Similar,

    /// Anything lower
    Relevant,
}

impl RelevanceLevel {
    /// Determine relevance level from a cosine similarity score.
    pub fn from_score(score: f32) -> Self {
        if score > 0.95 {
            RelevanceLevel::Identical
        } else if score > 0.85 {
            RelevanceLevel::HighlySimilar
        } else if score > 0.70 {
            RelevanceLevel::Similar
        } else {
            RelevanceLevel::Relevant
        }
    }
}

/// A single search hit within a subject's question bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub question: Question,

    /// Cosine similarity score, higher is better
    pub score: f32,

    pub relevance: RelevanceLevel,
}

impl SearchResult {
    pub fn new(question: Question, score: f32) -> Self {
        Self {
            question,
            score,
            relevance: RelevanceLevel::from_score(score),
        }
    }
}

/// Configuration for the embedding model.
///
/// Stored alongside the corpus so every embedding in it comes from the same
/// model and has the same dimension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingConfig {
    /// Name/identifier of the embedding model (e.g. "text-embedding-004")
    pub model_name: String,

    /// Dimension of the embedding vectors
    pub dimension: usize,
}
