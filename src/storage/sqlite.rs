//! SQLite storage implementation.
//!
//! This module provides a SQLite-based implementation of the `QuestionStore` trait.
//! It uses rusqlite for database access and stores embeddings as BLOBs.
//!
//! # Schema
//! - `config`: embedding configuration (key/value, JSON value)
//! - `subjects`: subject names
//! - `questions`: question content, provenance, embedding and occurrence count
//! - `subject_questions`: ordered subject → question references

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{QuestionStore, StorageError, StorageResult};
use crate::models::{
    EmbeddingConfig, NewQuestion, Question, QuestionId, QuestionRefs, Subject, SubjectId,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS config (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subjects (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS questions (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id       INTEGER NOT NULL REFERENCES subjects(id),
    content          TEXT NOT NULL,
    embedding        BLOB NOT NULL,
    question_number  INTEGER,
    identifier       TEXT,
    marks            REAL,
    occurrence_count INTEGER NOT NULL DEFAULT 1 CHECK (occurrence_count >= 1)
);

CREATE INDEX IF NOT EXISTS idx_questions_subject ON questions(subject_id);

CREATE TABLE IF NOT EXISTS subject_questions (
    subject_id  INTEGER NOT NULL REFERENCES subjects(id),
    question_id INTEGER NOT NULL REFERENCES questions(id),
    position    INTEGER NOT NULL,
    PRIMARY KEY (subject_id, question_id)
);
"#;

const EMBEDDING_CONFIG_KEY: &str = "embedding_config";

/// SQLite-based question storage.
///
/// The connection sits behind a mutex; every operation is a short
/// synchronous statement, so the lock is never held across an await.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) a database file.
    ///
    /// Call [`QuestionStore::initialize`] before first use to create the schema.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::ConnectionError("connection lock poisoned".to_string()))
    }

    /// Serialize an embedding vector as little-endian f32 bytes.
    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Deserialize an embedding vector from BLOB bytes.
    ///
    /// # Errors
    /// Returns `StorageError::SerializationError` if the byte length is not a
    /// multiple of four
    fn deserialize_embedding(bytes: &[u8]) -> StorageResult<Vec<f32>> {
        if bytes.len() % 4 != 0 {
            return Err(StorageError::SerializationError(format!(
                "embedding blob length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn question_from_row(row: &Row<'_>) -> rusqlite::Result<(Question, Vec<u8>)> {
        let question = Question {
            id: row.get("id")?,
            subject_id: row.get("subject_id")?,
            content: row.get("content")?,
            embedding: Vec::new(),
            question_number: row.get("question_number")?,
            identifier: row.get("identifier")?,
            marks: row.get::<_, Option<f64>>("marks")?.map(|m| m as f32),
            occurrence_count: row.get("occurrence_count")?,
        };
        let blob: Vec<u8> = row.get("embedding")?;
        Ok((question, blob))
    }

    fn with_embedding((mut question, blob): (Question, Vec<u8>)) -> StorageResult<Question> {
        question.embedding = Self::deserialize_embedding(&blob)?;
        Ok(question)
    }

    fn load_refs(conn: &Connection, subject_id: SubjectId) -> StorageResult<QuestionRefs> {
        let mut stmt = conn
            .prepare(
                "SELECT question_id FROM subject_questions
                 WHERE subject_id = ?1 ORDER BY position",
            )
            .map_err(query_err)?;
        let ids = stmt
            .query_map(params![subject_id], |row| row.get::<_, QuestionId>(0))
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;
        Ok(QuestionRefs::from(ids))
    }

    fn load_subject(conn: &Connection, id: SubjectId, name: String) -> StorageResult<Subject> {
        Ok(Subject {
            id,
            name,
            questions: Self::load_refs(conn, id)?,
        })
    }
}

fn query_err(e: rusqlite::Error) -> StorageError {
    StorageError::QueryError(e.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl QuestionStore for SqliteStorage {
    async fn initialize(&self) -> StorageResult<()> {
        self.conn()?
            .execute_batch(SCHEMA)
            .map_err(|e| StorageError::SchemaError(e.to_string()))?;
        debug!("SQLite schema ready");
        Ok(())
    }

    async fn store_config(&self, config: &EmbeddingConfig) -> StorageResult<()> {
        let value = serde_json::to_string(config)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.conn()?
            .execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![EMBEDDING_CONFIG_KEY, value],
            )
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        let value: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![EMBEDDING_CONFIG_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;

        value
            .map(|v| {
                serde_json::from_str(&v)
                    .map_err(|e| StorageError::SerializationError(e.to_string()))
            })
            .transpose()
    }

    async fn create_subject(&self, name: &str) -> StorageResult<Subject> {
        let name = name.trim();
        let conn = self.conn()?;
        conn.execute("INSERT INTO subjects (name) VALUES (?1)", params![name])
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::DuplicateEntry(format!("subject '{}'", name))
                } else {
                    query_err(e)
                }
            })?;

        Ok(Subject {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            questions: QuestionRefs::new(),
        })
    }

    async fn get_subject(&self, id: SubjectId) -> StorageResult<Subject> {
        let conn = self.conn()?;
        let name: String = conn
            .query_row("SELECT name FROM subjects WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(query_err)?
            .ok_or_else(|| StorageError::NotFound(format!("Subject {} not found", id)))?;
        Self::load_subject(&conn, id, name)
    }

    async fn find_subject_by_name(&self, name: &str) -> StorageResult<Option<Subject>> {
        let conn = self.conn()?;
        let id: Option<SubjectId> = conn
            .query_row(
                "SELECT id FROM subjects WHERE name = ?1",
                params![name.trim()],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;

        id.map(|id| Self::load_subject(&conn, id, name.trim().to_string()))
            .transpose()
    }

    async fn list_subjects(&self) -> StorageResult<Vec<Subject>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, name FROM subjects ORDER BY id")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, SubjectId>(0)?, row.get::<_, String>(1)?)))
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;

        rows.into_iter()
            .map(|(id, name)| Self::load_subject(&conn, id, name))
            .collect()
    }

    async fn list_questions(&self, subject_id: SubjectId) -> StorageResult<Vec<Question>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM questions WHERE subject_id = ?1 ORDER BY id")
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![subject_id], Self::question_from_row)
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;

        rows.into_iter().map(Self::with_embedding).collect()
    }

    async fn get_question(&self, id: QuestionId) -> StorageResult<Question> {
        let row = self
            .conn()?
            .query_row(
                "SELECT * FROM questions WHERE id = ?1",
                params![id],
                Self::question_from_row,
            )
            .optional()
            .map_err(query_err)?
            .ok_or_else(|| StorageError::NotFound(format!("Question {} not found", id)))?;
        Self::with_embedding(row)
    }

    async fn create_question(&self, question: &NewQuestion) -> StorageResult<QuestionId> {
        let conn = self.conn()?;
        let subject_exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM subjects WHERE id = ?1",
                params![question.subject_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        if subject_exists.is_none() {
            return Err(StorageError::NotFound(format!(
                "Subject {} not found",
                question.subject_id
            )));
        }

        conn.execute(
            "INSERT INTO questions
                (subject_id, content, embedding, question_number, identifier, marks, occurrence_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
            params![
                question.subject_id,
                question.content,
                Self::serialize_embedding(&question.embedding),
                question.question_number,
                question.identifier,
                question.marks.map(f64::from),
            ],
        )
        .map_err(query_err)?;

        Ok(conn.last_insert_rowid())
    }

    async fn increment_occurrence(&self, id: QuestionId) -> StorageResult<u32> {
        // Single statement, so concurrent increments cannot lose updates
        self.conn()?
            .query_row(
                "UPDATE questions SET occurrence_count = occurrence_count + 1
                 WHERE id = ?1 RETURNING occurrence_count",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?
            .ok_or_else(|| StorageError::NotFound(format!("Question {} not found", id)))
    }

    async fn add_subject_reference(
        &self,
        subject_id: SubjectId,
        question_id: QuestionId,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let owner: SubjectId = conn
            .query_row(
                "SELECT subject_id FROM questions WHERE id = ?1",
                params![question_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?
            .ok_or_else(|| StorageError::NotFound(format!("Question {} not found", question_id)))?;
        if owner != subject_id {
            return Err(StorageError::ConstraintViolation(format!(
                "Question {} belongs to subject {}, not {}",
                question_id, owner, subject_id
            )));
        }

        conn.execute(
            "INSERT OR IGNORE INTO subject_questions (subject_id, question_id, position)
             SELECT ?1, ?2, COALESCE(MAX(position) + 1, 0)
             FROM subject_questions WHERE subject_id = ?1",
            params![subject_id, question_id],
        )
        .map_err(query_err)?;
        Ok(())
    }

    async fn count_questions(&self) -> StorageResult<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))
            .map_err(query_err)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_question(subject_id: SubjectId, content: &str, embedding: Vec<f32>) -> NewQuestion {
        NewQuestion {
            subject_id,
            content: content.to_string(),
            embedding,
            question_number: Some(3),
            identifier: Some("3b".to_string()),
            marks: Some(7.0),
        }
    }

    async fn open_initialized() -> SqliteStorage {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.initialize().await.unwrap();
        storage
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let embedding = vec![0.5, -1.25, 3.0e-7, 42.0];
        let bytes = SqliteStorage::serialize_embedding(&embedding);
        assert_eq!(bytes.len(), 16);
        assert_eq!(SqliteStorage::deserialize_embedding(&bytes).unwrap(), embedding);
    }

    #[test]
    fn test_embedding_blob_rejects_truncated_bytes() {
        let err = SqliteStorage::deserialize_embedding(&[0, 0, 128]).unwrap_err();
        assert!(matches!(err, StorageError::SerializationError(_)));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let storage = open_initialized().await;
        storage.initialize().await.unwrap();
        assert_eq!(storage.count_questions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_config_roundtrip() {
        let storage = open_initialized().await;
        assert!(storage.get_config().await.unwrap().is_none());

        let config = EmbeddingConfig {
            model_name: "text-embedding-004".to_string(),
            dimension: 768,
        };
        storage.store_config(&config).await.unwrap();
        storage.store_config(&config).await.unwrap();
        assert_eq!(storage.get_config().await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn test_duplicate_subject_name() {
        let storage = open_initialized().await;
        storage.create_subject("Physics").await.unwrap();
        let err = storage.create_subject("Physics").await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateEntry(_)));
    }

    #[tokio::test]
    async fn test_list_subjects_with_references() {
        let storage = open_initialized().await;
        assert!(storage.list_subjects().await.unwrap().is_empty());

        let physics = storage.create_subject("Physics").await.unwrap();
        let chemistry = storage.create_subject("Chemistry").await.unwrap();
        let id = storage
            .create_question(&new_question(physics.id, "Define force.", vec![0.6, 0.8]))
            .await
            .unwrap();
        storage.add_subject_reference(physics.id, id).await.unwrap();

        let subjects = storage.list_subjects().await.unwrap();
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0].id, physics.id);
        assert_eq!(subjects[0].name, "Physics");
        assert_eq!(subjects[0].questions.as_slice(), &[id]);
        assert_eq!(subjects[1].id, chemistry.id);
        assert!(subjects[1].questions.is_empty());
    }

    #[tokio::test]
    async fn test_question_lifecycle() {
        let storage = open_initialized().await;
        let subject = storage.create_subject("Physics").await.unwrap();

        let id = storage
            .create_question(&new_question(subject.id, "Define force.", vec![0.6, 0.8]))
            .await
            .unwrap();

        let stored = storage.get_question(id).await.unwrap();
        assert_eq!(stored.content, "Define force.");
        assert_eq!(stored.embedding, vec![0.6, 0.8]);
        assert_eq!(stored.identifier.as_deref(), Some("3b"));
        assert_eq!(stored.marks, Some(7.0));
        assert_eq!(stored.occurrence_count, 1);

        assert_eq!(storage.increment_occurrence(id).await.unwrap(), 2);
        assert_eq!(storage.get_question(id).await.unwrap().occurrence_count, 2);

        let err = storage.increment_occurrence(id + 100).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_question_unknown_subject() {
        let storage = open_initialized().await;
        let err = storage
            .create_question(&new_question(7, "Orphan", vec![1.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_references_keep_first_seen_order() {
        let storage = open_initialized().await;
        let subject = storage.create_subject("Physics").await.unwrap();
        let a = storage
            .create_question(&new_question(subject.id, "A", vec![1.0, 0.0]))
            .await
            .unwrap();
        let b = storage
            .create_question(&new_question(subject.id, "B", vec![0.0, 1.0]))
            .await
            .unwrap();

        storage.add_subject_reference(subject.id, b).await.unwrap();
        storage.add_subject_reference(subject.id, a).await.unwrap();
        storage.add_subject_reference(subject.id, b).await.unwrap();

        let subject = storage.get_subject(subject.id).await.unwrap();
        assert_eq!(subject.questions.as_slice(), &[b, a]);
    }

    #[tokio::test]
    async fn test_reference_rejects_foreign_question() {
        let storage = open_initialized().await;
        let physics = storage.create_subject("Physics").await.unwrap();
        let chemistry = storage.create_subject("Chemistry").await.unwrap();
        let id = storage
            .create_question(&new_question(chemistry.id, "Define pH.", vec![1.0]))
            .await
            .unwrap();

        let err = storage.add_subject_reference(physics.id, id).await.unwrap_err();
        assert!(matches!(err, StorageError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("questions.db");

        let (subject_id, question_id) = {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.initialize().await.unwrap();
            let subject = storage.create_subject("Physics").await.unwrap();
            let id = storage
                .create_question(&new_question(subject.id, "Define force.", vec![1.0, 2.0]))
                .await
                .unwrap();
            storage.add_subject_reference(subject.id, id).await.unwrap();
            storage.increment_occurrence(id).await.unwrap();
            (subject.id, id)
        };

        let storage = SqliteStorage::open(&path).unwrap();
        storage.initialize().await.unwrap();

        let subject = storage.find_subject_by_name("Physics").await.unwrap().unwrap();
        assert_eq!(subject.id, subject_id);
        assert_eq!(subject.questions.as_slice(), &[question_id]);

        let questions = storage.list_questions(subject_id).await.unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].occurrence_count, 2);
        assert_eq!(questions[0].embedding, vec![1.0, 2.0]);
    }
}
