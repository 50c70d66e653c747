//! JSON file candidate provider.
//!
//! Reads the extractor's output from disk. Two layouts are accepted:
//!
//! ```json
//! [{"number": 1, "identifier": "1a", "content": "...", "marks": 7}]
//! ```
//!
//! or the same array wrapped as `{"questions": [...]}`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{CandidateProvider, ProviderError, ProviderResult};
use crate::models::QuestionCandidate;

#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateDocument {
    List(Vec<QuestionCandidate>),
    Wrapped { questions: Vec<QuestionCandidate> },
}

/// Candidates loaded from a JSON file, held in memory.
#[derive(Debug, Clone)]
pub struct JsonFileCandidateProvider {
    name: String,
    candidates: Vec<QuestionCandidate>,
}

impl JsonFileCandidateProvider {
    /// Read and parse `path`.
    ///
    /// # Errors
    /// Returns `ProviderError::IoError` if the file cannot be read and
    /// `ProviderError::ParseError` if it is not a candidate document
    pub async fn from_file(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let raw = tokio::fs::read_to_string(&path).await?;
        let candidates = Self::parse(&raw)?;
        debug!("Loaded {} candidates from {:?}", candidates.len(), path);

        Ok(Self {
            name: format!("json:{}", path.display()),
            candidates,
        })
    }

    /// Build a provider from an in-memory JSON string.
    pub fn from_json_str(name: impl Into<String>, raw: &str) -> ProviderResult<Self> {
        Ok(Self {
            name: name.into(),
            candidates: Self::parse(raw)?,
        })
    }

    fn parse(raw: &str) -> ProviderResult<Vec<QuestionCandidate>> {
        let document: CandidateDocument = serde_json::from_str(raw)
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        Ok(match document {
            CandidateDocument::List(candidates) => candidates,
            CandidateDocument::Wrapped { questions } => questions,
        })
    }
}

#[async_trait]
impl CandidateProvider for JsonFileCandidateProvider {
    async fn fetch_candidates(&self) -> ProviderResult<Vec<QuestionCandidate>> {
        Ok(self.candidates.clone())
    }

    async fn count_candidates(&self) -> ProviderResult<usize> {
        Ok(self.candidates.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PAPER: &str = r#"[
        {"number": 1, "identifier": "1a", "content": "List out the features of Spring Framework.", "marks": 7},
        {"number": 1, "identifier": "1b", "content": "Explain setter injection with an example.", "marks": 7},
        {"number": 2, "identifier": "2a", "content": "Discuss dependency injection.", "marks": null}
    ]"#;

    #[tokio::test]
    async fn test_parse_array_preserves_order() {
        let provider = JsonFileCandidateProvider::from_json_str("paper", PAPER).unwrap();
        let candidates = provider.fetch_candidates().await.unwrap();

        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].identifier.as_deref(), Some("1a"));
        assert_eq!(candidates[2].content, "Discuss dependency injection.");
        assert_eq!(candidates[2].marks, None);
        assert_eq!(provider.count_candidates().await.unwrap(), 3);
    }

    #[test]
    fn test_parse_wrapped_document() {
        let raw = r#"{"questions": [{"content": "Explain AOP advice types."}]}"#;
        let provider = JsonFileCandidateProvider::from_json_str("wrapped", raw).unwrap();
        assert_eq!(provider.candidates.len(), 1);
        assert_eq!(provider.name(), "wrapped");
    }

    #[test]
    fn test_parse_error() {
        let err = JsonFileCandidateProvider::from_json_str("bad", "{\"nope\": 1}").unwrap_err();
        assert!(matches!(err, ProviderError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PAPER.as_bytes()).unwrap();

        let provider = JsonFileCandidateProvider::from_file(file.path()).await.unwrap();
        assert_eq!(provider.count_candidates().await.unwrap(), 3);
        assert!(provider.name().starts_with("json:"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = JsonFileCandidateProvider::from_file("/definitely/not/here.json")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::IoError(_)));
    }
}
