//! Candidate provider module.
//!
//! Question extraction (OCR, LLM prompting, response parsing) happens outside
//! this crate. A `CandidateProvider` is the seam through which its output, an
//! ordered list of extracted questions, reaches the ingestion pipeline.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::QuestionCandidate;

pub mod json;

/// Errors that can occur when fetching candidates from a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Failed to read from the data source
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse the data format
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Other provider-specific errors
    #[error("Provider error: {0}")]
    Other(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Source of extracted question candidates for one document.
///
/// Providers return candidates in document order and do not deduplicate;
/// recurrence detection is the pipeline's job.
#[async_trait]
pub trait CandidateProvider: Send + Sync {
    /// Fetch all candidates, in document order.
    async fn fetch_candidates(&self) -> ProviderResult<Vec<QuestionCandidate>>;

    /// Number of candidates available.
    async fn count_candidates(&self) -> ProviderResult<usize> {
        self.fetch_candidates().await.map(|c| c.len())
    }

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
