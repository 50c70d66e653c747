//! Embedding provider abstraction and implementations.
//!
//! This module defines the interface for text embedding generation and provides
//! implementations for hosted services (OpenAI, Gemini) and, behind the
//! `local-embeddings` feature, a local ONNX model via fastembed.
//!
//! The recurrence engine only ever sees the [`EmbeddingProvider`] trait; clients
//! are constructed by the application at startup and injected into the ingestor.

pub mod dynamic;
#[cfg(feature = "local-embeddings")]
pub mod fastembed;
pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Network or API communication error
    #[error("API request failed: {0}")]
    ApiError(String),

    /// The provider did not answer in time
    #[error("Embedding request timed out: {0}")]
    Timeout(String),

    /// Invalid input text (e.g., empty, too long)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Configuration error (e.g., missing API key)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Other unexpected errors
    #[error("Unexpected error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EmbeddingError::Timeout(err.to_string())
        } else if err.is_decode() {
            EmbeddingError::Other(format!("Malformed embedding response: {}", err))
        } else {
            EmbeddingError::ApiError(err.to_string())
        }
    }
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for text embedding providers.
///
/// Implementors of this trait can generate vector embeddings from text inputs.
/// The trait is async to support API-based embedding services.
///
/// # Example Usage
/// ```ignore
/// let provider = GeminiEmbedding::new(api_key, None);
/// let text = normalize_text("State Newton's second law of motion");
/// let embedding = provider.embed(&text).await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Errors
    /// Returns `EmbeddingError` if the embedding generation fails
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order.
    ///
    /// The default implementation calls [`embed`](Self::embed) once per text.
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Get the dimension of embeddings produced by this provider.
    fn dimension(&self) -> usize;

    /// Get the model name/identifier for this provider.
    fn model_name(&self) -> &str;
}

/// Collapses runs of whitespace and trims the ends, preserving case.
///
/// This is the form in which question content is stored.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalizes text for consistent embedding generation.
///
/// This function applies the following transformations:
/// - Converts to lowercase
/// - Trims leading/trailing whitespace
/// - Collapses multiple consecutive spaces to a single space
///
/// # Example
/// ```ignore
/// let normalized = normalize_text("  Hello   World  ");
/// assert_eq!(normalized, "hello world");
/// ```
pub fn normalize_text(text: &str) -> String {
    collapse_whitespace(&text.to_lowercase())
}
