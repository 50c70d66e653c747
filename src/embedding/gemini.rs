//! Gemini embedding provider implementation.
//!
//! Uses the Generative Language API `embedContent` and `batchEmbedContents`
//! methods. `text-embedding-004` is the default model and produces
//! 768-dimensional vectors.

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "text-embedding-004";

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

/// Gemini embedding provider.
#[derive(Debug, Clone)]
pub struct GeminiEmbedding {
    client: Client,
    api_key: String,
    model: String,
    embedding_dimension: usize,
    base_url: String,
}

impl GeminiEmbedding {
    /// Create a new Gemini embedding provider.
    ///
    /// # Arguments
    /// * `api_key` - Generative Language API key
    /// * `model` - Model name (defaults to "text-embedding-004" if None)
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self::with_timeout(api_key, model, Duration::from_secs(30))
    }

    /// Same as [`new`](Self::new) with an explicit per-request timeout.
    pub fn with_timeout(api_key: String, model: Option<String>, timeout: Duration) -> Self {
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let embedding_dimension = match model.as_str() {
            "text-embedding-004" | "embedding-001" => 768,
            "gemini-embedding-001" => 3072,
            _ => 768,
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            model,
            embedding_dimension,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn model_path(&self) -> String {
        format!("models/{}", self.model)
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &B,
    ) -> EmbeddingResult<R> {
        let url = format!("{}/{}:{}", self.base_url, self.model_path(), method);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiError(format!(
                "Gemini API error {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }

    fn content_request<'a>(&self, text: &'a str) -> EmbedContentRequest<'a> {
        EmbedContentRequest {
            model: self.model_path(),
            content: Content {
                parts: vec![Part { text }],
            },
        }
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }

        let response: EmbedContentResponse =
            self.post("embedContent", &self.content_request(text)).await?;
        Ok(response.embedding.values)
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(
                "All texts must be non-empty".to_string(),
            ));
        }

        let request = BatchEmbedRequest {
            requests: texts.iter().map(|t| self.content_request(t)).collect(),
        };
        let response: BatchEmbedResponse = self.post("batchEmbedContents", &request).await?;

        if response.embeddings.len() != texts.len() {
            return Err(EmbeddingError::Other(format!(
                "Expected {} embeddings, received {}",
                texts.len(),
                response.embeddings.len()
            )));
        }
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
