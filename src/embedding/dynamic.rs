//! Runtime-selected embedding provider.
//!
//! The binaries pick a backend from settings or from the model name stored in
//! the database, so the concrete type is only known at runtime.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

#[cfg(feature = "local-embeddings")]
use super::fastembed::FastEmbedProvider;
use super::gemini::GeminiEmbedding;
use super::openai::OpenAIEmbedding;
use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use crate::config::{EmbeddingSettings, ProviderKind};

/// Wrapper enum for embedding providers to allow dynamic dispatch
pub enum DynamicEmbeddingProvider {
    #[cfg(feature = "local-embeddings")]
    FastEmbed(FastEmbedProvider),
    OpenAI(OpenAIEmbedding),
    Gemini(GeminiEmbedding),
}

/// Guess which backend produced embeddings with this model name.
pub fn detect_provider(model_name: &str) -> ProviderKind {
    if model_name.starts_with("text-embedding-3") || model_name == "text-embedding-ada-002" {
        ProviderKind::OpenAi
    } else if model_name.starts_with("text-embedding-0")
        || model_name.starts_with("gemini-")
        || model_name == "embedding-001"
    {
        ProviderKind::Gemini
    } else {
        ProviderKind::FastEmbed
    }
}

fn api_key(var: &str) -> EmbeddingResult<String> {
    std::env::var(var).map_err(|_| {
        EmbeddingError::ConfigError(format!("{} environment variable must be set", var))
    })
}

impl DynamicEmbeddingProvider {
    /// Build the provider described by `settings`.
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` if the API key is missing or the
    /// local backend was not compiled in
    pub fn from_settings(settings: &EmbeddingSettings) -> EmbeddingResult<Self> {
        let timeout = Duration::from_secs(settings.timeout_secs);

        let provider = match settings.provider {
            ProviderKind::OpenAi => Self::OpenAI(OpenAIEmbedding::with_timeout(
                api_key("OPENAI_API_KEY")?,
                settings.model.clone(),
                timeout,
            )),
            ProviderKind::Gemini => Self::Gemini(GeminiEmbedding::with_timeout(
                api_key("GEMINI_API_KEY")?,
                settings.model.clone(),
                timeout,
            )),
            ProviderKind::FastEmbed => Self::fastembed(settings)?,
        };

        info!(
            "Embedding provider initialized: model={}, dimension={}",
            provider.model_name(),
            provider.dimension()
        );
        Ok(provider)
    }

    #[cfg(feature = "local-embeddings")]
    fn fastembed(settings: &EmbeddingSettings) -> EmbeddingResult<Self> {
        let cache_dir = settings
            .cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|p| p.join("fastembed")));
        FastEmbedProvider::new(settings.model.as_deref(), cache_dir).map(Self::FastEmbed)
    }

    #[cfg(not(feature = "local-embeddings"))]
    fn fastembed(_settings: &EmbeddingSettings) -> EmbeddingResult<Self> {
        Err(EmbeddingError::ConfigError(
            "FastEmbed support not compiled in; rebuild with --features local-embeddings"
                .to_string(),
        ))
    }
}

#[async_trait]
impl EmbeddingProvider for DynamicEmbeddingProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        match self {
            #[cfg(feature = "local-embeddings")]
            Self::FastEmbed(p) => p.embed(text).await,
            Self::OpenAI(p) => p.embed(text).await,
            Self::Gemini(p) => p.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        match self {
            #[cfg(feature = "local-embeddings")]
            Self::FastEmbed(p) => p.embed_batch(texts).await,
            Self::OpenAI(p) => p.embed_batch(texts).await,
            Self::Gemini(p) => p.embed_batch(texts).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            #[cfg(feature = "local-embeddings")]
            Self::FastEmbed(p) => p.dimension(),
            Self::OpenAI(p) => p.dimension(),
            Self::Gemini(p) => p.dimension(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            #[cfg(feature = "local-embeddings")]
            Self::FastEmbed(p) => p.model_name(),
            Self::OpenAI(p) => p.model_name(),
            Self::Gemini(p) => p.model_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_provider() {
        assert_eq!(detect_provider("text-embedding-004"), ProviderKind::Gemini);
        assert_eq!(detect_provider("gemini-embedding-001"), ProviderKind::Gemini);
        assert_eq!(detect_provider("text-embedding-3-small"), ProviderKind::OpenAi);
        assert_eq!(detect_provider("text-embedding-ada-002"), ProviderKind::OpenAi);
        assert_eq!(detect_provider("AllMiniLML6V2"), ProviderKind::FastEmbed);
    }

    #[test]
    fn test_hosted_provider_from_settings() {
        std::env::set_var("GEMINI_API_KEY", "test-key");
        let provider = DynamicEmbeddingProvider::from_settings(&EmbeddingSettings::default())
            .unwrap();
        assert_eq!(provider.model_name(), "text-embedding-004");
        assert_eq!(provider.dimension(), 768);
    }

    #[cfg(not(feature = "local-embeddings"))]
    #[test]
    fn test_fastembed_requires_feature() {
        let settings = EmbeddingSettings {
            provider: ProviderKind::FastEmbed,
            ..EmbeddingSettings::default()
        };
        assert!(matches!(
            DynamicEmbeddingProvider::from_settings(&settings),
            Err(EmbeddingError::ConfigError(_))
        ));
    }
}
