//! Local embedding provider backed by fastembed.
//!
//! Runs an ONNX sentence-embedding model in-process, so ingestion works
//! without an API key. Model files are downloaded into the cache directory
//! on first use.

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// FastEmbed embedding provider.
#[derive(Clone)]
pub struct FastEmbedProvider {
    /// Inference needs exclusive access to the session
    model: Arc<Mutex<TextEmbedding>>,

    model_name: String,

    embedding_dimension: usize,
}

/// Map a user-facing model name onto a fastembed model and its dimension.
///
/// Accepts the enum variant name (`BGESmallENV15`) or the Hugging Face style
/// name (`bge-small-en-v1.5`), case-insensitively.
pub fn parse_model(name: &str) -> Option<(EmbeddingModel, usize)> {
    let key: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    let model = match key.as_str() {
        "allminilml6v2" => (EmbeddingModel::AllMiniLML6V2, 384),
        "bgesmallenv15" => (EmbeddingModel::BGESmallENV15, 384),
        "bgebaseenv15" => (EmbeddingModel::BGEBaseENV15, 768),
        "bgelargeenv15" => (EmbeddingModel::BGELargeENV15, 1024),
        "nomicembedtextv1" => (EmbeddingModel::NomicEmbedTextV1, 768),
        "nomicembedtextv15" => (EmbeddingModel::NomicEmbedTextV15, 768),
        "paraphrasemlminilml12v2" => (EmbeddingModel::ParaphraseMLMiniLML12V2, 384),
        "paraphrasemlmpnetbasev2" => (EmbeddingModel::ParaphraseMLMpnetBaseV2, 768),
        _ => return None,
    };
    Some(model)
}

impl FastEmbedProvider {
    /// Create a new FastEmbed embedding provider.
    ///
    /// # Arguments
    /// * `model_name` - Model to load (defaults to AllMiniLML6V2)
    /// * `cache_dir` - Optional cache directory for model files
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` for an unknown model or if the
    /// model cannot be loaded
    pub fn new(model_name: Option<&str>, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let (model_type, embedding_dimension) = match model_name {
            Some(name) => parse_model(name).ok_or_else(|| {
                EmbeddingError::ConfigError(format!("Unknown FastEmbed model: {}", name))
            })?,
            None => (EmbeddingModel::AllMiniLML6V2, 384),
        };
        let model_name = format!("{:?}", model_type);

        let mut init_options = InitOptions::new(model_type);
        if let Some(dir) = cache_dir {
            init_options = init_options.with_cache_dir(dir);
        }

        let text_embedding = TextEmbedding::try_new(init_options).map_err(|e| {
            EmbeddingError::ConfigError(format!("Failed to initialize FastEmbed model: {}", e))
        })?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            model_name,
            embedding_dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Other("No embedding generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }

        #[allow(unused_mut)]
        let mut model = self.model.lock().await;
        let inputs: Vec<String> = texts.iter().map(|s| s.to_string()).collect();

        model
            .embed(inputs, None)
            .map_err(|e| EmbeddingError::Other(format!("Embedding generation failed: {}", e)))
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// TextEmbedding does not implement Debug
impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("embedding_dimension", &self.embedding_dimension)
            .finish()
    }
}
