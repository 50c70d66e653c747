//! Configuration for the recurrence engine and the command-line tools.
//!
//! [`RecurrenceConfig`] is what the library consumes. [`Settings`] is the
//! optional TOML file the binaries read before applying command-line overrides:
//!
//! ```toml
//! db_path = "questions.db"
//!
//! [recurrence]
//! similarity_threshold = 0.8
//!
//! [embedding]
//! provider = "gemini"
//! model = "text-embedding-004"
//! timeout_secs = 30
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Similarity at or above which a candidate counts as a recurrence.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.8;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Similarity threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f32),

    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Tuning for recurrence detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecurrenceConfig {
    /// Inclusive cosine-similarity threshold in `[0, 1]`
    pub similarity_threshold: f32,
}

impl Default for RecurrenceConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl RecurrenceConfig {
    /// # Errors
    /// Returns `ConfigError::InvalidThreshold` for NaN or values outside `[0, 1]`
    pub fn new(similarity_threshold: f32) -> ConfigResult<Self> {
        let config = Self {
            similarity_threshold,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if (0.0..=1.0).contains(&self.similarity_threshold) {
            Ok(())
        } else {
            Err(ConfigError::InvalidThreshold(self.similarity_threshold))
        }
    }
}

/// Which embedding backend the binaries should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Local ONNX model (requires the `local-embeddings` feature)
    FastEmbed,
    /// OpenAI `/v1/embeddings` (requires OPENAI_API_KEY)
    OpenAi,
    /// Gemini `text-embedding-004` (requires GEMINI_API_KEY)
    #[default]
    Gemini,
}

/// Embedding provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: ProviderKind,

    /// Provider-specific model name; the provider default when unset
    pub model: Option<String>,

    /// FastEmbed model cache directory
    pub cache_dir: Option<PathBuf>,

    /// Per-request timeout for hosted providers
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            cache_dir: None,
            timeout_secs: 30,
        }
    }
}

/// Settings file shared by the `ingestion` and `search` binaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub recurrence: RecurrenceConfig,
    pub embedding: EmbeddingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("questions.db"),
            recurrence: RecurrenceConfig::default(),
            embedding: EmbeddingSettings::default(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text; missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Read `path` when given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.recurrence.validate()?;
        if self.embedding.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "embedding.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold() {
        assert_eq!(RecurrenceConfig::default().similarity_threshold, 0.8);
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(RecurrenceConfig::new(0.0).is_ok());
        assert!(RecurrenceConfig::new(1.0).is_ok());
        assert!(matches!(
            RecurrenceConfig::new(1.5),
            Err(ConfigError::InvalidThreshold(_))
        ));
        assert!(RecurrenceConfig::new(-0.1).is_err());
        assert!(RecurrenceConfig::new(f32::NAN).is_err());
    }

    #[test]
    fn test_settings_from_toml() {
        let raw = r#"
            db_path = "/var/lib/qb/questions.db"

            [recurrence]
            similarity_threshold = 0.85

            [embedding]
            provider = "open-ai"
            model = "text-embedding-3-large"
        "#;
        let settings = Settings::from_toml_str(raw).unwrap();
        assert_eq!(settings.db_path, PathBuf::from("/var/lib/qb/questions.db"));
        assert_eq!(settings.recurrence.similarity_threshold, 0.85);
        assert_eq!(settings.embedding.provider, ProviderKind::OpenAi);
        assert_eq!(settings.embedding.model.as_deref(), Some("text-embedding-3-large"));
        assert_eq!(settings.embedding.timeout_secs, 30);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
    }

    #[test]
    fn test_settings_rejects_bad_threshold() {
        let raw = "[recurrence]\nsimilarity_threshold = 2.0\n";
        assert!(matches!(
            Settings::from_toml_str(raw),
            Err(ConfigError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_settings_rejects_zero_timeout() {
        let raw = "[embedding]\ntimeout_secs = 0\n";
        assert!(matches!(Settings::from_toml_str(raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Settings::load("/no/such/settings.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
