
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::model::{DEFAULT_EMBEDDING_DIMENSION, LOCAL_MODEL_NAME};

const APP_DIR_NAME: &str = "notes-rag";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub tagging: TaggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Feature gates checked by the `RagSystem` facade before dispatching a call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureFlags {
    pub enable_auto_tagging: bool,
    pub enable_summarization: bool,
    pub enable_similar_notes: bool,
    pub enable_qa: bool,
}

impl Default for FeatureFlags {
    #[inline]
    fn default() -> Self {
        Self {
            enable_auto_tagging: true,
            enable_summarization: true,
            enable_similar_notes: true,
            enable_qa: true,
        }
    }
}

impl FeatureFlags {
    #[inline]
    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::AutoTagging => self.enable_auto_tagging,
            Feature::Summarization => self.enable_summarization,
            Feature::SimilarNotes => self.enable_similar_notes,
            Feature::QuestionAnswering => self.enable_qa,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Feature {
    AutoTagging,
    Summarization,
    SimilarNotes,
    QuestionAnswering,
}

impl std::fmt::Display for Feature {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Feature::AutoTagging => write!(f, "auto tagging"),
            Feature::Summarization => write!(f, "summarization"),
            Feature::SimilarNotes => write!(f, "similar notes"),
            Feature::QuestionAnswering => write!(f, "question answering"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Local,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    /// Vector size of the local model. Remote backends report their own.
    pub dimension: u32,
    pub batch_size: u32,
    pub init_timeout_secs: u64,
    pub ollama: OllamaConfig,
}

impl Default for EmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            model: LOCAL_MODEL_NAME.to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 16,
            init_timeout_secs: 30,
            ollama: OllamaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    #[default]
    None,
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub model: String,
    pub openai_base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub ollama: OllamaConfig,
}

impl Default for LlmConfig {
    #[inline]
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::None,
            model: "llama3.2:3b".to_string(),
            openai_base_url: "https://api.openai.com".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            timeout_secs: 60,
            ollama: OllamaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub threshold: f32,
    pub similar_threshold: f32,
    /// Upper bound on the context block handed to the language model
    pub max_context_chars: usize,
}

impl Default for SearchConfig {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 5,
            threshold: 0.7,
            similar_threshold: 0.6,
            max_context_chars: 6000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaggingConfig {
    pub max_tags: usize,
    pub min_confidence: f64,
    pub use_llm: bool,
    pub neighbor_count: usize,
    pub neighbor_threshold: f32,
    pub known_tags: Vec<String>,
}

impl Default for TaggingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_tags: 5,
            min_confidence: 0.7,
            use_llm: true,
            neighbor_count: 10,
            neighbor_threshold: 0.5,
            known_tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Write embedding records through to SQLite under `base_dir`
    pub persist: bool,
}

impl Default for StorageConfig {
    #[inline]
    fn default() -> Self {
        Self { persist: true }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid timeout: {0} seconds (must be between 1 and 600)")]
    InvalidTimeout(u64),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid target chunk size: {0} (must be between 32 and 2048)")]
    InvalidTargetChunkSize(usize),
    #[error("Invalid max chunk size: {0} (must be between 64 and 4096)")]
    InvalidMaxChunkSize(usize),
    #[error("Invalid min chunk size: {0} (must be between 8 and 1024)")]
    InvalidMinChunkSize(usize),
    #[error("Invalid overlap size: {0} (must be between 10% and 20% of the max chunk size {1})")]
    InvalidOverlapSize(usize, usize),
    #[error("Max chunk size ({0}) must be greater than target chunk size ({1})")]
    MaxChunkSizeTooSmall(usize, usize),
    #[error("Target chunk size ({0}) must be greater than min chunk size ({1})")]
    TargetChunkSizeTooSmall(usize, usize),
    #[error("Invalid top-k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid {name}: {value} (must be between 0.0 and 1.0)")]
    InvalidThreshold { name: &'static str, value: f64 },
    #[error("Invalid max tags: {0} (must be between 1 and 50)")]
    InvalidMaxTags(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            features: FeatureFlags::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            chunking: ChunkingConfig::default(),
            search: SearchConfig::default(),
            tagging: TaggingConfig::default(),
            storage: StorageConfig::default(),
            base_dir: Self::default_base_dir(),
        }
    }
}

impl Config {
    /// Default data directory: `{data_dir}/notes-rag`, or `.notes-rag` in the
    /// working directory when the platform has no data directory.
    #[inline]
    pub fn default_base_dir() -> PathBuf {
        dirs::data_dir().map_or_else(
            || PathBuf::from(format!(".{}", APP_DIR_NAME)),
            |dir| dir.join(APP_DIR_NAME),
        )
    }

    /// Configuration rooted in `base_dir` with every other setting at its default
    #[inline]
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self::with_base_dir(config_dir));
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.llm.validate()?;
        self.validate_chunking_config()?;
        self.validate_search_config()?;
        self.validate_tagging_config()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(32..=2048).contains(&config.target_chunk_size) {
            return Err(ConfigError::InvalidTargetChunkSize(
                config.target_chunk_size,
            ));
        }

        if !(64..=4096).contains(&config.max_chunk_size) {
            return Err(ConfigError::InvalidMaxChunkSize(config.max_chunk_size));
        }

        if !(8..=1024).contains(&config.min_chunk_size) {
            return Err(ConfigError::InvalidMinChunkSize(config.min_chunk_size));
        }

        // The sliding window must overlap by 10-20% of its length
        if config.overlap_size * 10 < config.max_chunk_size
            || config.overlap_size * 5 > config.max_chunk_size
        {
            return Err(ConfigError::InvalidOverlapSize(
                config.overlap_size,
                config.max_chunk_size,
            ));
        }

        if config.max_chunk_size <= config.target_chunk_size {
            return Err(ConfigError::MaxChunkSizeTooSmall(
                config.max_chunk_size,
                config.target_chunk_size,
            ));
        }

        if config.target_chunk_size <= config.min_chunk_size {
            return Err(ConfigError::TargetChunkSizeTooSmall(
                config.target_chunk_size,
                config.min_chunk_size,
            ));
        }

        Ok(())
    }

    fn validate_search_config(&self) -> Result<(), ConfigError> {
        let search = &self.search;
        if !(1..=100).contains(&search.top_k) {
            return Err(ConfigError::InvalidTopK(search.top_k));
        }
        validate_unit_interval("search threshold", f64::from(search.threshold))?;
        validate_unit_interval(
            "similar notes threshold",
            f64::from(search.similar_threshold),
        )?;
        Ok(())
    }

    fn validate_tagging_config(&self) -> Result<(), ConfigError> {
        let tagging = &self.tagging;
        if !(1..=50).contains(&tagging.max_tags) {
            return Err(ConfigError::InvalidMaxTags(tagging.max_tags));
        }
        validate_unit_interval("tag confidence", tagging.min_confidence)?;
        validate_unit_interval(
            "tag neighbor threshold",
            f64::from(tagging.neighbor_threshold),
        )?;
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite embedding store
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("embeddings.db")
    }
}

fn validate_unit_interval(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold { name, value })
    }
}

fn validate_timeout(timeout_secs: u64) -> Result<(), ConfigError> {
    if (1..=600).contains(&timeout_secs) {
        Ok(())
    } else {
        Err(ConfigError::InvalidTimeout(timeout_secs))
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        validate_timeout(self.init_timeout_secs)?;

        if self.backend == EmbeddingBackend::Ollama {
            self.ollama.validate()?;
        }

        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.dimension = dimension;
        Ok(())
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider == LlmProviderKind::None {
            return Ok(());
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        validate_timeout(self.timeout_secs)?;

        match self.provider {
            LlmProviderKind::Ollama => self.ollama.validate()?,
            LlmProviderKind::OpenAi => {
                Url::parse(&self.openai_base_url)
                    .map_err(|_| ConfigError::InvalidUrl(self.openai_base_url.clone()))?;
            }
            LlmProviderKind::None => {}
        }

        Ok(())
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }
}
