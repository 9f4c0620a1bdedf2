// Configuration management module
// TOML-backed settings stored under the data directory

pub mod settings;


pub use settings::{
    Config, ConfigError, EmbeddingBackend, EmbeddingConfig, Feature, FeatureFlags, LlmConfig,
    LlmProviderKind, OllamaConfig, SearchConfig, StorageConfig, TaggingConfig,
};

/// Get the default data directory path
#[inline]
pub fn get_config_dir() -> std::path::PathBuf {
    Config::default_base_dir()
}
