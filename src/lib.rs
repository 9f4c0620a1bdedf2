use thiserror::Error;

use crate::config::{ConfigError, Feature};

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Feature disabled: {feature}")]
    FeatureDisabled { feature: Feature },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod summarizer;
pub mod system;
pub mod tagger;

pub use models::{
    Note, NoteSummary, RagQuery, RagResponse, RagStats, Source, SummaryOptions, SummaryStyle,
    TagOptions, TagSuggestion,
};
pub use system::RagSystem;
