
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TaggingConfig;

/// A note as handed over by the host document store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notebook: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Note {
    #[inline]
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            notebook: None,
            updated_at: None,
        }
    }

    #[inline]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    pub fn with_notebook(mut self, notebook: impl Into<String>) -> Self {
        self.notebook = Some(notebook.into());
        self
    }

    /// Case-insensitive tag membership
    #[inline]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub title: String,
    pub tags: Vec<String>,
    pub notebook: Option<String>,
    pub heading_path: String,
    pub token_count: usize,
}

/// A bounded segment of a note, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// `"{note_id}#{order}"`
    pub id: String,
    pub note_id: String,
    pub order: usize,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl TextChunk {
    #[inline]
    pub fn chunk_id(note_id: &str, order: usize) -> String {
        format!("{}#{}", note_id, order)
    }

    /// Chunk text prefixed with the note title and section path
    #[inline]
    pub fn embedding_text(&self) -> String {
        let title = self.metadata.title.trim();
        let heading = self.metadata.heading_path.trim();

        let context = if heading.is_empty() || heading == title {
            title.to_string()
        } else if title.is_empty() {
            heading.to_string()
        } else {
            format!("{} > {}", title, heading)
        };

        if context.is_empty() || context == self.text.trim() {
            self.text.clone()
        } else if self.text.trim().is_empty() {
            context
        } else {
            format!("{}\n\n{}", context, self.text)
        }
    }
}

/// One stored vector for one chunk of one note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub note_id: String,
    pub chunk_id: String,
    pub order: usize,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub timestamp: DateTime<Utc>,
}

impl EmbeddingRecord {
    #[inline]
    pub fn from_chunk(chunk: TextChunk, vector: Vec<f32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            note_id: chunk.note_id,
            chunk_id: chunk.id,
            order: chunk.order,
            vector,
            text: chunk.text,
            metadata: chunk.metadata,
            timestamp: Utc::now(),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagQuery {
    pub text: String,
    /// Restrict retrieval to these notes
    #[serde(default)]
    pub note_ids: Option<Vec<String>>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f32>,
}

impl RagQuery {
    #[inline]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn with_notes<I, S>(mut self, note_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.note_ids = Some(note_ids.into_iter().map(Into::into).collect());
        self
    }

    #[inline]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    #[inline]
    pub const fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

impl From<&str> for RagQuery {
    #[inline]
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for RagQuery {
    #[inline]
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub note_id: String,
    pub score: f32,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagResponse {
    pub answer: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSuggestion {
    pub tag: String,
    /// Always within `[0, 1]`
    pub confidence: f64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TagOptions {
    pub max_tags: usize,
    pub min_confidence: f64,
    pub use_llm: bool,
}

impl Default for TagOptions {
    #[inline]
    fn default() -> Self {
        Self::from(&TaggingConfig::default())
    }
}

impl From<&TaggingConfig> for TagOptions {
    #[inline]
    fn from(config: &TaggingConfig) -> Self {
        Self {
            max_tags: config.max_tags,
            min_confidence: config.min_confidence,
            use_llm: config.use_llm,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryStyle {
    #[default]
    Brief,
    Detailed,
    BulletPoints,
    KeyInsights,
}

impl SummaryStyle {
    /// Styles whose output is a list of points rather than prose
    #[inline]
    pub const fn is_list(self) -> bool {
        matches!(self, Self::BulletPoints | Self::KeyInsights)
    }
}

impl std::fmt::Display for SummaryStyle {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SummaryStyle::Brief => write!(f, "brief"),
            SummaryStyle::Detailed => write!(f, "detailed"),
            SummaryStyle::BulletPoints => write!(f, "bullet-points"),
            SummaryStyle::KeyInsights => write!(f, "key-insights"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SummaryOptions {
    pub style: SummaryStyle,
    /// Maximum summary length in characters
    pub max_length: Option<usize>,
    pub include_metadata: bool,
    pub language: Option<String>,
}

impl SummaryOptions {
    #[inline]
    pub fn with_style(style: SummaryStyle) -> Self {
        Self {
            style,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteSummary {
    pub note_id: String,
    pub summary: String,
    pub key_points: Option<Vec<String>>,
    pub word_count: usize,
    /// Minutes, at 200 words per minute
    pub reading_time: usize,
    pub generated_at: DateTime<Utc>,
    pub style: SummaryStyle,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagStats {
    pub initialized: bool,
    pub indexed_notes: usize,
    pub indexed_chunks: usize,
    pub dimension: Option<usize>,
    pub model: String,
    pub llm_available: bool,
    pub known_tags: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFailure {
    pub note_id: String,
    pub error: String,
}

/// Outcome of a batch index or re-index
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub notes_indexed: usize,
    pub chunks_indexed: usize,
    pub failures: Vec<IndexFailure>,
}

impl IndexReport {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    #[inline]
    pub fn record_failure(&mut self, note_id: &str, error: impl std::fmt::Display) {
        self.failures.push(IndexFailure {
            note_id: note_id.to_string(),
            error: error.to_string(),
        });
    }
}
