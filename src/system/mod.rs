
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{Config, Feature};
use crate::embeddings::EmbeddingEngine;
use crate::llm::{GenerationOptions, LlmProvider};
use crate::models::{
    IndexReport, Note, NoteSummary, RagQuery, RagResponse, RagStats, Source, SummaryOptions,
    TagOptions, TagSuggestion,
};
use crate::pipeline::{RagPipeline, RagStream};
use crate::summarizer::NoteSummarizer;
use crate::tagger::{self, AutoTagger};
use crate::{RagError, Result};

/// Public entry point. Every feature call is checked against
/// [`crate::config::FeatureFlags`] before it runs.
pub struct RagSystem {
    pipeline: RagPipeline,
    tagger: AutoTagger,
    summarizer: NoteSummarizer,
}

impl RagSystem {
    #[inline]
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let pipeline = RagPipeline::new(config)?;
        Ok(Self::from_pipeline(pipeline))
    }

    /// Load `config.toml` from `base_dir`, defaults when it is missing
    #[inline]
    pub fn open<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        Self::new(Config::load(base_dir)?)
    }

    #[inline]
    pub fn with_components(
        config: Config,
        engine: EmbeddingEngine,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_pipeline(RagPipeline::with_components(
            config, engine, provider,
        )))
    }

    fn from_pipeline(pipeline: RagPipeline) -> Self {
        let config = pipeline.config();
        let tagger = AutoTagger::new(&config.tagging);
        let summarizer = NoteSummarizer::new(
            Arc::clone(pipeline.provider()),
            GenerationOptions::from(&config.llm),
        );
        Self {
            pipeline,
            tagger,
            summarizer,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        self.pipeline.config()
    }

    /// Load the model and open the index ahead of the first call
    #[inline]
    pub async fn initialize(&self) -> Result<()> {
        self.pipeline.initialize().await
    }

    fn require(&self, feature: Feature) -> Result<()> {
        if self.config().features.is_enabled(feature) {
            Ok(())
        } else {
            debug!("Rejected call to disabled feature {}", feature);
            Err(RagError::FeatureDisabled { feature })
        }
    }

    /// Add notes to the index
    #[inline]
    pub async fn process_notes(&self, notes: &[Note]) -> Result<IndexReport> {
        let report = self.pipeline.index_notes(notes).await?;
        info!(
            "Processed {} notes into {} chunks",
            report.notes_indexed, report.chunks_indexed
        );
        Ok(report)
    }

    /// Re-index edited notes, replacing their previous chunks
    #[inline]
    pub async fn update_notes(&self, notes: &[Note]) -> Result<IndexReport> {
        self.pipeline.update_index(notes).await
    }

    #[inline]
    pub async fn remove_notes(&self, note_ids: &[String]) -> Result<usize> {
        self.pipeline.remove_notes(note_ids).await
    }

    #[inline]
    pub async fn query(&self, query: impl Into<RagQuery>) -> Result<RagResponse> {
        self.require(Feature::QuestionAnswering)?;
        self.pipeline.query(&query.into()).await
    }

    /// Retrieval only. Works without a language model.
    #[inline]
    pub async fn search(&self, query: impl Into<RagQuery>) -> Result<Vec<Source>> {
        self.require(Feature::QuestionAnswering)?;
        self.pipeline.search(&query.into()).await
    }

    #[inline]
    pub async fn stream_query(&self, query: impl Into<RagQuery>) -> Result<RagStream> {
        self.require(Feature::QuestionAnswering)?;
        self.pipeline.stream_query(&query.into()).await
    }

    #[inline]
    pub async fn get_similar_notes(&self, note_id: &str, limit: usize) -> Result<Vec<Source>> {
        self.require(Feature::SimilarNotes)?;
        self.pipeline.get_similar_notes(note_id, limit).await
    }

    /// Options default to the `[tagging]` configuration
    #[inline]
    pub async fn suggest_tags(
        &self,
        note: &Note,
        options: Option<TagOptions>,
    ) -> Result<Vec<TagSuggestion>> {
        self.require(Feature::AutoTagging)?;
        let options = options.unwrap_or_else(|| TagOptions::from(&self.config().tagging));
        self.tagger
            .suggest_tags(&self.pipeline, note, &options)
            .await
    }

    #[inline]
    pub async fn batch_suggest_tags(
        &self,
        notes: &[Note],
        options: Option<TagOptions>,
    ) -> Result<Vec<(String, Vec<TagSuggestion>)>> {
        self.require(Feature::AutoTagging)?;
        let options = options.unwrap_or_else(|| TagOptions::from(&self.config().tagging));
        Ok(self
            .tagger
            .batch_suggest_tags(&self.pipeline, notes, &options)
            .await)
    }

    #[inline]
    pub fn apply_tags(&self, note: &Note, tags: &[String]) -> Result<Note> {
        self.require(Feature::AutoTagging)?;
        Ok(tagger::apply_tags(note, tags))
    }

    /// Replace the vocabulary of existing tags. Accepted even while
    /// auto-tagging is disabled so the list is current when it is enabled.
    #[inline]
    pub async fn update_tags_list<I, S>(&self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tagger.update_tags_list(tags).await;
    }

    #[inline]
    pub async fn summarize_note(
        &self,
        note: &Note,
        options: &SummaryOptions,
    ) -> Result<NoteSummary> {
        self.require(Feature::Summarization)?;
        self.summarizer.summarize(note, options).await
    }

    #[inline]
    pub async fn summarize_collection(
        &self,
        notes: &[Note],
        title: &str,
        options: &SummaryOptions,
    ) -> Result<String> {
        self.require(Feature::Summarization)?;
        self.summarizer
            .summarize_collection(notes, title, options)
            .await
    }

    #[inline]
    pub async fn get_stats(&self) -> RagStats {
        RagStats {
            known_tags: self.tagger.known_tags().await.len(),
            ..self.pipeline.stats().await
        }
    }

    /// Drop every indexed record, keeping the system usable
    #[inline]
    pub async fn clear_data(&self) -> Result<()> {
        self.pipeline.clear().await
    }

    #[inline]
    pub async fn destroy(&self) {
        self.pipeline.destroy().await;
    }
}
