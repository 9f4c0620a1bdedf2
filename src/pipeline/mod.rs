
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::{ScoredResult, SearchOptions, SearchScope, VectorStore};
use crate::embeddings::{EmbeddingEngine, EngineInfo, chunk_note};
use crate::llm::{GenerationOptions, LlmProvider, TokenStream, build_provider};
use crate::models::{
    EmbeddingRecord, IndexReport, Note, RagQuery, RagResponse, RagStats, Source, TextChunk,
};
use crate::prompts::{PromptTemplate, build_context};
use crate::{RagError, Result};

/// Answer given when retrieval finds nothing above the threshold
pub const NO_RELEVANT_NOTES: &str =
    "I couldn't find any notes relevant to this question. Try rephrasing it or lowering the relevance threshold.";

const ANSWER_SYSTEM_PROMPT: &str =
    "You answer questions about the user's notes. Be concise and cite note titles when useful.";

/// Sources resolved up front, answer text still being generated
#[derive(Debug)]
pub struct RagStream {
    pub sources: Vec<Source>,
    pub tokens: TokenStream,
}

struct PipelineState {
    store: VectorStore,
    info: EngineInfo,
}

/// Indexing and retrieval over one embedding engine and one vector store
pub struct RagPipeline {
    config: Config,
    engine: EmbeddingEngine,
    provider: Arc<dyn LlmProvider>,
    state: OnceCell<PipelineState>,
    note_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RagPipeline {
    /// Build the engine and provider named in `config`. Nothing is loaded
    /// until the first operation or [`RagPipeline::initialize`].
    #[inline]
    pub fn new(config: Config) -> Result<Self> {
        let engine = EmbeddingEngine::spawn(&config.embedding)?;
        let provider = build_provider(&config.llm)?;
        Ok(Self::with_components(config, engine, provider))
    }

    #[inline]
    pub fn with_components(
        config: Config,
        engine: EmbeddingEngine,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            config,
            engine,
            provider,
            state: OnceCell::new(),
            note_locks: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    #[inline]
    pub fn llm_available(&self) -> bool {
        self.provider.is_available()
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    /// Load the embedding model, open the store and probe the language
    /// model. Concurrent callers share one initialization; a failure leaves
    /// the pipeline uninitialized so a later call can retry.
    #[inline]
    pub async fn initialize(&self) -> Result<()> {
        self.state().await.map(|_| ())
    }

    async fn state(&self) -> Result<&PipelineState> {
        self.state
            .get_or_try_init(|| async {
                info!("Initializing RAG pipeline");

                let info = self.engine.initialize().await?;
                let store = VectorStore::open(&self.config).await?;
                store.ensure_dimension(info.dimension).await?;

                if let Err(e) = self.provider.initialize().await {
                    warn!(
                        "Language model provider {} unavailable: {}",
                        self.provider.name(),
                        e
                    );
                }

                info!(
                    model = %info.model,
                    dimension = info.dimension,
                    records = store.count().await,
                    llm = self.provider.name(),
                    "RAG pipeline ready"
                );
                Ok::<_, RagError>(PipelineState { store, info })
            })
            .await
    }

    fn note_lock(&self, note_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .note_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(note_id.to_string()).or_default())
    }

    /// Hand back a lock from [`RagPipeline::note_lock`], forgetting it once
    /// no other task holds or waits on it
    fn release_note_lock(&self, note_id: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self
            .note_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks
            .get(note_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(note_id);
        }
    }

    /// Chunk, embed and store each note. A note that is already indexed has
    /// all of its previous records replaced at once. A failing note is
    /// recorded in the report and does not stop the others.
    #[inline]
    pub async fn index_notes(&self, notes: &[Note]) -> Result<IndexReport> {
        self.index_each(notes, "Indexed").await
    }

    /// Re-index edited notes; same replacement rules as
    /// [`RagPipeline::index_notes`]
    #[inline]
    pub async fn update_index(&self, notes: &[Note]) -> Result<IndexReport> {
        self.index_each(notes, "Updated").await
    }

    async fn index_each(&self, notes: &[Note], action: &str) -> Result<IndexReport> {
        let state = self.state().await?;
        let mut report = IndexReport::default();

        for note in notes {
            let lock = self.note_lock(&note.id);
            let outcome = {
                let _guard = lock.lock().await;
                self.index_one(state, note).await
            };
            self.release_note_lock(&note.id, lock);

            match outcome {
                Ok(chunks) => {
                    report.notes_indexed += 1;
                    report.chunks_indexed += chunks;
                }
                Err(e) => {
                    warn!(note_id = %note.id, "Failed to index note: {}", e);
                    report.record_failure(&note.id, &e);
                }
            }
        }

        info!(
            "{} {} notes ({} chunks, {} failures)",
            action,
            report.notes_indexed,
            report.chunks_indexed,
            report.failures.len()
        );
        Ok(report)
    }

    async fn index_one(&self, state: &PipelineState, note: &Note) -> Result<usize> {
        let embedded = self.engine.embed_note(note, &self.config.chunking).await?;
        let attempted = embedded.chunks.len() + embedded.skipped;

        if attempted > 0 && embedded.chunks.is_empty() {
            return Err(RagError::Embedding(format!(
                "All {} chunks of note {} failed to embed",
                attempted, note.id
            )));
        }
        if embedded.skipped > 0 {
            warn!(
                note_id = %note.id,
                "Skipped {} of {} chunks that failed to embed",
                embedded.skipped,
                attempted
            );
        }

        let records = embedded.into_records();
        let stored = records.len();

        if state.store.contains_note(&note.id).await {
            state.store.replace_note(&note.id, records).await?;
        } else {
            state.store.upsert(records).await?;
        }

        debug!(note_id = %note.id, chunks = stored, "Indexed note");
        Ok(stored)
    }

    /// Drop every record of the given notes, returning how many were removed
    #[inline]
    pub async fn remove_notes(&self, note_ids: &[String]) -> Result<usize> {
        let state = self.state().await?;
        let mut removed = 0;

        for note_id in note_ids {
            let lock = self.note_lock(note_id);
            let outcome = {
                let _guard = lock.lock().await;
                state.store.remove_by_note(note_id).await
            };
            self.release_note_lock(note_id, lock);
            removed += outcome?;
        }

        debug!("Removed {} records for {} notes", removed, note_ids.len());
        Ok(removed)
    }

    /// Stored records of one note in chunk order
    #[inline]
    pub async fn indexed_chunks(&self, note_id: &str) -> Result<Vec<EmbeddingRecord>> {
        Ok(self.state().await?.store.records_for_note(note_id).await)
    }

    /// Ranked chunks for a query, before any generation
    #[inline]
    pub async fn retrieve(&self, query: &RagQuery) -> Result<Vec<ScoredResult>> {
        let state = self.state().await?;

        let text = query.text.trim();
        if text.is_empty() {
            return Err(RagError::Retrieval("Query text is empty".to_string()));
        }

        let vector = self.engine.embed_query(text).await?;
        let scope = match &query.note_ids {
            Some(note_ids) => SearchScope::notes(note_ids.iter().cloned()),
            None => SearchScope::Corpus,
        };
        let options = SearchOptions::new(
            query.top_k.unwrap_or(self.config.search.top_k),
            query.threshold.unwrap_or(self.config.search.threshold),
        )
        .with_scope(scope);

        let results = state.store.search(&vector, &options).await?;
        debug!("Retrieved {} chunks for query", results.len());
        Ok(results)
    }

    /// Relevant notes for a query, without generating an answer
    #[inline]
    pub async fn search(&self, query: &RagQuery) -> Result<Vec<Source>> {
        let results = self.retrieve(query).await?;
        Ok(collect_sources(&results, usize::MAX))
    }

    /// Answer a question from the most relevant chunks
    #[inline]
    pub async fn query(&self, query: &RagQuery) -> Result<RagResponse> {
        let results = self.retrieve(query).await?;
        if results.is_empty() {
            return Ok(RagResponse {
                answer: NO_RELEVANT_NOTES.to_string(),
                sources: Vec::new(),
            });
        }

        let prompt = self.answer_prompt(query, &results);
        let generation = self
            .provider
            .generate(&prompt, &self.answer_options())
            .await?;

        Ok(RagResponse {
            answer: generation.text.trim().to_string(),
            sources: collect_sources(&results, usize::MAX),
        })
    }

    /// Same retrieval as [`RagPipeline::query`], with the answer streamed
    #[inline]
    pub async fn stream_query(&self, query: &RagQuery) -> Result<RagStream> {
        let results = self.retrieve(query).await?;
        if results.is_empty() {
            return Ok(RagStream {
                sources: Vec::new(),
                tokens: TokenStream::from_fragments([NO_RELEVANT_NOTES]),
            });
        }

        let prompt = self.answer_prompt(query, &results);
        let tokens = self
            .provider
            .generate_stream(&prompt, &self.answer_options())
            .await?;

        Ok(RagStream {
            sources: collect_sources(&results, usize::MAX),
            tokens,
        })
    }

    fn answer_prompt(&self, query: &RagQuery, results: &[ScoredResult]) -> String {
        let context = build_context(results, self.config.search.max_context_chars);
        PromptTemplate::Answer {
            question: &query.text,
            context: &context,
        }
        .render()
    }

    fn answer_options(&self) -> GenerationOptions {
        GenerationOptions::from(&self.config.llm).with_system(ANSWER_SYSTEM_PROMPT)
    }

    /// Notes closest to an indexed note, never including the note itself.
    /// An unknown note id yields an empty list.
    #[inline]
    pub async fn get_similar_notes(&self, note_id: &str, limit: usize) -> Result<Vec<Source>> {
        let state = self.state().await?;

        let Some(representative) = state.store.first_chunk(note_id).await else {
            debug!("Note {} is not indexed", note_id);
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let options = SearchOptions::new(
            state.store.count().await,
            self.config.search.similar_threshold,
        )
        .excluding(note_id);
        let results = state
            .store
            .search(&representative.vector, &options)
            .await?;

        Ok(collect_sources(&results, limit))
    }

    /// Best-scoring chunk of each indexed note near `note`, excluding the
    /// note itself, at most `max_notes` entries
    #[inline]
    pub async fn neighbors(
        &self,
        note: &Note,
        max_notes: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredResult>> {
        let state = self.state().await?;

        let Some(text) = chunk_note(note, &self.config.chunking)
            .first()
            .map(TextChunk::embedding_text)
        else {
            return Ok(Vec::new());
        };

        let vector = self.engine.embed_query(&text).await?;
        let options =
            SearchOptions::new(state.store.count().await, threshold).excluding(note.id.as_str());
        let results = state.store.search(&vector, &options).await?;

        let mut seen = HashSet::new();
        Ok(results
            .into_iter()
            .filter(|r| seen.insert(r.record.note_id.clone()))
            .take(max_notes)
            .collect())
    }

    #[inline]
    pub async fn stats(&self) -> RagStats {
        match self.state.get() {
            Some(state) => RagStats {
                initialized: true,
                indexed_notes: state.store.note_count().await,
                indexed_chunks: state.store.count().await,
                dimension: Some(state.store.dimension().await.unwrap_or(state.info.dimension)),
                model: state.info.model.clone(),
                llm_available: self.provider.is_available(),
                known_tags: 0,
            },
            None => RagStats {
                model: self.config.embedding.model.clone(),
                ..RagStats::default()
            },
        }
    }

    /// Remove every record. The pipeline stays initialized.
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        let state = self.state().await?;
        state.store.clear().await?;
        info!("Cleared the note index");
        Ok(())
    }

    /// Stop the embedding worker and close the store
    #[inline]
    pub async fn destroy(&self) {
        self.engine.shutdown().await;
        if let Some(state) = self.state.get() {
            state.store.close().await;
        }
        info!("RAG pipeline shut down");
    }
}

/// One source per note, keeping each note's best score, in ranking order
fn collect_sources(results: &[ScoredResult], limit: usize) -> Vec<Source> {
    let mut seen = HashSet::new();
    results
        .iter()
        .filter(|r| seen.insert(r.record.note_id.as_str()))
        .take(limit)
        .map(|r| Source {
            note_id: r.record.note_id.clone(),
            score: r.score,
            title: r.record.metadata.title.clone(),
        })
        .collect()
}
