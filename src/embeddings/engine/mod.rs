#[cfg(test)]
mod tests;

use std::sync::{Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::RagError;
use crate::config::EmbeddingConfig;
use crate::embeddings::chunking::{ChunkingConfig, chunk_note};
use crate::embeddings::model::{EmbeddingModel, l2_normalize, load_model, validate_vector};
use crate::models::{EmbeddingRecord, Note, TextChunk};

const REQUEST_QUEUE_DEPTH: usize = 32;
const WORKER_THREAD_NAME: &str = "notes-rag-embedder";

/// Produces the model on first use, on the worker thread
pub type ModelLoader = Box<dyn FnMut() -> anyhow::Result<Box<dyn EmbeddingModel>> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInfo {
    pub model: String,
    pub dimension: usize,
}

/// A note's chunks alongside the vectors that embedded successfully
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedNote {
    pub chunks: Vec<TextChunk>,
    pub vectors: Vec<Vec<f32>>,
    /// Chunks dropped because their embedding failed
    pub skipped: usize,
}

impl EmbeddedNote {
    #[inline]
    pub fn into_records(self) -> Vec<EmbeddingRecord> {
        self.chunks
            .into_iter()
            .zip(self.vectors)
            .map(|(chunk, vector)| EmbeddingRecord::from_chunk(chunk, vector))
            .collect()
    }
}

#[derive(Debug)]
enum WorkerError {
    Load(anyhow::Error),
    Embed(anyhow::Error),
}

impl From<WorkerError> for RagError {
    fn from(error: WorkerError) -> Self {
        match error {
            WorkerError::Load(e) => RagError::Initialization(format!("{:#}", e)),
            WorkerError::Embed(e) => RagError::Embedding(format!("{:#}", e)),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, WorkerError>>;

enum EngineRequest {
    Initialize {
        reply: Reply<EngineInfo>,
    },
    Embed {
        texts: Vec<String>,
        reply: Reply<Vec<Option<Vec<f32>>>>,
    },
    EmbedQuery {
        text: String,
        reply: Reply<Vec<f32>>,
    },
    Shutdown,
}

/// Embedding model isolated on a dedicated OS thread.
///
/// Requests are queued on a bounded channel and answered one at a time in
/// arrival order, so a single engine never runs concurrent inference.
pub struct EmbeddingEngine {
    sender: mpsc::Sender<EngineRequest>,
    init_timeout: Duration,
    info: OnceLock<EngineInfo>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EmbeddingEngine {
    /// Start an engine for the configured embedding backend
    #[inline]
    pub fn spawn(config: &EmbeddingConfig) -> crate::Result<Self> {
        let model_config = config.clone();
        Self::with_loader(
            move || load_model(&model_config),
            Duration::from_secs(config.init_timeout_secs),
        )
    }

    /// Start an engine around a custom model loader
    #[inline]
    pub fn with_loader<F>(loader: F, init_timeout: Duration) -> crate::Result<Self>
    where
        F: FnMut() -> anyhow::Result<Box<dyn EmbeddingModel>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let loader: ModelLoader = Box::new(loader);

        let worker = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(loader, receiver))
            .context("Failed to spawn embedding worker thread")?;

        Ok(Self {
            sender,
            init_timeout,
            info: OnceLock::new(),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Load the model if it is not loaded yet. Bounded by the init timeout.
    #[inline]
    pub async fn initialize(&self) -> crate::Result<EngineInfo> {
        if let Some(info) = self.info.get() {
            return Ok(info.clone());
        }

        let request = self.request(|reply| EngineRequest::Initialize { reply });
        let info = tokio::time::timeout(self.init_timeout, request)
            .await
            .map_err(|_| RagError::Timeout {
                operation: "embedding engine initialization".to_string(),
            })??;

        Ok(self.info.get_or_init(|| info).clone())
    }

    /// Model details, once the model has loaded
    #[inline]
    pub fn info(&self) -> Option<&EngineInfo> {
        self.info.get()
    }

    /// Embed texts in order. A failed text yields `None` without affecting
    /// the others.
    #[inline]
    pub async fn embed_texts(&self, texts: Vec<String>) -> crate::Result<Vec<Option<Vec<f32>>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(|reply| EngineRequest::Embed { texts, reply })
            .await
    }

    /// Chunk and embed a note, dropping chunks whose embedding failed
    #[inline]
    pub async fn embed_note(
        &self,
        note: &Note,
        chunking: &ChunkingConfig,
    ) -> crate::Result<EmbeddedNote> {
        let chunks = chunk_note(note, chunking);
        let texts = chunks.iter().map(TextChunk::embedding_text).collect();
        let results = self.embed_texts(texts).await?;

        let mut embedded = EmbeddedNote {
            chunks: Vec::with_capacity(chunks.len()),
            vectors: Vec::with_capacity(chunks.len()),
            skipped: 0,
        };

        for (chunk, result) in chunks.into_iter().zip(results) {
            match result {
                Some(vector) => {
                    embedded.chunks.push(chunk);
                    embedded.vectors.push(vector);
                }
                None => embedded.skipped += 1,
            }
        }

        Ok(embedded)
    }

    /// Embed a search query. Failure propagates.
    #[inline]
    pub async fn embed_query(&self, text: &str) -> crate::Result<Vec<f32>> {
        let text = text.to_string();
        self.request(|reply| EngineRequest::EmbedQuery { text, reply })
            .await
    }

    /// Stop the worker thread and wait for it to exit
    #[inline]
    pub async fn shutdown(&self) {
        if self.sender.send(EngineRequest::Shutdown).await.is_err() {
            debug!("Embedding worker already stopped");
        }

        let handle = self
            .worker
            .lock()
            .map(|mut worker| worker.take())
            .unwrap_or_default();

        if let Some(handle) = handle {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Embedding worker did not exit cleanly");
            }
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn request<T, F>(&self, build: F) -> crate::Result<T>
    where
        F: FnOnce(Reply<T>) -> EngineRequest,
    {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| RagError::Initialization("Embedding engine is shut down".to_string()))?;

        let result = response.await.map_err(|_| {
            RagError::Initialization("Embedding worker stopped before replying".to_string())
        })?;

        result.map_err(RagError::from)
    }
}

fn run_worker(mut loader: ModelLoader, mut receiver: mpsc::Receiver<EngineRequest>) {
    let mut model: Option<Box<dyn EmbeddingModel>> = None;
    debug!("Embedding worker started");

    while let Some(request) = receiver.blocking_recv() {
        match request {
            EngineRequest::Initialize { reply } => {
                let result = ensure_loaded(&mut model, &mut loader).map(|m| EngineInfo {
                    model: m.name().to_string(),
                    dimension: m.dimension(),
                });
                let _ = reply.send(result);
            }
            EngineRequest::Embed { texts, reply } => {
                let result =
                    ensure_loaded(&mut model, &mut loader).map(|m| embed_batch(&mut **m, &texts));
                let _ = reply.send(result);
            }
            EngineRequest::EmbedQuery { text, reply } => {
                let result = ensure_loaded(&mut model, &mut loader).and_then(|m| {
                    m.embed(&text)
                        .and_then(|vector| finish_vector(m.dimension(), vector))
                        .map_err(WorkerError::Embed)
                });
                let _ = reply.send(result);
            }
            EngineRequest::Shutdown => break,
        }
    }

    debug!("Embedding worker stopped");
}

fn ensure_loaded<'a>(
    slot: &'a mut Option<Box<dyn EmbeddingModel>>,
    loader: &mut ModelLoader,
) -> Result<&'a mut Box<dyn EmbeddingModel>, WorkerError> {
    if slot.is_none() {
        let model = loader()
            .context("Failed to load embedding model")
            .map_err(WorkerError::Load)?;
        info!(
            "Loaded embedding model {} ({} dimensions)",
            model.name(),
            model.dimension()
        );
        *slot = Some(model);
    }

    slot.as_mut()
        .ok_or_else(|| WorkerError::Load(anyhow::anyhow!("Embedding model unavailable")))
}

fn embed_batch(model: &mut dyn EmbeddingModel, texts: &[String]) -> Vec<Option<Vec<f32>>> {
    let dimension = model.dimension();

    model
        .embed_batch(texts)
        .into_iter()
        .enumerate()
        .map(|(index, result)| {
            match result.and_then(|vector| finish_vector(dimension, vector)) {
                Ok(vector) => Some(vector),
                Err(e) => {
                    warn!("Skipping chunk {} of {}: {:#}", index, texts.len(), e);
                    None
                }
            }
        })
        .collect()
}

fn finish_vector(dimension: usize, mut vector: Vec<f32>) -> anyhow::Result<Vec<f32>> {
    validate_vector(&vector)?;
    if dimension != 0 && vector.len() != dimension {
        anyhow::bail!(
            "Model returned {} dimensions, expected {}",
            vector.len(),
            dimension
        );
    }
    l2_normalize(&mut vector);
    Ok(vector)
}
