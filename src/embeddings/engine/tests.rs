use super::*;
use crate::embeddings::model::{HashingModel, dot};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fails on any text containing "fail", otherwise defers to the hashing model
struct FlakyModel {
    inner: HashingModel,
}

impl EmbeddingModel for FlakyModel {
    fn name(&self) -> &str {
        "flaky"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(&mut self, text: &str) -> anyhow::Result<Vec<f32>> {
        if text.contains("fail") {
            anyhow::bail!("refusing to embed '{}'", text);
        }
        self.inner.embed(text)
    }
}

/// Returns vectors of the wrong length
struct WrongSizeModel;

impl EmbeddingModel for WrongSizeModel {
    fn name(&self) -> &str {
        "wrong-size"
    }

    fn dimension(&self) -> usize {
        8
    }

    fn embed(&mut self, _text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![1.0; 4])
    }
}

fn local_engine() -> EmbeddingEngine {
    EmbeddingEngine::spawn(&EmbeddingConfig {
        dimension: 64,
        ..EmbeddingConfig::default()
    })
    .expect("should spawn engine")
}

fn flaky_engine() -> EmbeddingEngine {
    EmbeddingEngine::with_loader(
        || {
            Ok(Box::new(FlakyModel {
                inner: HashingModel::new(32),
            }) as Box<dyn EmbeddingModel>)
        },
        Duration::from_secs(5),
    )
    .expect("should spawn engine")
}

#[tokio::test]
async fn initialize_reports_model() {
    let engine = local_engine();
    let info = engine.initialize().await.expect("should initialize");

    assert_eq!(info.dimension, 64);
    assert_eq!(info.model, crate::embeddings::model::LOCAL_MODEL_NAME);
    assert_eq!(engine.info(), Some(&info));
}

#[tokio::test]
async fn model_loads_once() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let engine = EmbeddingEngine::with_loader(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(HashingModel::new(16)) as Box<dyn EmbeddingModel>)
        },
        Duration::from_secs(5),
    )
    .expect("should spawn engine");

    engine.initialize().await.expect("should initialize");
    engine.initialize().await.expect("should initialize again");
    engine.embed_query("hello").await.expect("should embed");

    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn embedding_lazily_loads_model() {
    let engine = local_engine();
    let vector = engine.embed_query("ownership").await.expect("should embed");
    assert_eq!(vector.len(), 64);
}

#[tokio::test]
async fn failed_load_can_be_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let engine = EmbeddingEngine::with_loader(
        move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("weights missing");
            }
            Ok(Box::new(HashingModel::new(16)) as Box<dyn EmbeddingModel>)
        },
        Duration::from_secs(5),
    )
    .expect("should spawn engine");

    let first = engine.initialize().await;
    assert!(matches!(first, Err(RagError::Initialization(_))));

    let second = engine.initialize().await.expect("retry should succeed");
    assert_eq!(second.dimension, 16);
}

#[tokio::test]
async fn slow_initialization_times_out() {
    let engine = EmbeddingEngine::with_loader(
        || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Box::new(HashingModel::new(16)) as Box<dyn EmbeddingModel>)
        },
        Duration::from_millis(50),
    )
    .expect("should spawn engine");

    let result = engine.initialize().await;
    assert!(matches!(result, Err(RagError::Timeout { .. })));
}

#[tokio::test]
async fn failing_chunk_does_not_abort_batch() {
    let engine = flaky_engine();
    let results = engine
        .embed_texts(vec![
            "first".to_string(),
            "please fail".to_string(),
            "third".to_string(),
        ])
        .await
        .expect("batch should succeed");

    assert_eq!(results.len(), 3);
    assert!(results[0].is_some());
    assert!(results[1].is_none());
    assert!(results[2].is_some());
}

#[tokio::test]
async fn query_failure_propagates() {
    let engine = flaky_engine();
    let result = engine.embed_query("this will fail").await;
    assert!(matches!(result, Err(RagError::Embedding(_))));
}

#[tokio::test]
async fn wrong_dimension_is_a_failure() {
    let engine = EmbeddingEngine::with_loader(
        || Ok(Box::new(WrongSizeModel) as Box<dyn EmbeddingModel>),
        Duration::from_secs(5),
    )
    .expect("should spawn engine");

    let results = engine
        .embed_texts(vec!["anything".to_string()])
        .await
        .expect("batch should succeed");
    assert_eq!(results, vec![None]);
    assert!(engine.embed_query("anything").await.is_err());
}

#[tokio::test]
async fn embed_note_skips_failed_chunks() {
    let engine = flaky_engine();
    let note = Note::new(
        "n1",
        "Mixed",
        "# Good\n\nThis section embeds.\n\n# Bad\n\nThis section will fail.",
    );

    let embedded = engine
        .embed_note(&note, &ChunkingConfig::default())
        .await
        .expect("should embed note");

    assert_eq!(embedded.chunks.len(), 1);
    assert_eq!(embedded.vectors.len(), 1);
    assert_eq!(embedded.skipped, 1);
    assert_eq!(embedded.chunks[0].metadata.heading_path, "Good");

    let records = embedded.into_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].chunk_id, "n1#0");
}

#[tokio::test]
async fn empty_note_embeds_nothing() {
    let engine = local_engine();
    let embedded = engine
        .embed_note(&Note::new("empty", "", ""), &ChunkingConfig::default())
        .await
        .expect("should embed note");
    assert!(embedded.chunks.is_empty());
    assert_eq!(embedded.skipped, 0);
}

#[tokio::test]
async fn same_text_same_vector() {
    let engine = local_engine();
    let a = engine.embed_query("rust borrowing").await.expect("should embed");
    let b = engine.embed_query("rust borrowing").await.expect("should embed");
    assert_eq!(a, b);
    assert!((dot(&a, &b) - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn concurrent_requests_are_all_answered() {
    let engine = Arc::new(local_engine());
    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine.embed_query(&format!("query number {i}")).await
        }));
    }

    for handle in handles {
        let vector = handle.await.expect("task should join").expect("should embed");
        assert_eq!(vector.len(), 64);
    }
}

#[tokio::test]
async fn requests_after_shutdown_fail() {
    let engine = local_engine();
    engine.initialize().await.expect("should initialize");
    engine.shutdown().await;

    assert!(!engine.is_running());
    let result = engine.embed_query("late").await;
    assert!(matches!(result, Err(RagError::Initialization(_))));
}
