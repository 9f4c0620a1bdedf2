use super::*;
use crate::embeddings::model::l2_normalize;
use crate::models::{ChunkMetadata, TextChunk};
use tempfile::TempDir;

fn record(note_id: &str, order: usize, vector: &[f32]) -> EmbeddingRecord {
    let mut vector = vector.to_vec();
    l2_normalize(&mut vector);

    let chunk = TextChunk {
        id: TextChunk::chunk_id(note_id, order),
        note_id: note_id.to_string(),
        order,
        text: format!("{} chunk {}", note_id, order),
        metadata: ChunkMetadata {
            title: format!("Title {}", note_id),
            ..ChunkMetadata::default()
        },
    };
    EmbeddingRecord::from_chunk(chunk, vector)
}

fn persistent_config(temp_dir: &TempDir) -> Config {
    Config::with_base_dir(temp_dir.path().to_path_buf())
}

#[tokio::test]
async fn search_ranks_by_similarity() {
    let store = VectorStore::in_memory();
    store
        .upsert(vec![
            record("far", 0, &[0.0, 1.0, 0.0]),
            record("near", 0, &[1.0, 0.1, 0.0]),
            record("middle", 0, &[1.0, 1.0, 0.0]),
        ])
        .await
        .expect("should upsert");

    let results = store
        .search(&[1.0, 0.0, 0.0], &SearchOptions::new(10, -1.0))
        .await
        .expect("should search");

    let ids: Vec<&str> = results.iter().map(|r| r.record.note_id.as_str()).collect();
    assert_eq!(ids, vec!["near", "middle", "far"]);
    assert!(results[0].score > results[1].score);
    assert!(results[0].score <= 1.0 + f32::EPSILON);
}

#[tokio::test]
async fn search_applies_threshold_and_limit() {
    let store = VectorStore::in_memory();
    store
        .upsert(vec![
            record("a", 0, &[1.0, 0.0]),
            record("b", 0, &[0.9, 0.1]),
            record("c", 0, &[0.0, 1.0]),
        ])
        .await
        .expect("should upsert");

    let results = store
        .search(&[1.0, 0.0], &SearchOptions::new(10, 0.5))
        .await
        .expect("should search");
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.score >= 0.5));

    let limited = store
        .search(&[1.0, 0.0], &SearchOptions::new(1, 0.0))
        .await
        .expect("should search");
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].record.note_id, "a");

    let none = store
        .search(&[1.0, 0.0], &SearchOptions::new(0, 0.0))
        .await
        .expect("should search");
    assert!(none.is_empty());
}

#[tokio::test]
async fn equal_scores_keep_insertion_order() {
    let store = VectorStore::in_memory();
    store
        .upsert(vec![
            record("first", 0, &[1.0, 0.0]),
            record("second", 0, &[1.0, 0.0]),
            record("third", 0, &[1.0, 0.0]),
        ])
        .await
        .expect("should upsert");

    let results = store
        .search(&[1.0, 0.0], &SearchOptions::new(3, 0.0))
        .await
        .expect("should search");
    let ids: Vec<&str> = results.iter().map(|r| r.record.note_id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn scope_and_exclusions_filter_results() {
    let store = VectorStore::in_memory();
    store
        .upsert(vec![
            record("a", 0, &[1.0, 0.0]),
            record("b", 0, &[1.0, 0.1]),
            record("c", 0, &[1.0, 0.2]),
        ])
        .await
        .expect("should upsert");

    let scoped = store
        .search(
            &[1.0, 0.0],
            &SearchOptions::new(10, 0.0).with_scope(SearchScope::notes(["b", "c"])),
        )
        .await
        .expect("should search");
    assert_eq!(scoped.len(), 2);
    assert!(scoped.iter().all(|r| r.record.note_id != "a"));

    let excluded = store
        .search(&[1.0, 0.0], &SearchOptions::new(10, 0.0).excluding("a"))
        .await
        .expect("should search");
    assert_eq!(excluded[0].record.note_id, "b");

    let empty_scope = store
        .search(
            &[1.0, 0.0],
            &SearchOptions::new(10, 0.0).with_scope(SearchScope::notes(Vec::<String>::new())),
        )
        .await
        .expect("should search");
    assert!(empty_scope.is_empty());
}

#[tokio::test]
async fn empty_store_returns_nothing() {
    let store = VectorStore::in_memory();
    let results = store
        .search(&[1.0, 0.0], &SearchOptions::new(5, 0.0))
        .await
        .expect("should search");
    assert!(results.is_empty());
    assert_eq!(store.dimension().await, None);
}

#[tokio::test]
async fn dimension_mismatch_is_rejected() {
    let store = VectorStore::in_memory();
    store
        .upsert(vec![record("a", 0, &[1.0, 0.0, 0.0])])
        .await
        .expect("should upsert");

    let error = store
        .upsert(vec![record("b", 0, &[1.0, 0.0])])
        .await
        .expect_err("should reject short vector");
    assert!(matches!(
        error,
        RagError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    ));
    assert_eq!(store.count().await, 1);

    let search_error = store
        .search(&[1.0, 0.0], &SearchOptions::new(5, 0.0))
        .await
        .expect_err("should reject short query");
    assert!(matches!(search_error, RagError::DimensionMismatch { .. }));

    assert!(store.ensure_dimension(3).await.is_ok());
    assert!(store.ensure_dimension(4).await.is_err());
}

#[tokio::test]
async fn mixed_batch_is_rejected_whole() {
    let store = VectorStore::in_memory();
    let error = store
        .upsert(vec![record("a", 0, &[1.0, 0.0]), record("a", 1, &[1.0, 0.0, 0.0])])
        .await
        .expect_err("should reject mixed batch");
    assert!(matches!(error, RagError::DimensionMismatch { .. }));
    assert_eq!(store.count().await, 0);
    assert_eq!(store.dimension().await, None);
}

#[tokio::test]
async fn upsert_replaces_same_chunk() {
    let store = VectorStore::in_memory();
    store
        .upsert(vec![record("a", 0, &[1.0, 0.0]), record("b", 0, &[0.0, 1.0])])
        .await
        .expect("should upsert");
    store
        .upsert(vec![record("a", 0, &[0.0, 1.0])])
        .await
        .expect("should upsert again");

    assert_eq!(store.count().await, 2);
    let records = store.records_for_note("a").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].vector, vec![0.0, 1.0]);
}

#[tokio::test]
async fn last_duplicate_in_a_batch_wins() {
    let store = VectorStore::in_memory();
    assert!(!store.contains_note("a").await);

    store
        .upsert(vec![
            record("a", 0, &[1.0, 0.0]),
            record("a", 1, &[1.0, 1.0]),
            record("a", 0, &[0.0, 1.0]),
        ])
        .await
        .expect("should upsert");

    assert!(store.contains_note("a").await);
    assert_eq!(store.count().await, 2);
    let records = store.records_for_note("a").await;
    assert_eq!(records[0].order, 0);
    assert_eq!(records[0].vector, vec![0.0, 1.0]);
}

#[tokio::test]
async fn large_batches_replace_matching_chunks() {
    let store = VectorStore::in_memory();
    let first: Vec<EmbeddingRecord> = (0..2_000).map(|i| record("bulk", i, &[1.0, 0.0])).collect();
    store.upsert(first).await.expect("should upsert");

    let second: Vec<EmbeddingRecord> = (1_000..3_000)
        .map(|i| record("bulk", i, &[0.0, 1.0]))
        .collect();
    store.upsert(second).await.expect("should upsert again");

    let records = store.records_for_note("bulk").await;
    assert_eq!(records.len(), 3_000);
    assert_eq!(records[999].vector, vec![1.0, 0.0]);
    assert_eq!(records[1_000].vector, vec![0.0, 1.0]);
}

#[tokio::test]
async fn replace_note_drops_stale_chunks() {
    let store = VectorStore::in_memory();
    store
        .upsert(vec![
            record("a", 0, &[1.0, 0.0]),
            record("a", 1, &[1.0, 0.0]),
            record("a", 2, &[1.0, 0.0]),
            record("b", 0, &[0.0, 1.0]),
        ])
        .await
        .expect("should upsert");

    let removed = store
        .replace_note("a", vec![record("a", 0, &[0.0, 1.0])])
        .await
        .expect("should replace");
    assert_eq!(removed, 3);
    assert_eq!(store.records_for_note("a").await.len(), 1);
    assert_eq!(store.count().await, 2);

    let wrong_note = store
        .replace_note("a", vec![record("b", 1, &[0.0, 1.0])])
        .await;
    assert!(wrong_note.is_err());
}

#[tokio::test]
async fn records_for_note_are_ordered() {
    let store = VectorStore::in_memory();
    store
        .upsert(vec![
            record("a", 2, &[1.0, 0.0]),
            record("a", 0, &[1.0, 0.0]),
            record("a", 1, &[1.0, 0.0]),
        ])
        .await
        .expect("should upsert");

    let orders: Vec<usize> = store
        .records_for_note("a")
        .await
        .iter()
        .map(|r| r.order)
        .collect();
    assert_eq!(orders, vec![0, 1, 2]);
    assert_eq!(
        store.first_chunk("a").await.map(|r| r.chunk_id),
        Some("a#0".to_string())
    );
    assert!(store.first_chunk("missing").await.is_none());
}

#[tokio::test]
async fn remove_and_clear() {
    let store = VectorStore::in_memory();
    store
        .upsert(vec![
            record("a", 0, &[1.0, 0.0]),
            record("a", 1, &[1.0, 0.0]),
            record("b", 0, &[0.0, 1.0]),
        ])
        .await
        .expect("should upsert");

    assert_eq!(store.note_ids().await, vec!["a", "b"]);
    assert_eq!(store.remove_by_note("a").await.expect("should remove"), 2);
    assert_eq!(store.remove_by_note("a").await.expect("should remove"), 0);
    assert_eq!(store.note_count().await, 1);

    store.clear().await.expect("should clear");
    assert_eq!(store.count().await, 0);
    assert_eq!(store.dimension().await, Some(2));
}

#[tokio::test]
async fn persisted_records_survive_reopen() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = persistent_config(&temp_dir);

    {
        let store = VectorStore::open(&config).await.expect("should open");
        store
            .upsert(vec![record("a", 0, &[1.0, 0.0]), record("b", 0, &[0.0, 1.0])])
            .await
            .expect("should upsert");
        store.remove_by_note("b").await.expect("should remove");
        store.close().await;
    }

    let reopened = VectorStore::open(&config).await.expect("should reopen");
    assert_eq!(reopened.count().await, 1);
    assert_eq!(reopened.dimension().await, Some(2));

    let results = reopened
        .search(&[1.0, 0.0], &SearchOptions::new(5, 0.5))
        .await
        .expect("should search");
    assert_eq!(results[0].record.note_id, "a");
    assert_eq!(results[0].record.metadata.title, "Title a");
}

#[tokio::test]
async fn clear_is_persisted() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = persistent_config(&temp_dir);

    let store = VectorStore::open(&config).await.expect("should open");
    store
        .upsert(vec![record("a", 0, &[1.0, 0.0])])
        .await
        .expect("should upsert");
    store.clear().await.expect("should clear");
    store.close().await;

    let reopened = VectorStore::open(&config).await.expect("should reopen");
    assert_eq!(reopened.count().await, 0);
}

#[tokio::test]
async fn persistence_can_be_disabled() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = persistent_config(&temp_dir);
    config.storage.persist = false;

    let store = VectorStore::open(&config).await.expect("should open");
    assert!(!config.database_path().exists());
}
