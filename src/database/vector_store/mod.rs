#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::sqlite::{Database, EmbeddingQueries};
use crate::embeddings::model::dot;
use crate::models::EmbeddingRecord;
use crate::{RagError, Result};

/// Which notes a search may return
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SearchScope {
    #[default]
    Corpus,
    Notes(HashSet<String>),
}

impl SearchScope {
    #[inline]
    pub fn notes<I, S>(note_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Notes(note_ids.into_iter().map(Into::into).collect())
    }

    fn contains(&self, note_id: &str) -> bool {
        match self {
            Self::Corpus => true,
            Self::Notes(ids) => ids.contains(note_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    /// Results scoring below this are discarded
    pub threshold: f32,
    pub scope: SearchScope,
    pub exclude_notes: HashSet<String>,
}

impl SearchOptions {
    #[inline]
    pub fn new(limit: usize, threshold: f32) -> Self {
        Self {
            limit,
            threshold,
            scope: SearchScope::Corpus,
            exclude_notes: HashSet::new(),
        }
    }

    #[inline]
    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    #[inline]
    pub fn excluding(mut self, note_id: impl Into<String>) -> Self {
        self.exclude_notes.insert(note_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredResult {
    pub record: EmbeddingRecord,
    pub score: f32,
}

#[derive(Debug, Default)]
struct FlatIndex {
    /// Insertion order
    records: Vec<EmbeddingRecord>,
    dimension: Option<usize>,
}

impl FlatIndex {
    fn check_dimensions(&self, records: &[EmbeddingRecord]) -> Result<Option<usize>> {
        let mut expected = self.dimension;
        for record in records {
            let actual = record.dimension();
            if actual == 0 {
                return Err(RagError::Embedding(format!(
                    "Refusing to store empty vector for chunk {}",
                    record.chunk_id
                )));
            }
            match expected {
                Some(expected) if expected != actual => {
                    return Err(RagError::DimensionMismatch { expected, actual });
                }
                Some(_) => {}
                None => expected = Some(actual),
            }
        }
        Ok(expected)
    }

    /// Later records win over earlier ones with the same `(note_id, chunk_id)`,
    /// whether already stored or in the same batch
    fn insert(&mut self, records: Vec<EmbeddingRecord>) {
        let keep: Vec<bool> = {
            let mut latest: HashMap<(&str, &str), usize> = HashMap::with_capacity(records.len());
            for (position, record) in records.iter().enumerate() {
                latest.insert((record.note_id.as_str(), record.chunk_id.as_str()), position);
            }

            self.records
                .retain(|r| !latest.contains_key(&(r.note_id.as_str(), r.chunk_id.as_str())));
            records
                .iter()
                .enumerate()
                .map(|(position, r)| {
                    latest.get(&(r.note_id.as_str(), r.chunk_id.as_str())) == Some(&position)
                })
                .collect()
        };

        self.records.extend(
            records
                .into_iter()
                .zip(keep)
                .filter_map(|(record, latest)| latest.then_some(record)),
        );
    }

    fn remove_note(&mut self, note_id: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.note_id != note_id);
        before - self.records.len()
    }
}

/// Flat in-memory vector index with optional SQLite write-through.
///
/// Every mutation reaches SQLite before the in-memory index changes, and both
/// happen under one write lock, so readers see either the old or the new state
/// of a note and never a mix.
pub struct VectorStore {
    index: RwLock<FlatIndex>,
    database: Option<Database>,
}

impl VectorStore {
    /// Open the store for a configuration, loading persisted records when
    /// persistence is enabled
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        if !config.storage.persist {
            return Ok(Self::in_memory());
        }

        let database = Database::initialize_from_data_dir(config.get_base_dir())
            .await
            .map_err(|e| RagError::Database(format!("{:#}", e)))?;
        Self::with_database(database).await
    }

    /// Store backed by an open database; existing rows are loaded in insertion order
    #[inline]
    pub async fn with_database(database: Database) -> Result<Self> {
        let loaded = EmbeddingQueries::load_all(database.pool())
            .await
            .map_err(|e| RagError::Database(format!("{:#}", e)))?;

        let mut index = FlatIndex::default();
        for record in loaded {
            let dimension = *index.dimension.get_or_insert(record.dimension());
            if record.dimension() == dimension {
                index.records.push(record);
            } else {
                warn!(
                    "Ignoring stored chunk {} with {} dimensions (index uses {})",
                    record.chunk_id,
                    record.dimension(),
                    dimension
                );
            }
        }

        info!(
            "Loaded {} embedding records from the database",
            index.records.len()
        );

        Ok(Self {
            index: RwLock::new(index),
            database: Some(database),
        })
    }

    #[inline]
    pub fn in_memory() -> Self {
        Self {
            index: RwLock::new(FlatIndex::default()),
            database: None,
        }
    }

    /// Fix the vector size, or confirm it matches the one already fixed
    #[inline]
    pub async fn ensure_dimension(&self, dimension: usize) -> Result<()> {
        let mut index = self.index.write().await;
        match index.dimension {
            Some(expected) if expected != dimension => Err(RagError::DimensionMismatch {
                expected,
                actual: dimension,
            }),
            Some(_) => Ok(()),
            None => {
                index.dimension = Some(dimension);
                Ok(())
            }
        }
    }

    /// Insert records, replacing any with the same `(note_id, chunk_id)`
    #[inline]
    pub async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut index = self.index.write().await;
        let dimension = index.check_dimensions(&records)?;

        if let Some(database) = &self.database {
            EmbeddingQueries::upsert(database.pool(), &records)
                .await
                .map_err(|e| RagError::Database(format!("{:#}", e)))?;
        }

        debug!("Upserting {} records", records.len());
        index.dimension = dimension;
        index.insert(records);
        Ok(())
    }

    /// Atomically drop every record of `note_id` and insert `records`
    #[inline]
    pub async fn replace_note(&self, note_id: &str, records: Vec<EmbeddingRecord>) -> Result<usize> {
        if let Some(stray) = records.iter().find(|r| r.note_id != note_id) {
            return Err(RagError::Retrieval(format!(
                "Record {} belongs to note {}, not {}",
                stray.chunk_id, stray.note_id, note_id
            )));
        }

        let mut index = self.index.write().await;
        let dimension = index.check_dimensions(&records)?;

        if let Some(database) = &self.database {
            EmbeddingQueries::replace_note(database.pool(), note_id, &records)
                .await
                .map_err(|e| RagError::Database(format!("{:#}", e)))?;
        }

        if !records.is_empty() {
            index.dimension = dimension;
        }
        let removed = index.remove_note(note_id);
        index.insert(records);

        debug!("Replaced {} records of note {}", removed, note_id);
        Ok(removed)
    }

    #[inline]
    pub async fn remove_by_note(&self, note_id: &str) -> Result<usize> {
        let mut index = self.index.write().await;

        if let Some(database) = &self.database {
            EmbeddingQueries::delete_by_note(database.pool(), note_id)
                .await
                .map_err(|e| RagError::Database(format!("{:#}", e)))?;
        }

        Ok(index.remove_note(note_id))
    }

    /// Rank stored chunks by cosine similarity to `query`.
    ///
    /// Results are sorted by descending score; equal scores keep insertion
    /// order.
    #[inline]
    pub async fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<ScoredResult>> {
        let index = self.index.read().await;

        if let Some(expected) = index.dimension {
            if query.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        if options.limit == 0 {
            return Ok(Vec::new());
        }

        let mut results: Vec<ScoredResult> = index
            .records
            .iter()
            .filter(|r| options.scope.contains(&r.note_id))
            .filter(|r| !options.exclude_notes.contains(&r.note_id))
            .filter_map(|r| {
                let score = dot(query, &r.vector);
                (score.is_finite() && score >= options.threshold).then(|| ScoredResult {
                    record: r.clone(),
                    score,
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results.truncate(options.limit);

        Ok(results)
    }

    /// Records of one note ordered by chunk position
    #[inline]
    pub async fn records_for_note(&self, note_id: &str) -> Vec<EmbeddingRecord> {
        let index = self.index.read().await;
        let mut records: Vec<EmbeddingRecord> = index
            .records
            .iter()
            .filter(|r| r.note_id == note_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.order);
        records
    }

    #[inline]
    pub async fn contains_note(&self, note_id: &str) -> bool {
        let index = self.index.read().await;
        index.records.iter().any(|r| r.note_id == note_id)
    }

    /// The note's lowest-ordered chunk
    #[inline]
    pub async fn first_chunk(&self, note_id: &str) -> Option<EmbeddingRecord> {
        let index = self.index.read().await;
        index
            .records
            .iter()
            .filter(|r| r.note_id == note_id)
            .min_by_key(|r| r.order)
            .cloned()
    }

    /// Remove every record; the vector size stays fixed
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        let mut index = self.index.write().await;

        if let Some(database) = &self.database {
            EmbeddingQueries::clear(database.pool())
                .await
                .map_err(|e| RagError::Database(format!("{:#}", e)))?;
        }

        index.records.clear();
        drop(index);

        if let Some(database) = &self.database {
            if let Err(e) = database.compact().await {
                warn!("Cleared the index but could not compact the database: {:#}", e);
            }
        }
        Ok(())
    }

    #[inline]
    pub async fn count(&self) -> usize {
        self.index.read().await.records.len()
    }

    #[inline]
    pub async fn note_count(&self) -> usize {
        self.note_ids().await.len()
    }

    /// Distinct indexed note ids, sorted
    #[inline]
    pub async fn note_ids(&self) -> Vec<String> {
        let index = self.index.read().await;
        index
            .records
            .iter()
            .map(|r| r.note_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    #[inline]
    pub async fn dimension(&self) -> Option<usize> {
        self.index.read().await.dimension
    }

    #[inline]
    pub async fn close(&self) {
        if let Some(database) = &self.database {
            database.close().await;
        }
    }
}
