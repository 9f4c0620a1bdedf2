
use super::models::{EmbeddingRow, encode_vector};
use anyhow::{Context, Result};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

use crate::models::EmbeddingRecord;

pub struct EmbeddingQueries;

impl EmbeddingQueries {
    /// Insert or replace records by `(note_id, chunk_id)` in one transaction.
    /// Replaced records move to the end of the insertion order.
    #[inline]
    pub async fn upsert(pool: &SqlitePool, records: &[EmbeddingRecord]) -> Result<()> {
        let mut tx = pool.begin().await.context("Failed to begin upsert")?;
        Self::insert_all(&mut tx, records).await?;
        tx.commit().await.context("Failed to commit upsert")?;

        debug!("Upserted {} embedding records", records.len());
        Ok(())
    }

    /// Swap every record of a note for a fresh set in one transaction
    #[inline]
    pub async fn replace_note(
        pool: &SqlitePool,
        note_id: &str,
        records: &[EmbeddingRecord],
    ) -> Result<u64> {
        let mut tx = pool.begin().await.context("Failed to begin note replace")?;

        let removed = sqlx::query("DELETE FROM embeddings WHERE note_id = ?")
            .bind(note_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete previous note records")?
            .rows_affected();

        Self::insert_all(&mut tx, records).await?;
        tx.commit().await.context("Failed to commit note replace")?;

        debug!(
            "Replaced {} records of note {} with {}",
            removed,
            note_id,
            records.len()
        );
        Ok(removed)
    }

    #[inline]
    pub async fn delete_by_note(pool: &SqlitePool, note_id: &str) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM embeddings WHERE note_id = ?")
            .bind(note_id)
            .execute(pool)
            .await
            .context("Failed to delete note records")?
            .rows_affected();

        Ok(removed)
    }

    /// Every readable record in insertion order. Unreadable rows are skipped.
    #[inline]
    pub async fn load_all(pool: &SqlitePool) -> Result<Vec<EmbeddingRecord>> {
        let rows: Vec<EmbeddingRow> = sqlx::query_as(
            r#"
            SELECT id,
                   note_id,
                   chunk_id,
                   seq,
                   chunk_order,
                   dimension,
                   vector,
                   text,
                   metadata,
                   created_at
            FROM embeddings
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(pool)
        .await
        .context("Failed to load embedding records")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk_id = row.chunk_id.clone();
            match EmbeddingRecord::try_from(row) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable embedding {}: {:#}", chunk_id, e),
            }
        }

        Ok(records)
    }

    #[inline]
    pub async fn clear(pool: &SqlitePool) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM embeddings")
            .execute(pool)
            .await
            .context("Failed to clear embeddings")?
            .rows_affected();

        Ok(removed)
    }

    async fn insert_all(tx: &mut Transaction<'_, Sqlite>, records: &[EmbeddingRecord]) -> Result<()> {
        for record in records {
            sqlx::query("DELETE FROM embeddings WHERE note_id = ? AND chunk_id = ?")
                .bind(&record.note_id)
                .bind(&record.chunk_id)
                .execute(&mut **tx)
                .await
                .context("Failed to remove superseded record")?;

            let metadata = serde_json::to_string(&record.metadata)
                .context("Failed to serialize chunk metadata")?;

            sqlx::query(
                r#"
                INSERT INTO embeddings
                    (note_id, chunk_id, id, seq, chunk_order, dimension, vector, text, metadata, created_at)
                VALUES (?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM embeddings), ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.note_id)
            .bind(&record.chunk_id)
            .bind(&record.id)
            .bind(record.order as i64)
            .bind(record.vector.len() as i64)
            .bind(encode_vector(&record.vector))
            .bind(&record.text)
            .bind(metadata)
            .bind(record.timestamp)
            .execute(&mut **tx)
            .await
            .with_context(|| format!("Failed to insert record for chunk {}", record.chunk_id))?;
        }

        Ok(())
    }
}
