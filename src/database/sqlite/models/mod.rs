#[cfg(test)]
mod tests;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::models::{ChunkMetadata, EmbeddingRecord};

/// Raw `embeddings` row
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct EmbeddingRow {
    pub id: String,
    pub note_id: String,
    pub chunk_id: String,
    pub seq: i64,
    pub chunk_order: i64,
    pub dimension: i64,
    pub vector: Vec<u8>,
    pub text: String,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EmbeddingRow> for EmbeddingRecord {
    type Error = anyhow::Error;

    #[inline]
    fn try_from(row: EmbeddingRow) -> Result<Self> {
        let vector = decode_vector(&row.vector)
            .with_context(|| format!("Corrupt vector for chunk {}", row.chunk_id))?;

        if vector.len() as i64 != row.dimension {
            bail!(
                "Stored dimension {} does not match vector length {} for chunk {}",
                row.dimension,
                vector.len(),
                row.chunk_id
            );
        }

        let metadata: ChunkMetadata = serde_json::from_str(&row.metadata)
            .with_context(|| format!("Corrupt metadata for chunk {}", row.chunk_id))?;

        Ok(Self {
            id: row.id,
            note_id: row.note_id,
            chunk_id: row.chunk_id,
            order: usize::try_from(row.chunk_order).context("Negative chunk order")?,
            vector,
            text: row.text,
            metadata,
            timestamp: row.created_at,
        })
    }
}

/// Little-endian `f32` blob
#[inline]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[inline]
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        bail!("Vector blob length {} is not a multiple of 4", bytes.len());
    }

    let vector: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    if vector.iter().any(|v| !v.is_finite()) {
        bail!("Vector blob contains non-finite values");
    }

    Ok(vector)
}
