
use anyhow::{Result, bail};
use sha2::{Digest, Sha256};

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::embeddings::ollama::OllamaEmbedder;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;
pub const LOCAL_MODEL_NAME: &str = "local-hashing";

/// Values drawn per SHA-256 digest
const VALUES_PER_DIGEST: usize = 8;

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
    "how", "i", "in", "is", "it", "its", "of", "on", "or", "so", "that", "the", "this", "to",
    "was", "we", "what", "when", "which", "with", "you",
];

/// A blocking text-to-vector model owned by the embedding worker thread
pub trait EmbeddingModel: Send {
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&mut self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts; one result per input, in order
    fn embed_batch(&mut self, texts: &[String]) -> Vec<Result<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Deterministic feature-hashing model.
///
/// Each token maps to a fixed pseudo-random vector seeded by its SHA-256
/// digest. Token vectors are mean-pooled and L2-normalized, so identical text
/// produces an identical vector on every platform.
#[derive(Debug, Clone)]
pub struct HashingModel {
    dimension: usize,
}

impl HashingModel {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn token_vector(&self, token: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dimension);
        let mut block: u32 = 0;

        while vector.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(token.as_bytes());
            hasher.update(block.to_le_bytes());
            let digest = hasher.finalize();

            for bytes in digest.chunks_exact(4).take(VALUES_PER_DIGEST) {
                if vector.len() == self.dimension {
                    break;
                }
                let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                // Uniform on [-sqrt(3), sqrt(3)] has unit variance
                let unit = f64::from(raw) / f64::from(u32::MAX);
                vector.push(((unit * 2.0 - 1.0) * 3f64.sqrt()) as f32);
            }
            block += 1;
        }

        vector
    }
}

impl EmbeddingModel for HashingModel {
    #[inline]
    fn name(&self) -> &str {
        LOCAL_MODEL_NAME
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            bail!("Text contains no tokens to embed");
        }

        let token_vectors: Vec<Vec<f32>> = tokens
            .iter()
            .map(|token| self.token_vector(token))
            .collect();

        let mut pooled = mean_pool(&token_vectors, self.dimension);
        l2_normalize(&mut pooled);
        Ok(pooled)
    }
}

/// Lowercased alphanumeric tokens with stopwords removed. Text made only of
/// stopwords keeps them so it still embeds.
#[inline]
pub fn tokenize(text: &str) -> Vec<String> {
    let all: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect();

    let content: Vec<String> = all
        .iter()
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .cloned()
        .collect();

    if content.is_empty() { all } else { content }
}

/// Element-wise mean of token vectors
#[inline]
pub fn mean_pool(vectors: &[Vec<f32>], dimension: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; dimension];
    if vectors.is_empty() {
        return pooled;
    }

    for vector in vectors {
        for (acc, value) in pooled.iter_mut().zip(vector) {
            *acc += value;
        }
    }

    let count = vectors.len() as f32;
    for value in &mut pooled {
        *value /= count;
    }
    pooled
}

/// Scale to unit length in place. Zero vectors are left untouched.
#[inline]
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Dot product; equals cosine similarity for unit vectors
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Reject vectors the store could never rank
#[inline]
pub fn validate_vector(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        bail!("Model returned an empty vector");
    }
    if vector.iter().any(|v| !v.is_finite()) {
        bail!("Model returned a vector with non-finite values");
    }
    Ok(())
}

/// Construct the model selected by configuration
#[inline]
pub fn load_model(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingModel>> {
    match config.backend {
        EmbeddingBackend::Local => Ok(Box::new(HashingModel::new(config.dimension as usize))),
        EmbeddingBackend::Ollama => Ok(Box::new(OllamaEmbedder::connect(config)?)),
    }
}
