#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EmbeddingConfig;
use crate::embeddings::model::{EmbeddingModel, l2_normalize, validate_vector};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DIMENSION_PROBE_TEXT: &str = "dimension probe";

/// Embedding model served by an Ollama instance over `/api/embed`
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    base_url: Url,
    model: String,
    batch_size: usize,
    dimension: usize,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaEmbedder {
    /// Build a client without contacting the server. The dimension stays
    /// unknown (zero) until [`OllamaEmbedder::probe_dimension`] runs.
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .ollama
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1) as usize,
            dimension: 0,
            agent,
        })
    }

    /// Build a client, verify the server and model, then learn the vector size
    #[inline]
    pub fn connect(config: &EmbeddingConfig) -> Result<Self> {
        let mut embedder = Self::new(config)?;
        embedder.health_check()?;
        embedder.probe_dimension()?;
        Ok(embedder)
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping().context("Server ping failed")?;
        self.validate_model().context("Model validation failed")?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .context("Failed to ping Ollama server")?;

        Ok(())
    }

    /// Validate that the configured model is available
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        let models = self.list_models().context("Failed to list models")?;

        // Ollama reports bare names with an implicit ":latest"
        let matches = |name: &str| {
            name == self.model || name.strip_suffix(":latest") == Some(self.model.as_str())
        };

        if models.iter().any(|m| matches(&m.name)) {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available_models
            ))
        }
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        let response_text = self
            .agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed a throwaway text to learn the model's vector size
    #[inline]
    pub fn probe_dimension(&mut self) -> Result<usize> {
        let vectors = self.request_embeddings(&[DIMENSION_PROBE_TEXT.to_string()])?;
        let dimension = vectors.first().map_or(0, Vec::len);
        if dimension == 0 {
            anyhow::bail!("Model '{}' returned an empty embedding", self.model);
        }
        debug!("Model {} produces {} dimensions", self.model, dimension);
        self.dimension = dimension;
        Ok(dimension)
    }

    fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings)
    }

    fn finish(&self, mut vector: Vec<f32>) -> Result<Vec<f32>> {
        validate_vector(&vector)?;
        if self.dimension != 0 && vector.len() != self.dimension {
            anyhow::bail!(
                "Model returned {} dimensions, expected {}",
                vector.len(),
                self.dimension
            );
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

impl EmbeddingModel for OllamaEmbedder {
    #[inline]
    fn name(&self) -> &str {
        &self.model
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request_embeddings(&[text.to_string()])?;
        let vector = vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Ollama returned no embedding"))?;
        self.finish(vector)
    }

    fn embed_batch(&mut self, texts: &[String]) -> Vec<Result<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            match self.request_embeddings(batch) {
                Ok(vectors) => {
                    results.extend(vectors.into_iter().map(|vector| self.finish(vector)));
                }
                Err(e) => {
                    // A single bad input fails the whole request; isolate it
                    warn!(
                        "Batch of {} embeddings failed, retrying individually: {:#}",
                        batch.len(),
                        e
                    );
                    for text in batch {
                        results.push(self.embed(text));
                    }
                }
            }
        }

        results
    }
}
