
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    Generation, GenerationOptions, LineEvent, LlmProvider, TokenStream, request_agent, run_blocking,
    stream_agent, stream_lines,
};
use crate::config::LlmConfig;
use crate::{RagError, Result};

/// Text generation through an Ollama server's `/api/generate`
#[derive(Debug)]
pub struct OllamaProvider {
    base_url: Url,
    model: String,
    timeout: Duration,
    agent: ureq::Agent,
    stream_agent: ureq::Agent,
    available: AtomicBool,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    options: ModelOptions,
}

#[derive(Debug, Serialize)]
struct ModelOptions {
    temperature: f32,
    num_predict: u32,
}

/// One NDJSON line, or the whole body when not streaming
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

impl OllamaProvider {
    #[inline]
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let base_url = config
            .ollama
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;
        let timeout = Duration::from_secs(config.timeout_secs);


        Ok(Self {
            base_url,
            model: config.model.clone(),
            timeout,
            agent: request_agent(timeout),
            stream_agent: stream_agent(timeout),
            available: AtomicBool::new(false),
        })
    }

    fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Failed to build Ollama URL for {}", path))
    }

    fn request_body(&self, prompt: &str, options: &GenerationOptions, stream: bool) -> anyhow::Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream,
            system: options.system.as_deref(),
            options: ModelOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };
        serde_json::to_string(&request).context("Failed to serialize generate request")
    }
}

fn parse_chunk(line: &str) -> anyhow::Result<GenerateChunk> {
    let chunk: GenerateChunk =
        serde_json::from_str(line).context("Failed to parse Ollama generate response")?;
    if let Some(error) = &chunk.error {
        bail!("Ollama reported an error: {}", error);
    }
    Ok(chunk)
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    #[inline]
    fn name(&self) -> &str {
        "ollama"
    }

    #[inline]
    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Check that the server answers and serves the configured model
    async fn initialize(&self) -> Result<()> {
        let url = self.endpoint("/api/tags")?;
        let agent = self.agent.clone();
        let model = self.model.clone();

        debug!("Checking Ollama generation model {} at {}", model, url);

        let result = run_blocking("ollama health check", self.timeout, move || {
            let body = agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
                .context("Failed to reach Ollama server")?;
            let tags: TagsResponse =
                serde_json::from_str(&body).context("Failed to parse models response")?;

            let found = tags.models.iter().any(|m| {
                m.name == model || m.name.strip_suffix(":latest") == Some(model.as_str())
            });
            if !found {
                bail!("Model '{}' is not available on the Ollama server", model);
            }
            Ok(())
        })
        .await;

        match result {
            Ok(()) => {
                self.available.store(true, Ordering::Release);
                info!("Ollama generation model {} is available", self.model);
                Ok(())
            }
            Err(e) => {
                self.available.store(false, Ordering::Release);
                warn!("Ollama generation unavailable: {}", e);
                Err(match e {
                    RagError::Timeout { .. } => e,
                    other => RagError::Initialization(other.to_string()),
                })
            }
        }
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation> {
        let url = self.endpoint("/api/generate")?;
        let body = self.request_body(prompt, options, false)?;
        let agent = self.agent.clone();

        let text = run_blocking("ollama generation", self.timeout, move || {
            let response = agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
                .context("Failed to call Ollama generate")?;
            Ok(parse_chunk(&response)?.response)
        })
        .await?;

        debug!("Ollama generated {} characters", text.len());
        Ok(Generation {
            text,
            model: self.model.clone(),
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<TokenStream> {
        let url = self.endpoint("/api/generate")?;
        let body = self.request_body(prompt, options, true)?;
        let agent = self.stream_agent.clone();

        stream_lines(
            "ollama generation",
            self.timeout,
            move || {
                let response = agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&body)
                    .context("Failed to call Ollama generate")?;
                Ok(BufReader::new(response.into_body().into_reader()))
            },
            |line| {
                let chunk = parse_chunk(line)?;
                Ok(if chunk.done && chunk.response.is_empty() {
                    LineEvent::Done
                } else {
                    LineEvent::Fragment(chunk.response)
                })
            },
        )
        .await
    }
}
