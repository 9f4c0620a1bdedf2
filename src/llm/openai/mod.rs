#[cfg(test)]
mod tests;

use std::io::BufReader;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{
    Generation, GenerationOptions, LineEvent, LlmProvider, TokenStream, request_agent, run_blocking,
    stream_agent, stream_lines,
};
use crate::config::LlmConfig;
use crate::{RagError, Result};

const COMPLETIONS_PATH: &str = "v1/chat/completions";
const SSE_DONE: &str = "[DONE]";

/// Any OpenAI-compatible chat completions endpoint
#[derive(Debug)]
pub struct OpenAiProvider {
    base_url: Url,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    timeout: Duration,
    agent: ureq::Agent,
    stream_agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatContent>,
    #[serde(default)]
    delta: Option<ChatContent>,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    /// Build a client, reading the API key from the configured environment variable
    #[inline]
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());

        let mut base = config.openai_base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .with_context(|| format!("Invalid OpenAI base URL: {}", config.openai_base_url))?;

        let timeout = Duration::from_secs(config.timeout_secs);

        Ok(Self {
            base_url,
            model: config.model.clone(),
            api_key,
            api_key_env: config.api_key_env.clone(),
            timeout,
            agent: request_agent(timeout),
            stream_agent: stream_agent(timeout),
        })
    }

    #[inline]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn prepare(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        stream: bool,
    ) -> Result<(Url, String, String)> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            RagError::Generation(format!(
                "No API key found in environment variable {}",
                self.api_key_env
            ))
        })?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = options.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream,
        };
        let body = serde_json::to_string(&request).context("Failed to serialize chat request")?;
        let url = self
            .base_url
            .join(COMPLETIONS_PATH)
            .context("Failed to build completions URL")?;

        Ok((url, body, format!("Bearer {}", api_key)))
    }
}

fn parse_event(line: &str) -> anyhow::Result<LineEvent> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(LineEvent::Skip);
    };
    let data = data.trim();
    if data == SSE_DONE {
        return Ok(LineEvent::Done);
    }

    let response: ChatResponse =
        serde_json::from_str(data).context("Failed to parse completion chunk")?;
    let fragment = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .unwrap_or_default();

    Ok(LineEvent::Fragment(fragment))
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    #[inline]
    fn name(&self) -> &str {
        "openai"
    }

    #[inline]
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn initialize(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(RagError::Initialization(format!(
                "Environment variable {} is not set",
                self.api_key_env
            )));
        }
        debug!("Using OpenAI-compatible endpoint {}", self.base_url);
        Ok(())
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation> {
        let (url, body, authorization) = self.prepare(prompt, options, false)?;
        let agent = self.agent.clone();

        let text = run_blocking("openai completion", self.timeout, move || {
            let response = agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("Authorization", &authorization)
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
                .context("Failed to call chat completions")?;

            let parsed: ChatResponse =
                serde_json::from_str(&response).context("Failed to parse chat completion")?;
            let Some(content) = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message)
                .and_then(|message| message.content)
            else {
                bail!("Chat completion contained no message");
            };
            Ok(content)
        })
        .await?;

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
        let (url, body, authorization) = self.prepare(prompt, options, true)?;
        let agent = self.stream_agent.clone();

        stream_lines(
            "openai completion",
            self.timeout,
            move || {
                let response = agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .header("Accept", "text/event-stream")
                    .header("Authorization", &authorization)
                    .send(&body)
                    .context("Failed to call chat completions")?;
                Ok(BufReader::new(response.into_body().into_reader()))
            },
            parse_event,
        )
        .await
    }
}
