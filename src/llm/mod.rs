
#[cfg(test)]
pub(crate) mod testing;

pub mod ollama;
pub mod openai;

use std::io::BufRead;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::{LlmConfig, LlmProviderKind};
use crate::{RagError, Result};

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

const STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub system: Option<String>,
}

impl Default for GenerationOptions {
    #[inline]
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

impl From<&LlmConfig> for GenerationOptions {
    #[inline]
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system: None,
        }
    }
}

impl GenerationOptions {
    #[inline]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub model: String,
}

/// A text generation backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether calls are expected to succeed. Only meaningful after
    /// [`LlmProvider::initialize`].
    fn is_available(&self) -> bool;

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation>;

    /// Generate incrementally. Dropping or cancelling the returned stream
    /// stops the producer.
    async fn generate_stream(&self, prompt: &str, options: &GenerationOptions)
    -> Result<TokenStream>;
}

/// Provider used when no language model is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProvider;

#[async_trait]
impl LlmProvider for NullProvider {
    #[inline]
    fn name(&self) -> &str {
        "none"
    }

    #[inline]
    fn is_available(&self) -> bool {
        false
    }

    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<Generation> {
        Err(RagError::Generation(
            "No language model is configured".to_string(),
        ))
    }

    async fn generate_stream(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<TokenStream> {
        Err(RagError::Generation(
            "No language model is configured".to_string(),
        ))
    }
}

/// Build the provider selected in the configuration. Nothing is contacted
/// until [`LlmProvider::initialize`].
#[inline]
pub fn build_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider {
        LlmProviderKind::None => Arc::new(NullProvider),
        LlmProviderKind::Ollama => Arc::new(OllamaProvider::new(config)?),
        LlmProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)?),
    };
    debug!("Using language model provider {}", provider.name());
    Ok(provider)
}

/// Pull-based stream of generated text fragments.
///
/// Backed by a bounded channel; closing the receiving side is the signal the
/// producer uses to stop generating.
#[derive(Debug)]
pub struct TokenStream {
    receiver: mpsc::Receiver<Result<String>>,
}

impl TokenStream {
    #[inline]
    pub fn channel() -> (TokenSender, Self) {
        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        (TokenSender { sender }, Self { receiver })
    }

    /// A finished stream yielding the given fragments
    #[inline]
    pub fn from_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fragments: Vec<String> = fragments.into_iter().map(Into::into).collect();
        let (sender, receiver) = mpsc::channel(fragments.len().max(1));
        for fragment in fragments {
            // Capacity covers every fragment
            let _ = sender.try_send(Ok(fragment));
        }
        Self { receiver }
    }

    /// Stop the producer. Fragments already buffered can still be read.
    #[inline]
    pub fn cancel(&mut self) {
        self.receiver.close();
    }

    /// Drain the stream into one string, failing on the first error
    #[inline]
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(fragment) = self.receiver.recv().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for TokenStream {
    type Item = Result<String>;

    #[inline]
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Producer half of a [`TokenStream`], used from blocking threads
#[derive(Debug, Clone)]
pub struct TokenSender {
    sender: mpsc::Sender<Result<String>>,
}

impl TokenSender {
    /// Returns `false` once the consumer has gone away
    #[inline]
    pub fn send_blocking(&self, fragment: String) -> bool {
        self.sender.blocking_send(Ok(fragment)).is_ok()
    }

    #[inline]
    pub fn fail_blocking(&self, error: RagError) -> bool {
        self.sender.blocking_send(Err(error)).is_ok()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Agent whose calls are bounded by `timeout` from request to last body byte
pub(crate) fn request_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Agent for streamed bodies. Connecting, sending and receiving the response
/// head are bounded by `timeout`; reading the body is not.
pub(crate) fn stream_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_connect(Some(timeout))
        .timeout_send_body(Some(timeout))
        .timeout_recv_response(Some(timeout))
        .build()
        .into()
}

/// Map a blocking HTTP failure, keeping timeouts distinguishable
pub(crate) fn request_error(operation: &str, error: &anyhow::Error) -> RagError {
    let timed_out = error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<ureq::Error>())
        .any(|e| matches!(e, ureq::Error::Timeout(_)));

    if timed_out {
        RagError::Timeout {
            operation: operation.to_string(),
        }
    } else {
        RagError::Generation(format!("{}: {:#}", operation, error))
    }
}

/// Run blocking HTTP work off the async runtime, bounded by `timeout`
pub(crate) async fn run_blocking<T, F>(
    operation: &str,
    timeout: Duration,
    work: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    let joined = tokio::time::timeout(timeout, task)
        .await
        .map_err(|_| RagError::Timeout {
            operation: operation.to_string(),
        })?;

    let result = joined.map_err(|e| RagError::Generation(format!("{} panicked: {}", operation, e)))?;
    result.map_err(|e| request_error(operation, &e))
}

/// What one line of a streamed response carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LineEvent {
    Fragment(String),
    Skip,
    Done,
}

/// Open a line-oriented streaming response on a blocking thread and forward
/// its fragments into a [`TokenStream`].
///
/// Only opening the response is bounded by `timeout`. After that the stream
/// runs until the server finishes or the consumer drops it.
pub(crate) async fn stream_lines<R, F, P>(
    operation: &str,
    timeout: Duration,
    open: F,
    mut parse: P,
) -> Result<TokenStream>
where
    R: BufRead,
    F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    P: FnMut(&str) -> anyhow::Result<LineEvent> + Send + 'static,
{
    let (sender, stream) = TokenStream::channel();
    let (ready, opened) = oneshot::channel::<anyhow::Result<()>>();
    let operation_name = operation.to_string();

    tokio::task::spawn_blocking(move || {
        let reader = match open() {
            Ok(reader) => {
                let _ = ready.send(Ok(()));
                reader
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        for line in reader.lines() {
            if sender.is_closed() {
                debug!("{} stream dropped by consumer", operation_name);
                return;
            }

            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    let error = request_error(&operation_name, &anyhow::Error::new(e));
                    sender.fail_blocking(error);
                    return;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            match parse(&line) {
                Ok(LineEvent::Fragment(fragment)) => {
                    if !fragment.is_empty() && !sender.send_blocking(fragment) {
                        debug!("{} stream dropped by consumer", operation_name);
                        return;
                    }
                }
                Ok(LineEvent::Skip) => {}
                Ok(LineEvent::Done) => return,
                Err(e) => {
                    warn!("Malformed {} stream line: {:#}", operation_name, e);
                    sender.fail_blocking(RagError::Generation(format!("{:#}", e)));
                    return;
                }
            }
        }
    });

    match tokio::time::timeout(timeout, opened).await {
        Err(_) => Err(RagError::Timeout {
            operation: operation.to_string(),
        }),
        Ok(Err(_)) => Err(RagError::Generation(format!(
            "{} stream stopped before opening",
            operation
        ))),
        Ok(Ok(Err(e))) => Err(request_error(operation, &e)),
        Ok(Ok(Ok(()))) => Ok(stream),
    }
}
