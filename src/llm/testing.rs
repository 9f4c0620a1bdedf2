use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{Generation, GenerationOptions, LlmProvider, TokenStream};
use crate::{RagError, Result};

/// Provider returning a fixed reply and recording prompts
pub(crate) struct ScriptedProvider {
    reply: Option<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub(crate) fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Available, but every call fails
    pub(crate) fn failing() -> Self {
        Self {
            reply: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_prompt(&self) -> Option<String> {
        self.prompts
            .lock()
            .expect("prompt log should not be poisoned")
            .last()
            .cloned()
    }

    fn record(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("prompt log should not be poisoned")
            .push(prompt.to_string());
        self.reply
            .clone()
            .ok_or_else(|| RagError::Generation("scripted failure".to_string()))
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<Generation> {
        Ok(Generation {
            text: self.record(prompt)?,
            model: "scripted".to_string(),
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<TokenStream> {
        let reply = self.record(prompt)?;
        let words: Vec<String> = reply
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        Ok(TokenStream::from_fragments(words))
    }
}
