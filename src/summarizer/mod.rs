
pub mod fallback;

use std::fmt::Write;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use fancy_regex::Regex;
use tracing::{debug, warn};

use crate::Result;
use crate::llm::{GenerationOptions, LlmProvider};
use crate::models::{Note, NoteSummary, SummaryOptions};
use crate::prompts::{PromptTemplate, SECTION_SEPARATOR};

pub use fallback::{Draft, FallbackSummarizer};

pub const EMPTY_COLLECTION: &str = "No notes to summarize.";
const WORDS_PER_MINUTE: usize = 200;
const ELLIPSIS: &str = "...";

static BULLET_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+(.+?)\s*$").expect("valid regex")
});

/// Summaries from the configured language model, rule-based otherwise
pub struct NoteSummarizer {
    provider: Arc<dyn LlmProvider>,
    generation: GenerationOptions,
    fallback: FallbackSummarizer,
}

impl NoteSummarizer {
    #[inline]
    pub fn new(provider: Arc<dyn LlmProvider>, generation: GenerationOptions) -> Self {
        Self {
            provider,
            generation,
            fallback: FallbackSummarizer,
        }
    }

    #[inline]
    pub async fn summarize(&self, note: &Note, options: &SummaryOptions) -> Result<NoteSummary> {
        let draft = match self.generate(note, options).await {
            Some(draft) => draft,
            None => self.fallback.summarize(note, options.style),
        };

        let text = finish(draft.text, note, options);
        let word_count = text.split_whitespace().count();
        Ok(NoteSummary {
            note_id: note.id.clone(),
            summary: text,
            key_points: draft.key_points,
            word_count,
            reading_time: word_count.div_ceil(WORDS_PER_MINUTE),
            generated_at: Utc::now(),
            style: options.style,
        })
    }

    /// One synthesis over several notes
    #[inline]
    pub async fn summarize_collection(
        &self,
        notes: &[Note],
        title: &str,
        options: &SummaryOptions,
    ) -> Result<String> {
        if notes.is_empty() {
            return Ok(EMPTY_COLLECTION.to_string());
        }

        if self.provider.is_available() {
            let sections = notes
                .iter()
                .map(|note| format!("## {}\n\n{}", note.title.trim(), note.content.trim()))
                .collect::<Vec<_>>()
                .join(SECTION_SEPARATOR);
            let prompt = PromptTemplate::Collection {
                title,
                sections: &sections,
                options,
            }
            .render();

            match self.provider.generate(&prompt, &self.generation).await {
                Ok(generation) if !generation.text.trim().is_empty() => {
                    return Ok(generation.text.trim().to_string());
                }
                Ok(_) => warn!("Language model returned an empty collection summary"),
                Err(e) => warn!("Collection summary failed, using per-note summaries: {}", e),
            }
        }

        let mut document = format!("# {}", title.trim());
        for note in notes {
            let draft = self.fallback.summarize(note, options.style);
            let text = finish(draft.text, note, options);
            let _ = write!(document, "\n\n## {}\n\n{}", note.title.trim(), text);
        }
        Ok(document)
    }

    /// `None` when no model is available or the call fails
    async fn generate(&self, note: &Note, options: &SummaryOptions) -> Option<Draft> {
        if !self.provider.is_available() {
            return None;
        }

        let prompt = PromptTemplate::Summarize {
            title: &note.title,
            content: &note.content,
            options,
        }
        .render();

        match self.provider.generate(&prompt, &self.generation).await {
            Ok(generation) if !generation.text.trim().is_empty() => {
                let text = generation.text.trim().to_string();
                let key_points = options.style.is_list().then(|| bullet_lines(&text));
                debug!("Summarized note {} with {}", note.id, generation.model);
                Some(Draft { text, key_points })
            }
            Ok(_) => {
                warn!("Language model returned an empty summary for note {}", note.id);
                None
            }
            Err(e) => {
                warn!("Summary generation failed for note {}, using fallback: {}", note.id, e);
                None
            }
        }
    }
}

/// Text of every bullet or numbered line
#[inline]
pub fn bullet_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            BULLET_LINE
                .captures(line)
                .ok()
                .flatten()
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// At most `max_chars` characters, cut at a word boundary and marked with
/// an ellipsis
#[inline]
pub fn truncate_words(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let budget = max_chars.saturating_sub(ELLIPSIS.len());
    let prefix: String = text.chars().take(budget).collect();
    let cut = match prefix.rfind(char::is_whitespace) {
        Some(end) if end > 0 => prefix.get(..end).unwrap_or(&prefix),
        _ => prefix.as_str(),
    };

    let mut truncated = cut
        .trim_end_matches(|c: char| c.is_whitespace() || ",;:".contains(c))
        .to_string();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Length limit, then the optional metadata footer
fn finish(text: String, note: &Note, options: &SummaryOptions) -> String {
    let mut text = match options.max_length {
        Some(max_length) => truncate_words(&text, max_length),
        None => text,
    };
    if options.include_metadata {
        append_metadata(&mut text, note);
    }
    text
}

fn append_metadata(text: &mut String, note: &Note) {
    let mut lines = Vec::new();
    if !note.tags.is_empty() {
        lines.push(format!("Tags: {}", note.tags.join(", ")));
    }
    if let Some(notebook) = note.notebook.as_deref().filter(|n| !n.trim().is_empty()) {
        lines.push(format!("Notebook: {}", notebook));
    }
    if !lines.is_empty() {
        text.push_str("\n\n");
        text.push_str(&lines.join("\n"));
    }
}
