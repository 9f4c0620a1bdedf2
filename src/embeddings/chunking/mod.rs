
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{ChunkMetadata, Note, TextChunk};

/// Configuration for note chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens
    pub target_chunk_size: usize,
    /// Maximum chunk size in tokens, also the sliding window length
    pub max_chunk_size: usize,
    /// Minimum chunk size in tokens (smaller chunks will be merged)
    pub min_chunk_size: usize,
    /// Tokens shared by consecutive sliding windows
    pub overlap_size: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_chunk_size: 200,
            max_chunk_size: 256,
            min_chunk_size: 40,
            overlap_size: 38,
        }
    }
}

/// A run of note content under one heading path
#[derive(Debug, Clone, PartialEq, Eq)]
struct NoteSection {
    heading_path: String,
    content: String,
}

/// Chunk text before it is bound to a note
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingChunk {
    heading_path: String,
    text: String,
    token_count: usize,
}

impl PendingChunk {
    fn new(heading_path: &str, text: String) -> Self {
        let token_count = estimate_token_count(&text);
        Self {
            heading_path: heading_path.to_string(),
            text,
            token_count,
        }
    }
}

/// Split a note into embedding-ready chunks.
///
/// Chunks are numbered from zero in document order and their ids follow
/// `"{note_id}#{order}"`. A note with neither content nor title yields nothing.
#[inline]
pub fn chunk_note(note: &Note, config: &ChunkingConfig) -> Vec<TextChunk> {
    let title = note.title.trim();
    let mut pending = Vec::new();

    for section in extract_sections(&note.content, title) {
        pending.extend(chunk_section(&section, config));
    }

    if pending.is_empty() && !title.is_empty() {
        pending.push(PendingChunk::new(title, title.to_string()));
    }

    let merged = merge_small_chunks(pending, config);

    let chunks: Vec<TextChunk> = merged
        .into_iter()
        .enumerate()
        .map(|(order, chunk)| TextChunk {
            id: TextChunk::chunk_id(&note.id, order),
            note_id: note.id.clone(),
            order,
            text: chunk.text,
            metadata: ChunkMetadata {
                title: note.title.clone(),
                tags: note.tags.clone(),
                notebook: note.notebook.clone(),
                heading_path: chunk.heading_path,
                token_count: chunk.token_count,
            },
        })
        .collect();

    debug!(
        "Chunked note '{}' into {} chunks (avg {} tokens)",
        note.id,
        chunks.len(),
        chunks
            .iter()
            .map(|c| c.metadata.token_count)
            .sum::<usize>()
            / chunks.len().max(1)
    );

    chunks
}

/// Extract content sections organized by heading hierarchy from markdown
fn extract_sections(markdown: &str, title: &str) -> Vec<NoteSection> {
    let mut sections = Vec::new();
    let mut heading_stack: Vec<(u8, String)> = Vec::new();

    let mut current_content = String::new();
    let mut current_heading_text = String::new();
    let mut in_heading = false;

    let section_path = |stack: &[(u8, String)]| {
        if stack.is_empty() {
            title.to_string()
        } else {
            build_heading_path(stack)
        }
    };

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                if !current_content.trim().is_empty() {
                    sections.push(NoteSection {
                        heading_path: section_path(&heading_stack),
                        content: current_content.trim().to_string(),
                    });
                }
                current_content.clear();
                in_heading = true;
                current_heading_text.clear();
            }
            Event::Start(Tag::Item) => {
                current_content.push_str("- ");
            }
            Event::Start(Tag::CodeBlock(_)) => {
                current_content.push_str("```\n");
            }
            Event::End(TagEnd::Heading(level)) => {
                if in_heading && !current_heading_text.trim().is_empty() {
                    update_heading_stack(
                        &mut heading_stack,
                        heading_level_to_u8(level),
                        current_heading_text.trim().to_string(),
                    );
                }
                in_heading = false;
            }
            Event::End(TagEnd::CodeBlock) => {
                current_content.push_str("```");
                end_block(&mut current_content);
            }
            Event::End(TagEnd::Paragraph | TagEnd::List(_) | TagEnd::BlockQuote(_)) => {
                end_block(&mut current_content);
            }
            Event::End(TagEnd::Item) => {
                if !current_content.ends_with('\n') {
                    current_content.push('\n');
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if in_heading {
                    current_heading_text.push_str(&text);
                } else {
                    current_content.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_heading {
                    current_heading_text.push(' ');
                } else {
                    current_content.push('\n');
                }
            }
            _ => {}
        }
    }

    if !current_content.trim().is_empty() {
        sections.push(NoteSection {
            heading_path: section_path(&heading_stack),
            content: current_content.trim().to_string(),
        });
    }

    // Heading-only notes still carry text worth embedding
    if sections.is_empty() && !markdown.trim().is_empty() {
        let heading_text = build_heading_path(&heading_stack);
        if !heading_text.is_empty() {
            sections.push(NoteSection {
                heading_path: section_path(&heading_stack),
                content: heading_text,
            });
        }
    }

    sections
}

fn end_block(content: &mut String) {
    let trimmed_len = content.trim_end_matches('\n').len();
    content.truncate(trimmed_len);
    if !content.is_empty() {
        content.push_str("\n\n");
    }
}

/// Convert pulldown-cmark HeadingLevel to u8
fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn update_heading_stack(stack: &mut Vec<(u8, String)>, level: u8, text: String) {
    while stack.last().is_some_and(|(l, _)| *l >= level) {
        stack.pop();
    }
    stack.push((level, text));
}

fn build_heading_path(stack: &[(u8, String)]) -> String {
    stack
        .iter()
        .map(|(_, text)| text.as_str())
        .collect::<Vec<_>>()
        .join(" > ")
}

/// Accumulate paragraphs up to the target size, windowing oversized ones
fn chunk_section(section: &NoteSection, config: &ChunkingConfig) -> Vec<PendingChunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0;

    let flush = |current: &mut String, current_tokens: &mut usize, chunks: &mut Vec<_>| {
        if !current.trim().is_empty() {
            chunks.push(PendingChunk::new(
                &section.heading_path,
                current.trim().to_string(),
            ));
        }
        current.clear();
        *current_tokens = 0;
    };

    for paragraph in section.content.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        let paragraph_tokens = estimate_token_count(paragraph);

        if paragraph_tokens > config.max_chunk_size {
            flush(&mut current, &mut current_tokens, &mut chunks);
            for window in sliding_windows(paragraph, config) {
                chunks.push(PendingChunk::new(&section.heading_path, window));
            }
            continue;
        }

        if current_tokens + paragraph_tokens > config.target_chunk_size {
            flush(&mut current, &mut current_tokens, &mut chunks);
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
        current_tokens += paragraph_tokens;
    }

    flush(&mut current, &mut current_tokens, &mut chunks);
    chunks
}

/// Fixed-size word windows of `max_chunk_size` tokens, each sharing
/// `overlap_size` tokens with the one before it
fn sliding_windows(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let window_words = tokens_to_words(config.max_chunk_size).max(1);
    let overlap_words = tokens_to_words(config.overlap_size).min(window_words - 1);
    let step = window_words - overlap_words;

    let mut windows = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + window_words).min(words.len());
        windows.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    windows
}

fn tokens_to_words(tokens: usize) -> usize {
    tokens * 3 / 4
}

/// Merge runs of small chunks within the same section
fn merge_small_chunks(chunks: Vec<PendingChunk>, config: &ChunkingConfig) -> Vec<PendingChunk> {
    let mut processed = Vec::new();
    let mut pending_merge: Option<PendingChunk> = None;

    for chunk in chunks {
        if let Some(mut pending) = pending_merge.take() {
            if pending.heading_path == chunk.heading_path
                && pending.token_count + chunk.token_count <= config.max_chunk_size
            {
                pending.text.push_str("\n\n");
                pending.text.push_str(&chunk.text);
                pending.token_count += chunk.token_count;
                if pending.token_count < config.min_chunk_size {
                    pending_merge = Some(pending);
                } else {
                    processed.push(pending);
                }
                continue;
            }
            processed.push(pending);
        }

        if chunk.token_count < config.min_chunk_size {
            pending_merge = Some(chunk);
        } else {
            processed.push(chunk);
        }
    }

    if let Some(pending) = pending_merge {
        processed.push(pending);
    }

    processed
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
