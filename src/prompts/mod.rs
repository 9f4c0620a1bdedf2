
use std::fmt::Write;

use crate::database::ScoredResult;
use crate::models::{SummaryOptions, SummaryStyle};

const ANSWER_TEMPLATE: &str = r#"You are a helpful assistant answering questions about the user's personal notes. Answer using ONLY the note excerpts below. If the excerpts do not contain the answer, say that the notes do not cover it.

NOTE EXCERPTS:
{context}

QUESTION:
{question}

ANSWER:"#;

const SUMMARY_TEMPLATE: &str = r#"Summarize the note below.

{instructions}

TITLE: {title}

NOTE CONTENT:
{content}

SUMMARY:"#;

const TAG_TEMPLATE: &str = r#"Suggest up to {max_tags} tags for the note below. Return ONLY a comma-separated list of tags with no explanation.

RULES:
1. Focus on what the note is ABOUT, not things mentioned in passing
2. Use lowercase for all tags
3. Use hyphens instead of spaces (e.g. "machine-learning")
4. Use only letters, digits and hyphens
{vocabulary}
TITLE: {title}

NOTE CONTENT:
{content}

TAGS:"#;

const COLLECTION_TEMPLATE: &str = r#"The notes below belong to a collection titled "{title}". Write a single synthesis that connects their main ideas rather than summarizing each note separately.

{instructions}

NOTES:
{sections}

SYNTHESIS:"#;

/// Separator between notes in a collection prompt
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Note content longer than this is cut before prompting
const MAX_PROMPT_CONTENT_CHARS: usize = 12_000;

/// Prompts for every task handed to a language model
#[derive(Debug, Clone, Copy)]
pub enum PromptTemplate<'a> {
    Answer {
        question: &'a str,
        context: &'a str,
    },
    Summarize {
        title: &'a str,
        content: &'a str,
        options: &'a SummaryOptions,
    },
    Tag {
        title: &'a str,
        content: &'a str,
        known_tags: &'a [String],
        max_tags: usize,
    },
    Collection {
        title: &'a str,
        sections: &'a str,
        options: &'a SummaryOptions,
    },
}

impl PromptTemplate<'_> {
    #[inline]
    pub fn render(&self) -> String {
        match *self {
            PromptTemplate::Answer { question, context } => ANSWER_TEMPLATE
                .replace("{context}", context)
                .replace("{question}", question.trim()),
            PromptTemplate::Summarize {
                title,
                content,
                options,
            } => SUMMARY_TEMPLATE
                .replace("{instructions}", &style_instructions(options))
                .replace("{title}", title_or_untitled(title))
                .replace("{content}", clip(content, MAX_PROMPT_CONTENT_CHARS)),
            PromptTemplate::Tag {
                title,
                content,
                known_tags,
                max_tags,
            } => {
                let vocabulary = if known_tags.is_empty() {
                    String::new()
                } else {
                    format!(
                        "5. Prefer these existing tags when they fit: {}\n",
                        known_tags.join(", ")
                    )
                };
                TAG_TEMPLATE
                    .replace("{max_tags}", &max_tags.to_string())
                    .replace("{vocabulary}", &vocabulary)
                    .replace("{title}", title_or_untitled(title))
                    .replace("{content}", clip(content, MAX_PROMPT_CONTENT_CHARS))
            }
            PromptTemplate::Collection {
                title,
                sections,
                options,
            } => COLLECTION_TEMPLATE
                .replace("{title}", title_or_untitled(title))
                .replace("{instructions}", &style_instructions(options))
                .replace("{sections}", sections),
        }
    }
}

fn style_instructions(options: &SummaryOptions) -> String {
    let mut instructions = match options.style {
        SummaryStyle::Brief => "Write a brief summary of 2-3 sentences.".to_string(),
        SummaryStyle::Detailed => {
            "Write a detailed summary in a few paragraphs covering every main point.".to_string()
        }
        SummaryStyle::BulletPoints => {
            "Write 3-7 bullet points. Start every point on its own line with \"- \".".to_string()
        }
        SummaryStyle::KeyInsights => {
            "List the 3-5 most important insights or conclusions. Start every insight on its own line with \"- \"."
                .to_string()
        }
    };

    if let Some(max_length) = options.max_length {
        let _ = write!(instructions, " Keep it under {} characters.", max_length);
    }
    if let Some(language) = options.language.as_deref() {
        let _ = write!(instructions, " Write in {}.", language);
    }

    instructions
}

fn title_or_untitled(title: &str) -> &str {
    let title = title.trim();
    if title.is_empty() { "Untitled" } else { title }
}

fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Numbered excerpt block for answering a question, bounded by `max_chars`.
/// The first excerpt is always included, clipped if necessary.
#[inline]
pub fn build_context(results: &[ScoredResult], max_chars: usize) -> String {
    let mut context = String::new();

    for (index, result) in results.iter().enumerate() {
        let title = title_or_untitled(&result.record.metadata.title);
        let mut excerpt = format!(
            "[{}] {} (relevance {:.2})\n{}",
            index + 1,
            title,
            result.score,
            result.record.text.trim()
        );

        let separator = if context.is_empty() { 0 } else { 2 };
        let used = context.chars().count();
        let needed = excerpt.chars().count() + separator;

        if used + needed > max_chars {
            if context.is_empty() {
                excerpt = clip(&excerpt, max_chars).to_string();
            } else {
                break;
            }
        }

        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&excerpt);
    }

    context
}
