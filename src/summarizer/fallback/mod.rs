
use std::collections::HashSet;
use std::sync::LazyLock;

use fancy_regex::Regex;
use pulldown_cmark::{Event, Parser, Tag, TagEnd};

use crate::models::{Note, SummaryStyle};

/// Paragraphs at or below this many characters are not summary material
const MIN_PARAGRAPH_CHARS: usize = 50;
const MAX_POINTS: usize = 5;
const MIN_BULLET_POINTS: usize = 3;
const LEADING_SENTENCES: usize = 3;

static INSIGHT_LEAD_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:in conclusion|in summary|to summarize|to sum up|overall|ultimately|the key|key takeaway|the main (?:point|idea|lesson)|importantly|most importantly|therefore|thus|as a result|this means|the lesson|lesson learned|i learned|we learned|remember|note that)\b",
    )
    .expect("valid regex")
});

/// Summary text plus the list entries it was built from, for list styles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub key_points: Option<Vec<String>>,
}

impl Draft {
    fn prose(text: String) -> Self {
        Self {
            text,
            key_points: None,
        }
    }

    fn points(points: Vec<String>) -> Self {
        let text = points
            .iter()
            .map(|p| format!("- {}", p))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            text,
            key_points: Some(points),
        }
    }
}

/// Rule-based summaries used when no language model answers
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackSummarizer;

impl FallbackSummarizer {
    #[inline]
    pub fn summarize(&self, note: &Note, style: SummaryStyle) -> Draft {
        let outline = Outline::parse(&note.content);
        match style {
            SummaryStyle::Brief => Draft::prose(brief(note, &outline)),
            SummaryStyle::Detailed => Draft::prose(detailed(note, &outline)),
            SummaryStyle::BulletPoints | SummaryStyle::KeyInsights => {
                let points = if style == SummaryStyle::BulletPoints {
                    bullet_points(&outline)
                } else {
                    key_insights(&outline)
                };
                if points.is_empty() {
                    Draft {
                        text: brief(note, &outline),
                        key_points: Some(Vec::new()),
                    }
                } else {
                    Draft::points(points)
                }
            }
        }
    }
}

/// Block structure of a markdown note, code blocks dropped
#[derive(Debug, Default)]
struct Outline {
    headings: Vec<String>,
    paragraphs: Vec<String>,
    /// Headings and list items in document order
    structure: Vec<String>,
    emphasis: Vec<String>,
}

impl Outline {
    fn parse(markdown: &str) -> Self {
        let mut outline = Outline::default();
        let mut heading: Option<String> = None;
        let mut paragraph: Option<String> = None;
        let mut items: Vec<String> = Vec::new();
        let mut emphasis: Vec<String> = Vec::new();
        let mut in_code_block = false;

        for event in Parser::new(markdown) {
            match event {
                Event::Start(Tag::Heading { .. }) => heading = Some(String::new()),
                Event::End(TagEnd::Heading(_)) => {
                    if let Some(text) = heading.take().and_then(non_empty) {
                        outline.headings.push(text.clone());
                        outline.structure.push(text);
                    }
                }
                Event::Start(Tag::Item) => {
                    // text before a nested list belongs to the parent item
                    if let Some(text) = items.last_mut().map(std::mem::take).and_then(non_empty) {
                        outline.structure.push(text);
                    }
                    items.push(String::new());
                }
                Event::End(TagEnd::Item) => {
                    if let Some(text) = items.pop().and_then(non_empty) {
                        outline.structure.push(text);
                    }
                }
                Event::Start(Tag::Paragraph) if items.is_empty() => paragraph = Some(String::new()),
                Event::End(TagEnd::Paragraph) => {
                    if let Some(text) = paragraph.take().and_then(non_empty) {
                        outline.paragraphs.push(text);
                    }
                }
                Event::Start(Tag::Emphasis | Tag::Strong) => emphasis.push(String::new()),
                Event::End(TagEnd::Emphasis | TagEnd::Strong) => {
                    if let Some(text) = emphasis.pop().and_then(non_empty) {
                        outline.emphasis.push(text);
                    }
                }
                Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
                Event::End(TagEnd::CodeBlock) => in_code_block = false,
                Event::Text(text) | Event::Code(text) if !in_code_block => {
                    let target = heading
                        .as_mut()
                        .or(items.last_mut())
                        .or(paragraph.as_mut());
                    if let Some(buffer) = target {
                        buffer.push_str(&text);
                    }
                    for span in &mut emphasis {
                        span.push_str(&text);
                    }
                }
                Event::SoftBreak | Event::HardBreak => {
                    if let Some(buffer) = heading
                        .as_mut()
                        .or(items.last_mut())
                        .or(paragraph.as_mut())
                    {
                        buffer.push(' ');
                    }
                }
                _ => {}
            }
        }

        outline
    }

    fn qualifying(&self) -> Vec<&str> {
        self.paragraphs
            .iter()
            .map(String::as_str)
            .filter(|p| p.chars().count() > MIN_PARAGRAPH_CHARS)
            .collect()
    }

    fn sentences(&self) -> impl Iterator<Item = String> + '_ {
        self.paragraphs.iter().flat_map(|p| split_sentences(p))
    }
}

fn non_empty(text: String) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

fn brief(note: &Note, outline: &Outline) -> String {
    outline
        .qualifying()
        .first()
        .map(|p| (*p).to_string())
        .or_else(|| {
            let title = note.title.trim();
            (!title.is_empty()).then(|| title.to_string())
        })
        .or_else(|| outline.paragraphs.first().cloned())
        .unwrap_or_default()
}

fn detailed(note: &Note, outline: &Outline) -> String {
    let paragraphs = outline.qualifying();
    if paragraphs.is_empty() {
        return brief(note, outline);
    }

    let picked: Vec<&str> = if paragraphs.len() <= 3 {
        paragraphs
    } else {
        let last = paragraphs.len() - 1;
        [0, paragraphs.len() / 2, last]
            .iter()
            .filter_map(|&i| paragraphs.get(i).copied())
            .collect()
    };
    picked.join("\n\n")
}

fn bullet_points(outline: &Outline) -> Vec<String> {
    let mut points = Dedup::default();
    for entry in &outline.structure {
        points.push(entry);
    }
    if points.len() < MIN_BULLET_POINTS {
        for sentence in outline.sentences().take(LEADING_SENTENCES) {
            points.push(&sentence);
        }
    }
    points.into_capped()
}

fn key_insights(outline: &Outline) -> Vec<String> {
    let mut insights = Dedup::default();
    for sentence in outline.sentences() {
        if INSIGHT_LEAD_IN.is_match(&sentence).unwrap_or(false) {
            insights.push(&sentence);
        }
    }
    for span in &outline.emphasis {
        insights.push(span);
    }
    if insights.is_empty() {
        for sentence in outline.sentences().take(LEADING_SENTENCES) {
            insights.push(&sentence);
        }
    }
    if insights.is_empty() {
        for heading in &outline.headings {
            insights.push(heading);
        }
    }
    insights.into_capped()
}

/// Case-insensitive first-seen dedup
#[derive(Default)]
struct Dedup {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl Dedup {
    fn push(&mut self, item: &str) {
        let item = item.trim();
        if !item.is_empty() && self.seen.insert(item.to_lowercase()) {
            self.items.push(item.to_string());
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn into_capped(mut self) -> Vec<String> {
        self.items.truncate(MAX_POINTS);
        self.items
    }
}

/// Split after `.`, `!` or `?` followed by whitespace
#[inline]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_none_or(|next| next.is_whitespace());
        if at_boundary {
            if let Some(sentence) = non_empty(std::mem::take(&mut current)) {
                sentences.push(sentence);
            }
        }
    }
    if let Some(sentence) = non_empty(current) {
        sentences.push(sentence);
    }

    sentences
}
