
pub mod keywords;
pub mod normalizer;

use std::collections::{BTreeMap, HashMap, HashSet};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::Result;
use crate::config::TaggingConfig;
use crate::llm::GenerationOptions;
use crate::models::{Note, TagOptions, TagSuggestion};
use crate::pipeline::RagPipeline;
use crate::prompts::PromptTemplate;

pub use keywords::{KeywordMatch, keyword_tags};
pub use normalizer::{normalize_tag, normalize_tags};

const SIMILARITY_WEIGHT: f64 = 0.7;
const OCCURRENCE_WEIGHT: f64 = 0.3;
pub const LLM_CONFIDENCE: f64 = 0.8;
const AGREEMENT_BOOST: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Signal {
    Similarity,
    Keyword,
    Llm,
}

#[derive(Debug, Clone)]
struct Candidate {
    tag: String,
    confidence: f64,
    reason: String,
    signal: Signal,
}

/// Suggests tags from similar notes, keyword tables and an optional LLM
pub struct AutoTagger {
    known_tags: RwLock<Vec<String>>,
    neighbor_count: usize,
    neighbor_threshold: f32,
}

impl AutoTagger {
    #[inline]
    pub fn new(config: &TaggingConfig) -> Self {
        Self {
            known_tags: RwLock::new(normalize_tags(&config.known_tags)),
            neighbor_count: config.neighbor_count,
            neighbor_threshold: config.neighbor_threshold,
        }
    }

    #[inline]
    pub async fn known_tags(&self) -> Vec<String> {
        self.known_tags.read().await.clone()
    }

    /// Replace the tag vocabulary used for literal matches and LLM hints
    #[inline]
    pub async fn update_tags_list<I, S>(&self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags = normalize_tags(tags);
        debug!("Tag vocabulary now has {} entries", tags.len());
        *self.known_tags.write().await = tags;
    }

    #[inline]
    pub async fn suggest_tags(
        &self,
        pipeline: &RagPipeline,
        note: &Note,
        options: &TagOptions,
    ) -> Result<Vec<TagSuggestion>> {
        let known_tags = self.known_tags().await;

        let mut candidates = self.similarity_candidates(pipeline, note).await?;
        candidates.extend(keyword_candidates(note, &known_tags));
        if options.use_llm && pipeline.llm_available() {
            candidates.extend(llm_candidates(pipeline, note, &known_tags, options.max_tags).await);
        }

        let suggestions = merge(candidates, note, options);
        debug!(
            "Suggested {} tags for note {}",
            suggestions.len(),
            note.id
        );
        Ok(suggestions)
    }

    /// One entry per note. A note whose suggestion fails gets an empty list.
    #[inline]
    pub async fn batch_suggest_tags(
        &self,
        pipeline: &RagPipeline,
        notes: &[Note],
        options: &TagOptions,
    ) -> Vec<(String, Vec<TagSuggestion>)> {
        let mut results = Vec::with_capacity(notes.len());
        for note in notes {
            let suggestions = match self.suggest_tags(pipeline, note, options).await {
                Ok(suggestions) => suggestions,
                Err(e) => {
                    warn!("Tag suggestion failed for note {}: {}", note.id, e);
                    Vec::new()
                }
            };
            results.push((note.id.clone(), suggestions));
        }
        results
    }

    async fn similarity_candidates(
        &self,
        pipeline: &RagPipeline,
        note: &Note,
    ) -> Result<Vec<Candidate>> {
        let neighbors = pipeline
            .neighbors(note, self.neighbor_count, self.neighbor_threshold)
            .await?;
        if neighbors.is_empty() {
            return Ok(Vec::new());
        }

        // tag -> (best score, occurrences)
        let mut tally: BTreeMap<String, (f32, usize)> = BTreeMap::new();
        for neighbor in &neighbors {
            let tags: HashSet<String> = neighbor
                .record
                .metadata
                .tags
                .iter()
                .map(|t| normalize_tag(t))
                .filter(|t| !t.is_empty())
                .collect();
            for tag in tags {
                let entry = tally.entry(tag).or_insert((0.0, 0));
                entry.0 = entry.0.max(neighbor.score);
                entry.1 += 1;
            }
        }

        let neighbor_count = neighbors.len() as f64;
        Ok(tally
            .into_iter()
            .map(|(tag, (best, occurrences))| Candidate {
                confidence: (SIMILARITY_WEIGHT * f64::from(best)
                    + OCCURRENCE_WEIGHT * (occurrences as f64 / neighbor_count))
                    .clamp(0.0, 1.0),
                reason: format!("Used by {} similar note(s)", occurrences),
                tag,
                signal: Signal::Similarity,
            })
            .collect())
    }
}

fn keyword_candidates(note: &Note, known_tags: &[String]) -> Vec<Candidate> {
    keyword_tags(&note.title, &note.content, known_tags)
        .into_iter()
        .map(|m| Candidate {
            tag: m.tag,
            confidence: m.confidence,
            reason: m.reason,
            signal: Signal::Keyword,
        })
        .collect()
}

async fn llm_candidates(
    pipeline: &RagPipeline,
    note: &Note,
    known_tags: &[String],
    max_tags: usize,
) -> Vec<Candidate> {
    let prompt = PromptTemplate::Tag {
        title: &note.title,
        content: &note.content,
        known_tags,
        max_tags,
    }
    .render();
    let options = GenerationOptions::from(&pipeline.config().llm);

    match pipeline.provider().generate(&prompt, &options).await {
        Ok(generation) => parse_tag_list(&generation.text)
            .into_iter()
            .map(|tag| Candidate {
                tag,
                confidence: LLM_CONFIDENCE,
                reason: "Suggested by language model".to_string(),
                signal: Signal::Llm,
            })
            .collect(),
        Err(e) => {
            warn!("LLM tag suggestion failed for note {}: {}", note.id, e);
            Vec::new()
        }
    }
}

/// Tags from a comma or newline separated model reply
#[inline]
pub fn parse_tag_list(text: &str) -> Vec<String> {
    normalize_tags(text.split([',', '\n']).map(|raw| {
        strip_list_number(raw.trim().trim_start_matches(['-', '*', '•']).trim())
            .trim_matches(['"', '\'', '`'])
            .trim_start_matches('#')
    }))
}

/// `"2. rust"` and `"2) rust"` become `"rust"`
fn strip_list_number(item: &str) -> &str {
    let unnumbered = item.trim_start_matches(|c: char| c.is_ascii_digit());
    match unnumbered.strip_prefix(['.', ')']) {
        Some(rest) if unnumbered.len() < item.len() => rest.trim_start(),
        _ => item,
    }
}

fn merge(candidates: Vec<Candidate>, note: &Note, options: &TagOptions) -> Vec<TagSuggestion> {
    struct Merged {
        confidence: f64,
        reasons: Vec<String>,
        signals: HashSet<Signal>,
    }

    let mut merged: HashMap<String, Merged> = HashMap::new();
    for candidate in candidates {
        let tag = normalize_tag(&candidate.tag);
        if tag.is_empty() {
            continue;
        }
        let entry = merged.entry(tag).or_insert_with(|| Merged {
            confidence: 0.0,
            reasons: Vec::new(),
            signals: HashSet::new(),
        });
        entry.confidence = entry.confidence.max(candidate.confidence);
        if !entry.reasons.contains(&candidate.reason) {
            entry.reasons.push(candidate.reason);
        }
        entry.signals.insert(candidate.signal);
    }

    let existing: HashSet<String> = normalize_tags(&note.tags).into_iter().collect();
    let mut suggestions: Vec<TagSuggestion> = merged
        .into_iter()
        .filter(|(tag, _)| !existing.contains(tag))
        .map(|(tag, m)| {
            let confidence = if m.signals.len() > 1 {
                (m.confidence * AGREEMENT_BOOST).min(1.0)
            } else {
                m.confidence
            };
            TagSuggestion {
                tag,
                confidence: confidence.clamp(0.0, 1.0),
                reason: Some(m.reasons.join("; ")),
            }
        })
        .filter(|s| s.confidence >= options.min_confidence)
        .collect();

    suggestions.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.tag.cmp(&b.tag))
    });
    suggestions.truncate(options.max_tags);
    suggestions
}

/// `note` with `tags` added, skipping tags it already carries in any spelling
#[inline]
pub fn apply_tags(note: &Note, tags: &[String]) -> Note {
    let mut existing: HashSet<String> = normalize_tags(&note.tags).into_iter().collect();
    let mut updated = note.clone();
    for tag in normalize_tags(tags) {
        if existing.insert(tag.clone()) {
            updated.tags.push(tag);
        }
    }
    updated
}
