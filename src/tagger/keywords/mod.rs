#[cfg(test)]
mod tests;

use std::sync::LazyLock;

use fancy_regex::{Regex, escape};

pub const LANGUAGE_CONFIDENCE: f64 = 0.9;
pub const FRAMEWORK_CONFIDENCE: f64 = 0.85;
pub const KNOWN_TAG_CONFIDENCE: f64 = 0.95;
const TOPIC_BASE_CONFIDENCE: f64 = 0.5;
const TOPIC_STEP: f64 = 0.15;
const TOPIC_MAX_CONFIDENCE: f64 = 0.95;

/// A tag found by a static keyword table
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMatch {
    pub tag: String,
    pub confidence: f64,
    pub reason: String,
}

const LANGUAGES: &[(&str, &[&str])] = &[
    ("rust", &["rust", "cargo", "rustc"]),
    ("python", &["python", "pip", "pypi"]),
    ("javascript", &["javascript", "node.js", "nodejs", "npm"]),
    ("typescript", &["typescript"]),
    ("go", &["golang"]),
    ("java", &["java", "jvm"]),
    ("ruby", &["ruby", "rubygems"]),
    ("swift", &["swift", "swiftui"]),
    ("kotlin", &["kotlin"]),
    ("sql", &["sql", "postgresql", "sqlite", "mysql"]),
    ("haskell", &["haskell"]),
    ("php", &["php"]),
];

const FRAMEWORKS: &[(&str, &[&str])] = &[
    ("react", &["react", "jsx"]),
    ("vue", &["vue", "vue.js"]),
    ("angular", &["angular"]),
    ("svelte", &["svelte"]),
    ("nextjs", &["next.js", "nextjs"]),
    ("django", &["django"]),
    ("flask", &["flask"]),
    ("fastapi", &["fastapi"]),
    ("rails", &["rails", "ruby on rails"]),
    ("tokio", &["tokio"]),
    ("axum", &["axum"]),
    ("pytorch", &["pytorch"]),
    ("tensorflow", &["tensorflow"]),
];

const TOPICS: &[(&str, &[&str])] = &[
    (
        "machine-learning",
        &["machine learning", "neural network", "model training", "deep learning", "classifier"],
    ),
    ("database", &["database", "query", "index", "schema", "migration"]),
    ("web-development", &["frontend", "backend", "html", "css", "http", "browser"]),
    ("devops", &["docker", "kubernetes", "deployment", "ci/cd", "terraform"]),
    ("security", &["security", "encryption", "authentication", "vulnerability", "password"]),
    ("testing", &["unit test", "integration test", "test suite", "mocking", "assertion"]),
    ("concurrency", &["async", "thread", "mutex", "concurrency", "parallel"]),
    ("memory-management", &["ownership", "borrowing", "lifetime", "garbage collection", "memory"]),
    ("meeting", &["meeting", "agenda", "minutes", "attendees", "action items"]),
    ("productivity", &["todo", "habit", "focus", "workflow", "time management"]),
];

struct Category {
    tag: &'static str,
    patterns: Vec<(&'static str, Regex)>,
}

fn compile(table: &[(&'static str, &'static [&'static str])]) -> Vec<Category> {
    table
        .iter()
        .map(|&(tag, keywords)| Category {
            tag,
            patterns: keywords
                .iter()
                .map(|&kw| (kw, word_pattern(kw).expect("valid regex")))
                .collect(),
        })
        .collect()
}

static LANGUAGE_PATTERNS: LazyLock<Vec<Category>> = LazyLock::new(|| compile(LANGUAGES));
static FRAMEWORK_PATTERNS: LazyLock<Vec<Category>> = LazyLock::new(|| compile(FRAMEWORKS));
static TOPIC_PATTERNS: LazyLock<Vec<Category>> = LazyLock::new(|| compile(TOPICS));

/// Case-insensitive whole-word pattern. Separators inside a phrase match
/// any run of whitespace or hyphens.
fn word_pattern(phrase: &str) -> Result<Regex, fancy_regex::Error> {
    let body = phrase
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .map(|part| escape(part).into_owned())
        .collect::<Vec<_>>()
        .join(r"[\s-]+");
    Regex::new(&format!(r"(?i)(?<![\w]){}(?![\w])", body))
}

fn first_match<'a>(category: &'a Category, text: &str) -> Option<&'a str> {
    category
        .patterns
        .iter()
        .find(|(_, re)| re.is_match(text).unwrap_or(false))
        .map(|(kw, _)| *kw)
}

/// Match title and content against the language, framework and topic
/// tables. `known_tags` count only when mentioned literally in the content.
#[inline]
pub fn keyword_tags(title: &str, content: &str, known_tags: &[String]) -> Vec<KeywordMatch> {
    let text = format!("{}\n{}", title, content);
    let mut matches = Vec::new();

    for (categories, confidence, kind) in [
        (&*LANGUAGE_PATTERNS, LANGUAGE_CONFIDENCE, "language"),
        (&*FRAMEWORK_PATTERNS, FRAMEWORK_CONFIDENCE, "framework"),
    ] {
        for category in categories {
            if let Some(keyword) = first_match(category, &text) {
                matches.push(KeywordMatch {
                    tag: category.tag.to_string(),
                    confidence,
                    reason: format!("Mentions {} \"{}\"", kind, keyword),
                });
            }
        }
    }

    for category in TOPIC_PATTERNS.iter() {
        let hits: Vec<&str> = category
            .patterns
            .iter()
            .filter(|(_, re)| re.is_match(&text).unwrap_or(false))
            .map(|(kw, _)| *kw)
            .collect();
        if !hits.is_empty() {
            matches.push(KeywordMatch {
                tag: category.tag.to_string(),
                confidence: topic_confidence(hits.len()),
                reason: format!("Topic keywords: {}", hits.join(", ")),
            });
        }
    }

    for tag in known_tags {
        match word_pattern(tag) {
            Ok(re) if re.is_match(content).unwrap_or(false) => matches.push(KeywordMatch {
                tag: tag.clone(),
                confidence: KNOWN_TAG_CONFIDENCE,
                reason: "Existing tag mentioned in note".to_string(),
            }),
            Ok(_) => {}
            Err(e) => tracing::debug!("Skipping known tag {:?}: {}", tag, e),
        }
    }

    matches
}

/// Grows with the number of distinct keywords matched
#[inline]
pub fn topic_confidence(distinct_matches: usize) -> f64 {
    (TOPIC_BASE_CONFIDENCE + TOPIC_STEP * distinct_matches as f64).min(TOPIC_MAX_CONFIDENCE)
}
