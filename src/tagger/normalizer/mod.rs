
use std::collections::HashSet;

/// Lowercase, hyphen-separated, alphanumeric form of a tag.
///
/// Whitespace and underscores become hyphens, everything else that is not
/// alphanumeric is dropped, and runs of hyphens collapse to one.
#[inline]
pub fn normalize_tag(tag: &str) -> String {
    let cleaned: String = tag
        .trim()
        .trim_start_matches('#')
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '_' { '-' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect();

    cleaned
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Normalize and deduplicate, keeping first occurrences in order
#[inline]
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|tag| normalize_tag(tag.as_ref()))
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}
