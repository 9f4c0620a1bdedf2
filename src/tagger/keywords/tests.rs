use super::*;

fn tags(matches: &[KeywordMatch]) -> Vec<&str> {
    matches.iter().map(|m| m.tag.as_str()).collect()
}

fn find<'a>(matches: &'a [KeywordMatch], tag: &str) -> Option<&'a KeywordMatch> {
    matches.iter().find(|m| m.tag == tag)
}

#[test]
fn languages_match_case_insensitively() {
    let matches = keyword_tags("Ownership", "Learning RUST ownership and borrowing", &[]);
    let rust = find(&matches, "rust").expect("should find rust");
    assert!((rust.confidence - LANGUAGE_CONFIDENCE).abs() < f64::EPSILON);
    assert!(!tags(&matches).contains(&"python"));
}

#[test]
fn title_is_searched_too() {
    let matches = keyword_tags("Notes on Django", "Views and templates", &[]);
    let django = find(&matches, "django").expect("should find django");
    assert!((django.confidence - FRAMEWORK_CONFIDENCE).abs() < f64::EPSILON);
}

#[test]
fn keywords_match_whole_words_only() {
    let matches = keyword_tags("", "The crust was trusted to gopher javascripting", &[]);
    assert!(find(&matches, "rust").is_none());
    assert!(find(&matches, "go").is_none());
    assert!(find(&matches, "javascript").is_none());
}

#[test]
fn dotted_keywords_are_literal() {
    let matches = keyword_tags("", "A server written in node.js", &[]);
    assert!(find(&matches, "javascript").is_some());
    let matches = keyword_tags("", "nodeXjs", &[]);
    assert!(find(&matches, "javascript").is_none());
}

#[test]
fn topic_confidence_scales_with_matches() {
    assert!((topic_confidence(1) - 0.65).abs() < 1e-9);
    assert!((topic_confidence(2) - 0.8).abs() < 1e-9);
    assert!((topic_confidence(3) - 0.95).abs() < 1e-9);
    assert!((topic_confidence(10) - 0.95).abs() < 1e-9);

    let matches = keyword_tags("", "Ownership and borrowing rules, plus lifetimes? No, one lifetime.", &[]);
    let memory = find(&matches, "memory-management").expect("should find topic");
    assert!((memory.confidence - 0.95).abs() < 1e-9);
    assert!(memory.reason.contains("ownership"));
}

#[test]
fn known_tags_mentioned_literally() {
    let known = vec!["sourdough".to_string(), "machine-learning".to_string(), "absent".to_string()];
    let matches = keyword_tags("Bread", "My sourdough starter and some machine learning", &known);

    let sourdough = find(&matches, "sourdough").expect("should find known tag");
    assert!((sourdough.confidence - KNOWN_TAG_CONFIDENCE).abs() < f64::EPSILON);
    assert!(
        matches
            .iter()
            .any(|m| m.tag == "machine-learning" && (m.confidence - KNOWN_TAG_CONFIDENCE).abs() < f64::EPSILON)
    );
    assert!(find(&matches, "absent").is_none());
}

#[test]
fn known_tags_in_title_only_are_ignored() {
    let known = vec!["sourdough".to_string()];
    let matches = keyword_tags("Sourdough", "Feed the starter every morning.", &known);
    assert!(find(&matches, "sourdough").is_none());
}

#[test]
fn plain_text_yields_nothing() {
    assert!(keyword_tags("Groceries", "eggs, flour, butter", &[]).is_empty());
}
