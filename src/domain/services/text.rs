//! Text normalization shared by extraction and matching

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn entity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("valid entity regex")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"))
}

/// Decode the HTML entities that show up in product listings.
pub fn decode_entities(input: &str) -> String {
    entity_regex()
        .replace_all(input, |caps: &regex::Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match body {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => None,
                }
            };
            decoded
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Strip tags, decode entities and collapse whitespace.
pub fn clean_text(input: &str) -> String {
    let without_tags = tag_regex().replace_all(input, " ");
    collapse_whitespace(&decode_entities(&without_tags))
}

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase, punctuation stripped, whitespace collapsed.
pub fn normalize_name(input: &str) -> String {
    let lowered: String = input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    collapse_whitespace(&lowered)
}

pub fn word_set(normalized: &str) -> HashSet<&str> {
    normalized.split_whitespace().collect()
}

/// Word-overlap similarity in [0, 85]: 85 for identical normalized names,
/// otherwise Jaccard overlap scaled to 80.
pub fn name_similarity(a: &str, b: &str) -> u8 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    normalized_similarity(&a, &b)
}

/// Same as [`name_similarity`] for inputs already passed through [`normalize_name`].
pub fn normalized_similarity(a: &str, b: &str) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    if a == b {
        return 85;
    }

    let words_a = word_set(a);
    let words_b = word_set(b);
    let common = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0;
    }
    ((common as f64 / union as f64) * 80.0).round() as u8
}
