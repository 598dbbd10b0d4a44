//! Text normalization primitives shared across the pipeline.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static SUBREDDIT_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)reddit\.com/r/([^/?#]+)").expect("valid regex"));
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").expect("valid regex"));
static PREFIX_STRIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]").expect("valid regex"));
static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:json)?\s*(.*?)\s*```").expect("valid regex"));
static OBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));
static POST_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[POST:([A-Za-z0-9_]+)\]").expect("valid regex"));

const MAX_SUBREDDIT_PREFIXES: usize = 20;

/// Accepts `name`, `r/name`, `/r/name/` or a full reddit URL and returns the
/// bare subreddit name. Returns an empty string when nothing usable remains.
pub fn normalize_subreddit(value: &str) -> String {
    let mut raw = value.trim().trim_matches('/');
    if raw
        .get(..2)
        .is_some_and(|head| head.eq_ignore_ascii_case("r/"))
    {
        raw = &raw[2..];
    }

    let extracted = SUBREDDIT_URL_RE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    extracted.trim().trim_matches('/').to_string()
}

/// Lowercased alphanumeric runs of `value`.
pub fn tokenize(value: &str) -> Vec<String> {
    let lowered = value.to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Case/whitespace-insensitive lookup key for free-text names.
pub fn normalize_lookup_key(value: &str) -> String {
    tokenize(value).join(" ")
}

/// Reduces a search prefix to the characters the subreddit search accepts.
pub fn clean_prefix(value: &str) -> String {
    PREFIX_STRIP_RE
        .replace_all(&value.to_lowercase(), "")
        .into_owned()
}

/// Candidate subreddit-name prefixes derived from a game name.
pub fn build_subreddit_prefixes(game_name: &str) -> Vec<String> {
    let tokens = tokenize(game_name);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut prefixes: Vec<String> = Vec::new();
    let mut add = |term: &str| {
        let cleaned = clean_prefix(term);
        if cleaned.len() >= 2 && !prefixes.contains(&cleaned) {
            prefixes.push(cleaned);
        }
    };

    add(&tokens.concat());
    add(&tokens.join("_"));

    for token in &tokens {
        add(token);
        let max_len = token.len().min(8);
        for length in 3..=max_len {
            add(&token[..length]);
        }
    }

    for span in [2usize, 3] {
        if tokens.len() >= span {
            add(&tokens[..span].concat());
            add(&tokens[..span].join("_"));
        }
    }

    prefixes.truncate(MAX_SUBREDDIT_PREFIXES);
    prefixes
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Best-effort extraction of a JSON object from model output: the whole text,
/// then the first fenced code block, then the outermost brace span.
pub fn extract_json_payload(text: &str) -> Option<Map<String, Value>> {
    let content = text.trim();
    if content.is_empty() {
        return None;
    }

    if let Some(map) = parse_object(content) {
        return Some(map);
    }

    if let Some(body) = FENCE_RE.captures(content).and_then(|caps| caps.get(1)) {
        if let Some(map) = parse_object(body.as_str().trim()) {
            return Some(map);
        }
    }

    OBJECT_RE
        .find(content)
        .and_then(|m| parse_object(m.as_str()))
}

/// Post ids referenced as `[POST:id]` inside free text, in order of appearance.
pub fn extract_post_ids(text: &str) -> Vec<String> {
    POST_REF_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// First `max_chars` characters of `value`.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
