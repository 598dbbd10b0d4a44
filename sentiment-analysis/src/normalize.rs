//! Schema enforcement over [`crate::raw`] shapes.

use crate::fallback::schema_fallback;
use crate::raw::{value_text, RawAnalysis, RawInsight};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracker_core::ranking::sorted_by_rank;
use tracker_core::text::extract_post_ids;
use tracker_core::{format_permalink, AnalysisResult, HeuristicConfig, InsightItem, Post, SentimentLabel};

static PERMALINK_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)reddit\.com/comments/([a-z0-9_]+)").expect("valid regex"));
static BARE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[a-z0-9_]{5,}$").expect("valid regex"));

pub const MAX_EVIDENCE_PER_ITEM: usize = 2;
pub const MAX_INSIGHT_ITEMS: usize = 5;
pub const MAX_THEMES: usize = 10;

/// Post id behind a permalink or a bare id of at least five word characters.
pub fn extract_post_id_from_link(value: &str) -> Option<String> {
    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(id) = PERMALINK_ID_RE.captures(raw).and_then(|caps| caps.get(1)) {
        return Some(id.as_str().to_string());
    }
    BARE_ID_RE.is_match(raw).then(|| raw.to_string())
}

/// Canonical permalinks for the recognizable entries, deduplicated, at most two.
pub fn normalize_evidence_links<I, S>(candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut links: Vec<String> = Vec::new();
    for candidate in candidates {
        let Some(post_id) = extract_post_id_from_link(candidate.as_ref()) else {
            continue;
        };
        let link = format_permalink(&post_id);
        if !links.contains(&link) {
            links.push(link);
        }
        if links.len() >= MAX_EVIDENCE_PER_ITEM {
            break;
        }
    }
    links
}

pub fn normalize_sentiment_label(value: Option<&str>) -> Option<SentimentLabel> {
    value.and_then(SentimentLabel::parse_loose)
}

fn normalize_insight(raw: &RawInsight) -> Option<InsightItem> {
    match raw {
        RawInsight::Text(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| InsightItem::new(text, Vec::new()))
        }
        RawInsight::Item(item) => {
            let text = item.display_text();
            if text.is_empty() {
                return None;
            }

            let mut evidence = item
                .evidence
                .as_ref()
                .map(|raw| normalize_evidence_links(raw.candidates()))
                .unwrap_or_default();

            if evidence.is_empty() {
                let mut ids = item.referenced_ids();
                for id in extract_post_ids(&text) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                evidence = normalize_evidence_links(ids);
            }

            Some(InsightItem::new(text, evidence))
        }
        RawInsight::Other(_) => None,
    }
}

pub fn normalize_insight_items(raw: &[RawInsight], limit: usize) -> Vec<InsightItem> {
    raw.iter().filter_map(normalize_insight).take(limit).collect()
}

/// Trimmed, non-empty, deduplicated theme strings.
pub fn normalize_themes(raw: &[Value], limit: usize) -> Vec<String> {
    let mut themes: Vec<String> = Vec::new();
    for value in raw {
        let Some(theme) = value_text(value).map(|s| s.trim().to_string()) else {
            continue;
        };
        if theme.is_empty() || themes.contains(&theme) {
            continue;
        }
        themes.push(theme);
        if themes.len() >= limit {
            break;
        }
    }
    themes
}

/// Model output after shape normalization but before gaps are filled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedAnalysis {
    pub sentiment_label: Option<SentimentLabel>,
    pub sentiment_summary: String,
    pub themes: Vec<String>,
    pub pain_points: Vec<InsightItem>,
    pub wins: Vec<InsightItem>,
}

pub fn normalize_analysis(raw: &RawAnalysis) -> NormalizedAnalysis {
    NormalizedAnalysis {
        sentiment_label: normalize_sentiment_label(raw.sentiment_label.as_deref()),
        sentiment_summary: raw
            .sentiment_summary
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        themes: normalize_themes(raw.themes.as_deref().unwrap_or_default(), MAX_THEMES),
        pain_points: normalize_insight_items(
            raw.pain_points.as_deref().unwrap_or_default(),
            MAX_INSIGHT_ITEMS,
        ),
        wins: normalize_insight_items(raw.wins.as_deref().unwrap_or_default(), MAX_INSIGHT_ITEMS),
    }
}

/// Gives every item evidence: its own normalized links, then `[POST:id]`
/// references in its text, then the permalinks of the highest-ranked posts
/// assigned round-robin by position.
pub fn ensure_evidence_for_items(items: Vec<InsightItem>, posts: &[Post]) -> Vec<InsightItem> {
    let fallback_links: Vec<String> = sorted_by_rank(posts)
        .iter()
        .filter(|post| !post.id.is_empty())
        .map(|post| format_permalink(&post.id))
        .collect();

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            let mut evidence = normalize_evidence_links(&item.evidence);
            if evidence.is_empty() {
                evidence = normalize_evidence_links(extract_post_ids(&item.text));
            }
            if evidence.is_empty() && !fallback_links.is_empty() {
                evidence = vec![fallback_links[idx % fallback_links.len()].clone()];
            }
            InsightItem::new(item.text, evidence)
        })
        .collect()
}

/// Fills every gap in `normalized` from the heuristic analysis of `posts`.
pub fn ensure_valid_analysis(
    normalized: NormalizedAnalysis,
    posts: &[Post],
    heuristics: &HeuristicConfig,
) -> AnalysisResult {
    let fallback = schema_fallback(posts, heuristics);

    let sentiment_label = normalized.sentiment_label.unwrap_or(fallback.sentiment_label);
    let sentiment_summary = if normalized.sentiment_summary.is_empty() {
        fallback.sentiment_summary
    } else {
        normalized.sentiment_summary
    };
    let mut themes = if normalized.themes.is_empty() {
        fallback.themes
    } else {
        normalized.themes
    };
    themes.truncate(MAX_THEMES);

    let pain_points = if normalized.pain_points.is_empty() {
        fallback.pain_points
    } else {
        normalized.pain_points
    };
    let wins = if normalized.wins.is_empty() {
        fallback.wins
    } else {
        normalized.wins
    };

    let mut pain_points = ensure_evidence_for_items(pain_points, posts);
    pain_points.truncate(MAX_INSIGHT_ITEMS);
    let mut wins = ensure_evidence_for_items(wins, posts);
    wins.truncate(MAX_INSIGHT_ITEMS);

    AnalysisResult {
        sentiment_label,
        sentiment_summary,
        themes,
        pain_points,
        wins,
    }
}
