//! Per-subreddit breakdown rows: grouping, the deterministic rows, and the
//! mapping of model output onto the fixed row shape.

use crate::fallback::{
    estimate_sentiment, point_from_post, post_refs, ref_suffix, signal_partitions, theme_phrases,
    title_case,
};
use crate::normalize::{
    ensure_evidence_for_items, extract_post_id_from_link, normalize_evidence_links,
    normalize_insight_items, normalize_sentiment_label, normalize_themes,
};
use crate::raw::{value_text, RawBullets, RawBreakdownRow};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracker_core::ranking::sorted_by_rank;
use tracker_core::text::normalize_subreddit;
use tracker_core::{AnalysisResult, HeuristicConfig, InsightItem, Post, SubredditBreakdownRow};

static BULLET_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\n\r]+|\.\s+").expect("valid regex"));

/// Rank-sorted posts per subreddit, keyed by normalized name in sorted order.
pub type PostGroups = BTreeMap<String, Vec<Post>>;

pub const BREAKDOWN_POSTS_PER_SUBREDDIT: usize = 8;
pub const BREAKDOWN_ITEMS: usize = 3;
pub const MIN_BREAKDOWN_THEMES: usize = 3;
pub const MAX_BREAKDOWN_THEMES: usize = 5;
const MAX_SUMMARY_BULLETS: usize = 3;
const POINT_TITLE_CHARS: usize = 180;

const DEFAULT_ROW_PHRASES: [&str; 3] = [
    "content pacing feedback",
    "difficulty tuning feedback",
    "progression friction reports",
];
const NO_PAIN_POINTS: &str = "Insufficient data to identify repeated pain points.";
const NO_WINS: &str = "Insufficient data to identify repeated wins.";

pub fn group_posts_by_subreddit(posts: &[Post], max_per_subreddit: usize) -> PostGroups {
    let mut groups = PostGroups::new();
    for post in posts {
        let subreddit = normalize_subreddit(&post.subreddit);
        if subreddit.is_empty() {
            continue;
        }
        groups.entry(subreddit).or_default().push(post.clone());
    }
    for posts in groups.values_mut() {
        *posts = sorted_by_rank(posts);
        posts.truncate(max_per_subreddit.max(1));
    }
    groups
}

/// Deterministic row for one subreddit, `None` when it has no posts.
pub fn fallback_row(
    subreddit: &str,
    posts: &[Post],
    heuristics: &HeuristicConfig,
) -> Option<SubredditBreakdownRow> {
    let mut top = sorted_by_rank(posts);
    top.truncate(BREAKDOWN_POSTS_PER_SUBREDDIT);
    if top.is_empty() {
        return None;
    }

    let label = estimate_sentiment(&top, heuristics);
    let refs = post_refs(&top);

    let mut phrases = theme_phrases(&top, MAX_BREAKDOWN_THEMES, heuristics);
    if phrases.is_empty() {
        phrases = DEFAULT_ROW_PHRASES.iter().map(|p| p.to_string()).collect();
    }

    let representative = match refs.first() {
        Some(one) => {
            let two = refs.get(1).unwrap_or(one);
            format!("Representative threads: [POST:{}], [POST:{}]", one, two)
        }
        None => "Representative threads are available in this community sample.".to_string(),
    };
    let summary_bullets = vec![
        format!(
            "Overall sentiment in r/{} is {} based on high-engagement product discussions.",
            subreddit,
            label.as_str().to_lowercase()
        ),
        format!(
            "Most repeated subtopics include {}.",
            phrases.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
        ),
        representative,
    ];

    let mut top_themes: Vec<String> = phrases
        .iter()
        .take(MAX_BREAKDOWN_THEMES)
        .enumerate()
        .map(|(idx, phrase)| {
            format!(
                "{} - recurring product feedback trend in high-engagement posts{}",
                title_case(phrase),
                ref_suffix(&refs, idx)
            )
        })
        .collect();
    while top_themes.len() < MIN_BREAKDOWN_THEMES {
        top_themes.push(format!(
            "Product Feedback Signal - repeated issue/outcome in recent threads{}",
            ref_suffix(&refs, top_themes.len())
        ));
    }

    let (negative, positive) = signal_partitions(&top, BREAKDOWN_ITEMS, heuristics);
    let empty_title = "player-reported product feedback";
    let top_pain_points = (0..BREAKDOWN_ITEMS)
        .map(|idx| {
            point_from_post(
                negative[idx % negative.len()],
                "Players report friction around",
                empty_title,
                POINT_TITLE_CHARS,
            )
        })
        .collect();
    let top_wins = (0..BREAKDOWN_ITEMS)
        .map(|idx| {
            point_from_post(
                positive[idx % positive.len()],
                "Players praise",
                empty_title,
                POINT_TITLE_CHARS,
            )
        })
        .collect();

    Some(SubredditBreakdownRow {
        subreddit: subreddit.to_string(),
        sentiment_label: label,
        summary_bullets,
        top_themes,
        top_pain_points,
        top_wins,
    })
}

/// Deterministic rows for every group with posts, in subreddit order.
pub fn fallback_breakdown_rows(groups: &PostGroups, heuristics: &HeuristicConfig) -> Vec<SubredditBreakdownRow> {
    groups
        .iter()
        .filter_map(|(subreddit, posts)| fallback_row(subreddit, posts, heuristics))
        .collect()
}

fn insufficient_signal_row(subreddit: &str) -> SubredditBreakdownRow {
    SubredditBreakdownRow {
        subreddit: subreddit.to_string(),
        sentiment_label: tracker_core::SentimentLabel::Mixed,
        summary_bullets: vec![
            format!("Overall sentiment in r/{} is mixed.", subreddit),
            "Insufficient subreddit-level data to produce a reliable AI summary.".to_string(),
            "Representative threads are available in the sampled posts.".to_string(),
        ],
        top_themes: vec![
            "Insufficient subreddit signal - not enough high-engagement product feedback".to_string(),
            "Insufficient subreddit signal - unable to extract repeated subtopics".to_string(),
            "Insufficient subreddit signal - rerun scan after more activity".to_string(),
        ],
        top_pain_points: vec![InsightItem::new(NO_PAIN_POINTS, Vec::new()); BREAKDOWN_ITEMS],
        top_wins: vec![InsightItem::new(NO_WINS, Vec::new()); BREAKDOWN_ITEMS],
    }
}

/// Fallback row for a single subreddit; a placeholder row when it has no posts.
pub fn single_subreddit_fallback_row(
    subreddit: &str,
    posts: &[Post],
    heuristics: &HeuristicConfig,
) -> SubredditBreakdownRow {
    let normalized = normalize_subreddit(subreddit);
    let name = if normalized.is_empty() {
        subreddit
    } else {
        normalized.as_str()
    };
    fallback_row(name, posts, heuristics).unwrap_or_else(|| insufficient_signal_row(name))
}

/// Text up to and including the first `.`, `!` or `?` that is followed by
/// whitespace; the whole trimmed text when there is no such boundary.
pub fn first_sentence(text: &str) -> String {
    let value = text.trim();
    let mut chars = value.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some((_, next)) = chars.peek() {
                if next.is_whitespace() {
                    return value[..idx + c.len_utf8()].trim().to_string();
                }
            }
        }
    }
    value.to_string()
}

/// Up to `max_ids` post ids: those cited by the items first, then the
/// highest-ranked posts.
pub fn representative_post_ids(
    pain_points: &[InsightItem],
    wins: &[InsightItem],
    posts: &[Post],
    max_ids: usize,
) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();

    for item in pain_points.iter().chain(wins) {
        for link in normalize_evidence_links(&item.evidence) {
            if let Some(id) = extract_post_id_from_link(&link) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            if ids.len() >= max_ids {
                return ids;
            }
        }
    }

    for post in sorted_by_rank(posts) {
        let id = post.id.trim().to_string();
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
        if ids.len() >= max_ids {
            break;
        }
    }
    ids.truncate(max_ids);
    ids
}

fn pad_items(mut items: Vec<InsightItem>, fallback: &[InsightItem], empty_text: &str) -> Vec<InsightItem> {
    items.truncate(BREAKDOWN_ITEMS);
    while items.len() < BREAKDOWN_ITEMS {
        let candidate = if fallback.is_empty() {
            InsightItem::new(empty_text, Vec::new())
        } else {
            let source = &fallback[items.len() % fallback.len()];
            InsightItem::new(source.text.clone(), normalize_evidence_links(&source.evidence))
        };
        items.push(candidate);
    }
    items
}

/// Fits a subreddit-scoped analysis into a breakdown row: three bullets,
/// three to five themes, exactly three pain points and three wins. Gaps are
/// filled from the subreddit's fallback row.
pub fn map_analysis_to_breakdown_row(
    subreddit: &str,
    posts: &[Post],
    analysis: &AnalysisResult,
    heuristics: &HeuristicConfig,
) -> SubredditBreakdownRow {
    let fallback = single_subreddit_fallback_row(subreddit, posts, heuristics);
    let name = fallback.subreddit.clone();
    let label = analysis.sentiment_label;

    let mut themes: Vec<String> = Vec::new();
    for theme in &analysis.themes {
        let theme = theme.trim();
        if !theme.is_empty() && !themes.iter().any(|t| t == theme) {
            themes.push(theme.to_string());
        }
        if themes.len() >= MAX_BREAKDOWN_THEMES {
            break;
        }
    }
    for theme in &fallback.top_themes {
        if themes.len() >= MIN_BREAKDOWN_THEMES {
            break;
        }
        if !themes.contains(theme) {
            themes.push(theme.clone());
        }
    }

    let pain_points = ensure_evidence_for_items(
        analysis.pain_points.iter().take(BREAKDOWN_ITEMS).cloned().collect(),
        posts,
    );
    let pain_points = pad_items(pain_points, &fallback.top_pain_points, NO_PAIN_POINTS);
    let wins = ensure_evidence_for_items(
        analysis.wins.iter().take(BREAKDOWN_ITEMS).cloned().collect(),
        posts,
    );
    let wins = pad_items(wins, &fallback.top_wins, NO_WINS);

    let mut summary = first_sentence(&analysis.sentiment_summary);
    if summary.is_empty() {
        summary = fallback
            .summary_bullets
            .get(1)
            .cloned()
            .unwrap_or_else(|| "Subreddit-level signal was extracted from top community threads.".to_string());
    }

    let representative = match representative_post_ids(&pain_points, &wins, posts, 2).as_slice() {
        [] => "Representative threads are available in the sampled posts.".to_string(),
        [one] => format!("Representative threads: [POST:{}]", one),
        [one, two, ..] => format!("Representative threads: [POST:{}], [POST:{}]", one, two),
    };

    SubredditBreakdownRow {
        summary_bullets: vec![
            format!("Overall sentiment in r/{} is {}.", name, label.as_str().to_lowercase()),
            summary,
            representative,
        ],
        subreddit: name,
        sentiment_label: label,
        top_themes: themes,
        top_pain_points: pain_points,
        top_wins: wins,
    }
}

/// A model-produced row after normalization, before the quality check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBreakdownRow {
    pub subreddit: String,
    pub sentiment_label: Option<tracker_core::SentimentLabel>,
    pub summary_bullets: Vec<String>,
    pub top_themes: Vec<String>,
    pub top_pain_points: Vec<InsightItem>,
    pub top_wins: Vec<InsightItem>,
}

pub fn normalize_summary_bullets(raw: Option<&RawBullets>) -> Vec<String> {
    let bullets: Vec<String> = match raw {
        Some(RawBullets::List(values)) => values
            .iter()
            .filter_map(value_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(RawBullets::Text(text)) => BULLET_SPLIT_RE
            .split(text.trim())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };
    bullets.into_iter().take(MAX_SUMMARY_BULLETS).collect()
}

/// Normalizes raw rows, dropping those without a usable subreddit name.
pub fn normalize_breakdown_rows(raw: &[RawBreakdownRow]) -> Vec<NormalizedBreakdownRow> {
    raw.iter()
        .filter_map(|row| {
            let subreddit = normalize_subreddit(row.subreddit.as_deref().unwrap_or_default());
            if subreddit.is_empty() {
                return None;
            }
            Some(NormalizedBreakdownRow {
                subreddit,
                sentiment_label: normalize_sentiment_label(row.sentiment_label.as_deref()),
                summary_bullets: normalize_summary_bullets(row.summary_bullets.as_ref()),
                top_themes: normalize_themes(
                    row.top_themes.as_deref().unwrap_or_default(),
                    MAX_BREAKDOWN_THEMES,
                ),
                top_pain_points: normalize_insight_items(
                    row.top_pain_points.as_deref().unwrap_or_default(),
                    BREAKDOWN_ITEMS,
                ),
                top_wins: normalize_insight_items(
                    row.top_wins.as_deref().unwrap_or_default(),
                    BREAKDOWN_ITEMS,
                ),
            })
        })
        .collect()
}

/// Bullets present and at least three themes, pain points and wins.
pub fn row_passes_quality_check(row: &SubredditBreakdownRow) -> bool {
    !row.summary_bullets.is_empty()
        && row.top_themes.len() >= MIN_BREAKDOWN_THEMES
        && row.top_pain_points.len() >= BREAKDOWN_ITEMS
        && row.top_wins.len() >= BREAKDOWN_ITEMS
}

/// One row per group with posts. A parsed row for the subreddit (matched
/// case-insensitively) replaces the fallback row only when it passes the
/// quality check once evidence has been filled in.
pub fn merge_breakdown_with_fallback(
    parsed: Vec<NormalizedBreakdownRow>,
    groups: &PostGroups,
    heuristics: &HeuristicConfig,
) -> Vec<SubredditBreakdownRow> {
    let mut parsed_by_name: BTreeMap<String, NormalizedBreakdownRow> = BTreeMap::new();
    for row in parsed {
        parsed_by_name.insert(row.subreddit.to_lowercase(), row);
    }

    groups
        .iter()
        .filter_map(|(subreddit, posts)| {
            let fallback = fallback_row(subreddit, posts, heuristics)?;
            let Some(row) = parsed_by_name.remove(&subreddit.to_lowercase()) else {
                return Some(fallback);
            };

            let mut top_pain_points = ensure_evidence_for_items(row.top_pain_points, posts);
            top_pain_points.truncate(BREAKDOWN_ITEMS);
            let mut top_wins = ensure_evidence_for_items(row.top_wins, posts);
            top_wins.truncate(BREAKDOWN_ITEMS);

            let candidate = SubredditBreakdownRow {
                subreddit: subreddit.clone(),
                sentiment_label: row.sentiment_label.unwrap_or(fallback.sentiment_label),
                summary_bullets: row.summary_bullets,
                top_themes: row.top_themes,
                top_pain_points,
                top_wins,
            };

            if row_passes_quality_check(&candidate) {
                Some(candidate)
            } else {
                Some(fallback)
            }
        })
        .collect()
}
