//! Deterministic analysis built from post titles and engagement alone. Used
//! whenever the model is unavailable or its output cannot be used, and to
//! fill the gaps of partial model output.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use tracker_core::ranking::sorted_by_rank;
use tracker_core::text::truncate_chars;
use tracker_core::{format_permalink, AnalysisResult, HeuristicConfig, InsightItem, Post, SentimentLabel};

static LOWER_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").expect("valid regex"));
static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9]+").expect("valid regex"));

pub const FALLBACK_TOP_POSTS: usize = 15;
pub const FALLBACK_ITEMS: usize = 5;
pub const FALLBACK_THEMES: usize = 6;
const POINT_TITLE_CHARS: usize = 170;

const DEFAULT_THEME_PHRASES: [&str; 3] = [
    "gameplay feedback patterns",
    "content pacing concerns",
    "progression and balance issues",
];

/// `1 + ln(score+1) + 1.2·ln(comments+1)` with negatives clamped to zero.
pub fn engagement_weight(post: &Post) -> f64 {
    let score = post.score.max(0) as f64;
    let comments = post.num_comments.max(0) as f64;
    1.0 + (score + 1.0).ln() + 1.2 * (comments + 1.0).ln()
}

fn signal_blob(post: &Post) -> String {
    format!("{} {}", post.title, post.selftext).to_lowercase()
}

fn mentions_any(blob: &str, terms: &BTreeSet<String>) -> bool {
    terms.iter().any(|term| blob.contains(term.as_str()))
}

pub fn has_negative_signal(post: &Post, heuristics: &HeuristicConfig) -> bool {
    mentions_any(&signal_blob(post), &heuristics.negative_terms)
}

pub fn has_positive_signal(post: &Post, heuristics: &HeuristicConfig) -> bool {
    mentions_any(&signal_blob(post), &heuristics.positive_terms)
}

/// Engagement-weighted vote of positive against negative posts. One side has
/// to beat the other by the configured margin, otherwise the result is Mixed.
pub fn estimate_sentiment(posts: &[Post], heuristics: &HeuristicConfig) -> SentimentLabel {
    let mut positive = 0.0;
    let mut negative = 0.0;

    for post in posts {
        let blob = signal_blob(post);
        let weight = engagement_weight(post);
        if mentions_any(&blob, &heuristics.positive_terms) {
            positive += weight;
        }
        if mentions_any(&blob, &heuristics.negative_terms) {
            negative += weight;
        }
    }

    let margin = heuristics.sentiment_margin;
    if negative > positive * margin {
        SentimentLabel::Negative
    } else if positive > negative * margin {
        SentimentLabel::Positive
    } else {
        SentimentLabel::Mixed
    }
}

/// Two and three word title phrases ranked by the summed engagement weight of
/// the posts they appear in. Ties keep first-seen order. When no title has two
/// usable tokens, the first few words of each title stand in.
pub fn theme_phrases(posts: &[Post], max_phrases: usize, heuristics: &HeuristicConfig) -> Vec<String> {
    let max_phrases = max_phrases.max(1);
    let mut order: Vec<String> = Vec::new();
    let mut scores: HashMap<String, f64> = HashMap::new();

    for post in posts {
        let title = post.title.to_lowercase();
        let tokens: Vec<&str> = LOWER_TOKEN_RE
            .find_iter(&title)
            .map(|m| m.as_str())
            .filter(|token| token.len() > 2 && !heuristics.theme_stop_words.contains(*token))
            .collect();
        if tokens.len() < 2 {
            continue;
        }

        let weight = engagement_weight(post);
        for n in [3usize, 2] {
            if tokens.len() < n {
                continue;
            }
            for window in tokens.windows(n) {
                let phrase = window.join(" ");
                match scores.get_mut(&phrase) {
                    Some(score) => *score += weight,
                    None => {
                        scores.insert(phrase.clone(), weight);
                        order.push(phrase);
                    }
                }
            }
        }
    }

    if !order.is_empty() {
        let mut ranked: Vec<(String, f64)> = order
            .into_iter()
            .map(|phrase| {
                let score = scores.get(&phrase).copied().unwrap_or_default();
                (phrase, score)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        return ranked
            .into_iter()
            .take(max_phrases)
            .map(|(phrase, _)| phrase)
            .collect();
    }

    let mut phrases: Vec<String> = Vec::new();
    for post in posts {
        let title = post.title.trim();
        if title.is_empty() {
            continue;
        }
        let words: Vec<&str> = WORD_RE
            .find_iter(title)
            .map(|m| m.as_str())
            .filter(|word| word.len() > 2)
            .collect();
        if words.len() >= 2 {
            let phrase = words[..words.len().min(4)].join(" ").to_lowercase();
            if !phrases.contains(&phrase) {
                phrases.push(phrase);
            }
        }
        if phrases.len() >= max_phrases {
            break;
        }
    }
    phrases
}

/// "progression and balance" → "Progression And Balance".
pub fn title_case(phrase: &str) -> String {
    phrase
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ids of `posts` in order, skipping blanks.
pub fn post_refs(posts: &[Post]) -> Vec<String> {
    posts
        .iter()
        .map(|post| post.id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// ` [POST:id]` for the `idx`-th reference, cycling; empty without references.
pub fn ref_suffix(refs: &[String], idx: usize) -> String {
    if refs.is_empty() {
        String::new()
    } else {
        format!(" [POST:{}]", refs[idx % refs.len()])
    }
}

/// Insight item quoting a post title, with the post's permalink as evidence.
pub fn point_from_post(post: &Post, prefix: &str, empty_title: &str, max_chars: usize) -> InsightItem {
    let title = post.title.trim();
    let title = if title.is_empty() { empty_title } else { title };
    let id = post.id.trim();
    let evidence = if id.is_empty() {
        Vec::new()
    } else {
        vec![format_permalink(id)]
    };
    InsightItem::new(format!("{}: {}", prefix, truncate_chars(title, max_chars)), evidence)
}

/// Posts carrying negative and positive signals, falling back to the tail
/// and head of `top` when a side has none.
pub fn signal_partitions<'a>(
    top: &'a [Post],
    take: usize,
    heuristics: &HeuristicConfig,
) -> (Vec<&'a Post>, Vec<&'a Post>) {
    let mut negative: Vec<&Post> = top.iter().filter(|p| has_negative_signal(p, heuristics)).collect();
    let mut positive: Vec<&Post> = top.iter().filter(|p| has_positive_signal(p, heuristics)).collect();

    if negative.is_empty() {
        let start = if top.len() >= take { top.len() - take } else { 0 };
        negative = top[start..].iter().collect();
    }
    if positive.is_empty() {
        positive = top.iter().take(take).collect();
    }
    (negative, positive)
}

fn insufficient_data_analysis() -> AnalysisResult {
    AnalysisResult {
        sentiment_label: SentimentLabel::Mixed,
        sentiment_summary: "Sentiment appears mixed, but there is not enough post data to produce a reliable breakdown.".to_string(),
        themes: vec![
            "Limited data - not enough high-signal posts to determine concrete product themes".to_string(),
        ],
        pain_points: vec![InsightItem::new(
            "Insufficient data to identify repeated pain points.",
            Vec::new(),
        )],
        wins: vec![InsightItem::new("Insufficient data to identify repeated wins.", Vec::new())],
    }
}

/// Full analysis from the 15 highest-ranked posts: label by weighted keyword
/// vote, themes from title phrases, five pain points and five wins quoting
/// the most negative and most positive posts.
pub fn schema_fallback(posts: &[Post], heuristics: &HeuristicConfig) -> AnalysisResult {
    let mut top = sorted_by_rank(posts);
    top.truncate(FALLBACK_TOP_POSTS);
    if top.is_empty() {
        return insufficient_data_analysis();
    }

    let label = estimate_sentiment(&top, heuristics);
    let refs = post_refs(&top);
    let ref_one = refs.first().cloned().unwrap_or_default();
    let ref_two = refs.get(1).cloned().unwrap_or_else(|| ref_one.clone());

    let sentiment_summary = format!(
        "Overall sentiment is {}, driven by repeated high-engagement product feedback. \
         Primary friction and upside signals are visible in [POST:{}] and [POST:{}] where available.",
        label.as_str().to_lowercase(),
        ref_one,
        ref_two
    );

    let mut phrases = theme_phrases(&top, FALLBACK_THEMES, heuristics);
    if phrases.is_empty() {
        phrases = DEFAULT_THEME_PHRASES.iter().map(|p| p.to_string()).collect();
    }
    let themes = phrases
        .iter()
        .take(FALLBACK_THEMES)
        .enumerate()
        .map(|(idx, phrase)| {
            format!(
                "{} - repeated player discussion with concrete product implications{}",
                title_case(phrase),
                ref_suffix(&refs, idx)
            )
        })
        .collect();

    let (negative, positive) = signal_partitions(&top, FALLBACK_ITEMS, heuristics);
    let pain_points = (0..FALLBACK_ITEMS)
        .map(|idx| {
            point_from_post(
                negative[idx % negative.len()],
                "Players report friction around",
                "Player-reported product issue",
                POINT_TITLE_CHARS,
            )
        })
        .collect();
    let wins = (0..FALLBACK_ITEMS)
        .map(|idx| {
            point_from_post(
                positive[idx % positive.len()],
                "Players highlight a positive signal in",
                "Player-reported product strength",
                POINT_TITLE_CHARS,
            )
        })
        .collect();

    AnalysisResult {
        sentiment_label: label,
        sentiment_summary,
        themes,
        pain_points,
        wins,
    }
}
