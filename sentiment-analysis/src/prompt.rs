//! Prompt text sent to the model.

use std::collections::BTreeMap;
use tracker_core::ranking::RECENT_WINDOW_SECS;
use tracker_core::text::truncate_chars;
use tracker_core::{Comment, Post};

pub const ANALYSIS_SYSTEM_PROMPT: &str =
    "You are an expert gaming community analyst. Return valid JSON only and avoid quoting toxic content directly.";
pub const BREAKDOWN_SYSTEM_PROMPT: &str =
    "You are an expert gaming community analyst. Return valid JSON only.";
pub const REPAIR_SYSTEM_PROMPT: &str = "You repair invalid JSON. Return strict JSON only.";

pub const ANALYSIS_SCHEMA_HINT: &str =
    "sentiment_label, sentiment_summary, themes[], pain_points[{text, evidence[]}], wins[{text, evidence[]}]";
pub const BREAKDOWN_SCHEMA_HINT: &str =
    "breakdown[{subreddit, sentiment_label, summary_bullets[], top_themes[], top_pain_points[{text, evidence[]}], top_wins[{text, evidence[]}]}]";

pub const MAX_PROMPT_POSTS: usize = 100;
pub const MAX_PROMPT_COMMENTS: usize = 150;
const SELFTEXT_CHARS: usize = 500;
const BREAKDOWN_POSTS_PER_SECTION: usize = 8;
const BREAKDOWN_SNIPPET_POSTS: usize = 4;
const BREAKDOWN_SNIPPET_CHARS: usize = 220;
const REPAIR_INPUT_CHARS: usize = 3500;

fn game_label(game_name: &str) -> &str {
    let game = game_name.trim();
    if game.is_empty() {
        "Unknown Game"
    } else {
        game
    }
}

fn keyword_note(keywords: &str) -> String {
    let keywords = keywords.trim();
    if keywords.is_empty() {
        String::new()
    } else {
        format!("\nKeywords to watch for: {}", keywords)
    }
}

/// Selftext flattened to one line, or `None` when removed or empty.
fn usable_selftext(selftext: &str, max_chars: usize) -> Option<String> {
    let text = selftext.trim();
    if text.is_empty() || text == "[removed]" || text == "[deleted]" {
        return None;
    }
    let flat = truncate_chars(&text.replace('\n', " "), max_chars);
    let flat = flat.trim();
    (!flat.is_empty()).then(|| flat.to_string())
}

fn post_line(post: &Post) -> String {
    format!(
        "[POST:{}] [{} pts, {} comments] {}",
        post.id,
        post.score,
        post.num_comments,
        post.title.trim()
    )
}

/// Prompt for the overall analysis of `posts` plus the sampled `comments`.
/// `now` is a unix timestamp used for the recent/older split.
pub fn build_analysis_prompt(
    posts: &[Post],
    comments: &[Comment],
    game_name: &str,
    keywords: &str,
    now: i64,
) -> String {
    let post_lines: Vec<String> = posts
        .iter()
        .take(MAX_PROMPT_POSTS)
        .map(|post| match usable_selftext(&post.selftext, SELFTEXT_CHARS) {
            Some(content) => format!("{}\n  Content: {}", post_line(post), content),
            None => post_line(post),
        })
        .collect();

    let comments_block = if comments.is_empty() {
        String::new()
    } else {
        let mut lines = vec!["COMMENT SAMPLES FROM TOP POSTS:".to_string()];
        lines.extend(comments.iter().take(MAX_PROMPT_COMMENTS).map(|comment| {
            format!(
                "- [POST:{}] [{} pts] {}",
                comment.source_post_id.as_deref().unwrap_or_default(),
                comment.score,
                comment.body
            )
        }));
        lines.join("\n")
    };

    let subreddit = posts
        .iter()
        .map(|post| post.subreddit.trim())
        .find(|name| !name.is_empty())
        .map(|name| {
            if name.to_lowercase().starts_with("r/") {
                name.to_string()
            } else {
                format!("r/{}", name)
            }
        })
        .unwrap_or_else(|| "Unknown".to_string());

    let recent_cutoff = now - RECENT_WINDOW_SECS;
    let recent = posts.iter().filter(|p| p.created_utc >= recent_cutoff).count();
    let older = posts.len() - recent;

    format!(
        r#"Analyze these {post_count} Reddit posts and {comment_count} top comment samples about the game "{game}".

GROUND RULES:
- Only describe modes, platforms, monetisation or mechanics that the posts or comments mention.
- Summarize professionally; skip insults and personal attacks.
- When keywords are given, favour those topics in the themes and the summary.

sentiment_summary (2-3 sentences):
- First the overall sentiment and what drives it, then the two most concrete pain points, optionally the strongest positive.
- Reference at least two posts as [POST:post_id].

themes:
- 5-10 strings shaped "Theme name - specific explanation grounded in player feedback".
- At least half carry a [POST:post_id] reference; no one-word or generic labels.

pain_points and wins:
- Objects with "text" and "evidence" only; each describes a recurring issue or strength about the game itself.
- Evidence is 1-2 full links of the form https://www.reddit.com/comments/POST_ID/, from different posts where possible. No placeholders and no [POST:id] inside evidence.

OUTPUT JSON:
{{
  "sentiment_label": "Positive" | "Mixed" | "Negative",
  "sentiment_summary": "...",
  "themes": ["..."],
  "pain_points": [{{"text": "...", "evidence": ["https://www.reddit.com/comments/POST_ID/"]}}],
  "wins": [{{"text": "...", "evidence": ["https://www.reddit.com/comments/POST_ID/"]}}]
}}
pain_points and wins hold exactly 5 objects each.{keyword_note}

SCAN CONTEXT:
- Subreddit: {subreddit}
- Posts analyzed: {post_count}
- Comments sampled: {comment_count}
- Time coverage: {recent} recent posts (last 3 days), {older} older posts

POSTS:
{posts}

{comments_block}

Respond with valid JSON only, no markdown fences.
"#,
        post_count = posts.len(),
        comment_count = comments.len(),
        game = game_label(game_name),
        keyword_note = keyword_note(keywords),
        subreddit = subreddit,
        recent = recent,
        older = older,
        posts = post_lines.join("\n"),
        comments_block = comments_block,
    )
}

/// Prompt asking for one breakdown row per subreddit group in a single call.
pub fn build_breakdown_prompt(
    groups: &BTreeMap<String, Vec<Post>>,
    game_name: &str,
    keywords: &str,
) -> String {
    let sections: Vec<String> = groups
        .iter()
        .map(|(subreddit, posts)| {
            let posts = &posts[..posts.len().min(BREAKDOWN_POSTS_PER_SECTION)];
            let mut lines = vec![
                format!("SUBREDDIT: r/{}", subreddit),
                format!("POST_COUNT: {}", posts.len()),
            ];
            for (idx, post) in posts.iter().enumerate() {
                lines.push(format!("- {}", post_line(post)));
                if idx < BREAKDOWN_SNIPPET_POSTS {
                    if let Some(snippet) = usable_selftext(&post.selftext, BREAKDOWN_SNIPPET_CHARS) {
                        lines.push(format!("  Snippet: {}", snippet));
                    }
                }
            }
            lines.join("\n")
        })
        .collect();

    format!(
        r#"Write a per-subreddit product feedback breakdown for "{game}".

OUTPUT JSON with exactly this top-level shape:
{{
  "breakdown": [
    {{
      "subreddit": "name",
      "sentiment_label": "Positive|Mixed|Negative",
      "summary_bullets": ["...", "...", "..."],
      "top_themes": ["Theme - concrete issue/outcome [POST:id]", "..."],
      "top_pain_points": [{{"text": "...", "evidence": ["https://www.reddit.com/comments/POST_ID/"]}}],
      "top_wins": [{{"text": "...", "evidence": ["https://www.reddit.com/comments/POST_ID/"]}}]
    }}
  ]
}}

RULES:
- Use only the posts below and assume nothing about genre, modes, platforms or monetisation.
- summary_bullets: at most 3.
- top_themes: 3-5 specific themes, never generic labels.
- top_pain_points and top_wins: exactly 3 each, about the product.
- Evidence arrays hold full links (https://www.reddit.com/comments/POST_ID/) only, never placeholders or [POST:id].{keyword_note}

SUBREDDIT DATA:
{sections}

Return valid JSON only. No markdown fences.
"#,
        game = game_label(game_name),
        keyword_note = keyword_note(keywords),
        sections = sections.join("\n\n"),
    )
}

/// Prompt asking the model to turn its own malformed reply into JSON.
pub fn build_repair_prompt(raw_output: &str, schema_hint: &str) -> String {
    format!(
        "Convert the following model output into valid JSON only. Do not add commentary. Schema hint: {}.\n\nRAW OUTPUT:\n{}",
        schema_hint,
        truncate_chars(raw_output, REPAIR_INPUT_CHARS)
    )
}
