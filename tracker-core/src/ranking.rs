//! Engagement ranking shared by the fetchers, the orchestrator and the
//! heuristic analysis.

use crate::types::Post;
use std::cmp::Ordering;

/// Posts created within this many seconds of "now" count as recent.
pub const RECENT_WINDOW_SECS: i64 = 3 * 24 * 60 * 60;

/// `ln(score+1) + 2·ln(comments+1) + 0.35·min(len/500, 1)`, minus 0.25 for
/// zero-comment posts with under 100 characters of body.
pub fn post_rank(post: &Post) -> f64 {
    let score = post.score.max(0) as f64;
    let num_comments = post.num_comments.max(0) as f64;
    let selftext_len = post.selftext.chars().count();

    let engagement = (score + 1.0).ln() + 2.0 * (num_comments + 1.0).ln();
    let text_bonus = (selftext_len as f64 / 500.0).min(1.0);
    let mut rank = engagement + 0.35 * text_bonus;

    if post.num_comments <= 0 && selftext_len < 100 {
        rank -= 0.25;
    }

    rank
}

pub fn compare_rank_desc(a: &Post, b: &Post) -> Ordering {
    post_rank(b)
        .partial_cmp(&post_rank(a))
        .unwrap_or(Ordering::Equal)
}

/// Stable rank-descending copy of `posts`.
pub fn sorted_by_rank(posts: &[Post]) -> Vec<Post> {
    let mut ranked = posts.to_vec();
    ranked.sort_by(compare_rank_desc);
    ranked
}

pub fn is_recent(post: &Post, now: i64) -> bool {
    post.created_utc > now - RECENT_WINDOW_SECS
}
