//! Quality filtering and the diversity/recency selection applied to the
//! merged post pool of a subreddit.

use std::collections::HashMap;
use tracker_core::ranking::{is_recent, sorted_by_rank};
use tracker_core::Post;

pub const MAX_POSTS_PER_AUTHOR: usize = 3;
pub const MAX_ZERO_COMMENT_POSTS: usize = 20;
pub const MIN_RECENT_POSTS: usize = 20;

/// Zero comments, score ≤ 1, under 80 chars of body and under 25 chars of title.
pub fn is_low_quality(post: &Post) -> bool {
    post.num_comments == 0
        && post.score <= 1
        && post.selftext.chars().count() < 80
        && post.title.chars().count() < 25
}

/// Drops low-quality posts. When every post would be dropped the input is
/// returned unchanged.
pub fn apply_quality_filter(posts: Vec<Post>) -> Vec<Post> {
    if posts.iter().all(is_low_quality) {
        return posts;
    }
    posts.into_iter().filter(|post| !is_low_quality(post)).collect()
}

/// The posts picked so far and the cap counters they consume.
struct Picks {
    max_posts: usize,
    posts: Vec<Post>,
    per_author: HashMap<String, usize>,
    zero_comment: usize,
}

impl Picks {
    fn new(max_posts: usize) -> Self {
        Self {
            max_posts,
            posts: Vec::with_capacity(max_posts),
            per_author: HashMap::new(),
            zero_comment: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.posts.len() >= self.max_posts
    }

    fn fits_caps(&self, post: &Post) -> bool {
        let authored = self.per_author.get(&author_key(post)).copied().unwrap_or(0);
        authored < MAX_POSTS_PER_AUTHOR
            && (post.num_comments > 0 || self.zero_comment < MAX_ZERO_COMMENT_POSTS)
    }

    fn count(&mut self, post: &Post) {
        *self.per_author.entry(author_key(post)).or_insert(0) += 1;
        if post.num_comments <= 0 {
            self.zero_comment += 1;
        }
    }

    fn uncount(&mut self, post: &Post) {
        if let Some(authored) = self.per_author.get_mut(&author_key(post)) {
            *authored = authored.saturating_sub(1);
        }
        if post.num_comments <= 0 {
            self.zero_comment = self.zero_comment.saturating_sub(1);
        }
    }

    fn push(&mut self, post: Post) {
        self.count(&post);
        self.posts.push(post);
    }

    /// Places a recent post into spare capacity, else over the lowest-ranked
    /// non-recent pick. False when every pick is already recent.
    fn backfill(&mut self, post: Post, now: i64) -> bool {
        if !self.is_full() {
            self.push(post);
            return true;
        }
        let Some(index) = self.posts.iter().rposition(|p| !is_recent(p, now)) else {
            return false;
        };
        self.count(&post);
        let replaced = std::mem::replace(&mut self.posts[index], post);
        self.uncount(&replaced);
        true
    }
}

/// Rank-ordered selection of at most `max_posts` posts with at most
/// [`MAX_POSTS_PER_AUTHOR`] per author and [`MAX_ZERO_COMMENT_POSTS`]
/// zero-comment posts overall. At least `min(MIN_RECENT_POSTS, max_posts)`
/// posts newer than three days are kept whenever the pool has that many:
/// deferred recent posts are backfilled newest first, into spare capacity and
/// then over the lowest-ranked non-recent picks. Posts that fit the caps are
/// backfilled before any that break them.
pub fn apply_diversity_and_recency(posts: &[Post], max_posts: usize, now: i64) -> Vec<Post> {
    if posts.is_empty() || max_posts == 0 {
        return Vec::new();
    }

    let recent_target = MIN_RECENT_POSTS.min(max_posts);
    let mut picks = Picks::new(max_posts);
    let mut recent_count = 0usize;
    let mut deferred_recent: Vec<Post> = Vec::new();

    for post in sorted_by_rank(posts) {
        let recent = is_recent(&post, now);
        if picks.is_full() || !picks.fits_caps(&post) {
            if recent {
                deferred_recent.push(post);
            }
            continue;
        }
        if recent {
            recent_count += 1;
        }
        picks.push(post);
    }

    if recent_count < recent_target && !deferred_recent.is_empty() {
        deferred_recent.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        let (within_caps, mut over_caps): (Vec<Post>, Vec<Post>) = deferred_recent
            .into_iter()
            .partition(|post| picks.fits_caps(post));

        for post in within_caps {
            if recent_count >= recent_target {
                break;
            }
            // Earlier backfills may have used up this post's cap.
            if !picks.fits_caps(&post) {
                over_caps.push(post);
                continue;
            }
            if !picks.backfill(post, now) {
                break;
            }
            recent_count += 1;
        }

        over_caps.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        for post in over_caps {
            if recent_count >= recent_target {
                break;
            }
            if !picks.backfill(post, now) {
                break;
            }
            recent_count += 1;
        }
    }

    let mut selected = picks.posts;
    selected.truncate(max_posts);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracker_core::format_permalink;

    const NOW: i64 = 1_750_000_000;
    const DAY: i64 = 24 * 60 * 60;

    fn post(id: &str, author: &str, score: i64, num_comments: i64, age_days: i64) -> Post {
        Post {
            id: id.to_string(),
            title: format!("Discussion thread number {}", id),
            selftext: "Some thoughts about the latest balance patch.".to_string(),
            created_utc: NOW - age_days * DAY,
            score,
            num_comments,
            author: author.to_string(),
            subreddit: "testgame".to_string(),
            permalink: format_permalink(id),
        }
    }

    #[test]
    fn test_quality_filter_drops_only_all_four_conditions() {
        let mut low = post("low", "a", 1, 0, 1);
        low.title = "short".to_string();
        low.selftext = String::new();

        let mut long_title = low.clone();
        long_title.id = "long_title".to_string();
        long_title.title = "This title is definitely long enough".to_string();

        let mut scored = low.clone();
        scored.id = "scored".to_string();
        scored.score = 2;

        let kept = apply_quality_filter(vec![low.clone(), long_title, scored]);
        let ids: Vec<_> = kept.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["long_title", "scored"]);

        // Nothing survives: keep everything.
        let kept = apply_quality_filter(vec![low.clone(), low]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_author_cap() {
        let posts: Vec<Post> = (0..10)
            .map(|i| post(&format!("p{i}"), "same_author", 100 - i, 10, 10))
            .chain((0..5).map(|i| post(&format!("q{i}"), &format!("other{i}"), 5, 1, 10)))
            .collect();

        let selected = apply_diversity_and_recency(&posts, 8, NOW);
        let same = selected.iter().filter(|p| p.author == "same_author").count();
        assert_eq!(same, 3);
        assert_eq!(selected.len(), 8);
    }

    #[test]
    fn test_zero_comment_cap() {
        let posts: Vec<Post> = (0..30)
            .map(|i| post(&format!("z{i}"), &format!("author{i}"), 50, 0, 10))
            .chain((0..10).map(|i| post(&format!("c{i}"), &format!("c_author{i}"), 1, 1, 10)))
            .collect();

        let selected = apply_diversity_and_recency(&posts, 40, NOW);
        let zero = selected.iter().filter(|p| p.num_comments == 0).count();
        assert_eq!(zero, MAX_ZERO_COMMENT_POSTS);
        assert_eq!(selected.len(), 30);
    }

    #[test]
    fn test_recent_floor_replaces_old_high_rankers() {
        // 30 old heavy hitters outrank 25 fresh but quiet posts.
        let posts: Vec<Post> = (0..30)
            .map(|i| post(&format!("old{i}"), &format!("old_author{i}"), 5000, 500, 20))
            .chain((0..25).map(|i| post(&format!("new{i}"), &format!("new_author{i}"), 2, 1, 1)))
            .collect();

        let selected = apply_diversity_and_recency(&posts, 30, NOW);
        assert_eq!(selected.len(), 30);
        let recent = selected.iter().filter(|p| is_recent(p, NOW)).count();
        assert_eq!(recent, 20);
    }

    #[test]
    fn test_recent_floor_uses_capped_authors_as_last_resort() {
        let posts: Vec<Post> = (0..6)
            .map(|i| post(&format!("r{i}"), "prolific", 10, 2, 1))
            .chain((0..2).map(|i| post(&format!("o{i}"), &format!("old{i}"), 500, 50, 20)))
            .collect();

        // Only three "prolific" posts fit the author cap; the floor of six
        // recent posts pulls the other three back in.
        let selected = apply_diversity_and_recency(&posts, 6, NOW);
        assert_eq!(selected.len(), 6);
        assert!(selected.iter().all(|p| is_recent(p, NOW)));
    }

    #[test]
    fn test_bounded_by_max_posts() {
        let posts: Vec<Post> = (0..50)
            .map(|i| post(&format!("p{i}"), &format!("a{i}"), i, i, i % 5))
            .collect();
        assert_eq!(apply_diversity_and_recency(&posts, 10, NOW).len(), 10);
        assert!(apply_diversity_and_recency(&[], 10, NOW).is_empty());
    }

    #[test]
    fn test_recent_floor_prefers_other_authors_over_prolific_newest() {
        // Old heavy hitters fill every slot; the newest recent posts all come
        // from one author, slightly older ones from five different authors.
        let posts: Vec<Post> = (0..4)
            .map(|i| post(&format!("old{i}"), &format!("old_author{i}"), 5000, 500, 20))
            .chain((0..5).map(|i| {
                let mut p = post(&format!("s{i}"), "spam", 3, 1, 0);
                p.created_utc = NOW - 60 * (i + 1);
                p
            }))
            .chain((0..5).map(|i| post(&format!("n{i}"), &format!("new_author{i}"), 3, 1, 1)))
            .collect();

        let selected = apply_diversity_and_recency(&posts, 4, NOW);
        assert_eq!(selected.len(), 4);
        assert!(selected.iter().all(|p| is_recent(p, NOW)));
        let spam = selected.iter().filter(|p| p.author == "spam").count();
        assert_eq!(spam, MAX_POSTS_PER_AUTHOR);
        assert_eq!(selected.iter().filter(|p| p.author.starts_with("new_author")).count(), 1);
    }
}
