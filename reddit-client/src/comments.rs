use crate::api::{ContentSource, MirrorComment};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracker_core::ranking::sorted_by_rank;
use tracker_core::{best_effort, CacheStore, Comment, CoreError, Post};

static USER_MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/?u/[A-Za-z0-9_-]+").expect("valid regex"));

pub const COMMENT_BODY_TRUNCATE: usize = 400;
pub const MAX_COMMENTS_PER_AUTHOR: usize = 2;
pub const MAX_COMMENT_LIMIT: usize = 100;

/// Trims, masks `u/name` mentions as `[user]` and cuts the body at 400
/// characters with a trailing "...".
pub fn clean_comment_body(body: &str) -> String {
    let masked = USER_MENTION_RE.replace_all(body.trim(), "[user]");
    if masked.chars().count() > COMMENT_BODY_TRUNCATE {
        let mut cut: String = masked.chars().take(COMMENT_BODY_TRUNCATE).collect();
        cut.push_str("...");
        cut
    } else {
        masked.into_owned()
    }
}

/// Highest score first (then longer, then newer), at most two per author
/// compared case-insensitively. Bodies are cleaned on the way out.
pub fn select_best_comments(comments: &[Comment], max_count: usize) -> Vec<Comment> {
    let mut sorted: Vec<&Comment> = comments.iter().collect();
    sorted.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.body.chars().count().cmp(&a.body.chars().count()))
            .then_with(|| b.created_utc.cmp(&a.created_utc))
    });

    let mut author_counts: HashMap<String, usize> = HashMap::new();
    let mut selected = Vec::new();
    for comment in sorted {
        if selected.len() >= max_count {
            break;
        }

        let author = comment.author.to_lowercase();
        if !author.is_empty() {
            let count = author_counts.entry(author).or_insert(0);
            if *count >= MAX_COMMENTS_PER_AUTHOR {
                continue;
            }
            *count += 1;
        }

        selected.push(Comment {
            body: clean_comment_body(&comment.body),
            ..comment.clone()
        });
    }
    selected
}

/// Keeps top-level comments with a real body.
fn filter_mirror_comments(raw: Vec<MirrorComment>) -> Vec<Comment> {
    raw.into_iter()
        .filter(|item| item.parent_id.is_empty() || item.parent_id.starts_with("t3_"))
        .filter_map(|item| {
            let body = item.body.trim();
            if body.is_empty() || body == "[deleted]" || body == "[removed]" {
                return None;
            }
            Some(Comment {
                id: item.id,
                body: body.to_string(),
                created_utc: item.created_utc,
                score: item.score,
                author: item.author,
                source_post_id: None,
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct CommentFetcher {
    source: Arc<dyn ContentSource>,
    cache: Arc<dyn CacheStore<Vec<Comment>>>,
    delay: Duration,
}

impl CommentFetcher {
    pub fn new(
        source: Arc<dyn ContentSource>,
        cache: Arc<dyn CacheStore<Vec<Comment>>>,
        delay: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            delay,
        }
    }

    /// Best top-level comments of a post. The whole filtered set is cached, so
    /// calls with different limits share one mirror request.
    pub async fn fetch_comments(&self, post_id: &str, limit: usize) -> Result<Vec<Comment>, CoreError> {
        if post_id.is_empty() {
            return Ok(Vec::new());
        }
        let max_count = limit.clamp(1, MAX_COMMENT_LIMIT);

        if let Some(entry) = self.cache.get(post_id).await {
            return Ok(select_best_comments(&entry.value, max_count));
        }

        let raw = self.source.search_comments(post_id).await?;
        let comments = filter_mirror_comments(raw);
        debug!("Post {}: {} usable comments", post_id, comments.len());

        let selected = select_best_comments(&comments, max_count);
        self.cache.put(post_id.to_string(), comments).await;
        Ok(selected)
    }

    /// Comments from the `max_posts` highest-ranked posts, fetched one post at
    /// a time with a fixed pause and tagged with their source post.
    pub async fn sample_comments_for_posts(
        &self,
        posts: &[Post],
        max_posts: usize,
        max_comments_per_post: usize,
    ) -> Vec<Comment> {
        let ranked = sorted_by_rank(posts);
        let mut sampled = Vec::new();
        let mut fetched_any = false;

        for post in ranked.iter().take(max_posts.max(1)) {
            if post.id.is_empty() {
                continue;
            }
            if fetched_any && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            fetched_any = true;

            let result = self
                .fetch_comments(&post.id, max_comments_per_post.max(1))
                .await;
            let context = format!("sampling comments for post {}", post.id);
            sampled.extend(best_effort(result, &context).into_iter().map(|comment| Comment {
                source_post_id: Some(post.id.clone()),
                ..comment
            }));
        }

        sampled
    }
}
