use crate::api::{ContentSource, PostQuery};
use crate::selection::{apply_diversity_and_recency, apply_quality_filter};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracker_core::ranking::{compare_rank_desc, post_rank};
use tracker_core::text::normalize_subreddit;
use tracker_core::{best_effort, CacheStore, CoreError, MirrorError, Post};

/// `(after, before)` windows queried newest first.
pub const FETCH_WINDOWS: [(&str, &str); 3] = [("48h", "0h"), ("8d", "48h"), ("30d", "8d")];

pub const MAX_POSTS_FINAL: usize = 100;
pub const MAX_MERGED_POSTS: usize = 500;

#[derive(Clone)]
pub struct PostFetcher {
    source: Arc<dyn ContentSource>,
    cache: Arc<dyn CacheStore<Vec<Post>>>,
}

impl PostFetcher {
    pub fn new(source: Arc<dyn ContentSource>, cache: Arc<dyn CacheStore<Vec<Post>>>) -> Self {
        Self { source, cache }
    }

    /// High-signal recent posts of one subreddit, at most `limit` (clamped to
    /// 1..=100). Accepts any subreddit spelling `normalize_subreddit` does.
    pub async fn fetch_posts(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        let normalized = normalize_subreddit(subreddit);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let target_limit = limit.clamp(1, MAX_POSTS_FINAL);
        let cache_key = format!("{}:{}", normalized.to_lowercase(), target_limit);
        if let Some(entry) = self.cache.get(&cache_key).await {
            return Ok(entry.value);
        }

        let mut merged: Vec<Post> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut failed_windows = 0usize;
        let mut last_error: Option<CoreError> = None;

        for (after, before) in FETCH_WINDOWS {
            let query = PostQuery::new(&normalized, after, before);
            match self.source.search_posts(&query).await {
                Ok(window_posts) => {
                    debug!(
                        "r/{} window {}..{} returned {} posts",
                        normalized,
                        after,
                        before,
                        window_posts.len()
                    );
                    for post in window_posts {
                        if seen.insert(post.id.clone()) {
                            merged.push(post);
                        }
                    }
                }
                Err(e) => {
                    warn!("r/{} window {}..{} failed: {}", normalized, after, before, e);
                    failed_windows += 1;
                    last_error = Some(e);
                    continue;
                }
            }

            if merged.len() >= target_limit * 2 {
                break;
            }
        }

        if merged.is_empty() {
            if failed_windows == FETCH_WINDOWS.len() {
                if let Some(error) = last_error {
                    return Err(MirrorError::AllWindowsFailed {
                        subreddit: normalized,
                        last_error: error.to_string(),
                    }
                    .into());
                }
            }
            self.cache.put(cache_key, Vec::new()).await;
            return Ok(Vec::new());
        }

        let candidates = apply_quality_filter(merged);
        let now = chrono::Utc::now().timestamp();
        let selected = apply_diversity_and_recency(&candidates, target_limit, now);

        info!(
            "r/{}: selected {} of {} candidate posts",
            normalized,
            selected.len(),
            candidates.len()
        );
        self.cache.put(cache_key, selected.clone()).await;
        Ok(selected)
    }

    /// Fetches every subreddit concurrently and merges the results by id,
    /// keeping the higher-ranked copy, rank-sorted and capped at
    /// `total_limit` (1..=500). Per-subreddit failures are logged and skipped.
    pub async fn fetch_posts_for_subreddits(
        &self,
        subreddits: &[String],
        per_sub_limit: usize,
        total_limit: usize,
    ) -> Vec<Post> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = subreddits
            .iter()
            .map(|raw| normalize_subreddit(raw))
            .filter(|name| !name.is_empty() && seen.insert(name.to_lowercase()))
            .collect();
        if unique.is_empty() {
            return Vec::new();
        }

        let per_sub_limit = per_sub_limit.clamp(1, MAX_POSTS_FINAL);
        let total_limit = total_limit.clamp(1, MAX_MERGED_POSTS);

        let fetches = unique
            .iter()
            .map(|subreddit| self.fetch_posts(subreddit, per_sub_limit));
        let results = join_all(fetches).await;

        let mut merged: Vec<Post> = Vec::new();
        let mut index_by_id: HashMap<String, usize> = HashMap::new();
        for (subreddit, result) in unique.iter().zip(results) {
            let context = format!("fetching posts for r/{}", subreddit);
            for post in best_effort(result, &context) {
                if post.id.is_empty() {
                    continue;
                }
                match index_by_id.get(&post.id) {
                    Some(&index) => {
                        if post_rank(&post) > post_rank(&merged[index]) {
                            merged[index] = post;
                        }
                    }
                    None => {
                        index_by_id.insert(post.id.clone(), merged.len());
                        merged.push(post);
                    }
                }
            }
        }

        merged.sort_by(compare_rank_desc);
        merged.truncate(total_limit);
        merged
    }
}
