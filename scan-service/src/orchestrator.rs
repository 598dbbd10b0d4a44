//! Multi-subreddit scan: fetch, sample, analyze, break down, cache.

use futures::future::join_all;
use reddit_client::{CommentFetcher, PostFetcher};
use sentiment_analysis::{
    fallback_breakdown_rows, group_posts_by_subreddit, map_analysis_to_breakdown_row,
    single_subreddit_fallback_row, PostGroups, SentimentAnalyzer,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use tracker_core::ranking::sorted_by_rank;
use tracker_core::text::{normalize_lookup_key, normalize_subreddit, tokenize};
use tracker_core::{
    composite_key, BreakdownStrategy, CacheStore, CoreError, ErrorExt, MultiScanResult, Post,
    ScanConfig, ScanMeta, SubredditBreakdown, SubredditBreakdownRow,
};

pub const MAX_MULTI_SUBREDDITS: usize = 5;
pub const FALLBACK_MARKER: &str = "fallback_generated";

/// Normalized, deduplicated (case-insensitively) subreddit names in input
/// order, at most `max_items`.
pub fn normalize_subreddit_list(subreddits: &[String], max_items: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    subreddits
        .iter()
        .map(|raw| normalize_subreddit(raw))
        .filter(|name| !name.is_empty() && seen.insert(name.to_lowercase()))
        .take(max_items)
        .collect()
}

// Field order is the key's canonical order.
#[derive(Serialize)]
struct MultiScanKey {
    game_name: String,
    include_breakdown: bool,
    keywords: String,
    subreddits: Vec<String>,
}

#[derive(Serialize)]
struct BreakdownRowKey {
    game_name: String,
    keywords: String,
    post_ids: Vec<String>,
    subreddit: String,
}

/// Same key for the same scan however the caller spelled or ordered it.
pub fn multi_scan_cache_key(
    subreddits: &[String],
    game_name: &str,
    keywords: &str,
    include_breakdown: bool,
) -> String {
    let mut subreddits: Vec<String> = subreddits
        .iter()
        .map(|name| normalize_subreddit(name).to_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    subreddits.sort();
    subreddits.dedup();

    composite_key(&MultiScanKey {
        game_name: normalize_lookup_key(game_name),
        include_breakdown,
        keywords: tokenize(keywords).join(" "),
        subreddits,
    })
}

/// Key of one breakdown row: the subreddit, the scan's game and keywords, and
/// the ids of the posts the row is built from.
pub fn breakdown_row_cache_key(subreddit: &str, ranked_posts: &[Post], game_name: &str, keywords: &str) -> String {
    composite_key(&BreakdownRowKey {
        game_name: normalize_lookup_key(game_name),
        keywords: tokenize(keywords).join(" "),
        post_ids: ranked_posts
            .iter()
            .map(|post| post.id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect(),
        subreddit: normalize_subreddit(subreddit).to_lowercase(),
    })
}

#[derive(Clone)]
pub struct MultiSubredditScanner {
    posts: PostFetcher,
    comments: CommentFetcher,
    analyzer: SentimentAnalyzer,
    scan_cache: Arc<dyn CacheStore<MultiScanResult>>,
    row_cache: Arc<dyn CacheStore<SubredditBreakdownRow>>,
    settings: ScanConfig,
}

impl MultiSubredditScanner {
    pub fn new(
        posts: PostFetcher,
        comments: CommentFetcher,
        analyzer: SentimentAnalyzer,
        scan_cache: Arc<dyn CacheStore<MultiScanResult>>,
        row_cache: Arc<dyn CacheStore<SubredditBreakdownRow>>,
        settings: ScanConfig,
    ) -> Self {
        Self {
            posts,
            comments,
            analyzer,
            scan_cache,
            row_cache,
            settings,
        }
    }

    /// Scans up to five subreddits as one community. The sampled posts and
    /// comments are kept on the result only when `include_internal` is set.
    pub async fn scan(
        &self,
        subreddits: &[String],
        game_name: &str,
        keywords: &str,
        include_breakdown: bool,
        include_internal: bool,
    ) -> Result<MultiScanResult, CoreError> {
        let subreddits = normalize_subreddit_list(subreddits, MAX_MULTI_SUBREDDITS);
        if subreddits.is_empty() {
            return Err(CoreError::InvalidInput {
                message: "At least one valid subreddit is required".to_string(),
            });
        }

        let cache_key = multi_scan_cache_key(&subreddits, game_name, keywords, include_breakdown);
        if let Some(entry) = self.scan_cache.get(&cache_key).await {
            debug!("Serving cached multi-scan for {}", subreddits.join(", "));
            return Ok(visible(entry.value, include_internal));
        }

        let posts = self
            .posts
            .fetch_posts_for_subreddits(
                &subreddits,
                self.settings.per_subreddit_limit,
                self.settings.total_limit,
            )
            .await;
        if posts.is_empty() {
            let joined = subreddits
                .iter()
                .map(|name| format!("r/{}", name))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CoreError::InvalidInput {
                message: format!("No posts found for selected subreddits: {}", joined),
            });
        }

        let comments = self
            .comments
            .sample_comments_for_posts(
                &posts,
                self.settings.comment_posts,
                self.settings.comments_per_post,
            )
            .await;
        info!(
            "Multi-scan of {}: {} posts, {} comments",
            subreddits.join(", "),
            posts.len(),
            comments.len()
        );

        let overall = self
            .analyzer
            .analyze(&posts, &comments, game_name, keywords)
            .await;

        let subreddit_breakdown = if include_breakdown {
            let groups = group_posts_by_subreddit(&posts, self.settings.breakdown_posts_per_subreddit);
            self.build_breakdown(&groups, game_name, keywords).await
        } else {
            SubredditBreakdown::default()
        };

        let result = MultiScanResult {
            overall,
            meta: ScanMeta {
                subreddits,
                posts_analysed: posts.len(),
                comments_sampled: comments.len(),
                last_scanned: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            },
            subreddit_breakdown,
            posts,
            comments,
        };

        self.scan_cache.put(cache_key, result.clone()).await;
        Ok(visible(result, include_internal))
    }

    async fn build_breakdown(&self, groups: &PostGroups, game_name: &str, keywords: &str) -> SubredditBreakdown {
        if groups.is_empty() {
            return SubredditBreakdown::default();
        }

        if !self.analyzer.has_llm() {
            return SubredditBreakdown {
                error: Some(FALLBACK_MARKER.to_string()),
                breakdown: fallback_breakdown_rows(groups, self.analyzer.heuristics()),
            };
        }

        let breakdown = match self.settings.breakdown_strategy {
            BreakdownStrategy::Batched => {
                self.analyzer
                    .breakdown_batched(groups, game_name, keywords)
                    .await
            }
            BreakdownStrategy::PerSubreddit => self.breakdown_per_subreddit(groups, game_name, keywords).await,
        };

        SubredditBreakdown {
            error: None,
            breakdown,
        }
    }

    /// One analysis per group, driven concurrently with at most
    /// `breakdown_concurrency` model calls in flight.
    async fn breakdown_per_subreddit(
        &self,
        groups: &PostGroups,
        game_name: &str,
        keywords: &str,
    ) -> Vec<SubredditBreakdownRow> {
        let semaphore = Semaphore::new(self.settings.breakdown_concurrency.max(1));

        let rows = groups
            .iter()
            .map(|(subreddit, posts)| self.breakdown_row(subreddit, posts, game_name, keywords, &semaphore));
        let results = join_all(rows).await;

        groups
            .iter()
            .zip(results)
            .map(|((subreddit, posts), result)| match result {
                Ok(row) => row,
                Err(e) => {
                    e.log_warn();
                    warn!("Breakdown for r/{} failed, using fallback row", subreddit);
                    single_subreddit_fallback_row(subreddit, posts, self.analyzer.heuristics())
                }
            })
            .collect()
    }

    async fn breakdown_row(
        &self,
        subreddit: &str,
        posts: &[Post],
        game_name: &str,
        keywords: &str,
        semaphore: &Semaphore,
    ) -> Result<SubredditBreakdownRow, CoreError> {
        let mut ranked = sorted_by_rank(posts);
        ranked.truncate(self.settings.breakdown_posts_per_subreddit.max(1));
        if ranked.is_empty() {
            return Ok(single_subreddit_fallback_row(subreddit, &ranked, self.analyzer.heuristics()));
        }

        let cache_key = breakdown_row_cache_key(subreddit, &ranked, game_name, keywords);
        if let Some(entry) = self.row_cache.get(&cache_key).await {
            return Ok(entry.value);
        }

        let comment_posts = self
            .settings
            .breakdown_comment_posts
            .min(self.settings.comment_posts);
        let comments = self
            .comments
            .sample_comments_for_posts(&ranked, comment_posts, self.settings.comments_per_post)
            .await;

        let analysis = {
            let _permit = semaphore.acquire().await.map_err(|_| CoreError::Internal {
                message: "breakdown semaphore closed".to_string(),
            })?;
            self.analyzer
                .analyze_subreddit(&ranked, &comments, subreddit, game_name, keywords)
                .await
        };

        let row = map_analysis_to_breakdown_row(subreddit, &ranked, &analysis, self.analyzer.heuristics());
        self.row_cache.put(cache_key, row.clone()).await;
        Ok(row)
    }
}

fn visible(result: MultiScanResult, include_internal: bool) -> MultiScanResult {
    if include_internal {
        result
    } else {
        result.into_public()
    }
}
