use crate::orchestrator::MultiSubredditScanner;
use crate::single::scan_subreddit;
use llm_interface::{provider_from_config, LlmProvider};
use reddit_client::{
    ArcticShiftClient, CommentFetcher, ContentSource, MirrorMetrics, PostFetcher, SubredditDiscovery,
};
use sentiment_analysis::SentimentAnalyzer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracker_core::{
    CacheConfig, Comment, CoreError, DiscoveryCandidate, MultiScanResult, Post, ScanReport,
    TrackerConfig, TtlCache,
};

/// Everything a caller needs, wired from one [`TrackerConfig`]. Each
/// component owns its own cache.
#[derive(Clone)]
pub struct TrackerService {
    posts: PostFetcher,
    comments: CommentFetcher,
    discovery: SubredditDiscovery,
    analyzer: SentimentAnalyzer,
    scanner: MultiSubredditScanner,
    mirror: Option<ArcticShiftClient>,
}

impl TrackerService {
    /// Connects to the configured mirror and, when a key is set, the LLM.
    pub fn from_config(config: &TrackerConfig) -> Result<Self, CoreError> {
        let client = ArcticShiftClient::new(&config.mirror)?;
        let llm = provider_from_config(&config.llm)?;
        info!(
            "Tracker service ready (mirror: {}, llm: {})",
            config.mirror.base_url,
            llm.as_ref().map(|p| p.name()).unwrap_or("none")
        );
        Ok(Self::with_client(client, llm, config))
    }

    /// Wires the service around a mirror client whose traffic counters stay
    /// readable through [`TrackerService::mirror_metrics`].
    pub fn with_client(
        client: ArcticShiftClient,
        llm: Option<Arc<dyn LlmProvider>>,
        config: &TrackerConfig,
    ) -> Self {
        let source: Arc<dyn ContentSource> = Arc::new(client.clone());
        Self {
            mirror: Some(client),
            ..Self::with_components(source, llm, config)
        }
    }

    /// Wires the service around an already-built mirror source and provider.
    pub fn with_components(
        source: Arc<dyn ContentSource>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: &TrackerConfig,
    ) -> Self {
        let ttl = |secs: u64| Duration::from_secs(secs);
        let CacheConfig {
            post_ttl_secs,
            comment_ttl_secs,
            discovery_ttl_secs,
            multi_scan_ttl_secs,
            breakdown_ttl_secs,
        } = config.cache;

        let posts = PostFetcher::new(source.clone(), TtlCache::shared("posts", ttl(post_ttl_secs)));
        let comments = CommentFetcher::new(
            source.clone(),
            TtlCache::shared("comments", ttl(comment_ttl_secs)),
            config.scan.comment_delay(),
        );
        let discovery = SubredditDiscovery::new(
            source,
            TtlCache::shared("discovery", ttl(discovery_ttl_secs)),
            llm.clone(),
        );
        let analyzer = SentimentAnalyzer::new(llm, config.heuristics.clone());
        let scanner = MultiSubredditScanner::new(
            posts.clone(),
            comments.clone(),
            analyzer.clone(),
            TtlCache::shared("multi-scan", ttl(multi_scan_ttl_secs)),
            TtlCache::shared("breakdown", ttl(breakdown_ttl_secs)),
            config.scan.clone(),
        );

        Self {
            posts,
            comments,
            discovery,
            analyzer,
            scanner,
            mirror: None,
        }
    }

    pub async fn fetch_posts(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        self.posts.fetch_posts(subreddit, limit).await
    }

    pub async fn fetch_posts_for_subreddits(
        &self,
        subreddits: &[String],
        per_sub_limit: usize,
        total_limit: usize,
    ) -> Vec<Post> {
        self.posts
            .fetch_posts_for_subreddits(subreddits, per_sub_limit, total_limit)
            .await
    }

    pub async fn fetch_comments(&self, post_id: &str, limit: usize) -> Result<Vec<Comment>, CoreError> {
        self.comments.fetch_comments(post_id, limit).await
    }

    pub async fn discover(&self, game_name: &str, max_results: usize) -> Vec<DiscoveryCandidate> {
        self.discovery.discover(game_name, max_results).await
    }

    pub async fn scan_subreddit(&self, subreddit: &str) -> Result<ScanReport, CoreError> {
        scan_subreddit(&self.posts, &self.comments, &self.analyzer, subreddit).await
    }

    pub async fn scan_multiple(
        &self,
        subreddits: &[String],
        game_name: &str,
        keywords: &str,
        include_breakdown: bool,
        include_internal: bool,
    ) -> Result<MultiScanResult, CoreError> {
        self.scanner
            .scan(subreddits, game_name, keywords, include_breakdown, include_internal)
            .await
    }

    /// Mirror traffic so far; `None` when the service runs over an injected
    /// source.
    pub async fn mirror_metrics(&self) -> Option<MirrorMetrics> {
        match &self.mirror {
            Some(client) => Some(client.metrics().snapshot().await),
            None => None,
        }
    }

    /// Mirror traffic as pretty JSON.
    pub async fn export_mirror_metrics(&self) -> Result<Option<String>, CoreError> {
        match &self.mirror {
            Some(client) => Ok(Some(client.metrics().export_metrics().await?)),
            None => Ok(None),
        }
    }

    /// Logs request totals, per-endpoint latency and the rate limiter state.
    pub async fn log_mirror_summary(&self) {
        let Some(client) = &self.mirror else {
            return;
        };
        let metrics = client.metrics().snapshot().await;
        info!(
            "Mirror traffic: {} requests ({} ok, {} empty, {} failed)",
            metrics.total_requests,
            metrics.successful_requests,
            metrics.empty_responses,
            metrics.failed_requests
        );
        for (endpoint, stats) in &metrics.requests_by_endpoint {
            info!(
                "  {}: {} requests, avg {:?}, max {:?}, {:.0}% answered",
                endpoint,
                stats.request_count,
                stats.average_response_time(),
                stats.max_response_time,
                stats.success_rate() * 100.0
            );
        }

        let limits = client.rate_limit_status().await;
        debug!(
            "Mirror rate limit: {}/{} tokens, {} free slots, {} requests/min",
            limits.available_tokens, limits.max_tokens, limits.available_permits, limits.requests_per_minute
        );
    }
}
