use reddit_client::{CommentFetcher, PostFetcher};
use sentiment_analysis::SentimentAnalyzer;
use tracing::info;
use tracker_core::text::normalize_subreddit;
use tracker_core::{best_effort, CoreError, ScanReport};

pub const SINGLE_SCAN_POSTS: usize = 100;
pub const SINGLE_SCAN_COMMENT_POSTS: usize = 5;
pub const SINGLE_SCAN_COMMENTS_PER_POST: usize = 20;

/// Scan of one subreddit: up to 100 posts, comments from the first five of
/// them, and an analysis without game context. Post fetch failures are
/// returned; comment failures only shrink the sample.
pub async fn scan_subreddit(
    posts: &PostFetcher,
    comments: &CommentFetcher,
    analyzer: &SentimentAnalyzer,
    subreddit: &str,
) -> Result<ScanReport, CoreError> {
    let name = normalize_subreddit(subreddit);
    if name.is_empty() {
        return Err(CoreError::InvalidInput {
            message: "A valid subreddit is required".to_string(),
        });
    }

    let fetched = posts.fetch_posts(&name, SINGLE_SCAN_POSTS).await?;
    if fetched.is_empty() {
        return Err(CoreError::InvalidInput {
            message: format!("No posts found for r/{}", name),
        });
    }

    let mut sampled = Vec::new();
    for post in fetched.iter().take(SINGLE_SCAN_COMMENT_POSTS) {
        if post.id.is_empty() {
            continue;
        }
        let result = comments
            .fetch_comments(&post.id, SINGLE_SCAN_COMMENTS_PER_POST)
            .await
            .map(|found| {
                found
                    .into_iter()
                    .map(|mut comment| {
                        comment.source_post_id = Some(post.id.clone());
                        comment
                    })
                    .collect::<Vec<_>>()
            });
        sampled.extend(best_effort(result, &format!("fetching comments for post {}", post.id)));
    }
    info!("Scan of r/{}: {} posts, {} comments", name, fetched.len(), sampled.len());

    let analysis = analyzer.analyze(&fetched, &sampled, "", "").await;

    Ok(ScanReport {
        subreddit: name,
        posts: fetched,
        comments: sampled,
        analysis,
    })
}
