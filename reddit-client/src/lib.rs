pub mod api;
pub mod comments;
pub mod discovery;
pub mod metrics;
pub mod posts;
pub mod rate_limiter;
pub mod selection;

#[cfg(test)]
mod tests;

pub use api::{ArcticShiftClient, ContentSource, MirrorComment, PostQuery, SubredditMatch};
pub use comments::{select_best_comments, CommentFetcher};
pub use discovery::SubredditDiscovery;
pub use metrics::{EndpointMetrics, MetricsCollector, MirrorMetrics};
pub use posts::PostFetcher;
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
