pub mod analyzer;
pub mod breakdown;
pub mod fallback;
pub mod normalize;
pub mod prompt;
pub mod raw;

pub use analyzer::{scoped_label, SentimentAnalyzer};
pub use breakdown::{
    fallback_breakdown_rows, group_posts_by_subreddit, map_analysis_to_breakdown_row,
    single_subreddit_fallback_row, PostGroups,
};
pub use fallback::schema_fallback;
pub use normalize::normalize_evidence_links;
