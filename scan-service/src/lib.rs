pub mod orchestrator;
pub mod service;
pub mod single;

pub use orchestrator::{
    breakdown_row_cache_key, multi_scan_cache_key, normalize_subreddit_list, MultiSubredditScanner,
    FALLBACK_MARKER, MAX_MULTI_SUBREDDITS,
};
pub use service::TrackerService;
pub use single::scan_subreddit;
