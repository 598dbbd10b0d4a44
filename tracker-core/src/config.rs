use crate::error::{ConfigError, CoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const ARCTIC_SHIFT_BASE: &str = "https://arctic-shift.photon-reddit.com";
pub const OPENAI_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub mirror: MirrorConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub scan: ScanConfig,
    pub heuristics: HeuristicConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub base_url: String,
    pub user_agent: String,
    pub post_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            base_url: ARCTIC_SHIFT_BASE.to_string(),
            user_agent: "SentimentTracker/1.0".to_string(),
            post_timeout_secs: 30,
            search_timeout_secs: 20,
            requests_per_minute: 120,
            burst: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: OPENAI_BASE.to_string(),
            timeout_secs: 30,
        }
    }
}

impl LlmConfig {
    /// A key that is unset or blank means "no LLM": every analysis runs the
    /// deterministic fallback.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub post_ttl_secs: u64,
    pub comment_ttl_secs: u64,
    pub discovery_ttl_secs: u64,
    pub multi_scan_ttl_secs: u64,
    pub breakdown_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            post_ttl_secs: crate::cache::POST_CACHE_TTL.as_secs(),
            comment_ttl_secs: crate::cache::COMMENT_CACHE_TTL.as_secs(),
            discovery_ttl_secs: crate::cache::DISCOVERY_CACHE_TTL.as_secs(),
            multi_scan_ttl_secs: crate::cache::MULTI_SCAN_CACHE_TTL.as_secs(),
            breakdown_ttl_secs: crate::cache::BREAKDOWN_CACHE_TTL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownStrategy {
    /// One analysis call per subreddit group.
    PerSubreddit,
    /// One call covering every group, merged with the fallback rows.
    Batched,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub per_subreddit_limit: usize,
    pub total_limit: usize,
    pub comment_posts: usize,
    pub comments_per_post: usize,
    pub breakdown_posts_per_subreddit: usize,
    pub breakdown_comment_posts: usize,
    pub breakdown_concurrency: usize,
    pub comment_delay_ms: u64,
    pub breakdown_strategy: BreakdownStrategy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            per_subreddit_limit: 80,
            total_limit: 150,
            comment_posts: 15,
            comments_per_post: 10,
            breakdown_posts_per_subreddit: 8,
            breakdown_comment_posts: 6,
            breakdown_concurrency: 2,
            comment_delay_ms: 200,
            breakdown_strategy: BreakdownStrategy::PerSubreddit,
        }
    }
}

impl ScanConfig {
    pub fn comment_delay(&self) -> Duration {
        Duration::from_millis(self.comment_delay_ms)
    }
}

/// Knobs of the deterministic fallback analysis. These are reasonable
/// defaults, not tuned thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    /// One side's engagement weight must exceed the other's by this factor.
    pub sentiment_margin: f64,
    pub positive_terms: BTreeSet<String>,
    pub negative_terms: BTreeSet<String>,
    pub theme_stop_words: BTreeSet<String>,
}

fn term_set(terms: &[&str]) -> BTreeSet<String> {
    terms.iter().map(|t| t.to_string()).collect()
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            sentiment_margin: 1.15,
            positive_terms: term_set(&[
                "fun", "great", "good", "love", "enjoy", "smooth", "awesome", "improved",
                "improvement", "best", "better", "satisfying", "hype", "rewarding", "polished",
                "addictive", "fair",
            ]),
            negative_terms: term_set(&[
                "bug", "broken", "issue", "issues", "crash", "crashes", "lag", "stutter",
                "cheater", "cheaters", "queue", "matchmaking", "delay", "disconnect", "exploit",
                "unbalanced", "frustrating", "refund", "paywall", "grind", "toxic", "nerf",
            ]),
            theme_stop_words: term_set(&[
                "the", "and", "with", "from", "this", "that", "have", "your", "about", "into",
                "they", "their", "them", "what", "when", "where", "which", "were", "been", "just",
                "also", "more", "some", "many", "over", "than", "there", "users", "community",
                "game", "reddit", "post", "like", "would", "most", "much", "could", "should",
                "really", "still", "very", "make", "makes", "made", "stand",
            ]),
        }
    }
}

impl TrackerConfig {
    /// Loads `.env`, then the optional TOML file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        if dotenvy::dotenv().is_ok() {
            debug!("Loaded environment from .env");
        }

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        info!(
            "Configuration loaded (mirror: {}, llm: {})",
            config.mirror.base_url,
            if config.llm.api_key().is_some() {
                config.llm.model.as_str()
            } else {
                "disabled"
            }
        );
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CoreError> {
        let config: TrackerConfig = toml::from_str(raw).map_err(ConfigError::from)?;
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.llm.model = model;
        }
        if let Some(base) = lookup("OPENAI_BASE_URL") {
            self.llm.base_url = base;
        }
        if let Some(base) = lookup("ARCTIC_SHIFT_BASE") {
            self.mirror.base_url = base;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mirror.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "mirror.base_url".to_string(),
                value: self.mirror.base_url.clone(),
            });
        }
        if self.mirror.requests_per_minute == 0 || self.mirror.burst == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "mirror.requests_per_minute and mirror.burst must be positive".to_string(),
            });
        }
        if self.scan.breakdown_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan.breakdown_concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        let margin = self.heuristics.sentiment_margin;
        if margin.is_nan() || margin < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "heuristics.sentiment_margin".to_string(),
                value: self.heuristics.sentiment_margin.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_utils::ErrorExt;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.mirror.base_url, ARCTIC_SHIFT_BASE);
        assert_eq!(config.cache.discovery_ttl_secs, 86_400);
        assert_eq!(config.scan.breakdown_concurrency, 2);
        assert_eq!(config.scan.breakdown_strategy, BreakdownStrategy::PerSubreddit);
        assert!(config.heuristics.negative_terms.contains("crash"));
        assert!(config.llm.api_key().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = TrackerConfig::from_toml_str(
            r#"
            [scan]
            total_limit = 60
            breakdown_strategy = "batched"

            [heuristics]
            sentiment_margin = 1.3
            "#,
        )
        .unwrap();
        assert_eq!(config.scan.total_limit, 60);
        assert_eq!(config.scan.per_subreddit_limit, 80);
        assert_eq!(config.scan.breakdown_strategy, BreakdownStrategy::Batched);
        assert_eq!(config.heuristics.sentiment_margin, 1.3);
        assert!(config.heuristics.positive_terms.contains("fun"));
    }

    #[test]
    fn test_invalid_toml() {
        let result = TrackerConfig::from_toml_str("[scan\ntotal_limit = ");
        assert!(matches!(
            result,
            Err(CoreError::Config(ConfigError::Parse(_)))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = TrackerConfig::default();
        config.apply_env_overrides(|name| match name {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "ARCTIC_SHIFT_BASE" => Some("http://localhost:9000".to_string()),
            _ => None,
        });
        assert_eq!(config.llm.api_key(), Some("sk-test"));
        assert_eq!(config.mirror.base_url, "http://localhost:9000");
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_blank_api_key_disables_llm() {
        let mut config = TrackerConfig::default();
        config.llm.api_key = Some("   ".to_string());
        assert!(config.llm.api_key().is_none());
    }

    #[test]
    fn test_validation() {
        let mut config = TrackerConfig::default();
        config.scan.breakdown_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.heuristics.sentiment_margin = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = TrackerConfig::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(
            result,
            Err(CoreError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_unreadable_file_is_io_error() {
        // Exists, but a directory cannot be read as a file.
        let result = TrackerConfig::from_file(&std::env::temp_dir());
        match result {
            Err(error @ CoreError::Io(_)) => assert_eq!(error.error_code(), "IO"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
