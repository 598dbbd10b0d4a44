use serde::{Deserialize, Serialize};
use std::fmt;

/// Base used for every evidence link handed back to callers.
pub const PERMALINK_BASE: &str = "https://www.reddit.com/comments/";

pub fn format_permalink(post_id: &str) -> String {
    format!("{}{}/", PERMALINK_BASE, post_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub selftext: String,
    pub created_utc: i64,
    pub score: i64,
    pub num_comments: i64,
    pub author: String,
    pub subreddit: String,
    pub permalink: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub body: String,
    pub created_utc: i64,
    pub score: i64,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_post_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryCandidate {
    pub subreddit: String,
    pub subscribers: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentimentLabel {
    Positive,
    Mixed,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "Positive",
            SentimentLabel::Mixed => "Mixed",
            SentimentLabel::Negative => "Negative",
        }
    }

    /// Loose match used on model output: "mostly positive" → Positive.
    pub fn parse_loose(value: &str) -> Option<Self> {
        let raw = value.trim().to_lowercase();
        if raw.contains("positive") {
            Some(SentimentLabel::Positive)
        } else if raw.contains("negative") {
            Some(SentimentLabel::Negative)
        } else if raw.contains("mixed") {
            Some(SentimentLabel::Mixed)
        } else {
            None
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightItem {
    pub text: String,
    pub evidence: Vec<String>,
}

impl InsightItem {
    pub fn new(text: impl Into<String>, evidence: Vec<String>) -> Self {
        Self {
            text: text.into(),
            evidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sentiment_label: SentimentLabel,
    pub sentiment_summary: String,
    pub themes: Vec<String>,
    pub pain_points: Vec<InsightItem>,
    pub wins: Vec<InsightItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubredditBreakdownRow {
    pub subreddit: String,
    pub sentiment_label: SentimentLabel,
    pub summary_bullets: Vec<String>,
    pub top_themes: Vec<String>,
    pub top_pain_points: Vec<InsightItem>,
    pub top_wins: Vec<InsightItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubredditBreakdown {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub breakdown: Vec<SubredditBreakdownRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMeta {
    pub subreddits: Vec<String>,
    pub posts_analysed: usize,
    pub comments_sampled: usize,
    pub last_scanned: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiScanResult {
    pub overall: AnalysisResult,
    pub meta: ScanMeta,
    pub subreddit_breakdown: SubredditBreakdown,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub posts: Vec<Post>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
}

impl MultiScanResult {
    /// Drops the sampled posts and comments, leaving the caller-facing shape.
    pub fn into_public(mut self) -> Self {
        self.posts.clear();
        self.comments.clear();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub subreddit: String,
    pub posts: Vec<Post>,
    pub comments: Vec<Comment>,
    pub analysis: AnalysisResult,
}
