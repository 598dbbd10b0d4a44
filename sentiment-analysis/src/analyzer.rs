use crate::breakdown::{
    fallback_breakdown_rows, merge_breakdown_with_fallback, normalize_breakdown_rows, PostGroups,
};
use crate::fallback::schema_fallback;
use crate::normalize::{ensure_valid_analysis, normalize_analysis};
use crate::prompt::{
    build_analysis_prompt, build_breakdown_prompt, build_repair_prompt, ANALYSIS_SCHEMA_HINT,
    ANALYSIS_SYSTEM_PROMPT, BREAKDOWN_SCHEMA_HINT, BREAKDOWN_SYSTEM_PROMPT, REPAIR_SYSTEM_PROMPT,
};
use crate::raw::{breakdown_rows, RawAnalysis};
use llm_interface::{ChatRequest, LlmProvider};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracker_core::text::{extract_json_payload, normalize_subreddit};
use tracker_core::{
    AnalysisResult, Comment, CoreError, ErrorExt, HeuristicConfig, LlmError, Post,
    SubredditBreakdownRow,
};

const ANALYSIS_TEMPERATURE: f32 = 0.2;
const ANALYSIS_MAX_TOKENS: u32 = 1800;
const REPAIR_TEMPERATURE: f32 = 0.0;
const REPAIR_MAX_TOKENS: u32 = 700;

/// A JSON object out of model text, or a bare JSON array.
fn parse_reply(text: &str) -> Option<Value> {
    extract_json_payload(text).map(Value::Object).or_else(|| {
        serde_json::from_str::<Value>(text.trim())
            .ok()
            .filter(Value::is_array)
    })
}

/// Turns posts and comments into an [`AnalysisResult`]. Model failures of
/// any kind end in the heuristic analysis, so the public methods never fail.
#[derive(Clone)]
pub struct SentimentAnalyzer {
    llm: Option<Arc<dyn LlmProvider>>,
    heuristics: HeuristicConfig,
}

impl SentimentAnalyzer {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, heuristics: HeuristicConfig) -> Self {
        Self { llm, heuristics }
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    pub fn heuristics(&self) -> &HeuristicConfig {
        &self.heuristics
    }

    /// One completion, then one repair round-trip when the reply holds no
    /// JSON.
    async fn complete_json(
        &self,
        llm: &dyn LlmProvider,
        request: ChatRequest,
        schema_hint: &str,
        context: &str,
    ) -> Result<Value, CoreError> {
        let reply = llm.complete(&request).await?;
        if let Some(payload) = parse_reply(&reply) {
            return Ok(payload);
        }

        info!("{} reply from {} is not JSON, asking for a repair", context, llm.name());
        let repair = ChatRequest::new(REPAIR_SYSTEM_PROMPT, build_repair_prompt(&reply, schema_hint))
            .with_temperature(REPAIR_TEMPERATURE)
            .with_max_tokens(REPAIR_MAX_TOKENS);
        let repaired = llm.complete(&repair).await?;

        parse_reply(&repaired).ok_or_else(|| {
            LlmError::UnparsableOutput {
                context: context.to_string(),
            }
            .into()
        })
    }

    pub async fn analyze(
        &self,
        posts: &[Post],
        comments: &[Comment],
        game_name: &str,
        keywords: &str,
    ) -> AnalysisResult {
        let Some(llm) = self.llm.as_deref() else {
            debug!("No LLM provider, analysing {} posts heuristically", posts.len());
            return schema_fallback(posts, &self.heuristics);
        };

        let now = chrono::Utc::now().timestamp();
        let request = ChatRequest::new(
            ANALYSIS_SYSTEM_PROMPT,
            build_analysis_prompt(posts, comments, game_name, keywords, now),
        )
        .with_temperature(ANALYSIS_TEMPERATURE)
        .with_max_tokens(ANALYSIS_MAX_TOKENS);

        match self
            .complete_json(llm, request, ANALYSIS_SCHEMA_HINT, "analysis")
            .await
        {
            Ok(Value::Object(map)) => {
                let normalized = normalize_analysis(&RawAnalysis::from_map(map));
                ensure_valid_analysis(normalized, posts, &self.heuristics)
            }
            Ok(_) => {
                warn!("Analysis reply was not a JSON object, using heuristic analysis");
                schema_fallback(posts, &self.heuristics)
            }
            Err(e) => {
                e.log_warn();
                warn!("Analysis via {} failed, using heuristic analysis", llm.name());
                schema_fallback(posts, &self.heuristics)
            }
        }
    }

    /// Analysis of one subreddit's posts, labelled "<game> - r/<subreddit>".
    pub async fn analyze_subreddit(
        &self,
        posts: &[Post],
        comments: &[Comment],
        subreddit: &str,
        game_name: &str,
        keywords: &str,
    ) -> AnalysisResult {
        self.analyze(posts, comments, &scoped_label(game_name, subreddit), keywords)
            .await
    }

    /// Every group's row from a single model call, merged with the fallback
    /// rows. Any failure yields the fallback rows unchanged.
    pub async fn breakdown_batched(
        &self,
        groups: &PostGroups,
        game_name: &str,
        keywords: &str,
    ) -> Vec<SubredditBreakdownRow> {
        if groups.is_empty() {
            return Vec::new();
        }
        let Some(llm) = self.llm.as_deref() else {
            return fallback_breakdown_rows(groups, &self.heuristics);
        };

        let request = ChatRequest::new(
            BREAKDOWN_SYSTEM_PROMPT,
            build_breakdown_prompt(groups, game_name, keywords),
        )
        .with_temperature(ANALYSIS_TEMPERATURE)
        .with_max_tokens(ANALYSIS_MAX_TOKENS);

        match self
            .complete_json(llm, request, BREAKDOWN_SCHEMA_HINT, "breakdown")
            .await
        {
            Ok(payload) => {
                let parsed = normalize_breakdown_rows(&breakdown_rows(&payload));
                debug!("Breakdown reply carried {} usable rows", parsed.len());
                merge_breakdown_with_fallback(parsed, groups, &self.heuristics)
            }
            Err(e) => {
                e.log_warn();
                warn!("Batched breakdown failed, using fallback rows");
                fallback_breakdown_rows(groups, &self.heuristics)
            }
        }
    }
}

/// "<game> - r/<subreddit>", with "Unknown Game" standing in for a blank game.
pub fn scoped_label(game_name: &str, subreddit: &str) -> String {
    let game = game_name.trim();
    let game = if game.is_empty() { "Unknown Game" } else { game };
    let normalized = normalize_subreddit(subreddit);
    let subreddit = if normalized.is_empty() {
        subreddit.trim()
    } else {
        normalized.as_str()
    };
    format!("{} - r/{}", game, subreddit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tracker_core::{format_permalink, SentimentLabel};

    /// Replays canned replies in order and records every request.
    struct ScriptedLlm {
        replies: Mutex<Vec<Result<String, LlmError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ChatRequest) -> Result<String, CoreError> {
            self.requests.lock().unwrap().push(request.clone());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(LlmError::ServiceUnavailable {
                    provider: "scripted".to_string(),
                    status_code: 503,
                }
                .into());
            }
            replies.remove(0).map_err(CoreError::from)
        }
    }

    fn post(id: &str, title: &str, score: i64, num_comments: i64) -> Post {
        Post {
            id: id.to_string(),
            title: title.to_string(),
            selftext: String::new(),
            created_utc: 1_700_000_000,
            score,
            num_comments,
            author: format!("author_{id}"),
            subreddit: "testgame".to_string(),
            permalink: format_permalink(id),
        }
    }

    fn posts() -> Vec<Post> {
        vec![
            post("crash01", "Crash on startup after patch", 400, 120),
            post("love001", "Love the new ranked season, great fun", 300, 90),
            post("misc001", "Screenshot of my base", 10, 2),
        ]
    }

    const GOOD_REPLY: &str = r#"{
        "sentiment_label": "Negative",
        "sentiment_summary": "Startup crashes dominate [POST:crash01]. Ranked is liked [POST:love001].",
        "themes": ["Startup crashes - patch broke launch [POST:crash01]"],
        "pain_points": [{"text": "Crash on launch", "evidence": ["https://www.reddit.com/comments/crash01/"]}],
        "wins": [{"text": "Ranked season", "evidence": ["love001"]}]
    }"#;

    fn assert_valid(result: &AnalysisResult) {
        assert!(!result.themes.is_empty());
        assert!(!result.pain_points.is_empty());
        assert!(!result.wins.is_empty());
        for item in result.pain_points.iter().chain(&result.wins) {
            assert!(!item.evidence.is_empty());
            assert!(item.evidence.iter().all(|link| link.starts_with("https://www.reddit.com/comments/")));
        }
    }

    #[tokio::test]
    async fn test_analyze_without_llm_uses_fallback() {
        let analyzer = SentimentAnalyzer::new(None, HeuristicConfig::default());
        let result = analyzer.analyze(&posts(), &[], "Test Game", "").await;
        assert_valid(&result);
        assert!(result.sentiment_summary.starts_with("Overall sentiment is"));
    }

    #[tokio::test]
    async fn test_analyze_with_good_reply() {
        let llm = ScriptedLlm::new(vec![Ok(GOOD_REPLY.to_string())]);
        let analyzer = SentimentAnalyzer::new(Some(llm.clone()), HeuristicConfig::default());

        let result = analyzer.analyze(&posts(), &[], "Test Game", "crash").await;
        assert_eq!(result.sentiment_label, SentimentLabel::Negative);
        assert_eq!(result.themes.len(), 1);
        assert_eq!(result.wins[0].evidence, vec![format_permalink("love001")]);
        assert_valid(&result);

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].max_tokens, 1800);
        assert!(requests[0].user.contains("Keywords to watch for: crash"));
    }

    #[tokio::test]
    async fn test_analyze_fenced_reply() {
        let fenced = format!("Here you go:\n```json\n{}\n```", GOOD_REPLY);
        let llm = ScriptedLlm::new(vec![Ok(fenced)]);
        let analyzer = SentimentAnalyzer::new(Some(llm.clone()), HeuristicConfig::default());

        let result = analyzer.analyze(&posts(), &[], "", "").await;
        assert_eq!(result.sentiment_label, SentimentLabel::Negative);
        assert_eq!(llm.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_analyze_repairs_once() {
        let llm = ScriptedLlm::new(vec![
            Ok("sentiment is negative, themes: crashes".to_string()),
            Ok(GOOD_REPLY.to_string()),
        ]);
        let analyzer = SentimentAnalyzer::new(Some(llm.clone()), HeuristicConfig::default());

        let result = analyzer.analyze(&posts(), &[], "", "").await;
        assert_eq!(result.sentiment_label, SentimentLabel::Negative);

        let requests = llm.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].system, REPAIR_SYSTEM_PROMPT);
        assert_eq!(requests[1].temperature, 0.0);
        assert_eq!(requests[1].max_tokens, 700);
    }

    #[tokio::test]
    async fn test_analyze_falls_back_after_failed_repair() {
        let llm = ScriptedLlm::new(vec![Ok("nope".to_string()), Ok("still nope".to_string())]);
        let analyzer = SentimentAnalyzer::new(Some(llm.clone()), HeuristicConfig::default());

        let result = analyzer.analyze(&posts(), &[], "", "").await;
        assert_valid(&result);
        assert!(result.sentiment_summary.starts_with("Overall sentiment is"));
        assert_eq!(llm.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_analyze_falls_back_on_provider_error() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::RateLimitExceeded {
            provider: "scripted".to_string(),
            retry_after: 60,
        })]);
        let analyzer = SentimentAnalyzer::new(Some(llm), HeuristicConfig::default());

        let result = analyzer.analyze(&posts(), &[], "", "").await;
        assert_valid(&result);
    }

    #[tokio::test]
    async fn test_partial_reply_is_completed() {
        let llm = ScriptedLlm::new(vec![Ok(r#"{"sentiment_label": "weird", "themes": []}"#.to_string())]);
        let analyzer = SentimentAnalyzer::new(Some(llm), HeuristicConfig::default());

        let result = analyzer.analyze(&posts(), &[], "", "").await;
        assert_valid(&result);
        assert!(result.sentiment_summary.starts_with("Overall sentiment is"));
    }

    #[tokio::test]
    async fn test_analyze_subreddit_scopes_game_label() {
        let llm = ScriptedLlm::new(vec![Ok(GOOD_REPLY.to_string())]);
        let analyzer = SentimentAnalyzer::new(Some(llm.clone()), HeuristicConfig::default());

        analyzer
            .analyze_subreddit(&posts(), &[], "r/TestGame", "", "")
            .await;
        assert!(llm.requests()[0].user.contains("\"Unknown Game - r/TestGame\""));
    }

    #[test]
    fn test_scoped_label() {
        assert_eq!(scoped_label("Test Game", "/r/testgame/"), "Test Game - r/testgame");
        assert_eq!(scoped_label("  ", "testgame"), "Unknown Game - r/testgame");
    }

    #[tokio::test]
    async fn test_breakdown_batched() {
        let groups = crate::breakdown::group_posts_by_subreddit(&posts(), 8);

        let offline = SentimentAnalyzer::new(None, HeuristicConfig::default());
        let rows = offline.breakdown_batched(&groups, "", "").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows, fallback_breakdown_rows(&groups, &HeuristicConfig::default()));

        let reply = r#"{"rows": [{
            "subreddit": "testgame",
            "sentiment_label": "Mixed",
            "summary_bullets": ["Crashes hurt", "Ranked is loved"],
            "top_themes": ["Crashes - startup", "Ranked - season", "Bases - screenshots"],
            "top_pain_points": [{"text": "Startup crash"}, {"text": "Patch regressions"}, {"text": "Long loads"}],
            "top_wins": [{"text": "Ranked"}, {"text": "Art"}, {"text": "Bases"}]
        }]}"#;
        let llm = ScriptedLlm::new(vec![Ok(reply.to_string())]);
        let analyzer = SentimentAnalyzer::new(Some(llm), HeuristicConfig::default());
        let rows = analyzer.breakdown_batched(&groups, "Test Game", "").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].summary_bullets, vec!["Crashes hurt", "Ranked is loved"]);
        assert_eq!(rows[0].sentiment_label, SentimentLabel::Mixed);
    }
}
