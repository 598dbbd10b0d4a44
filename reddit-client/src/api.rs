use crate::metrics::{MetricsCollector, RequestMetrics, RequestOutcome};
use crate::rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use tracker_core::text::{clean_prefix, normalize_subreddit, truncate_chars};
use tracker_core::{format_permalink, ConfigError, CoreError, MirrorConfig, MirrorError, Post};
use url::Url;

pub const POST_FIELDS: &str = "id,title,selftext,created_utc,score,num_comments,author,subreddit";
pub const COMMENT_FIELDS: &str = "id,body,created_utc,score,author,parent_id";

/// Page size requested from the posts and comments endpoints.
pub const MIRROR_PAGE_LIMIT: u32 = 100;

/// One time-window query against the posts endpoint. `after`/`before` use the
/// mirror's relative syntax (`48h`, `8d`, `0h`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostQuery {
    pub subreddit: String,
    pub after: String,
    pub before: String,
}

impl PostQuery {
    pub fn new(subreddit: &str, after: &str, before: &str) -> Self {
        Self {
            subreddit: subreddit.to_string(),
            after: after.to_string(),
            before: before.to_string(),
        }
    }
}

/// A comment row as the mirror returns it, before any filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorComment {
    pub id: String,
    pub body: String,
    pub created_utc: i64,
    pub score: i64,
    pub author: String,
    pub parent_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubredditMatch {
    pub subreddit: String,
    pub subscribers: u64,
    pub title: String,
    pub description: String,
}

/// Read access to the Reddit mirror. 400/404 answers that mean "nothing here"
/// come back as empty lists; everything else non-2xx is an error.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn search_posts(&self, query: &PostQuery) -> Result<Vec<Post>, CoreError>;

    /// Comments attached to `post_id` (without the `t3_` prefix).
    async fn search_comments(&self, post_id: &str) -> Result<Vec<MirrorComment>, CoreError>;

    async fn search_subreddits(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<SubredditMatch>, CoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Posts,
    Comments,
    Subreddits,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::Posts => "/api/posts/search",
            Endpoint::Comments => "/api/comments/search",
            Endpoint::Subreddits => "/api/subreddits/search",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Endpoint::Posts => "Arctic Shift posts",
            Endpoint::Comments => "Arctic Shift comments",
            Endpoint::Subreddits => "Arctic Shift subreddit search",
        }
    }

    fn empty_statuses(self) -> &'static [u16] {
        match self {
            Endpoint::Posts => &[404],
            Endpoint::Comments | Endpoint::Subreddits => &[400, 404],
        }
    }
}

/// HTTP client for the Arctic Shift Reddit mirror.
#[derive(Debug, Clone)]
pub struct ArcticShiftClient {
    http_client: Client,
    base_url: Url,
    rate_limiter: Arc<RateLimiter>,
    metrics: MetricsCollector,
    post_timeout: Duration,
    search_timeout: Duration,
}

impl ArcticShiftClient {
    pub fn new(config: &MirrorConfig) -> Result<Self, CoreError> {
        let base_url = Url::parse(config.base_url.trim()).map_err(|_| ConfigError::InvalidValue {
            field: "mirror.base_url".to_string(),
            value: config.base_url.clone(),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let user_agent =
            HeaderValue::from_str(&config.user_agent).map_err(|_| ConfigError::InvalidValue {
                field: "mirror.user_agent".to_string(),
                value: config.user_agent.clone(),
            })?;
        headers.insert(USER_AGENT, user_agent);

        let http_client = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            http_client,
            base_url,
            rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::from_mirror(config))),
            metrics: MetricsCollector::new(),
            post_timeout: Duration::from_secs(config.post_timeout_secs),
            search_timeout: Duration::from_secs(config.search_timeout_secs),
        })
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub async fn rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.status().await
    }

    fn endpoint_url(&self, endpoint: Endpoint) -> Url {
        let mut url = self.base_url.clone();
        let base_path = self.base_url.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", base_path, endpoint.path()));
        url
    }

    /// GETs `endpoint` and returns the rows of its `data` array.
    async fn fetch_rows(
        &self,
        endpoint: Endpoint,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Vec<Value>, CoreError> {
        let permit = self.rate_limiter.acquire_permit().await?;
        if permit.queue_wait_time > Duration::from_millis(500) {
            debug!(
                "Waited {:?} for a mirror slot ({})",
                permit.queue_wait_time,
                endpoint.path()
            );
        }

        let start_time = Instant::now();
        let sent = self
            .http_client
            .get(self.endpoint_url(endpoint))
            .query(params)
            .timeout(timeout)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                self.record(endpoint, None, start_time, RequestOutcome::Failed)
                    .await;
                if e.is_timeout() {
                    return Err(MirrorError::RequestTimeout {
                        endpoint: endpoint.label().to_string(),
                    }
                    .into());
                }
                return Err(CoreError::Network(e));
            }
        };

        let status = response.status().as_u16();
        if endpoint.empty_statuses().contains(&status) {
            self.record(endpoint, Some(status), start_time, RequestOutcome::Empty)
                .await;
            debug!("{} answered HTTP {}; treating as empty", endpoint.label(), status);
            return Ok(Vec::new());
        }

        let body = response.text().await?;
        if status != 200 {
            self.record(endpoint, Some(status), start_time, RequestOutcome::Failed)
                .await;
            let detail = extract_error_detail(&body);
            warn!("{} failed with HTTP {}", endpoint.label(), status);
            return Err(MirrorError::RequestFailed {
                endpoint: endpoint.label().to_string(),
                status_code: status,
                detail,
            }
            .into());
        }

        let parsed = serde_json::from_str::<Value>(&body);
        let outcome = if parsed.is_ok() {
            RequestOutcome::Success
        } else {
            RequestOutcome::Failed
        };
        self.record(endpoint, Some(status), start_time, outcome).await;

        let payload = parsed.map_err(|_| MirrorError::InvalidJson {
            endpoint: endpoint.label().to_string(),
        })?;
        rows_from_payload(endpoint, payload)
    }

    async fn record(
        &self,
        endpoint: Endpoint,
        status_code: Option<u16>,
        start_time: Instant,
        outcome: RequestOutcome,
    ) {
        self.metrics
            .record_request(RequestMetrics {
                endpoint: endpoint.path().to_string(),
                status_code,
                response_time: start_time.elapsed(),
                outcome,
            })
            .await;
    }
}

#[async_trait]
impl ContentSource for ArcticShiftClient {
    async fn search_posts(&self, query: &PostQuery) -> Result<Vec<Post>, CoreError> {
        let params = [
            ("subreddit", query.subreddit.clone()),
            ("after", query.after.clone()),
            ("before", query.before.clone()),
            ("sort", "desc".to_string()),
            ("limit", MIRROR_PAGE_LIMIT.to_string()),
            ("fields", POST_FIELDS.to_string()),
        ];
        let rows = self
            .fetch_rows(Endpoint::Posts, &params, self.post_timeout)
            .await?;
        Ok(rows.iter().filter_map(map_post).collect())
    }

    async fn search_comments(&self, post_id: &str) -> Result<Vec<MirrorComment>, CoreError> {
        let params = [
            ("link_id", format!("t3_{}", post_id)),
            ("sort", "desc".to_string()),
            ("limit", MIRROR_PAGE_LIMIT.to_string()),
            ("fields", COMMENT_FIELDS.to_string()),
        ];
        let rows = self
            .fetch_rows(Endpoint::Comments, &params, self.search_timeout)
            .await?;
        Ok(rows.iter().filter_map(map_comment).collect())
    }

    async fn search_subreddits(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<SubredditMatch>, CoreError> {
        let prefix = clean_prefix(prefix);
        if prefix.len() < 2 {
            return Ok(Vec::new());
        }

        let params = [
            ("subreddit_prefix", prefix),
            ("limit", limit.clamp(1, 1000).to_string()),
        ];
        let rows = self
            .fetch_rows(Endpoint::Subreddits, &params, self.search_timeout)
            .await?;
        Ok(rows.iter().filter_map(map_subreddit).collect())
    }
}

fn rows_from_payload(endpoint: Endpoint, payload: Value) -> Result<Vec<Value>, CoreError> {
    let Value::Object(mut map) = payload else {
        return Ok(Vec::new());
    };
    match map.remove("data") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(rows)) => Ok(rows),
        Some(_) if endpoint == Endpoint::Subreddits => Ok(Vec::new()),
        Some(_) => Err(MirrorError::UnexpectedFormat {
            endpoint: endpoint.label().to_string(),
        }
        .into()),
    }
}

/// Message for a failed mirror response: the JSON `error`/`message`/`detail`
/// field, else the JSON text, else the first 300 characters of the body.
pub(crate) fn extract_error_detail(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => ["error", "message", "detail"]
            .iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
        Ok(other) => other.to_string(),
        Err(_) => truncate_chars(body.trim(), 300),
    }
}

fn field_str(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn field_i64(item: &Value, key: &str) -> i64 {
    match item.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(|f| f as i64).unwrap_or(0),
        _ => 0,
    }
}

pub(crate) fn map_post(item: &Value) -> Option<Post> {
    let id = field_str(item, "id");
    if id.is_empty() {
        return None;
    }

    Some(Post {
        permalink: format_permalink(&id),
        title: field_str(item, "title"),
        selftext: field_str(item, "selftext"),
        created_utc: field_i64(item, "created_utc"),
        score: field_i64(item, "score"),
        num_comments: field_i64(item, "num_comments"),
        author: field_str(item, "author"),
        subreddit: field_str(item, "subreddit"),
        id,
    })
}

fn map_comment(item: &Value) -> Option<MirrorComment> {
    if !item.is_object() {
        return None;
    }
    Some(MirrorComment {
        id: field_str(item, "id"),
        body: field_str(item, "body"),
        created_utc: field_i64(item, "created_utc"),
        score: field_i64(item, "score"),
        author: field_str(item, "author"),
        parent_id: field_str(item, "parent_id"),
    })
}

fn map_subreddit(item: &Value) -> Option<SubredditMatch> {
    let raw_name = ["subreddit", "display_name", "name"]
        .iter()
        .map(|key| field_str(item, key))
        .find(|value| !value.is_empty())?;
    let subreddit = normalize_subreddit(&raw_name);
    if subreddit.is_empty() {
        return None;
    }

    let description = ["public_description", "description"]
        .iter()
        .map(|key| field_str(item, key))
        .find(|value| !value.is_empty())
        .unwrap_or_default();

    Some(SubredditMatch {
        subreddit,
        subscribers: field_i64(item, "subscribers").max(0) as u64,
        title: field_str(item, "title"),
        description,
    })
}
