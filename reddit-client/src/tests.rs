use crate::api::{ArcticShiftClient, ContentSource, MirrorComment, PostQuery, SubredditMatch};
use crate::comments::CommentFetcher;
use crate::discovery::SubredditDiscovery;
use crate::posts::PostFetcher;
use async_trait::async_trait;
use llm_interface::{ChatRequest, LlmProvider};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracker_core::ranking::is_recent;
use tracker_core::{
    format_permalink, Comment, CoreError, DiscoveryCandidate, LlmError, MirrorConfig, MirrorError,
    Post, TtlCache,
};

const HOUR: i64 = 60 * 60;
const DAY: i64 = 24 * HOUR;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn post(id: &str, author: &str, score: i64, num_comments: i64, age_secs: i64) -> Post {
    Post {
        id: id.to_string(),
        title: format!("Thoughts on the new season, thread {}", id),
        selftext: "The new season changed a lot of things about progression.".to_string(),
        created_utc: now() - age_secs,
        score,
        num_comments,
        author: author.to_string(),
        subreddit: "TestGame".to_string(),
        permalink: format_permalink(id),
    }
}

fn low_quality_post(id: &str) -> Post {
    Post {
        title: "lol".to_string(),
        selftext: String::new(),
        score: 1,
        num_comments: 0,
        ..post(id, &format!("lurker_{id}"), 1, 0, HOUR)
    }
}

fn mirror_comment(id: &str, author: &str, score: i64, body: &str) -> MirrorComment {
    MirrorComment {
        id: id.to_string(),
        body: body.to_string(),
        created_utc: now() - HOUR,
        score,
        author: author.to_string(),
        parent_id: "t3_parent".to_string(),
    }
}

/// In-memory mirror. Posts are keyed by `(lowercase subreddit, after)`.
#[derive(Default)]
struct MockSource {
    posts: HashMap<(String, String), Vec<Post>>,
    failing_windows: HashSet<(String, String)>,
    comments: HashMap<String, Vec<MirrorComment>>,
    failing_comment_posts: HashSet<String>,
    subreddits: HashMap<String, Vec<SubredditMatch>>,
    post_queries: Mutex<Vec<PostQuery>>,
    comment_queries: Mutex<Vec<String>>,
}

impl MockSource {
    fn with_window(mut self, subreddit: &str, after: &str, posts: Vec<Post>) -> Self {
        self.posts
            .insert((subreddit.to_lowercase(), after.to_string()), posts);
        self
    }

    fn failing_window(mut self, subreddit: &str, after: &str) -> Self {
        self.failing_windows
            .insert((subreddit.to_lowercase(), after.to_string()));
        self
    }

    fn with_comments(mut self, post_id: &str, comments: Vec<MirrorComment>) -> Self {
        self.comments.insert(post_id.to_string(), comments);
        self
    }

    fn with_subreddits(mut self, prefix: &str, found: Vec<SubredditMatch>) -> Self {
        self.subreddits.insert(prefix.to_string(), found);
        self
    }

    fn post_query_count(&self) -> usize {
        self.post_queries.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn search_posts(&self, query: &PostQuery) -> Result<Vec<Post>, CoreError> {
        self.post_queries.lock().unwrap().push(query.clone());
        let key = (query.subreddit.to_lowercase(), query.after.clone());
        if self.failing_windows.contains(&key) {
            return Err(MirrorError::RequestFailed {
                endpoint: "Arctic Shift posts".to_string(),
                status_code: 503,
                detail: "upstream unavailable".to_string(),
            }
            .into());
        }
        Ok(self.posts.get(&key).cloned().unwrap_or_default())
    }

    async fn search_comments(&self, post_id: &str) -> Result<Vec<MirrorComment>, CoreError> {
        self.comment_queries.lock().unwrap().push(post_id.to_string());
        if self.failing_comment_posts.contains(post_id) {
            return Err(MirrorError::RequestFailed {
                endpoint: "Arctic Shift comments".to_string(),
                status_code: 500,
                detail: String::new(),
            }
            .into());
        }
        Ok(self.comments.get(post_id).cloned().unwrap_or_default())
    }

    async fn search_subreddits(
        &self,
        prefix: &str,
        _limit: usize,
    ) -> Result<Vec<SubredditMatch>, CoreError> {
        Ok(self.subreddits.get(prefix).cloned().unwrap_or_default())
    }
}

struct ScriptedLlm {
    reply: Option<String>,
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<String, CoreError> {
        self.reply.clone().ok_or_else(|| {
            LlmError::ServiceUnavailable {
                provider: "scripted".to_string(),
                status_code: 503,
            }
            .into()
        })
    }
}

fn post_fetcher(source: Arc<MockSource>) -> PostFetcher {
    PostFetcher::new(source, TtlCache::shared("posts", Duration::from_secs(600)))
}

fn comment_fetcher(source: Arc<MockSource>) -> CommentFetcher {
    CommentFetcher::new(
        source,
        TtlCache::shared("comments", Duration::from_secs(600)),
        Duration::ZERO,
    )
}

#[tokio::test]
async fn test_fetch_posts_drops_low_quality_and_respects_limit() {
    let mut posts: Vec<Post> = (0..12)
        .map(|i| post(&format!("good{i}"), &format!("author{i}"), 10 + i, 3 + i, HOUR))
        .collect();
    posts.extend((0..3).map(|i| low_quality_post(&format!("bad{i}"))));
    let source = Arc::new(MockSource::default().with_window("TestGame", "48h", posts));

    let fetched = post_fetcher(source)
        .fetch_posts("r/TestGame", 10)
        .await
        .unwrap();

    assert_eq!(fetched.len(), 10);
    assert!(fetched.iter().all(|p| !p.id.starts_with("bad")));
}

#[tokio::test]
async fn test_fetch_posts_normalizes_input_before_querying() {
    let source = Arc::new(MockSource::default().with_window(
        "TestGame",
        "48h",
        vec![post("a", "x", 5, 5, HOUR)],
    ));
    let fetcher = post_fetcher(source.clone());

    for input in ["TestGame", "r/TestGame", "/r/TestGame/", "https://reddit.com/r/TestGame/"] {
        let fetched = fetcher.fetch_posts(input, 5).await.unwrap();
        assert_eq!(fetched.len(), 1, "input: {input}");
    }

    let queries = source.post_queries.lock().unwrap();
    assert!(queries.iter().all(|q| q.subreddit == "TestGame"));
    // Every spelling after the first hits the cache.
    assert_eq!(queries.len(), 3);
}

#[tokio::test]
async fn test_fetch_posts_empty_input() {
    let source = Arc::new(MockSource::default());
    let fetched = post_fetcher(source.clone()).fetch_posts("  /  ", 10).await.unwrap();
    assert!(fetched.is_empty());
    assert_eq!(source.post_query_count(), 0);
}

#[tokio::test]
async fn test_fetch_posts_stops_once_pool_is_large_enough() {
    let posts: Vec<Post> = (0..20)
        .map(|i| post(&format!("p{i}"), &format!("a{i}"), 5, 5, HOUR))
        .collect();
    let source = Arc::new(MockSource::default().with_window("TestGame", "48h", posts));

    let fetched = post_fetcher(source.clone())
        .fetch_posts("TestGame", 10)
        .await
        .unwrap();
    assert_eq!(fetched.len(), 10);
    assert_eq!(source.post_query_count(), 1);
}

#[tokio::test]
async fn test_fetch_posts_merges_windows_first_seen_wins() {
    let fresh = post("dup", "a", 5, 5, HOUR);
    let mut stale = post("dup", "a", 5000, 500, 3 * DAY);
    stale.title = "stale copy".to_string();
    let source = Arc::new(
        MockSource::default()
            .with_window("TestGame", "48h", vec![fresh.clone()])
            .with_window("TestGame", "8d", vec![stale, post("older", "b", 5, 5, 5 * DAY)]),
    );

    let fetched = post_fetcher(source).fetch_posts("TestGame", 10).await.unwrap();
    assert_eq!(fetched.len(), 2);
    let dup = fetched.iter().find(|p| p.id == "dup").unwrap();
    assert_eq!(dup.title, fresh.title);
}

#[tokio::test]
async fn test_fetch_posts_partial_window_failure_is_tolerated() {
    let source = Arc::new(
        MockSource::default()
            .failing_window("TestGame", "48h")
            .with_window("TestGame", "8d", vec![post("a", "x", 5, 5, 4 * DAY)]),
    );
    let fetched = post_fetcher(source).fetch_posts("TestGame", 10).await.unwrap();
    assert_eq!(fetched.len(), 1);

    // One failure and otherwise empty windows: not an error.
    let source = Arc::new(MockSource::default().failing_window("Quiet", "8d"));
    let fetched = post_fetcher(source).fetch_posts("Quiet", 10).await.unwrap();
    assert!(fetched.is_empty());
}

#[tokio::test]
async fn test_fetch_posts_all_windows_failed() {
    let source = Arc::new(
        MockSource::default()
            .failing_window("Down", "48h")
            .failing_window("Down", "8d")
            .failing_window("Down", "30d"),
    );
    let result = post_fetcher(source).fetch_posts("r/Down", 10).await;
    match result {
        Err(CoreError::Mirror(MirrorError::AllWindowsFailed {
            subreddit,
            last_error,
        })) => {
            assert_eq!(subreddit, "Down");
            assert!(last_error.contains("HTTP 503"));
        }
        other => panic!("expected AllWindowsFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_posts_keeps_recent_floor() {
    // Old threads dominate on engagement; fresh ones must still make the cut.
    let mut posts: Vec<Post> = (0..40)
        .map(|i| post(&format!("old{i}"), &format!("veteran{i}"), 900, 300, 10 * DAY))
        .collect();
    posts.extend(
        (0..25).map(|i| post(&format!("new{i}"), &format!("newcomer{i}"), 3, 1, HOUR * (i + 1))),
    );
    let source = Arc::new(MockSource::default().with_window("TestGame", "48h", posts));

    let fetched = post_fetcher(source).fetch_posts("TestGame", 30).await.unwrap();
    assert_eq!(fetched.len(), 30);
    let recent = fetched.iter().filter(|p| is_recent(p, now())).count();
    assert!(recent >= 20, "only {recent} recent posts");
}

#[tokio::test]
async fn test_fetch_posts_for_subreddits() {
    let shared = post("shared", "x", 50, 20, HOUR);
    let source = Arc::new(
        MockSource::default()
            .with_window("Alpha", "48h", vec![shared.clone(), post("a1", "y", 1, 1, HOUR)])
            .with_window("Beta", "48h", vec![shared, post("b1", "z", 100, 40, HOUR)])
            .failing_window("Broken", "48h")
            .failing_window("Broken", "8d")
            .failing_window("Broken", "30d"),
    );

    let subreddits = vec![
        "Alpha".to_string(),
        "r/alpha".to_string(),
        "Beta".to_string(),
        "Broken".to_string(),
        "".to_string(),
    ];
    let merged = post_fetcher(source.clone())
        .fetch_posts_for_subreddits(&subreddits, 80, 2)
        .await;

    let ids: Vec<_> = merged.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["b1", "shared"]);

    let alpha_queries = source
        .post_queries
        .lock()
        .unwrap()
        .iter()
        .filter(|q| q.subreddit.eq_ignore_ascii_case("alpha"))
        .count();
    assert_eq!(alpha_queries, 3);
}

#[tokio::test]
async fn test_fetch_comments_filters_and_caches() {
    let source = Arc::new(MockSource::default().with_comments(
        "p1",
        vec![
            mirror_comment("c1", "alice", 10, "Love the new map, thanks u/dev_team"),
            mirror_comment("c2", "Alice", 9, "Second thought"),
            mirror_comment("c3", "ALICE", 8, "Third thought"),
            mirror_comment("c4", "bob", 7, "[deleted]"),
            MirrorComment {
                parent_id: "t1_c1".to_string(),
                ..mirror_comment("c5", "carol", 100, "nested reply")
            },
            mirror_comment("c6", "dave", 1, "   "),
        ],
    ));
    let fetcher = comment_fetcher(source.clone());

    let comments = fetcher.fetch_comments("p1", 50).await.unwrap();
    let ids: Vec<_> = comments.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    assert_eq!(comments[0].body, "Love the new map, thanks [user]");

    // Narrower limit is served from the cached set.
    let one = fetcher.fetch_comments("p1", 1).await.unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(source.comment_queries.lock().unwrap().len(), 1);

    assert!(fetcher.fetch_comments("", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sample_comments_for_posts() {
    let mut source = MockSource::default()
        .with_comments("top", vec![mirror_comment("t1", "a", 5, "top comment")])
        .with_comments("mid", vec![mirror_comment("m1", "b", 5, "mid comment")])
        .with_comments("low", vec![mirror_comment("l1", "c", 5, "low comment")]);
    source.failing_comment_posts.insert("mid".to_string());
    let source = Arc::new(source);

    let posts = vec![
        post("low", "x", 1, 1, HOUR),
        post("top", "y", 500, 200, HOUR),
        post("mid", "z", 100, 50, HOUR),
    ];
    let sampled = comment_fetcher(source.clone())
        .sample_comments_for_posts(&posts, 2, 10)
        .await;

    assert_eq!(sampled.len(), 1);
    assert_eq!(sampled[0].id, "t1");
    assert_eq!(sampled[0].source_post_id.as_deref(), Some("top"));

    let queried = source.comment_queries.lock().unwrap().clone();
    assert_eq!(queried, vec!["top".to_string(), "mid".to_string()]);
}

fn discovery_source() -> MockSource {
    let found = |name: &str, subscribers: u64, title: &str| SubredditMatch {
        subreddit: name.to_string(),
        subscribers,
        title: title.to_string(),
        description: String::new(),
    };
    let mut on_topic = post("h1", "a", 40, 12, 2 * DAY);
    on_topic.title = "Elden Ring patch notes discussion".to_string();

    MockSource::default()
        .with_subreddits(
            "eldenring",
            vec![
                found("EldenRing", 3_000_000, "Elden Ring"),
                found("EldenRingMods", 20_000, "Mods"),
            ],
        )
        .with_subreddits(
            "eld",
            vec![
                found("eldenring", 2_900_000, ""),
                found("eldritchhorror", 90_000, "Eldritch Horror"),
            ],
        )
        .with_window("EldenRing", "14d", vec![on_topic.clone()])
        .with_window("EldenRingMods", "14d", vec![post("m1", "b", 2, 1, 3 * DAY)])
}

#[tokio::test]
async fn test_discover_scores_and_gates() {
    let source = Arc::new(discovery_source());
    let cache = TtlCache::<Vec<DiscoveryCandidate>>::shared("discovery", Duration::from_secs(60));
    let discovery = SubredditDiscovery::new(source, cache, None);

    let found = discovery.discover("Elden Ring", 5).await;
    let names: Vec<_> = found.iter().map(|c| c.subreddit.as_str()).collect();
    assert_eq!(names, vec!["EldenRing", "EldenRingMods"]);
    assert_eq!(found[0].subscribers, 3_000_000);
    assert_eq!(
        found[0].reason,
        "Direct name match with relevant recent discussion"
    );
    assert!(found[0].score > found[1].score);

    assert_eq!(discovery.discover("Elden Ring", 1).await.len(), 1);
    assert!(discovery.discover("!!!", 5).await.is_empty());
}

#[tokio::test]
async fn test_discover_is_cached_by_lookup_key() {
    let source = Arc::new(discovery_source());
    let cache = TtlCache::<Vec<DiscoveryCandidate>>::shared("discovery", Duration::from_secs(60));
    let discovery = SubredditDiscovery::new(source.clone(), cache, None);

    discovery.discover("Elden Ring", 5).await;
    let queries_after_first = source.post_query_count();
    discovery.discover("  elden   RING ", 5).await;
    assert_eq!(source.post_query_count(), queries_after_first);
}

#[tokio::test]
async fn test_discover_applies_llm_rerank() {
    let reply = r#"{"picks":[{"subreddit":"EldenRingMods","confidence":"Medium","justification":"Active modding scene"}]}"#;
    let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedLlm {
        reply: Some(reply.to_string()),
    });
    let discovery = SubredditDiscovery::new(
        Arc::new(discovery_source()),
        TtlCache::shared("discovery", Duration::from_secs(60)),
        Some(llm),
    );

    let found = discovery.discover("Elden Ring", 5).await;
    assert_eq!(found[0].subreddit, "EldenRingMods");
    assert!(found[0]
        .reason
        .ends_with("AI rerank (medium): Active modding scene"));
}

#[tokio::test]
async fn test_discover_survives_llm_failure() {
    let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedLlm { reply: None });
    let discovery = SubredditDiscovery::new(
        Arc::new(discovery_source()),
        TtlCache::shared("discovery", Duration::from_secs(60)),
        Some(llm),
    );

    let found = discovery.discover("Elden Ring", 5).await;
    assert_eq!(found[0].subreddit, "EldenRing");
}

#[test]
fn test_comment_type_round_trip_shape() {
    let comment = Comment {
        id: "c".to_string(),
        body: "b".to_string(),
        created_utc: 1,
        score: 2,
        author: "a".to_string(),
        source_post_id: None,
    };
    let json = serde_json::to_value(&comment).unwrap();
    assert!(json.get("source_post_id").is_none());
}

/// Local mirror answering each path prefix with a fixed status and body.
/// Returns the base URL to configure the client with.
async fn serve_mirror(routes: Vec<(&'static str, u16, &'static str)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 16 * 1024];
                let mut read = 0;
                while read < buf.len() {
                    let n = socket.read(&mut buf[read..]).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    read += n;
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }

                let request = String::from_utf8_lossy(&buf[..read]);
                let path = request.split_whitespace().nth(1).unwrap_or("/");
                let (status, body) = routes
                    .iter()
                    .find(|(prefix, _, _)| path.starts_with(prefix))
                    .map(|(_, status, body)| (*status, *body))
                    .unwrap_or((500, r#"{"error": "no route"}"#));

                let response = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}

fn mirror_client(base_url: String) -> ArcticShiftClient {
    ArcticShiftClient::new(&MirrorConfig {
        base_url,
        ..MirrorConfig::default()
    })
    .unwrap()
}

fn window() -> PostQuery {
    PostQuery::new("testgame", "48h", "0h")
}

#[tokio::test]
async fn test_client_maps_rows_from_data() {
    let base = serve_mirror(vec![
        (
            "/api/posts/search",
            200,
            r#"{"data": [{"id": "abc12", "title": "Patch notes", "score": "12", "num_comments": 3, "author": "dev", "subreddit": "testgame", "created_utc": 1700000000}, {"title": "no id"}]}"#,
        ),
        (
            "/api/subreddits/search",
            200,
            r#"{"data": [{"display_name": "TestGame", "subscribers": 5400, "public_description": "All things TestGame"}]}"#,
        ),
    ])
    .await;
    let client = mirror_client(base);

    let posts = client.search_posts(&window()).await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].id, "abc12");
    assert_eq!(posts[0].score, 12);
    assert_eq!(posts[0].permalink, format_permalink("abc12"));

    let found = client.search_subreddits("test", 10).await.unwrap();
    assert_eq!(found[0].subreddit, "TestGame");
    assert_eq!(found[0].subscribers, 5400);
    assert_eq!(found[0].description, "All things TestGame");

    let metrics = client.metrics().snapshot().await;
    assert_eq!(metrics.successful_requests, 2);
}

#[tokio::test]
async fn test_client_treats_endpoint_specific_statuses_as_empty() {
    let base = serve_mirror(vec![
        ("/api/posts/search", 404, r#"{"error": "unknown subreddit"}"#),
        ("/api/comments/search", 400, r#"{"error": "bad link id"}"#),
        ("/api/subreddits/search", 404, "not found"),
    ])
    .await;
    let client = mirror_client(base);

    assert!(client.search_posts(&window()).await.unwrap().is_empty());
    assert!(client.search_comments("abc12").await.unwrap().is_empty());
    assert!(client.search_subreddits("test", 10).await.unwrap().is_empty());

    let metrics = client.metrics().snapshot().await;
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.empty_responses, 3);
    assert_eq!(metrics.failed_requests, 0);
}

#[tokio::test]
async fn test_client_reports_failed_requests_with_detail() {
    let base = serve_mirror(vec![
        ("/api/posts/search", 400, r#"{"message": "after must precede before"}"#),
        ("/api/comments/search", 503, "upstream maintenance"),
    ])
    .await;
    let client = mirror_client(base);

    // 400 only means "empty" for comments and subreddit search.
    match client.search_posts(&window()).await {
        Err(CoreError::Mirror(MirrorError::RequestFailed {
            status_code, detail, ..
        })) => {
            assert_eq!(status_code, 400);
            assert_eq!(detail, "after must precede before");
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let error = client.search_comments("abc12").await.unwrap_err();
    assert_eq!(
        error.to_string(),
        "Content mirror error: Arctic Shift comments request failed (HTTP 503): upstream maintenance"
    );

    let metrics = client.metrics().snapshot().await;
    assert_eq!(metrics.failed_requests, 2);
    assert_eq!(metrics.requests_by_endpoint["/api/posts/search"].error_count, 1);
}

#[tokio::test]
async fn test_client_rejects_malformed_body() {
    let base = serve_mirror(vec![
        ("/api/posts/search", 200, "<html>gateway</html>"),
        ("/api/comments/search", 200, r#"{"data": {"rows": []}}"#),
    ])
    .await;
    let client = mirror_client(base);

    assert!(matches!(
        client.search_posts(&window()).await,
        Err(CoreError::Mirror(MirrorError::InvalidJson { .. }))
    ));
    assert!(matches!(
        client.search_comments("abc12").await,
        Err(CoreError::Mirror(MirrorError::UnexpectedFormat { .. }))
    ));
}
