//! Finds the subreddits most likely to discuss a given game.
//!
//! Candidates come from prefix searches on the mirror, pass a name-relevance
//! gate, get scored on name match, recent content and activity, and are
//! optionally reordered by an LLM pick list.

use crate::api::{ContentSource, PostQuery, SubredditMatch};
use futures::future::join_all;
use llm_interface::{ChatRequest, LlmProvider};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracker_core::text::{
    build_subreddit_prefixes, extract_json_payload, normalize_lookup_key, normalize_subreddit,
    tokenize,
};
use tracker_core::{best_effort, CacheStore, DiscoveryCandidate, Post};

pub const DISCOVERY_MAX_RESULTS: usize = 10;
pub const DISCOVERY_MAX_CANDIDATES: usize = 30;
pub const DISCOVERY_SAMPLE_POSTS: usize = 25;
pub const DISCOVERY_RERANK_TOP: usize = 10;
const PREFIX_SEARCH_LIMIT: usize = 25;
const SUBSCRIBER_FALLBACK_COUNT: usize = 12;
const CONTENT_SNIPPET_CHARS: usize = 260;

#[derive(Debug, Clone)]
struct ScoredCandidate {
    found: SubredditMatch,
    name_score: f64,
    strict_score: f64,
    content_score: f64,
    raw_activity: f64,
    sample_titles: Vec<String>,
    score: f64,
    reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RerankPick {
    pub subreddit: String,
    pub confidence: String,
    pub justification: String,
}

#[derive(Clone)]
pub struct SubredditDiscovery {
    source: Arc<dyn ContentSource>,
    cache: Arc<dyn CacheStore<Vec<DiscoveryCandidate>>>,
    llm: Option<Arc<dyn LlmProvider>>,
}

impl SubredditDiscovery {
    pub fn new(
        source: Arc<dyn ContentSource>,
        cache: Arc<dyn CacheStore<Vec<DiscoveryCandidate>>>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self { source, cache, llm }
    }

    /// Ranked shortlist of at most `min(max_results, 10)` subreddits. Never
    /// fails: search and sampling failures only shrink the candidate pool.
    pub async fn discover(&self, game_name: &str, max_results: usize) -> Vec<DiscoveryCandidate> {
        let lookup_key = normalize_lookup_key(game_name);
        if lookup_key.is_empty() {
            return Vec::new();
        }
        let safe_max = max_results.clamp(1, DISCOVERY_MAX_RESULTS);

        if let Some(entry) = self.cache.get(&lookup_key).await {
            return entry.value.into_iter().take(safe_max).collect();
        }

        let shortlist = self.build_shortlist(game_name).await;
        info!(
            "Discovery for '{}' produced {} candidates",
            lookup_key,
            shortlist.len()
        );
        self.cache.put(lookup_key, shortlist.clone()).await;
        shortlist.into_iter().take(safe_max).collect()
    }

    async fn build_shortlist(&self, game_name: &str) -> Vec<DiscoveryCandidate> {
        let prefixes = build_subreddit_prefixes(game_name);
        if prefixes.is_empty() {
            return Vec::new();
        }

        let pool = self.search_prefixes(&prefixes).await;
        if pool.is_empty() {
            return Vec::new();
        }

        let game_tokens = signal_tokens(game_name);
        let shortlisted = gate_candidates(game_name, &game_tokens, pool);

        let samples = join_all(shortlisted.iter().map(|c| self.sample_posts(&c.found.subreddit))).await;
        let mut scored: Vec<ScoredCandidate> = shortlisted
            .into_iter()
            .zip(samples)
            .map(|(mut candidate, (recent, sampled))| {
                let total_comments: i64 = sampled.iter().map(|p| p.num_comments.max(0)).sum();
                let total_score: i64 = sampled.iter().map(|p| p.score.max(0)).sum();
                candidate.raw_activity = (1.0 + total_comments as f64).ln()
                    + 0.4 * (1.0 + total_score as f64).ln()
                    + 0.2 * (1.0 + candidate.found.subscribers as f64).ln();
                candidate.content_score = content_relevance_score(&game_tokens, &sampled);
                let titles_source = if recent.is_empty() { &sampled } else { &recent };
                candidate.sample_titles = titles_source.iter().take(3).map(|p| p.title.clone()).collect();
                candidate
            })
            .collect();

        score_candidates(&mut scored);
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.found.subscribers.cmp(&a.found.subscribers))
        });

        let ranked = match &self.llm {
            Some(llm) => {
                let top = &scored[..scored.len().min(DISCOVERY_RERANK_TOP)];
                let picks = self.rerank_picks(llm.as_ref(), game_name, top).await;
                apply_rerank(scored, &picks)
            }
            None => scored,
        };

        ranked
            .into_iter()
            .take(DISCOVERY_MAX_RESULTS)
            .map(|c| DiscoveryCandidate {
                subreddit: c.found.subreddit,
                subscribers: c.found.subscribers,
                title: c.found.title,
                description: c.found.description,
                score: c.score,
                reason: c.reason,
            })
            .collect()
    }

    /// Candidates merged by lowercase name, keeping the largest subscriber count.
    async fn search_prefixes(&self, prefixes: &[String]) -> Vec<SubredditMatch> {
        let mut pool: Vec<SubredditMatch> = Vec::new();
        let mut index_by_name: HashMap<String, usize> = HashMap::new();

        for prefix in prefixes {
            let found = match self.source.search_subreddits(prefix, PREFIX_SEARCH_LIMIT).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("Subreddit discovery prefix '{}' failed: {}", prefix, e);
                    continue;
                }
            };

            for candidate in found {
                let key = candidate.subreddit.to_lowercase();
                if key.is_empty() {
                    continue;
                }
                match index_by_name.get(&key) {
                    Some(&index) => {
                        if candidate.subscribers > pool[index].subscribers {
                            pool[index] = candidate;
                        }
                    }
                    None => {
                        index_by_name.insert(key, pool.len());
                        pool.push(candidate);
                    }
                }
            }
        }

        debug!("Prefix search found {} unique subreddits", pool.len());
        pool
    }

    /// Up to 25 posts: 17 from the last two weeks, the rest from the two
    /// weeks before. Returns `(recent, sampled)`.
    async fn sample_posts(&self, subreddit: &str) -> (Vec<Post>, Vec<Post>) {
        let recent = self
            .source
            .search_posts(&PostQuery::new(subreddit, "14d", "0h"))
            .await;
        let baseline = self
            .source
            .search_posts(&PostQuery::new(subreddit, "30d", "14d"))
            .await;

        let recent_limit = ((DISCOVERY_SAMPLE_POSTS as f64 * 0.7) as usize).max(1);
        let mut recent = best_effort(recent, &format!("sampling recent posts of r/{}", subreddit));
        recent.truncate(recent_limit);

        let remaining = DISCOVERY_SAMPLE_POSTS.saturating_sub(recent.len());
        let mut baseline =
            best_effort(baseline, &format!("sampling baseline posts of r/{}", subreddit));
        baseline.truncate(remaining);

        let mut sampled = recent.clone();
        sampled.extend(baseline);
        sampled.truncate(DISCOVERY_SAMPLE_POSTS);
        (recent, sampled)
    }

    async fn rerank_picks(
        &self,
        llm: &dyn LlmProvider,
        game_name: &str,
        candidates: &[ScoredCandidate],
    ) -> Vec<RerankPick> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let request = ChatRequest::new("Return valid JSON only.", rerank_prompt(game_name, candidates))
            .with_temperature(0.2)
            .with_max_tokens(500);

        match llm.complete(&request).await {
            Ok(text) => {
                let picks = parse_rerank_picks(&text);
                if picks.is_empty() {
                    warn!("Subreddit rerank returned no usable picks");
                }
                picks
            }
            Err(e) => {
                warn!("Subreddit rerank failed: {}", e);
                Vec::new()
            }
        }
    }
}

fn signal_tokens(game_name: &str) -> Vec<String> {
    let tokens = tokenize(game_name);
    let signal: Vec<String> = tokens.iter().filter(|t| t.len() >= 3).cloned().collect();
    if signal.is_empty() {
        tokens
    } else {
        signal
    }
}

/// Share of the game's signal tokens found in the candidate's name, title and
/// description.
pub fn name_similarity_score(game_tokens: &[String], candidate: &SubredditMatch) -> f64 {
    if game_tokens.is_empty() {
        return 0.0;
    }
    let blob = format!(
        "{} {} {}",
        candidate.subreddit, candidate.title, candidate.description
    );
    let candidate_tokens: HashSet<String> = tokenize(&blob).into_iter().collect();
    if candidate_tokens.is_empty() {
        return 0.0;
    }

    let game_set: HashSet<&String> = game_tokens.iter().collect();
    let overlap = game_set
        .iter()
        .filter(|token| candidate_tokens.contains(token.as_str()))
        .count();
    overlap as f64 / game_set.len() as f64
}

pub fn strict_name_match_score(game_name: &str, candidate: &SubredditMatch) -> f64 {
    let game = tokenize(game_name).concat();
    if game.is_empty() {
        return 0.0;
    }
    let subreddit = tokenize(&candidate.subreddit).concat();
    let title = tokenize(&candidate.title).concat();
    let description = tokenize(&candidate.description).concat();

    if game == subreddit {
        1.0
    } else if subreddit.contains(&game) {
        0.85
    } else if title.contains(&game) {
        0.7
    } else if description.contains(&game) {
        0.45
    } else {
        0.0
    }
}

/// Per sampled post: 1.0 when two or more game tokens appear in its title and
/// body opening, 0.6 for one. Averaged and capped at 1.0.
pub fn content_relevance_score(game_tokens: &[String], posts: &[Post]) -> f64 {
    if game_tokens.is_empty() || posts.is_empty() {
        return 0.0;
    }
    let mut game_set: HashSet<&str> = game_tokens
        .iter()
        .filter(|t| t.len() >= 3)
        .map(String::as_str)
        .collect();
    if game_set.is_empty() {
        game_set = game_tokens.iter().map(String::as_str).collect();
    }

    let weighted: f64 = posts
        .iter()
        .map(|post| {
            let snippet: String = post.selftext.chars().take(CONTENT_SNIPPET_CHARS).collect();
            let post_tokens: HashSet<String> =
                tokenize(&format!("{} {}", post.title, snippet)).into_iter().collect();
            let overlap = game_set
                .iter()
                .filter(|token| post_tokens.contains(**token))
                .count();
            match overlap {
                0 => 0.0,
                1 => 0.6,
                _ => 1.0,
            }
        })
        .sum();

    (weighted / posts.len() as f64).min(1.0)
}

pub fn normalize_activity_score(raw: f64, low: f64, high: f64) -> f64 {
    if raw <= 0.0 {
        return 0.0;
    }
    if high <= low {
        return 0.5;
    }
    ((raw - low) / (high - low)).clamp(0.0, 1.0)
}

pub fn discovery_reason(content: f64, activity: f64, name: f64, strict: f64) -> &'static str {
    if strict >= 0.8 && content >= 0.25 {
        "Direct name match with relevant recent discussion"
    } else if name >= 0.55 && content >= 0.30 {
        "Strong title/name relevance with supporting discussion signal"
    } else if content >= 0.45 && activity >= 0.45 {
        "Frequent recent game mentions with healthy activity"
    } else if strict >= 0.6 {
        "Likely official or close-match community by name"
    } else if name >= 0.35 && activity >= 0.35 {
        "Relevant match with moderate engagement"
    } else {
        "Potential match based on available subreddit signals"
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Relevance gate and deep-sampling shortlist. Falls back to the largest
/// communities when nothing clears the gate.
fn gate_candidates(
    game_name: &str,
    game_tokens: &[String],
    pool: Vec<SubredditMatch>,
) -> Vec<ScoredCandidate> {
    let seed = |found: SubredditMatch| {
        let name_score = name_similarity_score(game_tokens, &found);
        let strict_score = strict_name_match_score(game_name, &found);
        ScoredCandidate {
            found,
            name_score,
            strict_score,
            content_score: 0.0,
            raw_activity: 0.0,
            sample_titles: Vec::new(),
            score: 0.0,
            reason: String::new(),
        }
    };

    let mut gated: Vec<ScoredCandidate> = pool
        .iter()
        .cloned()
        .map(seed)
        .filter(|c| c.strict_score >= 0.45 || c.name_score >= 0.20)
        .collect();

    if gated.is_empty() {
        let mut by_subscribers = pool;
        by_subscribers.sort_by(|a, b| b.subscribers.cmp(&a.subscribers));
        gated = by_subscribers
            .into_iter()
            .take(SUBSCRIBER_FALLBACK_COUNT)
            .map(seed)
            .collect();
    }

    let relevance_seed = |c: &ScoredCandidate| 0.65 * c.strict_score + 0.35 * c.name_score;
    gated.sort_by(|a, b| {
        relevance_seed(b)
            .total_cmp(&relevance_seed(a))
            .then_with(|| b.found.subscribers.cmp(&a.found.subscribers))
    });
    gated.truncate(DISCOVERY_MAX_CANDIDATES);
    gated
}

fn score_candidates(scored: &mut [ScoredCandidate]) {
    let low = scored
        .iter()
        .map(|c| c.raw_activity)
        .fold(f64::INFINITY, f64::min);
    let high = scored
        .iter()
        .map(|c| c.raw_activity)
        .fold(f64::NEG_INFINITY, f64::max);

    for candidate in scored.iter_mut() {
        let activity = normalize_activity_score(candidate.raw_activity, low, high);
        let mut combined = 0.50 * candidate.content_score
            + 0.22 * candidate.name_score
            + 0.20 * candidate.strict_score
            + 0.08 * activity;
        if candidate.content_score >= 0.55 && candidate.strict_score >= 0.60 {
            combined += 0.08;
        }
        candidate.score = round4(combined);
        candidate.reason = discovery_reason(
            candidate.content_score,
            activity,
            candidate.name_score,
            candidate.strict_score,
        )
        .to_string();
    }
}

fn rerank_prompt(game_name: &str, candidates: &[ScoredCandidate]) -> String {
    let mut lines = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        lines.push(format!(
            "{}. r/{} | subscribers={}",
            index + 1,
            candidate.found.subreddit,
            candidate.found.subscribers
        ));
        for title in candidate.sample_titles.iter().take(3) {
            lines.push(format!("   - {}", title));
        }
    }

    format!(
        "You are selecting the best Reddit communities to scan for game feedback.\n\
         Game name: {game_name}\n\n\
         Candidates:\n{}\n\n\
         Return strict JSON in this shape only:\n\
         {{\"picks\":[{{\"subreddit\":\"name\",\"confidence\":\"High|Medium|Low\",\"justification\":\"short reason\"}}]}}\n\
         Choose 3 to 5 subreddits. Prefer communities that are clearly about the game and have current discussion signal.",
        lines.join("\n")
    )
}

pub fn parse_rerank_picks(text: &str) -> Vec<RerankPick> {
    let Some(payload) = extract_json_payload(text) else {
        return Vec::new();
    };
    let Some(Value::Array(picks)) = payload.get("picks") else {
        return Vec::new();
    };

    let as_text = |value: Option<&Value>| {
        value
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    picks
        .iter()
        .filter(|item| item.is_object())
        .filter_map(|item| {
            let subreddit = normalize_subreddit(&as_text(item.get("subreddit")));
            if subreddit.is_empty() {
                return None;
            }
            let mut justification = as_text(item.get("justification"));
            if justification.is_empty() {
                justification = as_text(item.get("reason"));
            }
            Some(RerankPick {
                subreddit,
                confidence: as_text(item.get("confidence")),
                justification,
            })
        })
        .collect()
}

/// Moves picked candidates to the front in pick order with a confidence
/// bonus; the rest keep their score order.
fn apply_rerank(candidates: Vec<ScoredCandidate>, picks: &[RerankPick]) -> Vec<ScoredCandidate> {
    if picks.is_empty() {
        return candidates;
    }

    let mut slots: Vec<Option<ScoredCandidate>> = candidates.into_iter().map(Some).collect();
    let index_by_name: HashMap<String, usize> = slots
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.as_ref().map(|c| (c.found.subreddit.to_lowercase(), i)))
        .collect();

    let mut picked: Vec<ScoredCandidate> = Vec::new();
    for pick in picks {
        let key = pick.subreddit.to_lowercase();
        let Some(mut candidate) = index_by_name.get(&key).and_then(|&i| slots[i].take()) else {
            continue;
        };

        let confidence = pick.confidence.to_lowercase();
        let bonus = if confidence.starts_with("high") {
            0.25
        } else if confidence.starts_with("medium") {
            0.15
        } else if confidence.starts_with("low") {
            0.05
        } else {
            0.0
        };
        candidate.score = round4(candidate.score + bonus);

        if !pick.justification.is_empty() {
            let suffix = if confidence.is_empty() {
                "AI rerank".to_string()
            } else {
                format!("AI rerank ({})", confidence)
            };
            candidate.reason = format!("{}; {}: {}", candidate.reason, suffix, pick.justification)
                .trim_matches(|c: char| c == ';' || c == ' ')
                .to_string();
        }
        picked.push(candidate);
    }

    let mut rest: Vec<ScoredCandidate> = slots.into_iter().flatten().collect();
    rest.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.found.subscribers.cmp(&a.found.subscribers))
    });
    picked.extend(rest);
    picked
}
