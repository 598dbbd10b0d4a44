use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::sleep;
use tracker_core::{CoreError, MirrorConfig};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    pub burst_allowance: u32,
}

impl RateLimitConfig {
    pub fn from_mirror(config: &MirrorConfig) -> Self {
        Self {
            max_requests: config.requests_per_minute,
            time_window: Duration::from_secs(60),
            burst_allowance: config.burst,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64, // tokens per second
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = config.burst_allowance.max(1) as f64;
        let refill_rate =
            config.max_requests.max(1) as f64 / config.time_window.as_secs_f64().max(0.001);

        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate,
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Takes one token, or returns how long until one is available.
    pub async fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64(
                (1.0 - state.tokens) / self.refill_rate,
            ))
        }
    }

    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }
}

/// Token bucket for request pacing plus a semaphore bounding in-flight
/// mirror calls to the burst size.
#[derive(Debug)]
pub struct RateLimiter {
    token_bucket: TokenBucket,
    semaphore: Arc<Semaphore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.burst_allowance.max(1) as usize));
        let token_bucket = TokenBucket::new(&config);

        Self {
            token_bucket,
            semaphore,
            config,
        }
    }

    pub async fn acquire_permit(&self) -> Result<RateLimitPermit, CoreError> {
        let start_time = Instant::now();
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal {
                message: "mirror rate limiter closed".to_string(),
            })?;

        while let Err(wait_time) = self.token_bucket.try_acquire().await {
            tracing::debug!("Mirror rate limit reached, waiting {:?}", wait_time);
            sleep(wait_time).await;
        }

        Ok(RateLimitPermit {
            _permit: permit,
            queue_wait_time: start_time.elapsed(),
        })
    }

    pub async fn status(&self) -> RateLimitStatus {
        RateLimitStatus {
            available_tokens: self.token_bucket.available_tokens().await as u32,
            max_tokens: self.config.burst_allowance,
            available_permits: self.semaphore.available_permits(),
            requests_per_minute: self.config.max_requests,
        }
    }
}

#[derive(Debug)]
pub struct RateLimitPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
    pub queue_wait_time: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub available_tokens: u32,
    pub max_tokens: u32,
    pub available_permits: usize,
    pub requests_per_minute: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_requests: u32, window_secs: u64, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            time_window: Duration::from_secs(window_secs),
            burst_allowance: burst,
        }
    }

    #[tokio::test]
    async fn test_token_bucket_burst() {
        let bucket = TokenBucket::new(&config(10, 10, 5));

        for _ in 0..5 {
            assert!(bucket.try_acquire().await.is_ok());
        }
        assert!(bucket.try_acquire().await.is_err());
    }

    #[tokio::test]
    async fn test_token_bucket_refill() {
        // 100 tokens per second
        let bucket = TokenBucket::new(&config(100, 1, 1));
        assert!(bucket.try_acquire().await.is_ok());
        assert!(bucket.try_acquire().await.is_err());

        sleep(Duration::from_millis(30)).await;
        assert!(bucket.try_acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_permit_releases_concurrency_slot() {
        let limiter = RateLimiter::new(config(600, 60, 2));

        let permit = limiter.acquire_permit().await.unwrap();
        assert_eq!(limiter.status().await.available_permits, 1);
        drop(permit);
        assert_eq!(limiter.status().await.available_permits, 2);
    }

    #[test]
    fn test_config_from_mirror() {
        let mirror = MirrorConfig::default();
        let config = RateLimitConfig::from_mirror(&mirror);
        assert_eq!(config.max_requests, 120);
        assert_eq!(config.burst_allowance, 6);
        assert_eq!(config.time_window, Duration::from_secs(60));
    }
}
