use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestOutcome {
    Success,
    /// 400/404 answered as "no data".
    Empty,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub empty_responses: u64,
    pub failed_requests: u64,
    pub last_request_time: Option<SystemTime>,
    pub requests_by_endpoint: HashMap<String, EndpointMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub empty_count: u64,
    pub error_count: u64,
    pub total_response_time: Duration,
    pub min_response_time: Duration,
    pub max_response_time: Duration,
}

#[derive(Debug, Clone)]
pub struct RequestMetrics {
    pub endpoint: String,
    pub status_code: Option<u16>,
    pub response_time: Duration,
    pub outcome: RequestOutcome,
}

impl EndpointMetrics {
    fn new() -> Self {
        Self {
            request_count: 0,
            success_count: 0,
            empty_count: 0,
            error_count: 0,
            total_response_time: Duration::ZERO,
            min_response_time: Duration::MAX,
            max_response_time: Duration::ZERO,
        }
    }

    fn update(&mut self, metrics: &RequestMetrics) {
        self.request_count += 1;
        self.total_response_time += metrics.response_time;
        self.min_response_time = self.min_response_time.min(metrics.response_time);
        self.max_response_time = self.max_response_time.max(metrics.response_time);

        match metrics.outcome {
            RequestOutcome::Success => self.success_count += 1,
            RequestOutcome::Empty => self.empty_count += 1,
            RequestOutcome::Failed => self.error_count += 1,
        }
    }

    pub fn average_response_time(&self) -> Duration {
        if self.request_count == 0 {
            Duration::ZERO
        } else {
            self.total_response_time / self.request_count as u32
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            (self.success_count + self.empty_count) as f64 / self.request_count as f64
        }
    }
}

/// Per-endpoint counters for mirror traffic, shared by all clones of a client.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<MirrorMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_request(&self, request_metrics: RequestMetrics) {
        let mut metrics = self.metrics.write().await;

        metrics.total_requests += 1;
        metrics.last_request_time = Some(SystemTime::now());

        match request_metrics.outcome {
            RequestOutcome::Success => metrics.successful_requests += 1,
            RequestOutcome::Empty => metrics.empty_responses += 1,
            RequestOutcome::Failed => metrics.failed_requests += 1,
        }

        metrics
            .requests_by_endpoint
            .entry(request_metrics.endpoint.clone())
            .or_insert_with(EndpointMetrics::new)
            .update(&request_metrics);
    }

    pub async fn snapshot(&self) -> MirrorMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn export_metrics(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot().await)
    }
}
