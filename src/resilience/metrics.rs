use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Number of response-time samples kept for percentile calculation
const RESPONSE_TIME_WINDOW: usize = 100;

/// Number of failure events kept in the rolling history
const FAILURE_HISTORY_LIMIT: usize = 100;

/// Sliding window for cost admission control
const COST_WINDOW: Duration = Duration::from_secs(60);

/// Health score decay per recorded failure
const FAILURE_SCORE_DECAY: f64 = 5.0;

/// Health score recovery per recorded success
const SUCCESS_SCORE_RECOVERY: f64 = 0.5;

/// Classification label attached to each failure.
///
/// The label is derived from the error and affects observability only,
/// never control flow. Classification is authoritative for typed error
/// variants and best-effort for opaque provider messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePattern {
    Timeout,
    ConnectionError,
    RateLimit,
    AuthenticationError,
    ServiceUnavailable,
    QuotaExceeded,
    InvalidResponse,
    NetworkError,
}

impl FailurePattern {
    /// Classify an error into a failure pattern.
    ///
    /// Typed variants map directly; `Provider`/`Network` messages fall back
    /// to substring heuristics, defaulting to `NetworkError`.
    #[must_use]
    pub fn classify(error: &Error) -> Self {
        match error {
            Error::Timeout { .. } => Self::Timeout,
            Error::ConnectionRefused { .. } => Self::ConnectionError,
            Error::RateLimitExceeded { .. } => Self::RateLimit,
            Error::AuthenticationFailed(_) => Self::AuthenticationError,
            Error::ServiceUnavailable { .. } => Self::ServiceUnavailable,
            Error::QuotaExceeded { .. } => Self::QuotaExceeded,
            Error::InvalidResponse(_) => Self::InvalidResponse,
            Error::Http(e) if e.is_timeout() => Self::Timeout,
            Error::Http(e) if e.is_connect() => Self::ConnectionError,
            other => Self::classify_message(&other.to_string()),
        }
    }

    fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            Self::Timeout
        } else if lower.contains("connection") {
            Self::ConnectionError
        } else if lower.contains("rate limit") || lower.contains("429") {
            Self::RateLimit
        } else if lower.contains("auth") || lower.contains("401") || lower.contains("403") {
            Self::AuthenticationError
        } else if lower.contains("503") || lower.contains("service unavailable") {
            Self::ServiceUnavailable
        } else if lower.contains("quota") {
            Self::QuotaExceeded
        } else if lower.contains("invalid response") {
            Self::InvalidResponse
        } else {
            Self::NetworkError
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection_error",
            Self::RateLimit => "rate_limit",
            Self::AuthenticationError => "authentication_error",
            Self::ServiceUnavailable => "service_unavailable",
            Self::QuotaExceeded => "quota_exceeded",
            Self::InvalidResponse => "invalid_response",
            Self::NetworkError => "network_error",
        }
    }
}

/// Immutable record of a single provider failure
#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub timestamp: DateTime<Utc>,
    pub provider_id: String,
    pub pattern: FailurePattern,
    pub message: String,
    pub response_time: Duration,
    pub cost_impact: f64,
}

/// Rolling per-provider statistics.
///
/// Owned exclusively by one `CircuitBreaker` and mutated only through
/// `record_success`/`record_failure`; the breaker's lock serializes access.
#[derive(Debug)]
pub struct ProviderMetrics {
    provider_id: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u32,
    health_score: f64,
    pub total_cost: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
    response_times: VecDeque<Duration>,
    failures: VecDeque<FailureEvent>,
    cost_window: VecDeque<(Instant, f64)>,
}

impl ProviderMetrics {
    #[must_use]
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            consecutive_failures: 0,
            health_score: 100.0,
            total_cost: 0.0,
            last_failure_at: None,
            response_times: VecDeque::with_capacity(RESPONSE_TIME_WINDOW),
            failures: VecDeque::with_capacity(FAILURE_HISTORY_LIMIT),
            cost_window: VecDeque::new(),
        }
    }

    /// Record a successful request
    pub fn record_success(&mut self, response_time: Duration, cost: f64) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.consecutive_failures = 0;
        self.push_response_time(response_time);
        self.push_cost(cost);
        self.health_score = (self.health_score + SUCCESS_SCORE_RECOVERY).clamp(0.0, 100.0);
    }

    /// Record a failed request and append its failure event
    pub fn record_failure(&mut self, event: FailureEvent) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.consecutive_failures += 1;
        self.last_failure_at = Some(event.timestamp);
        self.push_response_time(event.response_time);
        self.push_cost(event.cost_impact);
        self.health_score = (self.health_score - FAILURE_SCORE_DECAY).clamp(0.0, 100.0);

        if self.failures.len() >= FAILURE_HISTORY_LIMIT {
            self.failures.pop_front();
        }
        self.failures.push_back(event);
    }

    fn push_response_time(&mut self, response_time: Duration) {
        if self.response_times.len() >= RESPONSE_TIME_WINDOW {
            self.response_times.pop_front();
        }
        self.response_times.push_back(response_time);
    }

    fn push_cost(&mut self, cost: f64) {
        self.total_cost += cost;
        let now = Instant::now();
        self.cost_window.push_back((now, cost));
        while let Some((at, _)) = self.cost_window.front() {
            if now.duration_since(*at) > COST_WINDOW {
                self.cost_window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Trailing 60-second cost sum, used for admission control
    #[must_use]
    pub fn cost_last_minute(&self) -> f64 {
        let now = Instant::now();
        self.cost_window
            .iter()
            .filter(|(at, _)| now.duration_since(*at) <= COST_WINDOW)
            .map(|(_, cost)| cost)
            .sum()
    }

    /// Health score, always within [0, 100]
    #[must_use]
    pub const fn health_score(&self) -> f64 {
        self.health_score
    }

    /// External health-score feedback from the health monitor, clamped
    pub fn set_health_score(&mut self, score: f64) {
        self.health_score = score.clamp(0.0, 100.0);
    }

    /// Failure rate as a percentage of total requests
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.failed_requests as f64 / self.total_requests as f64) * 100.0
        }
    }

    /// Success rate as a percentage of total requests
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            100.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }

    /// Mean of the response-time window
    #[must_use]
    pub fn average_response_time(&self) -> Duration {
        if self.response_times.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.response_times.iter().sum();
        total / self.response_times.len() as u32
    }

    /// 95th percentile of the response-time window
    #[must_use]
    pub fn p95_response_time(&self) -> Duration {
        self.percentile(0.95)
    }

    /// 99th percentile of the response-time window
    #[must_use]
    pub fn p99_response_time(&self) -> Duration {
        self.percentile(0.99)
    }

    fn percentile(&self, pct: f64) -> Duration {
        if self.response_times.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<Duration> = self.response_times.iter().copied().collect();
        sorted.sort_unstable();
        let rank = ((sorted.len() as f64 * pct).ceil() as usize).clamp(1, sorted.len());
        sorted[rank - 1]
    }

    /// Recent failure events, oldest first
    #[must_use]
    pub fn recent_failures(&self) -> Vec<FailureEvent> {
        self.failures.iter().cloned().collect()
    }

    #[must_use]
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Point-in-time view of the metrics for reporting
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            provider_id: self.provider_id.clone(),
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            consecutive_failures: self.consecutive_failures,
            failure_rate: self.failure_rate(),
            health_score: self.health_score,
            average_response_time: self.average_response_time(),
            p95_response_time: self.p95_response_time(),
            p99_response_time: self.p99_response_time(),
            total_cost: self.total_cost,
            cost_last_minute: self.cost_last_minute(),
            last_failure_at: self.last_failure_at,
        }
    }
}

/// Public point-in-time metrics view
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub provider_id: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u32,
    pub failure_rate: f64,
    pub health_score: f64,
    pub average_response_time: Duration,
    pub p95_response_time: Duration,
    pub p99_response_time: Duration,
    pub total_cost: f64,
    pub cost_last_minute: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(pattern: FailurePattern, response_time: Duration) -> FailureEvent {
        FailureEvent {
            timestamp: Utc::now(),
            provider_id: "test".to_string(),
            pattern,
            message: "test failure".to_string(),
            response_time,
            cost_impact: 0.002,
        }
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let mut metrics = ProviderMetrics::new("test");
        metrics.record_failure(failure(FailurePattern::Timeout, Duration::from_millis(100)));
        metrics.record_failure(failure(FailurePattern::Timeout, Duration::from_millis(100)));
        assert_eq!(metrics.consecutive_failures, 2);

        metrics.record_success(Duration::from_millis(50), 0.001);
        assert_eq!(metrics.consecutive_failures, 0);
        assert_eq!(metrics.total_requests, 3);
    }

    #[test]
    fn test_health_score_stays_clamped() {
        let mut metrics = ProviderMetrics::new("test");
        for _ in 0..50 {
            metrics.record_failure(failure(
                FailurePattern::NetworkError,
                Duration::from_millis(10),
            ));
        }
        assert!((0.0..=100.0).contains(&metrics.health_score()));
        assert_eq!(metrics.health_score(), 0.0);

        for _ in 0..500 {
            metrics.record_success(Duration::from_millis(10), 0.0);
        }
        assert!((0.0..=100.0).contains(&metrics.health_score()));

        metrics.set_health_score(250.0);
        assert_eq!(metrics.health_score(), 100.0);
        metrics.set_health_score(-10.0);
        assert_eq!(metrics.health_score(), 0.0);
    }

    #[test]
    fn test_response_time_window_is_bounded() {
        let mut metrics = ProviderMetrics::new("test");
        for i in 0..200 {
            metrics.record_success(Duration::from_millis(i), 0.0);
        }
        assert_eq!(metrics.response_times.len(), RESPONSE_TIME_WINDOW);
        // Window holds the last 100 samples: 100..=199ms
        assert!(metrics.average_response_time() >= Duration::from_millis(100));
    }

    #[test]
    fn test_percentiles_ordering() {
        let mut metrics = ProviderMetrics::new("test");
        for i in 1..=100 {
            metrics.record_success(Duration::from_millis(i), 0.0);
        }
        assert_eq!(metrics.p95_response_time(), Duration::from_millis(95));
        assert_eq!(metrics.p99_response_time(), Duration::from_millis(99));
        assert!(metrics.p99_response_time() >= metrics.p95_response_time());
    }

    #[test]
    fn test_failure_history_is_bounded() {
        let mut metrics = ProviderMetrics::new("test");
        for _ in 0..150 {
            metrics.record_failure(failure(FailurePattern::RateLimit, Duration::ZERO));
        }
        assert_eq!(metrics.recent_failures().len(), FAILURE_HISTORY_LIMIT);
    }

    #[test]
    fn test_cost_window_accumulates() {
        let mut metrics = ProviderMetrics::new("test");
        metrics.record_success(Duration::from_millis(10), 0.5);
        metrics.record_success(Duration::from_millis(10), 0.25);
        assert!((metrics.cost_last_minute() - 0.75).abs() < f64::EPSILON);
        assert!((metrics.total_cost - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_classification_from_typed_errors() {
        assert_eq!(
            FailurePattern::classify(&Error::Timeout {
                timeout: Duration::from_secs(30)
            }),
            FailurePattern::Timeout
        );
        assert_eq!(
            FailurePattern::classify(&Error::ConnectionRefused {
                endpoint: "db".to_string()
            }),
            FailurePattern::ConnectionError
        );
        assert_eq!(
            FailurePattern::classify(&Error::RateLimitExceeded {
                retry_after: Duration::from_secs(1)
            }),
            FailurePattern::RateLimit
        );
        assert_eq!(
            FailurePattern::classify(&Error::AuthenticationFailed("denied".to_string())),
            FailurePattern::AuthenticationError
        );
        assert_eq!(
            FailurePattern::classify(&Error::QuotaExceeded {
                resource: "tokens".to_string()
            }),
            FailurePattern::QuotaExceeded
        );
    }

    #[test]
    fn test_classification_from_opaque_messages() {
        assert_eq!(
            FailurePattern::classify(&Error::Provider("request timed out".to_string())),
            FailurePattern::Timeout
        );
        assert_eq!(
            FailurePattern::classify(&Error::Provider("got HTTP 429".to_string())),
            FailurePattern::RateLimit
        );
        assert_eq!(
            FailurePattern::classify(&Error::Provider("503 from upstream".to_string())),
            FailurePattern::ServiceUnavailable
        );
        assert_eq!(
            FailurePattern::classify(&Error::Provider("something odd".to_string())),
            FailurePattern::NetworkError
        );
    }
}
