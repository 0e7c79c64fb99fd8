use crate::events::{EventSink, NullEventSink, SystemEvent};
use crate::resilience::metrics::{
    FailureEvent, FailurePattern, MetricsSnapshot, ProviderMetrics,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Minimum number of recorded requests before the failure-rate gate applies
const FAILURE_RATE_MIN_SAMPLES: u64 = 10;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally
    Closed,
    /// Circuit is open - requests are rejected until the next attempt time
    Open {
        opened_at: Instant,
        next_attempt_at: Instant,
    },
    /// Circuit is half-open - limited requests allowed to test recovery
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open { .. } => "open",
            Self::HalfOpen => "half_open",
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures since the circuit last closed that open it
    pub failure_threshold: u32,
    /// Failure rate percentage that opens the circuit
    pub failure_rate_threshold: f64,
    /// Consecutive failures that open the circuit
    pub consecutive_failure_threshold: u32,
    /// Timeout applied to every wrapped operation
    pub timeout: Duration,
    /// Time to wait before transitioning from open to half-open
    pub recovery_timeout: Duration,
    /// Consecutive successes required to close from half-open; also caps
    /// concurrent half-open probes
    pub half_open_max_calls: u32,
    /// Health score at or below which the circuit opens
    pub min_health_score: f64,
    /// Trailing 60s cost budget; calls beyond it are rejected
    pub max_cost_per_minute: f64,
    /// Flat cost charged per request
    pub base_cost_per_request: f64,
    /// Multiplier applied to the flat cost when the request fails
    pub failure_cost_multiplier: f64,
    /// Latency surcharge per second of response time
    pub cost_per_second: f64,
    /// Widen/tighten the failure threshold with the observed success rate
    pub adaptive_thresholds: bool,
    /// Track the operation timeout toward 3x p95 latency
    pub adaptive_timeout: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 50.0,
            consecutive_failure_threshold: 5,
            timeout: Duration::from_secs(30),
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            min_health_score: 20.0,
            max_cost_per_minute: 10.0,
            base_cost_per_request: 0.001,
            failure_cost_multiplier: 2.0,
            cost_per_second: 0.000_1,
            adaptive_thresholds: true,
            adaptive_timeout: true,
        }
    }
}

/// Observer notified after breaker state mutations have been committed.
///
/// The registry implements this to keep provider status consistent with
/// circuit state; notifications are delivered outside the breaker lock.
#[async_trait]
pub trait BreakerObserver: Send + Sync {
    async fn on_state_change(&self, provider_id: &str, from: &'static str, to: &'static str);
    async fn on_call_success(&self, provider_id: &str, response_time: Duration);
    async fn on_call_failure(&self, provider_id: &str, pattern: FailurePattern);
}

/// All mutable breaker state.
///
/// Kept behind one mutex so concurrent callers and the health monitor never
/// interleave check-then-update sequences.
struct BreakerInner {
    state: CircuitState,
    metrics: ProviderMetrics,
    /// Failures since the circuit last closed
    failure_count: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    adaptive_failure_threshold: u32,
    current_timeout: Duration,
    last_health_check: Option<DateTime<Utc>>,
}

/// Outcome of the admission gate, resolved under the lock
enum Admission {
    Proceed { timeout: Duration },
    RejectOpen { retry_after: Duration },
    RejectCost { spent: f64 },
}

/// Per-provider circuit breaker wrapping an arbitrary async operation
pub struct CircuitBreaker {
    provider_id: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    events: Arc<dyn EventSink>,
    observer: RwLock<Option<Arc<dyn BreakerObserver>>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for a provider
    #[must_use]
    pub fn new(provider_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_events(provider_id, config, Arc::new(NullEventSink))
    }

    /// Create a new circuit breaker with an event sink
    #[must_use]
    pub fn with_events(
        provider_id: impl Into<String>,
        config: CircuitBreakerConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let provider_id = provider_id.into();
        let inner = BreakerInner {
            state: CircuitState::Closed,
            metrics: ProviderMetrics::new(provider_id.clone()),
            failure_count: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            adaptive_failure_threshold: config.failure_threshold,
            current_timeout: config.timeout,
            last_health_check: None,
        };
        Self {
            provider_id,
            config,
            inner: Mutex::new(inner),
            events,
            observer: RwLock::new(None),
        }
    }

    /// Attach the observer; called once by the registry at registration
    pub async fn set_observer(&self, observer: Arc<dyn BreakerObserver>) {
        *self.observer.write().await = Some(observer);
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// The operation's own error is recorded and returned unchanged; only
    /// breaker rejections (`CircuitOpen`, `CostLimitExceeded`) short-circuit
    /// without invoking it.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let timeout = match self.admit().await {
            Admission::Proceed { timeout } => timeout,
            Admission::RejectOpen { retry_after } => {
                debug!(
                    provider_id = %self.provider_id,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "circuit open, rejecting call"
                );
                self.emit("call_rejected", json!({ "reason": "circuit_open" }))
                    .await;
                return Err(Error::CircuitOpen {
                    provider: self.provider_id.clone(),
                    retry_after,
                });
            }
            Admission::RejectCost { spent } => {
                warn!(
                    provider_id = %self.provider_id,
                    spent_last_minute = spent,
                    limit = self.config.max_cost_per_minute,
                    "cost limit exceeded, rejecting call"
                );
                self.emit(
                    "cost_limit_exceeded",
                    json!({
                        "spent_last_minute": spent,
                        "limit_per_minute": self.config.max_cost_per_minute,
                    }),
                )
                .await;
                return Err(Error::CostLimitExceeded {
                    provider: self.provider_id.clone(),
                    limit_per_minute: self.config.max_cost_per_minute,
                });
            }
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, operation()).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                self.on_success(elapsed).await;
                Ok(value)
            }
            Ok(Err(error)) => {
                self.on_failure(&error, elapsed).await;
                Err(error)
            }
            Err(_) => {
                let error = Error::Timeout { timeout };
                self.on_failure(&error, elapsed).await;
                Err(error)
            }
        }
    }

    /// Admission control: cost gate first, then the state gate
    async fn admit(&self) -> Admission {
        let mut transition: Option<(&'static str, &'static str)> = None;
        let admission = {
            let mut inner = self.inner.lock().await;

            let spent = inner.metrics.cost_last_minute();
            if spent > self.config.max_cost_per_minute {
                Admission::RejectCost { spent }
            } else {
                match inner.state {
                    CircuitState::Closed => Admission::Proceed {
                        timeout: inner.current_timeout,
                    },
                    CircuitState::Open { next_attempt_at, .. } => {
                        let now = Instant::now();
                        if now >= next_attempt_at {
                            transition =
                                Some((inner.state.name(), CircuitState::HalfOpen.name()));
                            inner.state = CircuitState::HalfOpen;
                            inner.half_open_successes = 0;
                            inner.half_open_in_flight = 1;
                            Admission::Proceed {
                                timeout: inner.current_timeout,
                            }
                        } else {
                            Admission::RejectOpen {
                                retry_after: next_attempt_at.duration_since(now),
                            }
                        }
                    }
                    CircuitState::HalfOpen => {
                        if inner.half_open_in_flight < self.config.half_open_max_calls {
                            inner.half_open_in_flight += 1;
                            Admission::Proceed {
                                timeout: inner.current_timeout,
                            }
                        } else {
                            Admission::RejectOpen {
                                retry_after: self.config.recovery_timeout,
                            }
                        }
                    }
                }
            }
        };

        if let Some((from, to)) = transition {
            self.announce_transition(from, to, "recovery timeout elapsed")
                .await;
        }

        admission
    }

    /// Handle a successful operation
    async fn on_success(&self, response_time: Duration) {
        let mut transition: Option<(&'static str, &'static str)> = None;
        {
            let mut inner = self.inner.lock().await;
            let cost = self.config.base_cost_per_request
                + response_time.as_secs_f64() * self.config.cost_per_second;
            inner.metrics.record_success(response_time, cost);

            match inner.state {
                CircuitState::Closed => {}
                CircuitState::HalfOpen => {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.half_open_max_calls {
                        transition = Some((inner.state.name(), CircuitState::Closed.name()));
                        inner.state = CircuitState::Closed;
                        inner.failure_count = 0;
                        inner.half_open_successes = 0;
                        inner.half_open_in_flight = 0;
                    }
                }
                CircuitState::Open { .. } => {
                    // Late completion from before the circuit opened
                }
            }

            self.recalculate_adaptive(&mut inner);
        }

        if let Some((from, to)) = transition {
            self.announce_transition(from, to, "half-open probes succeeded")
                .await;
        }

        debug!(
            provider_id = %self.provider_id,
            response_time_ms = response_time.as_millis() as u64,
            "call succeeded"
        );
        self.emit(
            "call_success",
            json!({ "response_time_ms": response_time.as_millis() as u64 }),
        )
        .await;
        if let Some(observer) = self.observer.read().await.clone() {
            observer
                .on_call_success(&self.provider_id, response_time)
                .await;
        }
    }

    /// Handle a failed operation
    async fn on_failure(&self, error: &Error, response_time: Duration) {
        let pattern = FailurePattern::classify(error);
        let mut transition: Option<(&'static str, &'static str)> = None;
        {
            let mut inner = self.inner.lock().await;
            let cost = self.config.base_cost_per_request * self.config.failure_cost_multiplier
                + response_time.as_secs_f64() * self.config.cost_per_second;
            inner.metrics.record_failure(FailureEvent {
                timestamp: Utc::now(),
                provider_id: self.provider_id.clone(),
                pattern,
                message: error.to_string(),
                response_time,
                cost_impact: cost,
            });
            inner.failure_count += 1;

            match inner.state {
                CircuitState::Closed => {
                    if self.should_open(&inner) {
                        transition = Some((inner.state.name(), "open"));
                        Self::open_circuit(&mut inner, self.config.recovery_timeout);
                    }
                }
                CircuitState::HalfOpen => {
                    transition = Some((inner.state.name(), "open"));
                    Self::open_circuit(&mut inner, self.config.recovery_timeout);
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 0;
                }
                CircuitState::Open { .. } => {
                    // Already open, just record the failure
                }
            }

            self.recalculate_adaptive(&mut inner);
        }

        if let Some((from, to)) = transition {
            self.announce_transition(from, to, "failure threshold reached")
                .await;
        }

        debug!(
            provider_id = %self.provider_id,
            pattern = pattern.as_str(),
            response_time_ms = response_time.as_millis() as u64,
            "call failed: {}", error
        );
        self.emit(
            "call_failure",
            json!({
                "pattern": pattern.as_str(),
                "message": error.to_string(),
                "response_time_ms": response_time.as_millis() as u64,
            }),
        )
        .await;
        if let Some(observer) = self.observer.read().await.clone() {
            observer.on_call_failure(&self.provider_id, pattern).await;
        }
    }

    /// Closed-state gates that open the circuit
    fn should_open(&self, inner: &BreakerInner) -> bool {
        let metrics = &inner.metrics;
        if metrics.consecutive_failures >= self.config.consecutive_failure_threshold {
            return true;
        }
        if inner.failure_count >= inner.adaptive_failure_threshold {
            return true;
        }
        if metrics.total_requests >= FAILURE_RATE_MIN_SAMPLES
            && metrics.failure_rate() >= self.config.failure_rate_threshold
        {
            return true;
        }
        metrics.health_score() <= self.config.min_health_score
    }

    fn open_circuit(inner: &mut BreakerInner, recovery_timeout: Duration) {
        let now = Instant::now();
        inner.state = CircuitState::Open {
            opened_at: now,
            next_attempt_at: now + recovery_timeout,
        };
    }

    /// Recalculate the adaptive failure threshold and operation timeout
    fn recalculate_adaptive(&self, inner: &mut BreakerInner) {
        if self.config.adaptive_thresholds {
            let success_rate = inner.metrics.success_rate();
            inner.adaptive_failure_threshold = if success_rate > 95.0 {
                self.config.failure_threshold * 2
            } else if success_rate < 80.0 {
                (self.config.failure_threshold / 2).max(2)
            } else {
                self.config.failure_threshold
            };
        }

        if self.config.adaptive_timeout {
            let p95 = inner.metrics.p95_response_time();
            if p95 > Duration::ZERO {
                let target = p95 * 3;
                inner.current_timeout =
                    target.clamp(self.config.timeout / 2, self.config.timeout * 2);
            }
        }
    }

    /// Health monitor feedback: push a new health score into the breaker.
    ///
    /// Opens the circuit when the score falls to the configured minimum.
    pub async fn apply_health_score(&self, score: f64, checked_at: DateTime<Utc>) {
        let mut transition: Option<(&'static str, &'static str)> = None;
        {
            let mut inner = self.inner.lock().await;
            inner.metrics.set_health_score(score);
            inner.last_health_check = Some(checked_at);
            if inner.metrics.health_score() <= self.config.min_health_score
                && inner.state == CircuitState::Closed
            {
                transition = Some((inner.state.name(), "open"));
                Self::open_circuit(&mut inner, self.config.recovery_timeout);
            }
        }
        if let Some((from, to)) = transition {
            self.announce_transition(from, to, "health score below minimum")
                .await;
        }
    }

    /// Force the circuit open (maintenance, health monitor escalation)
    pub async fn force_open(&self, reason: &str) {
        let from = {
            let mut inner = self.inner.lock().await;
            let from = inner.state.name();
            Self::open_circuit(&mut inner, self.config.recovery_timeout);
            inner.half_open_successes = 0;
            inner.half_open_in_flight = 0;
            from
        };
        warn!(provider_id = %self.provider_id, reason, "circuit forced open");
        if from != "open" {
            self.announce_transition(from, "open", reason).await;
        }
    }

    /// Reset the breaker to closed with cleared counters
    pub async fn reset(&self) {
        let from = {
            let mut inner = self.inner.lock().await;
            let from = inner.state.name();
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.half_open_successes = 0;
            inner.half_open_in_flight = 0;
            from
        };
        info!(provider_id = %self.provider_id, "circuit reset to closed");
        if from != "closed" {
            self.announce_transition(from, "closed", "manual reset").await;
        }
    }

    /// Current circuit state
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Point-in-time view of the breaker for reporting
    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock().await;
        CircuitBreakerSnapshot {
            provider_id: self.provider_id.clone(),
            state: inner.state,
            metrics: inner.metrics.snapshot(),
            adaptive_failure_threshold: inner.adaptive_failure_threshold,
            current_timeout: inner.current_timeout,
            last_health_check: inner.last_health_check,
        }
    }

    #[must_use]
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Log and publish a committed state transition, then notify the observer
    async fn announce_transition(&self, from: &'static str, to: &'static str, reason: &str) {
        info!(
            provider_id = %self.provider_id,
            from, to, reason,
            "circuit state change"
        );
        self.emit(
            "circuit_state_change",
            json!({ "from": from, "to": to, "reason": reason }),
        )
        .await;
        if let Some(observer) = self.observer.read().await.clone() {
            observer.on_state_change(&self.provider_id, from, to).await;
        }
    }

    async fn emit(&self, event_type: &str, payload: serde_json::Value) {
        self.events
            .publish(SystemEvent::new(event_type, self.provider_id.clone(), payload))
            .await;
    }
}

/// Public point-in-time view of a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub provider_id: String,
    pub state: CircuitState,
    pub metrics: MetricsSnapshot,
    pub adaptive_failure_threshold: u32,
    pub current_timeout: Duration,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl CircuitBreakerSnapshot {
    /// Whether the breaker currently admits traffic without probing
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self.state, CircuitState::Closed)
    }
}
