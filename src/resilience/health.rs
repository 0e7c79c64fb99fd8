use crate::events::{EventSink, SystemEvent};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Bounded health-check history per provider
const HEALTH_HISTORY_LIMIT: usize = 1000;

/// Bounded predictive-analysis history per provider
const PREDICTION_HISTORY_LIMIT: usize = 50;

/// Rolling window for SLA aggregation
const SLA_WINDOW: Duration = Duration::from_secs(3600);

/// Response time beyond which the score penalty starts accruing
const RESPONSE_TIME_PENALTY_FLOOR: Duration = Duration::from_secs(5);

/// P95 latency beyond which the score penalty starts accruing
const P95_PENALTY_FLOOR: Duration = Duration::from_secs(10);

/// Health check tiers, each driven by its own periodic loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    /// Connectivity probe
    Basic,
    /// Synthetic end-to-end transaction
    Synthetic,
    /// Latency/throughput measurement
    Performance,
}

impl CheckType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Synthetic => "synthetic",
            Self::Performance => "performance",
        }
    }
}

/// Provider health bands derived from the overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
    Unavailable,
}

impl HealthStatus {
    /// Fixed score bands: >=90 healthy, >=70 warning, >=50 degraded,
    /// >=20 critical, else unavailable
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Healthy
        } else if score >= 70.0 {
            Self::Warning
        } else if score >= 50.0 {
            Self::Degraded
        } else if score >= 20.0 {
            Self::Critical
        } else {
            Self::Unavailable
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
            Self::Unavailable => "unavailable",
        }
    }

    /// Whether the provider still serves traffic in this band
    #[must_use]
    pub const fn is_operational(self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

/// Alert severity attached to health alert events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Warning,
    Critical,
    Emergency,
}

impl AlertSeverity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }
}

/// Raw measurement map returned by a probe
#[derive(Debug, Clone)]
pub struct ProbeMeasurements {
    pub connectivity_success: bool,
    pub functionality_success: bool,
    pub performance_success: bool,
    pub security_success: bool,
    pub response_time: Duration,
    pub p95_response_time: Option<Duration>,
    pub throughput_rps: f64,
    pub cost_efficiency_score: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for ProbeMeasurements {
    fn default() -> Self {
        Self {
            connectivity_success: true,
            functionality_success: true,
            performance_success: true,
            security_success: true,
            response_time: Duration::ZERO,
            p95_response_time: None,
            throughput_rps: 0.0,
            cost_efficiency_score: 100.0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Probe supplied by integration code; one per check type.
///
/// Probe errors are converted into unavailable results by the monitor and
/// never propagate to callers.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<ProbeMeasurements>;
}

/// Default probe used when no probe is registered for a check type
#[derive(Debug, Default)]
pub struct StubProbe;

#[async_trait]
impl HealthProbe for StubProbe {
    async fn probe(&self) -> Result<ProbeMeasurements> {
        let jitter_ms = rand::Rng::gen_range(&mut rand::thread_rng(), 5..25);
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(ProbeMeasurements {
            response_time: Duration::from_millis(jitter_ms),
            ..Default::default()
        })
    }
}

/// HTTP GET probe against a provider endpoint
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
    expected_status: reqwest::StatusCode,
    slow_threshold: Duration,
}

impl HttpProbe {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            expected_status: reqwest::StatusCode::OK,
            slow_threshold: Duration::from_secs(2),
        }
    }

    #[must_use]
    pub const fn with_expected_status(mut self, status: reqwest::StatusCode) -> Self {
        self.expected_status = status;
        self
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self) -> Result<ProbeMeasurements> {
        let started = std::time::Instant::now();
        let mut measurements = ProbeMeasurements::default();

        match self.client.get(&self.url).send().await {
            Ok(response) => {
                measurements.response_time = started.elapsed();
                if response.status() != self.expected_status {
                    measurements.functionality_success = false;
                    measurements
                        .errors
                        .push(format!("unexpected status code: {}", response.status()));
                }
                if measurements.response_time > self.slow_threshold {
                    measurements.performance_success = false;
                    measurements.warnings.push(format!(
                        "slow response: {}ms",
                        measurements.response_time.as_millis()
                    ));
                }
            }
            Err(e) => {
                measurements.response_time = started.elapsed();
                measurements.connectivity_success = false;
                measurements.functionality_success = false;
                measurements.errors.push(format!("request failed: {e}"));
            }
        }

        Ok(measurements)
    }
}

/// Timestamped outcome of one health check
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub check_type: CheckType,
    pub timestamp: DateTime<Utc>,
    pub connectivity_success: bool,
    pub functionality_success: bool,
    pub performance_success: bool,
    pub security_success: bool,
    pub response_time: Duration,
    pub p95_response_time: Option<Duration>,
    pub throughput_rps: f64,
    pub cost_efficiency_score: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub overall_score: f64,
    pub status: HealthStatus,
}

impl HealthCheckResult {
    /// Derive a scored result from raw probe measurements.
    ///
    /// Score starts at 100 and is penalized: -40 for failed connectivity,
    /// -30 for failed functionality, up to -20 for response time beyond 5s,
    /// up to -15 for p95 beyond 10s; the remainder is scaled by the cost
    /// efficiency ratio, then -5 per error and -2 per warning, clamped to
    /// [0, 100].
    #[must_use]
    pub fn from_measurements(check_type: CheckType, m: ProbeMeasurements) -> Self {
        let mut score = 100.0;
        if !m.connectivity_success {
            score -= 40.0;
        }
        if !m.functionality_success {
            score -= 30.0;
        }

        let rt_secs = m.response_time.as_secs_f64();
        let floor = RESPONSE_TIME_PENALTY_FLOOR.as_secs_f64();
        if rt_secs > floor {
            score -= (((rt_secs - floor) / floor) * 20.0).clamp(0.0, 20.0);
        }

        if let Some(p95) = m.p95_response_time {
            let p95_secs = p95.as_secs_f64();
            let p95_floor = P95_PENALTY_FLOOR.as_secs_f64();
            if p95_secs > p95_floor {
                score -= (((p95_secs - p95_floor) / p95_floor) * 15.0).clamp(0.0, 15.0);
            }
        }

        score *= (m.cost_efficiency_score / 100.0).clamp(0.0, 1.0);
        score -= 5.0 * m.errors.len() as f64;
        score -= 2.0 * m.warnings.len() as f64;
        let score = score.clamp(0.0, 100.0);

        Self {
            check_type,
            timestamp: Utc::now(),
            connectivity_success: m.connectivity_success,
            functionality_success: m.functionality_success,
            performance_success: m.performance_success,
            security_success: m.security_success,
            response_time: m.response_time,
            p95_response_time: m.p95_response_time,
            throughput_rps: m.throughput_rps,
            cost_efficiency_score: m.cost_efficiency_score,
            errors: m.errors,
            warnings: m.warnings,
            overall_score: score,
            status: HealthStatus::from_score(score),
        }
    }

    /// Result recorded when the probe itself failed or timed out
    #[must_use]
    pub fn unavailable(check_type: CheckType, reason: String) -> Self {
        Self {
            check_type,
            timestamp: Utc::now(),
            connectivity_success: false,
            functionality_success: false,
            performance_success: false,
            security_success: false,
            response_time: Duration::ZERO,
            p95_response_time: None,
            throughput_rps: 0.0,
            cost_efficiency_score: 0.0,
            errors: vec![reason],
            warnings: Vec::new(),
            overall_score: 0.0,
            status: HealthStatus::Unavailable,
        }
    }
}

/// Targets the SLA loop compares the rolling window against
#[derive(Debug, Clone)]
pub struct SlaTargets {
    pub availability_pct: f64,
    pub max_avg_response_time: Duration,
    pub min_throughput_rps: f64,
    pub max_error_rate_pct: f64,
    pub min_cost_efficiency: f64,
}

impl Default for SlaTargets {
    fn default() -> Self {
        Self {
            availability_pct: 99.5,
            max_avg_response_time: Duration::from_secs(2),
            min_throughput_rps: 0.0,
            max_error_rate_pct: 5.0,
            min_cost_efficiency: 70.0,
        }
    }
}

/// Per-dimension SLA breach counters, monotonically increasing
#[derive(Debug, Clone, Default, Serialize)]
pub struct SlaBreachCounters {
    pub availability: u64,
    pub response_time: u64,
    pub throughput: u64,
    pub error_rate: u64,
    pub cost_efficiency: u64,
}

/// Rolling-window SLA metrics for one provider
#[derive(Debug, Clone)]
pub struct SlaMetrics {
    pub availability_pct: f64,
    pub avg_response_time: Duration,
    pub avg_throughput_rps: f64,
    pub error_rate_pct: f64,
    pub avg_cost_efficiency: f64,
    /// Mean of the five normalized sub-scores, 0-100
    pub compliance_score: f64,
    pub breaches: SlaBreachCounters,
    pub samples: usize,
    pub computed_at: DateTime<Utc>,
}

impl Default for SlaMetrics {
    fn default() -> Self {
        Self {
            availability_pct: 100.0,
            avg_response_time: Duration::ZERO,
            avg_throughput_rps: 0.0,
            error_rate_pct: 0.0,
            avg_cost_efficiency: 100.0,
            compliance_score: 100.0,
            breaches: SlaBreachCounters::default(),
            samples: 0,
            computed_at: Utc::now(),
        }
    }
}

/// Trend-based estimate of near-future failure likelihood
#[derive(Debug, Clone)]
pub struct PredictiveAnalysis {
    pub failure_probability: f64,
    pub contributing_factors: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub predicted_failure_at: Option<DateTime<Utc>>,
    pub confidence: f64,
    pub analyzed_at: DateTime<Utc>,
}

/// Health monitor configuration
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub basic_interval: Duration,
    pub synthetic_interval: Duration,
    pub performance_interval: Duration,
    pub predictive_interval: Duration,
    pub sla_interval: Duration,
    pub probe_timeout: Duration,
    pub response_time_warning: Duration,
    pub response_time_critical: Duration,
    pub sla_targets: SlaTargets,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            basic_interval: Duration::from_secs(60),
            synthetic_interval: Duration::from_secs(300),
            performance_interval: Duration::from_secs(900),
            predictive_interval: Duration::from_secs(3600),
            sla_interval: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
            response_time_warning: Duration::from_secs(2),
            response_time_critical: Duration::from_secs(5),
            sla_targets: SlaTargets::default(),
        }
    }
}

/// Multi-tier health monitor wrapping exactly one circuit breaker.
///
/// Runs five independent periodic loops (basic, synthetic, performance,
/// predictive, SLA) and pushes score updates back into the breaker.
pub struct HealthMonitor {
    provider_id: String,
    config: HealthMonitorConfig,
    breaker: Arc<CircuitBreaker>,
    events: Arc<dyn EventSink>,
    probes: RwLock<HashMap<CheckType, Arc<dyn HealthProbe>>>,
    default_probe: Arc<dyn HealthProbe>,
    history: RwLock<VecDeque<HealthCheckResult>>,
    sla: RwLock<SlaMetrics>,
    predictions: RwLock<VecDeque<PredictiveAnalysis>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(
        provider_id: impl Into<String>,
        config: HealthMonitorConfig,
        breaker: Arc<CircuitBreaker>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            config,
            breaker,
            events,
            probes: RwLock::new(HashMap::new()),
            default_probe: Arc::new(StubProbe),
            history: RwLock::new(VecDeque::with_capacity(64)),
            sla: RwLock::new(SlaMetrics::default()),
            predictions: RwLock::new(VecDeque::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a probe for one check type, replacing any previous probe
    pub async fn register_probe(&self, check_type: CheckType, probe: Arc<dyn HealthProbe>) {
        self.probes.write().await.insert(check_type, probe);
        debug!(
            provider_id = %self.provider_id,
            check_type = check_type.as_str(),
            "health probe registered"
        );
    }

    /// Spawn the five periodic monitoring loops. Idempotent.
    pub async fn start(self: Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        info!(provider_id = %self.provider_id, "starting health monitor");

        for (check_type, interval) in [
            (CheckType::Basic, self.config.basic_interval),
            (CheckType::Synthetic, self.config.synthetic_interval),
            (CheckType::Performance, self.config.performance_interval),
        ] {
            let monitor = Arc::downgrade(&self);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let Some(monitor) = monitor.upgrade() else {
                        break;
                    };
                    let _ = monitor.perform_health_check(check_type).await;
                }
            }));
        }

        let monitor = Arc::downgrade(&self);
        let sla_interval = self.config.sla_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sla_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the immediate first tick; there is no data yet
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.run_sla_cycle().await;
            }
        }));

        let monitor = Arc::downgrade(&self);
        let predictive_interval = self.config.predictive_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(predictive_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.run_predictive_cycle().await;
            }
        }));
    }

    /// Abort the monitoring loops. Idempotent.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        info!(provider_id = %self.provider_id, "health monitor stopped");
    }

    /// Run one health check of the given type.
    ///
    /// Probe errors and timeouts are converted into unavailable results;
    /// this method never fails.
    pub async fn perform_health_check(&self, check_type: CheckType) -> HealthCheckResult {
        let probe = self
            .probes
            .read()
            .await
            .get(&check_type)
            .cloned()
            .unwrap_or_else(|| self.default_probe.clone());

        let result = match tokio::time::timeout(self.config.probe_timeout, probe.probe()).await {
            Ok(Ok(measurements)) => HealthCheckResult::from_measurements(check_type, measurements),
            Ok(Err(e)) => {
                error!(
                    provider_id = %self.provider_id,
                    check_type = check_type.as_str(),
                    "health probe failed: {}", e
                );
                HealthCheckResult::unavailable(check_type, format!("probe failed: {e}"))
            }
            Err(_) => {
                warn!(
                    provider_id = %self.provider_id,
                    check_type = check_type.as_str(),
                    "health probe timed out after {:?}", self.config.probe_timeout
                );
                HealthCheckResult::unavailable(
                    check_type,
                    format!("probe timed out after {:?}", self.config.probe_timeout),
                )
            }
        };

        debug!(
            provider_id = %self.provider_id,
            check_type = check_type.as_str(),
            score = result.overall_score,
            status = result.status.as_str(),
            "health check completed"
        );

        self.evaluate_alerts(&result).await;

        // Push the score into the breaker before any force-open so the
        // transition reason reflects the recorded score
        self.breaker
            .apply_health_score(result.overall_score, result.timestamp)
            .await;

        if result.status == HealthStatus::Unavailable
            || (result.status == HealthStatus::Critical && result.overall_score < 20.0)
        {
            self.breaker.force_open("health check unavailable").await;
        }

        let mut history = self.history.write().await;
        if history.len() >= HEALTH_HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(result.clone());
        drop(history);

        result
    }

    /// Compare the result against alert thresholds and emit at the highest
    /// matched severity
    async fn evaluate_alerts(&self, result: &HealthCheckResult) {
        let mut severity: Option<AlertSeverity> = None;
        let mut raise = |s: AlertSeverity| {
            severity = Some(severity.map_or(s, |current| current.max(s)));
        };

        if result.response_time >= self.config.response_time_critical {
            raise(AlertSeverity::Critical);
        } else if result.response_time >= self.config.response_time_warning {
            raise(AlertSeverity::Warning);
        }

        match result.status {
            HealthStatus::Unavailable => raise(AlertSeverity::Emergency),
            HealthStatus::Critical => raise(AlertSeverity::Critical),
            HealthStatus::Degraded => raise(AlertSeverity::Warning),
            HealthStatus::Healthy | HealthStatus::Warning => {}
        }

        let Some(severity) = severity else {
            return;
        };

        warn!(
            provider_id = %self.provider_id,
            severity = severity.as_str(),
            status = result.status.as_str(),
            score = result.overall_score,
            "health alert"
        );
        self.emit(
            "health_alert",
            json!({
                "severity": severity.as_str(),
                "check_type": result.check_type.as_str(),
                "status": result.status.as_str(),
                "score": result.overall_score,
                "response_time_ms": result.response_time.as_millis() as u64,
                "errors": result.errors,
            }),
        )
        .await;
    }

    /// Recompute SLA metrics over the trailing window and record breaches
    pub async fn run_sla_cycle(&self) -> SlaMetrics {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(SLA_WINDOW).unwrap_or_else(|_| chrono::Duration::hours(1));

        let history = self.history.read().await;
        let window: Vec<&HealthCheckResult> = history
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .collect();

        let mut sla = self.sla.write().await;
        sla.computed_at = Utc::now();
        sla.samples = window.len();

        if window.is_empty() {
            let snapshot = sla.clone();
            drop(sla);
            drop(history);
            return snapshot;
        }

        let n = window.len() as f64;
        let available = window
            .iter()
            .filter(|r| r.status != HealthStatus::Unavailable)
            .count() as f64;
        sla.availability_pct = available / n * 100.0;
        sla.avg_response_time = Duration::from_secs_f64(
            window.iter().map(|r| r.response_time.as_secs_f64()).sum::<f64>() / n,
        );
        sla.avg_throughput_rps = window.iter().map(|r| r.throughput_rps).sum::<f64>() / n;
        sla.error_rate_pct =
            window.iter().filter(|r| !r.errors.is_empty()).count() as f64 / n * 100.0;
        sla.avg_cost_efficiency =
            window.iter().map(|r| r.cost_efficiency_score).sum::<f64>() / n;

        let targets = &self.config.sla_targets;
        let mut breached: Vec<(&str, f64, f64)> = Vec::new();

        if sla.availability_pct < targets.availability_pct {
            sla.breaches.availability += 1;
            breached.push(("availability", sla.availability_pct, targets.availability_pct));
        }
        if sla.avg_response_time > targets.max_avg_response_time {
            sla.breaches.response_time += 1;
            breached.push((
                "response_time",
                sla.avg_response_time.as_secs_f64(),
                targets.max_avg_response_time.as_secs_f64(),
            ));
        }
        if sla.avg_throughput_rps < targets.min_throughput_rps {
            sla.breaches.throughput += 1;
            breached.push(("throughput", sla.avg_throughput_rps, targets.min_throughput_rps));
        }
        if sla.error_rate_pct > targets.max_error_rate_pct {
            sla.breaches.error_rate += 1;
            breached.push(("error_rate", sla.error_rate_pct, targets.max_error_rate_pct));
        }
        if sla.avg_cost_efficiency < targets.min_cost_efficiency {
            sla.breaches.cost_efficiency += 1;
            breached.push((
                "cost_efficiency",
                sla.avg_cost_efficiency,
                targets.min_cost_efficiency,
            ));
        }

        let compliance = Self::compliance_score(&sla, targets);
        sla.compliance_score = compliance;

        let snapshot = sla.clone();
        drop(sla);
        drop(history);

        for (dimension, measured, target) in breached {
            warn!(
                provider_id = %self.provider_id,
                dimension, measured, target,
                "SLA breach"
            );
            self.emit(
                "sla_breach",
                json!({ "dimension": dimension, "measured": measured, "target": target }),
            )
            .await;
        }

        snapshot
    }

    /// Mean of five normalized sub-scores, scaled to 0-100
    fn compliance_score(sla: &SlaMetrics, targets: &SlaTargets) -> f64 {
        let availability = if targets.availability_pct > 0.0 {
            (sla.availability_pct / targets.availability_pct).min(1.0)
        } else {
            1.0
        };
        let response_time = {
            let target = targets.max_avg_response_time.as_secs_f64();
            let measured = sla.avg_response_time.as_secs_f64();
            if measured <= target || measured == 0.0 {
                1.0
            } else {
                target / measured
            }
        };
        let throughput = if targets.min_throughput_rps > 0.0 {
            (sla.avg_throughput_rps / targets.min_throughput_rps).min(1.0)
        } else {
            1.0
        };
        let error_rate = if sla.error_rate_pct <= targets.max_error_rate_pct {
            1.0
        } else if sla.error_rate_pct > 0.0 {
            targets.max_error_rate_pct / sla.error_rate_pct
        } else {
            1.0
        };
        let cost = if targets.min_cost_efficiency > 0.0 {
            (sla.avg_cost_efficiency / targets.min_cost_efficiency).min(1.0)
        } else {
            1.0
        };

        (availability + response_time + throughput + error_rate + cost) / 5.0 * 100.0
    }

    /// Trend analysis over the last ten results; needs at least ten.
    ///
    /// Compares the mean of the last five results against the prior five
    /// for response time, error count, and health score; each detected
    /// negative trend accumulates into the failure probability.
    pub async fn run_predictive_cycle(&self) -> Option<PredictiveAnalysis> {
        let history = self.history.read().await;
        if history.len() < 10 {
            debug!(
                provider_id = %self.provider_id,
                samples = history.len(),
                "not enough samples for predictive analysis"
            );
            return None;
        }

        let newest_first: Vec<&HealthCheckResult> = history.iter().rev().take(10).collect();
        let recent = &newest_first[0..5];
        let prior = &newest_first[5..10];

        let mean_rt =
            |rs: &[&HealthCheckResult]| rs.iter().map(|r| r.response_time.as_secs_f64()).sum::<f64>() / 5.0;
        let mean_errors =
            |rs: &[&HealthCheckResult]| rs.iter().map(|r| r.errors.len() as f64).sum::<f64>() / 5.0;
        let mean_score =
            |rs: &[&HealthCheckResult]| rs.iter().map(|r| r.overall_score).sum::<f64>() / 5.0;

        let (recent_rt, prior_rt) = (mean_rt(recent), mean_rt(prior));
        let (recent_errors, prior_errors) = (mean_errors(recent), mean_errors(prior));
        let (recent_score, prior_score) = (mean_score(recent), mean_score(prior));
        let samples = history.len();
        drop(history);

        let mut probability: f64 = 0.0;
        let mut factors = Vec::new();
        let mut actions = vec!["continue monitoring".to_string()];

        if prior_rt > 0.0 && recent_rt > prior_rt * 1.3 {
            probability += 0.2;
            factors.push(format!(
                "response time trending up: {:.3}s -> {:.3}s",
                prior_rt, recent_rt
            ));
        }
        if (prior_errors == 0.0 && recent_errors > 0.0)
            || (prior_errors > 0.0 && recent_errors > prior_errors * 1.5)
        {
            probability += 0.3;
            factors.push(format!(
                "error count trending up: {:.1} -> {:.1}",
                prior_errors, recent_errors
            ));
        }
        if recent_score < prior_score * 0.8 {
            probability += 0.25;
            factors.push(format!(
                "health score dropping: {:.1} -> {:.1}",
                prior_score, recent_score
            ));
        }

        if probability > 0.5 {
            actions.push("prepare failover to a standby provider".to_string());
            actions.push("reduce traffic share for this provider".to_string());
        }

        let predicted_failure_at = if probability > 0.7 {
            let hours = (24.0 * (1.0 - probability)).max(1.0);
            Some(Utc::now() + chrono::Duration::seconds((hours * 3600.0) as i64))
        } else {
            None
        };

        let analysis = PredictiveAnalysis {
            failure_probability: probability,
            contributing_factors: factors,
            recommended_actions: actions,
            predicted_failure_at,
            confidence: (samples as f64 / 50.0).min(1.0),
            analyzed_at: Utc::now(),
        };

        if probability > 0.7 {
            warn!(
                provider_id = %self.provider_id,
                probability,
                "predictive analysis forecasts failure"
            );
            self.emit(
                "predictive_alert",
                json!({
                    "failure_probability": analysis.failure_probability,
                    "contributing_factors": analysis.contributing_factors,
                    "recommended_actions": analysis.recommended_actions,
                    "predicted_failure_at": analysis.predicted_failure_at.map(|t| t.to_rfc3339()),
                    "confidence": analysis.confidence,
                }),
            )
            .await;
        }

        let mut predictions = self.predictions.write().await;
        if predictions.len() >= PREDICTION_HISTORY_LIMIT {
            predictions.pop_front();
        }
        predictions.push_back(analysis.clone());
        drop(predictions);

        Some(analysis)
    }

    /// Most recent health check result, if any
    pub async fn latest_result(&self) -> Option<HealthCheckResult> {
        self.history.read().await.back().cloned()
    }

    /// Current SLA metrics snapshot
    pub async fn sla_metrics(&self) -> SlaMetrics {
        self.sla.read().await.clone()
    }

    /// Most recent predictive analysis, if any
    pub async fn latest_prediction(&self) -> Option<PredictiveAnalysis> {
        self.predictions.read().await.back().cloned()
    }

    #[must_use]
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn emit(&self, event_type: &str, payload: serde_json::Value) {
        self.events
            .publish(SystemEvent::new(event_type, self.provider_id.clone(), payload))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;
    use crate::resilience::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::Error;

    struct FixedProbe {
        measurements: ProbeMeasurements,
    }

    #[async_trait]
    impl HealthProbe for FixedProbe {
        async fn probe(&self) -> Result<ProbeMeasurements> {
            Ok(self.measurements.clone())
        }
    }

    struct FailingProbe;

    #[async_trait]
    impl HealthProbe for FailingProbe {
        async fn probe(&self) -> Result<ProbeMeasurements> {
            Err(Error::ConnectionRefused {
                endpoint: "test".to_string(),
            })
        }
    }

    fn monitor_with_breaker() -> (Arc<HealthMonitor>, Arc<CircuitBreaker>) {
        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                adaptive_thresholds: false,
                adaptive_timeout: false,
                ..Default::default()
            },
        ));
        let monitor = Arc::new(HealthMonitor::new(
            "test",
            HealthMonitorConfig::default(),
            breaker.clone(),
            Arc::new(NullEventSink),
        ));
        (monitor, breaker)
    }

    #[test]
    fn test_status_bands() {
        assert_eq!(HealthStatus::from_score(95.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(90.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(75.0), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(55.0), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(25.0), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(5.0), HealthStatus::Unavailable);
    }

    #[test]
    fn test_score_healthy_measurements() {
        let result =
            HealthCheckResult::from_measurements(CheckType::Basic, ProbeMeasurements::default());
        assert_eq!(result.overall_score, 100.0);
        assert_eq!(result.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_score_connectivity_failure_caps_at_sixty() {
        let result = HealthCheckResult::from_measurements(
            CheckType::Basic,
            ProbeMeasurements {
                connectivity_success: false,
                ..Default::default()
            },
        );
        assert!(result.overall_score <= 60.0);
    }

    #[test]
    fn test_score_penalties_accumulate() {
        let result = HealthCheckResult::from_measurements(
            CheckType::Synthetic,
            ProbeMeasurements {
                connectivity_success: false,
                functionality_success: false,
                errors: vec!["boom".to_string()],
                warnings: vec!["slow".to_string()],
                ..Default::default()
            },
        );
        // 100 - 40 - 30 = 30, then -5 -2 = 23
        assert!((result.overall_score - 23.0).abs() < 1e-9);
        assert_eq!(result.status, HealthStatus::Critical);
    }

    #[test]
    fn test_score_latency_penalty() {
        let result = HealthCheckResult::from_measurements(
            CheckType::Performance,
            ProbeMeasurements {
                response_time: Duration::from_secs(10),
                ..Default::default()
            },
        );
        // Full -20 latency penalty at 10s
        assert!((result.overall_score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_cost_efficiency_scaling() {
        let result = HealthCheckResult::from_measurements(
            CheckType::Basic,
            ProbeMeasurements {
                cost_efficiency_score: 50.0,
                ..Default::default()
            },
        );
        assert!((result.overall_score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_always_clamped() {
        let result = HealthCheckResult::from_measurements(
            CheckType::Basic,
            ProbeMeasurements {
                connectivity_success: false,
                functionality_success: false,
                errors: (0..30).map(|i| format!("e{i}")).collect(),
                ..Default::default()
            },
        );
        assert_eq!(result.overall_score, 0.0);
        assert_eq!(result.status, HealthStatus::Unavailable);
    }

    #[tokio::test]
    async fn test_check_pushes_score_into_breaker() {
        let (monitor, breaker) = monitor_with_breaker();
        monitor
            .register_probe(
                CheckType::Basic,
                Arc::new(FixedProbe {
                    measurements: ProbeMeasurements {
                        cost_efficiency_score: 80.0,
                        ..Default::default()
                    },
                }),
            )
            .await;

        let result = monitor.perform_health_check(CheckType::Basic).await;
        assert_eq!(result.status, HealthStatus::Warning);

        let snapshot = breaker.snapshot().await;
        assert!((snapshot.metrics.health_score - 80.0).abs() < 1e-9);
        assert!(snapshot.last_health_check.is_some());
    }

    #[tokio::test]
    async fn test_probe_error_becomes_unavailable_and_forces_open() {
        let (monitor, breaker) = monitor_with_breaker();
        monitor
            .register_probe(CheckType::Basic, Arc::new(FailingProbe))
            .await;

        let result = monitor.perform_health_check(CheckType::Basic).await;
        assert_eq!(result.status, HealthStatus::Unavailable);
        assert!(!result.errors.is_empty());
        assert!(matches!(breaker.state().await, CircuitState::Open { .. }));
    }

    #[tokio::test]
    async fn test_probe_timeout_becomes_unavailable() {
        let breaker = Arc::new(CircuitBreaker::new("test", CircuitBreakerConfig::default()));
        let monitor = Arc::new(HealthMonitor::new(
            "test",
            HealthMonitorConfig {
                probe_timeout: Duration::from_millis(20),
                ..Default::default()
            },
            breaker,
            Arc::new(NullEventSink),
        ));

        struct SlowProbe;
        #[async_trait]
        impl HealthProbe for SlowProbe {
            async fn probe(&self) -> Result<ProbeMeasurements> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(ProbeMeasurements::default())
            }
        }

        monitor
            .register_probe(CheckType::Basic, Arc::new(SlowProbe))
            .await;
        let result = monitor.perform_health_check(CheckType::Basic).await;
        assert_eq!(result.status, HealthStatus::Unavailable);
    }

    #[tokio::test]
    async fn test_sla_cycle_counts_breaches() {
        let (monitor, _breaker) = monitor_with_breaker();
        monitor
            .register_probe(CheckType::Basic, Arc::new(FailingProbe))
            .await;

        for _ in 0..4 {
            monitor.perform_health_check(CheckType::Basic).await;
        }

        let sla = monitor.run_sla_cycle().await;
        assert_eq!(sla.samples, 4);
        assert_eq!(sla.availability_pct, 0.0);
        assert!(sla.breaches.availability >= 1);
        assert!(sla.breaches.error_rate >= 1);
        assert!(sla.compliance_score < 100.0);
    }

    #[tokio::test]
    async fn test_sla_cycle_empty_window() {
        let (monitor, _breaker) = monitor_with_breaker();
        let sla = monitor.run_sla_cycle().await;
        assert_eq!(sla.samples, 0);
        assert_eq!(sla.availability_pct, 100.0);
        assert_eq!(sla.breaches.availability, 0);
    }

    #[tokio::test]
    async fn test_predictive_needs_ten_samples() {
        let (monitor, _breaker) = monitor_with_breaker();
        for _ in 0..9 {
            monitor.perform_health_check(CheckType::Basic).await;
        }
        assert!(monitor.run_predictive_cycle().await.is_none());

        monitor.perform_health_check(CheckType::Basic).await;
        assert!(monitor.run_predictive_cycle().await.is_some());
    }

    #[tokio::test]
    async fn test_predictive_detects_degradation() {
        let (monitor, _breaker) = monitor_with_breaker();

        // Five healthy results, then five degrading ones
        let healthy = FixedProbe {
            measurements: ProbeMeasurements {
                response_time: Duration::from_millis(100),
                ..Default::default()
            },
        };
        monitor
            .register_probe(CheckType::Basic, Arc::new(healthy))
            .await;
        for _ in 0..5 {
            monitor.perform_health_check(CheckType::Basic).await;
        }

        let degrading = FixedProbe {
            measurements: ProbeMeasurements {
                response_time: Duration::from_millis(500),
                connectivity_success: false,
                errors: vec!["intermittent refusals".to_string()],
                ..Default::default()
            },
        };
        monitor
            .register_probe(CheckType::Basic, Arc::new(degrading))
            .await;
        for _ in 0..5 {
            monitor.perform_health_check(CheckType::Basic).await;
        }

        let analysis = monitor.run_predictive_cycle().await.unwrap();
        // Latency +30%, new errors, and a >20% health drop all detected
        assert!(analysis.failure_probability >= 0.7);
        assert_eq!(analysis.contributing_factors.len(), 3);
        assert!(analysis.predicted_failure_at.is_some());
        assert!(analysis.confidence > 0.0);

        let stored = monitor.latest_prediction().await.unwrap();
        assert!((stored.failure_probability - analysis.failure_probability).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let (monitor, _breaker) = monitor_with_breaker();
        monitor.clone().start().await;
        monitor.clone().start().await;
        assert_eq!(monitor.tasks.lock().await.len(), 5);
        monitor.stop().await;
        monitor.stop().await;
        assert!(monitor.tasks.lock().await.is_empty());
    }
}
