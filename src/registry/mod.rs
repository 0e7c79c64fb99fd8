//! Provider registry: registration, lifecycle, and health/cost/latency-aware
//! selection across redundant providers.
//!
//! Each registered provider owns one circuit breaker and, optionally, one
//! health monitor. Registry-level status is kept consistent with circuit
//! state exclusively through the breaker's observer callbacks.

pub mod selection;

pub use selection::{SelectionCriteria, SelectionStrategy, PREFERRED_REGIONS};

use crate::events::{EventSink, NullEventSink, SystemEvent};
use crate::resilience::circuit_breaker::{
    BreakerObserver, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
};
use crate::resilience::health::{
    CheckType, HealthMonitor, HealthMonitorConfig, HealthProbe, HealthStatus, PredictiveAnalysis,
    SlaMetrics,
};
use crate::resilience::metrics::FailurePattern;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use selection::{order_candidates, Candidate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Kinds of external dependency a provider can be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    AiModel,
    Storage,
    Audio,
    Messaging,
    Database,
    Cache,
}

impl ProviderType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AiModel => "ai_model",
            Self::Storage => "storage",
            Self::Audio => "audio",
            Self::Messaging => "messaging",
            Self::Database => "database",
            Self::Cache => "cache",
        }
    }
}

/// Registry-level provider status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Active,
    Degraded,
    Maintenance,
    Unavailable,
    Disabled,
}

impl ProviderStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Maintenance => "maintenance",
            Self::Unavailable => "unavailable",
            Self::Disabled => "disabled",
        }
    }
}

/// Static configuration for one provider
#[derive(Debug, Clone)]
pub struct ProviderConfiguration {
    /// Stable identifier; generated when absent
    pub id: Option<String>,
    pub name: String,
    pub provider_type: ProviderType,
    pub region: String,
    pub endpoint: Option<String>,
    pub cost_per_request: f64,
    pub max_concurrent_requests: u32,
    pub priority: u8,
    pub enabled: bool,
    pub maintenance: bool,
    /// Per-provider breaker override; registry default applies when absent
    pub breaker: Option<CircuitBreakerConfig>,
    pub health_monitoring: bool,
    /// Per-provider health monitor override
    pub health: Option<HealthMonitorConfig>,
}

impl ProviderConfiguration {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        provider_type: ProviderType,
        region: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            provider_type,
            region: region.into(),
            endpoint: None,
            cost_per_request: 0.001,
            max_concurrent_requests: 100,
            priority: 50,
            enabled: true,
            maintenance: false,
            breaker: None,
            health_monitoring: true,
            health: None,
        }
    }
}

/// Registry-wide defaults and background loop intervals
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub breaker: CircuitBreakerConfig,
    pub health: HealthMonitorConfig,
    /// Interval of the status refresh loop
    pub refresh_interval: Duration,
    /// Interval of the cleanup loop
    pub cleanup_interval: Duration,
    /// Health score below which a closed-circuit provider is marked degraded
    pub degraded_health_threshold: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            health: HealthMonitorConfig::default(),
            refresh_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(3600),
            degraded_health_threshold: 50.0,
        }
    }
}

/// Registry-level rolling statistics for one provider
#[derive(Debug, Clone, Default)]
struct ProviderStats {
    total_requests: u64,
    successful_requests: u64,
    /// Exponential moving average: avg = 0.9 * avg + 0.1 * sample
    avg_response_time: Duration,
    last_selected_at: Option<DateTime<Utc>>,
}

impl ProviderStats {
    fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            100.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }

    fn observe_response_time(&mut self, sample: Duration) {
        self.avg_response_time = if self.avg_response_time == Duration::ZERO {
            sample
        } else {
            self.avg_response_time.mul_f64(0.9) + sample.mul_f64(0.1)
        };
    }
}

struct ProviderEntry {
    id: String,
    config: RwLock<ProviderConfiguration>,
    breaker: Arc<CircuitBreaker>,
    monitor: Option<Arc<HealthMonitor>>,
    status: RwLock<ProviderStatus>,
    stats: RwLock<ProviderStats>,
    active_requests: AtomicU32,
    registered_at: DateTime<Utc>,
}

/// Per-provider report returned by `get_provider_status`
#[derive(Debug, Clone)]
pub struct ProviderStatusReport {
    pub id: String,
    pub name: String,
    pub provider_type: ProviderType,
    pub region: String,
    pub status: ProviderStatus,
    pub circuit: CircuitBreakerSnapshot,
    pub active_requests: u32,
    pub total_requests: u64,
    pub success_rate: f64,
    pub avg_response_time: Duration,
    pub health: Option<HealthStatus>,
    pub sla: Option<SlaMetrics>,
    pub prediction: Option<PredictiveAnalysis>,
    pub registered_at: DateTime<Utc>,
}

/// Aggregate view returned by `get_registry_overview`
#[derive(Debug, Clone)]
pub struct RegistryOverview {
    pub total_providers: usize,
    pub providers_by_status: HashMap<String, usize>,
    pub providers_by_type: HashMap<String, usize>,
    pub total_requests: u64,
    pub total_active_requests: u64,
    pub generated_at: DateTime<Utc>,
}

struct RegistryInner {
    config: RegistryConfig,
    providers: RwLock<HashMap<String, Arc<ProviderEntry>>>,
    round_robin: Mutex<HashMap<String, usize>>,
    events: Arc<dyn EventSink>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Observer wired into every breaker; keeps registry status and stats
/// consistent with circuit state
struct RegistryObserver {
    inner: Weak<RegistryInner>,
}

#[async_trait]
impl BreakerObserver for RegistryObserver {
    async fn on_state_change(&self, provider_id: &str, _from: &'static str, to: &'static str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let entry = {
            let providers = inner.providers.read().await;
            providers.get(provider_id).cloned()
        };
        let Some(entry) = entry else {
            return;
        };

        let mut status = entry.status.write().await;
        match to {
            "open" => {
                if matches!(*status, ProviderStatus::Active | ProviderStatus::Degraded) {
                    *status = ProviderStatus::Unavailable;
                }
            }
            "closed" => {
                if matches!(*status, ProviderStatus::Unavailable | ProviderStatus::Degraded) {
                    *status = ProviderStatus::Active;
                }
            }
            _ => {}
        }
        debug!(provider_id, to, status = status.as_str(), "provider status refreshed");
    }

    async fn on_call_success(&self, provider_id: &str, response_time: Duration) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let entry = {
            let providers = inner.providers.read().await;
            providers.get(provider_id).cloned()
        };
        let Some(entry) = entry else {
            return;
        };

        let mut stats = entry.stats.write().await;
        stats.total_requests += 1;
        stats.successful_requests += 1;
        stats.observe_response_time(response_time);
    }

    async fn on_call_failure(&self, provider_id: &str, _pattern: FailurePattern) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let entry = {
            let providers = inner.providers.read().await;
            providers.get(provider_id).cloned()
        };
        let Some(entry) = entry else {
            return;
        };

        let mut stats = entry.stats.write().await;
        stats.total_requests += 1;
    }
}

/// Decrements the active-request gauge on every exit path
struct ActiveRequestGuard {
    entry: Arc<ProviderEntry>,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.entry.active_requests.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Top-level orchestrator for resilient provider access
pub struct ProviderRegistry {
    inner: Arc<RegistryInner>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default(), Arc::new(NullEventSink))
    }

    #[must_use]
    pub fn with_config(config: RegistryConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                providers: RwLock::new(HashMap::new()),
                round_robin: Mutex::new(HashMap::new()),
                events,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a provider and return its id.
    ///
    /// Builds the provider's circuit breaker (per-provider override or
    /// registry default) and, when enabled, its health monitor, which starts
    /// immediately.
    pub async fn register_provider(&self, config: ProviderConfiguration) -> Result<String> {
        Self::validate(&config)?;

        let id = config
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        {
            let providers = self.inner.providers.read().await;
            if providers.contains_key(&id) {
                return Err(Error::InvalidConfiguration {
                    field: "id".to_string(),
                    reason: format!("provider '{id}' is already registered"),
                });
            }
        }

        let breaker_config = config
            .breaker
            .clone()
            .unwrap_or_else(|| self.inner.config.breaker.clone());
        let breaker = Arc::new(CircuitBreaker::with_events(
            id.clone(),
            breaker_config,
            self.inner.events.clone(),
        ));
        breaker
            .set_observer(Arc::new(RegistryObserver {
                inner: Arc::downgrade(&self.inner),
            }))
            .await;

        let monitor = if config.health_monitoring {
            let health_config = config
                .health
                .clone()
                .unwrap_or_else(|| self.inner.config.health.clone());
            let monitor = Arc::new(HealthMonitor::new(
                id.clone(),
                health_config,
                breaker.clone(),
                self.inner.events.clone(),
            ));
            monitor.clone().start().await;
            Some(monitor)
        } else {
            None
        };

        let status = if !config.enabled {
            ProviderStatus::Disabled
        } else if config.maintenance {
            ProviderStatus::Maintenance
        } else {
            ProviderStatus::Active
        };

        let entry = Arc::new(ProviderEntry {
            id: id.clone(),
            config: RwLock::new(config),
            breaker,
            monitor,
            status: RwLock::new(status),
            stats: RwLock::new(ProviderStats::default()),
            active_requests: AtomicU32::new(0),
            registered_at: Utc::now(),
        });

        {
            let entry_config = entry.config.read().await;
            info!(
                provider_id = %id,
                name = %entry_config.name,
                provider_type = entry_config.provider_type.as_str(),
                region = %entry_config.region,
                "provider registered"
            );
        }
        self.inner.providers.write().await.insert(id.clone(), entry);
        self.emit("provider_registered", &id, json!({})).await;

        Ok(id)
    }

    /// Remove a provider, stopping its health monitor
    pub async fn unregister_provider(&self, id: &str) -> Result<()> {
        let entry = self
            .inner
            .providers
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::ProviderNotFound { id: id.to_string() })?;

        if let Some(monitor) = &entry.monitor {
            monitor.stop().await;
        }

        info!(provider_id = %id, "provider unregistered");
        self.emit("provider_unregistered", id, json!({})).await;
        Ok(())
    }

    fn validate(config: &ProviderConfiguration) -> Result<()> {
        if config.name.trim().is_empty() {
            return Err(Error::InvalidConfiguration {
                field: "name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if config.max_concurrent_requests == 0 {
            return Err(Error::InvalidConfiguration {
                field: "max_concurrent_requests".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if config.cost_per_request < 0.0 {
            return Err(Error::InvalidConfiguration {
                field: "cost_per_request".to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }

    async fn get_entry(&self, id: &str) -> Result<Arc<ProviderEntry>> {
        self.inner
            .providers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound { id: id.to_string() })
    }

    /// Execute an operation against a provider through its circuit breaker,
    /// tracking the active-request gauge around the call
    pub async fn call_provider<T, F, Fut>(&self, id: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let entry = self.get_entry(id).await?;

        entry.active_requests.fetch_add(1, Ordering::SeqCst);
        let _guard = ActiveRequestGuard {
            entry: entry.clone(),
        };

        entry.breaker.call(operation).await
    }

    /// Select a single provider matching the criteria, or none
    pub async fn select_provider(&self, criteria: &SelectionCriteria) -> Option<String> {
        self.select_providers(1, criteria).await.into_iter().next()
    }

    /// Select up to `count` providers in strategy order
    pub async fn select_providers(
        &self,
        count: usize,
        criteria: &SelectionCriteria,
    ) -> Vec<String> {
        let candidates = self.candidates(criteria).await;
        if candidates.is_empty() || count == 0 {
            return Vec::new();
        }

        let mut ordered = {
            let mut round_robin = self.inner.round_robin.lock().await;
            order_candidates(criteria.strategy, candidates, &mut round_robin)
        };
        ordered.truncate(count);

        let now = Utc::now();
        let providers = self.inner.providers.read().await;
        for id in &ordered {
            if let Some(entry) = providers.get(id) {
                entry.stats.write().await.last_selected_at = Some(now);
            }
        }
        drop(providers);

        debug!(
            strategy = criteria.strategy.as_str(),
            selected = ?ordered,
            "providers selected"
        );
        ordered
    }

    /// Candidate set: active, not excluded, circuit not open, spare
    /// concurrency, and within the cost ceiling when given
    async fn candidates(&self, criteria: &SelectionCriteria) -> Vec<Candidate> {
        let providers = self.inner.providers.read().await;
        let mut out = Vec::with_capacity(providers.len());

        for (id, entry) in providers.iter() {
            if criteria.exclude.contains(id) {
                continue;
            }

            let config = entry.config.read().await;
            if let Some(provider_type) = criteria.provider_type {
                if config.provider_type != provider_type {
                    continue;
                }
            }
            if let Some(region) = &criteria.region {
                if &config.region != region {
                    continue;
                }
            }
            if let Some(max_cost) = criteria.max_cost {
                if config.cost_per_request > max_cost {
                    continue;
                }
            }

            if *entry.status.read().await != ProviderStatus::Active {
                continue;
            }

            let snapshot = entry.breaker.snapshot().await;
            if snapshot.state.is_open() {
                continue;
            }

            let active = entry.active_requests.load(Ordering::SeqCst);
            if active >= config.max_concurrent_requests {
                continue;
            }

            let stats = entry.stats.read().await;
            out.push(Candidate {
                id: id.clone(),
                region: config.region.clone(),
                cost_per_request: config.cost_per_request,
                health_score: snapshot.metrics.health_score,
                avg_response_time: stats.avg_response_time,
                active_requests: active,
                max_concurrent_requests: config.max_concurrent_requests,
            });
        }

        out
    }

    /// Register a health probe for a provider's monitor
    pub async fn register_health_check(
        &self,
        id: &str,
        check_type: CheckType,
        probe: Arc<dyn HealthProbe>,
    ) -> Result<()> {
        let entry = self.get_entry(id).await?;
        let monitor = entry.monitor.as_ref().ok_or_else(|| Error::InvalidConfiguration {
            field: "health_monitoring".to_string(),
            reason: format!("health monitoring is disabled for provider '{id}'"),
        })?;
        monitor.register_probe(check_type, probe).await;
        Ok(())
    }

    /// Re-enable a disabled provider; the breaker is reset so recovery does
    /// not wait out a stale open state
    pub async fn enable_provider(&self, id: &str) -> Result<()> {
        let entry = self.get_entry(id).await?;
        entry.config.write().await.enabled = true;
        entry.breaker.reset().await;
        *entry.status.write().await = ProviderStatus::Active;
        info!(provider_id = %id, "provider enabled");
        self.emit("provider_enabled", id, json!({})).await;
        Ok(())
    }

    /// Disable a provider and force its circuit open
    pub async fn disable_provider(&self, id: &str, reason: &str) -> Result<()> {
        let entry = self.get_entry(id).await?;
        entry.config.write().await.enabled = false;
        entry.breaker.force_open(reason).await;
        *entry.status.write().await = ProviderStatus::Disabled;
        warn!(provider_id = %id, reason, "provider disabled");
        self.emit("provider_disabled", id, json!({ "reason": reason }))
            .await;
        Ok(())
    }

    /// Toggle maintenance mode; leaving maintenance recomputes status from
    /// the circuit state
    pub async fn set_maintenance_mode(&self, id: &str, maintenance: bool, reason: &str) -> Result<()> {
        let entry = self.get_entry(id).await?;
        entry.config.write().await.maintenance = maintenance;

        let status = if maintenance {
            ProviderStatus::Maintenance
        } else if entry.breaker.state().await.is_open() {
            ProviderStatus::Unavailable
        } else {
            ProviderStatus::Active
        };
        *entry.status.write().await = status;

        info!(provider_id = %id, maintenance, reason, "maintenance mode changed");
        self.emit(
            "provider_maintenance",
            id,
            json!({ "maintenance": maintenance, "reason": reason }),
        )
        .await;
        Ok(())
    }

    /// Full status report for one provider
    pub async fn get_provider_status(&self, id: &str) -> Result<ProviderStatusReport> {
        let entry = self.get_entry(id).await?;

        let config = entry.config.read().await.clone();
        let status = *entry.status.read().await;
        let circuit = entry.breaker.snapshot().await;
        let stats = entry.stats.read().await.clone();

        let (health, sla, prediction) = if let Some(monitor) = &entry.monitor {
            (
                monitor.latest_result().await.map(|r| r.status),
                Some(monitor.sla_metrics().await),
                monitor.latest_prediction().await,
            )
        } else {
            (None, None, None)
        };

        Ok(ProviderStatusReport {
            id: entry.id.clone(),
            name: config.name,
            provider_type: config.provider_type,
            region: config.region,
            status,
            circuit,
            active_requests: entry.active_requests.load(Ordering::SeqCst),
            total_requests: stats.total_requests,
            success_rate: stats.success_rate(),
            avg_response_time: stats.avg_response_time,
            health,
            sla,
            prediction,
            registered_at: entry.registered_at,
        })
    }

    /// Aggregate counts across all providers
    pub async fn get_registry_overview(&self) -> RegistryOverview {
        let providers = self.inner.providers.read().await;
        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut total_requests = 0u64;
        let mut total_active = 0u64;

        for entry in providers.values() {
            let status = *entry.status.read().await;
            *by_status.entry(status.as_str().to_string()).or_default() += 1;

            let config = entry.config.read().await;
            *by_type
                .entry(config.provider_type.as_str().to_string())
                .or_default() += 1;

            total_requests += entry.stats.read().await.total_requests;
            total_active += u64::from(entry.active_requests.load(Ordering::SeqCst));
        }

        RegistryOverview {
            total_providers: providers.len(),
            providers_by_status: by_status,
            providers_by_type: by_type,
            total_requests,
            total_active_requests: total_active,
            generated_at: Utc::now(),
        }
    }

    /// List all registered provider ids
    pub async fn provider_ids(&self) -> Vec<String> {
        self.inner.providers.read().await.keys().cloned().collect()
    }

    /// Spawn the registry background loops: a status refresh loop and an
    /// hourly cleanup loop. Idempotent.
    pub async fn start(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let refresh_interval = self.inner.config.refresh_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Self::refresh_statuses(&inner).await;
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        let cleanup_interval = self.inner.config.cleanup_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Self::cleanup(&inner).await;
            }
        }));

        info!("registry background loops started");
    }

    /// Abort background loops and stop every health monitor
    pub async fn shutdown(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        drop(tasks);

        let providers = self.inner.providers.read().await;
        let monitors: Vec<_> = providers
            .values()
            .filter_map(|entry| entry.monitor.clone())
            .collect();
        drop(providers);
        futures::future::join_all(monitors.iter().map(|monitor| monitor.stop())).await;
        info!("registry shut down");
    }

    /// Reconcile degraded statuses from breaker health scores and log
    /// aggregate state
    async fn refresh_statuses(inner: &Arc<RegistryInner>) {
        let providers = inner.providers.read().await;
        let mut active = 0usize;

        for entry in providers.values() {
            let snapshot = entry.breaker.snapshot().await;
            let mut status = entry.status.write().await;
            match *status {
                ProviderStatus::Active
                    if !snapshot.state.is_open()
                        && snapshot.metrics.health_score
                            < inner.config.degraded_health_threshold =>
                {
                    *status = ProviderStatus::Degraded;
                }
                ProviderStatus::Degraded
                    if !snapshot.state.is_open()
                        && snapshot.metrics.health_score
                            >= inner.config.degraded_health_threshold =>
                {
                    *status = ProviderStatus::Active;
                }
                _ => {}
            }
            if *status == ProviderStatus::Active {
                active += 1;
            }
        }

        debug!(
            total = providers.len(),
            active, "registry status refresh complete"
        );
    }

    /// Clear round-robin counters and log aggregate statistics
    async fn cleanup(inner: &Arc<RegistryInner>) {
        inner.round_robin.lock().await.clear();

        let providers = inner.providers.read().await;
        let mut total_requests = 0u64;
        for entry in providers.values() {
            total_requests += entry.stats.read().await.total_requests;
        }
        info!(
            providers = providers.len(),
            total_requests, "registry cleanup complete"
        );
    }

    async fn emit(&self, event_type: &str, provider_id: &str, payload: serde_json::Value) {
        self.inner
            .events
            .publish(SystemEvent::new(event_type, provider_id, payload))
            .await;
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
