pub mod circuit_breaker;
pub mod health;
pub mod metrics;

pub use circuit_breaker::{
    BreakerObserver, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use health::{
    AlertSeverity, CheckType, HealthCheckResult, HealthMonitor, HealthMonitorConfig, HealthProbe,
    HealthStatus, HttpProbe, PredictiveAnalysis, ProbeMeasurements, SlaMetrics, SlaTargets,
    StubProbe,
};
pub use metrics::{FailureEvent, FailurePattern, MetricsSnapshot, ProviderMetrics};
