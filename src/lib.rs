pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod resilience;

pub use config::Config;
pub use error::{Error, ErrorCategory, Result};
pub use events::{ChannelEventSink, EventSink, NullEventSink, SystemEvent};
pub use registry::{
    ProviderConfiguration, ProviderRegistry, ProviderStatus, ProviderStatusReport, ProviderType,
    RegistryConfig, RegistryOverview, SelectionCriteria, SelectionStrategy,
};
pub use resilience::{
    AlertSeverity, CheckType, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
    CircuitState, FailureEvent, FailurePattern, HealthCheckResult, HealthMonitor,
    HealthMonitorConfig, HealthProbe, HealthStatus, HttpProbe, MetricsSnapshot,
    PredictiveAnalysis, ProbeMeasurements, SlaMetrics, SlaTargets, StubProbe,
};
