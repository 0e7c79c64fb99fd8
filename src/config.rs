//! File- and environment-backed configuration.
//!
//! The serde layer keeps durations as second counts so configuration files
//! stay flat; `registry_config()` and the `into_*` conversions produce the
//! runtime types consumed by the registry and monitors.

use crate::registry::{ProviderConfiguration, ProviderType, RegistryConfig};
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::health::{HealthMonitorConfig, SlaTargets};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g.
/// `PROVIDER_RESILIENCE__BREAKER__FAILURE_THRESHOLD=10`
const ENV_PREFIX: &str = "PROVIDER_RESILIENCE";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub breaker: BreakerSettings,
    pub health: HealthSettings,
    pub registry: RegistrySettings,
    pub providers: Vec<ProviderSettings>,
}

impl Config {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize().map_err(Error::Config)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.breaker.validate()?;
        self.health.validate()?;
        if !(0.0..=100.0).contains(&self.registry.degraded_health_threshold) {
            return Err(Error::InvalidConfiguration {
                field: "registry.degraded_health_threshold".to_string(),
                reason: "must be within [0, 100]".to_string(),
            });
        }
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(Error::InvalidConfiguration {
                    field: "providers.name".to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
            if provider.max_concurrent_requests == 0 {
                return Err(Error::InvalidConfiguration {
                    field: "providers.max_concurrent_requests".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Runtime registry configuration derived from this file configuration
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            breaker: self.breaker.to_breaker_config(),
            health: self.health.to_monitor_config(),
            refresh_interval: Duration::from_secs(self.registry.refresh_interval_secs),
            cleanup_interval: Duration::from_secs(self.registry.cleanup_interval_secs),
            degraded_health_threshold: self.registry.degraded_health_threshold,
        }
    }

    /// Provider configurations derived from the file entries
    #[must_use]
    pub fn provider_configs(&self) -> Vec<ProviderConfiguration> {
        self.providers
            .iter()
            .map(ProviderSettings::to_provider_config)
            .collect()
    }
}

/// Circuit breaker settings, durations in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub failure_rate_threshold: f64,
    pub consecutive_failure_threshold: u32,
    pub timeout_secs: f64,
    pub recovery_timeout_secs: f64,
    pub half_open_max_calls: u32,
    pub min_health_score: f64,
    pub max_cost_per_minute: f64,
    pub base_cost_per_request: f64,
    pub failure_cost_multiplier: f64,
    pub cost_per_second: f64,
    pub adaptive_thresholds: bool,
    pub adaptive_timeout: bool,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            failure_rate_threshold: defaults.failure_rate_threshold,
            consecutive_failure_threshold: defaults.consecutive_failure_threshold,
            timeout_secs: defaults.timeout.as_secs_f64(),
            recovery_timeout_secs: defaults.recovery_timeout.as_secs_f64(),
            half_open_max_calls: defaults.half_open_max_calls,
            min_health_score: defaults.min_health_score,
            max_cost_per_minute: defaults.max_cost_per_minute,
            base_cost_per_request: defaults.base_cost_per_request,
            failure_cost_multiplier: defaults.failure_cost_multiplier,
            cost_per_second: defaults.cost_per_second,
            adaptive_thresholds: defaults.adaptive_thresholds,
            adaptive_timeout: defaults.adaptive_timeout,
        }
    }
}

impl BreakerSettings {
    fn validate(&self) -> Result<()> {
        if self.half_open_max_calls == 0 {
            return Err(Error::InvalidConfiguration {
                field: "breaker.half_open_max_calls".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.timeout_secs <= 0.0 || self.recovery_timeout_secs <= 0.0 {
            return Err(Error::InvalidConfiguration {
                field: "breaker.timeout_secs".to_string(),
                reason: "timeouts must be positive".to_string(),
            });
        }
        if !(0.0..=100.0).contains(&self.min_health_score) {
            return Err(Error::InvalidConfiguration {
                field: "breaker.min_health_score".to_string(),
                reason: "must be within [0, 100]".to_string(),
            });
        }
        if !(0.0..=100.0).contains(&self.failure_rate_threshold) {
            return Err(Error::InvalidConfiguration {
                field: "breaker.failure_rate_threshold".to_string(),
                reason: "must be within [0, 100]".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            failure_rate_threshold: self.failure_rate_threshold,
            consecutive_failure_threshold: self.consecutive_failure_threshold,
            timeout: Duration::from_secs_f64(self.timeout_secs),
            recovery_timeout: Duration::from_secs_f64(self.recovery_timeout_secs),
            half_open_max_calls: self.half_open_max_calls,
            min_health_score: self.min_health_score,
            max_cost_per_minute: self.max_cost_per_minute,
            base_cost_per_request: self.base_cost_per_request,
            failure_cost_multiplier: self.failure_cost_multiplier,
            cost_per_second: self.cost_per_second,
            adaptive_thresholds: self.adaptive_thresholds,
            adaptive_timeout: self.adaptive_timeout,
        }
    }
}

/// Health monitor settings, durations in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub basic_interval_secs: u64,
    pub synthetic_interval_secs: u64,
    pub performance_interval_secs: u64,
    pub predictive_interval_secs: u64,
    pub sla_interval_secs: u64,
    pub probe_timeout_secs: f64,
    pub response_time_warning_secs: f64,
    pub response_time_critical_secs: f64,
    pub sla: SlaSettings,
}

impl Default for HealthSettings {
    fn default() -> Self {
        let defaults = HealthMonitorConfig::default();
        Self {
            basic_interval_secs: defaults.basic_interval.as_secs(),
            synthetic_interval_secs: defaults.synthetic_interval.as_secs(),
            performance_interval_secs: defaults.performance_interval.as_secs(),
            predictive_interval_secs: defaults.predictive_interval.as_secs(),
            sla_interval_secs: defaults.sla_interval.as_secs(),
            probe_timeout_secs: defaults.probe_timeout.as_secs_f64(),
            response_time_warning_secs: defaults.response_time_warning.as_secs_f64(),
            response_time_critical_secs: defaults.response_time_critical.as_secs_f64(),
            sla: SlaSettings::default(),
        }
    }
}

impl HealthSettings {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("health.basic_interval_secs", self.basic_interval_secs),
            ("health.synthetic_interval_secs", self.synthetic_interval_secs),
            (
                "health.performance_interval_secs",
                self.performance_interval_secs,
            ),
            (
                "health.predictive_interval_secs",
                self.predictive_interval_secs,
            ),
            ("health.sla_interval_secs", self.sla_interval_secs),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfiguration {
                    field: field.to_string(),
                    reason: "interval must be greater than zero".to_string(),
                });
            }
        }
        if self.probe_timeout_secs <= 0.0 {
            return Err(Error::InvalidConfiguration {
                field: "health.probe_timeout_secs".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn to_monitor_config(&self) -> HealthMonitorConfig {
        HealthMonitorConfig {
            basic_interval: Duration::from_secs(self.basic_interval_secs),
            synthetic_interval: Duration::from_secs(self.synthetic_interval_secs),
            performance_interval: Duration::from_secs(self.performance_interval_secs),
            predictive_interval: Duration::from_secs(self.predictive_interval_secs),
            sla_interval: Duration::from_secs(self.sla_interval_secs),
            probe_timeout: Duration::from_secs_f64(self.probe_timeout_secs),
            response_time_warning: Duration::from_secs_f64(self.response_time_warning_secs),
            response_time_critical: Duration::from_secs_f64(self.response_time_critical_secs),
            sla_targets: self.sla.to_targets(),
        }
    }
}

/// SLA targets, durations in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaSettings {
    pub availability_pct: f64,
    pub max_avg_response_time_secs: f64,
    pub min_throughput_rps: f64,
    pub max_error_rate_pct: f64,
    pub min_cost_efficiency: f64,
}

impl Default for SlaSettings {
    fn default() -> Self {
        let defaults = SlaTargets::default();
        Self {
            availability_pct: defaults.availability_pct,
            max_avg_response_time_secs: defaults.max_avg_response_time.as_secs_f64(),
            min_throughput_rps: defaults.min_throughput_rps,
            max_error_rate_pct: defaults.max_error_rate_pct,
            min_cost_efficiency: defaults.min_cost_efficiency,
        }
    }
}

impl SlaSettings {
    #[must_use]
    pub fn to_targets(&self) -> SlaTargets {
        SlaTargets {
            availability_pct: self.availability_pct,
            max_avg_response_time: Duration::from_secs_f64(self.max_avg_response_time_secs),
            min_throughput_rps: self.min_throughput_rps,
            max_error_rate_pct: self.max_error_rate_pct,
            min_cost_efficiency: self.min_cost_efficiency,
        }
    }
}

/// Registry loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub refresh_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub degraded_health_threshold: f64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            cleanup_interval_secs: 3600,
            degraded_health_threshold: 50.0,
        }
    }
}

/// One provider entry in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub id: Option<String>,
    pub name: String,
    pub provider_type: ProviderType,
    pub region: String,
    pub endpoint: Option<String>,
    pub cost_per_request: f64,
    pub max_concurrent_requests: u32,
    pub priority: u8,
    pub enabled: bool,
    pub health_monitoring: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            provider_type: ProviderType::AiModel,
            region: "us-east-1".to_string(),
            endpoint: None,
            cost_per_request: 0.001,
            max_concurrent_requests: 100,
            priority: 50,
            enabled: true,
            health_monitoring: true,
        }
    }
}

impl ProviderSettings {
    #[must_use]
    pub fn to_provider_config(&self) -> ProviderConfiguration {
        let mut config = ProviderConfiguration::new(
            self.name.clone(),
            self.provider_type,
            self.region.clone(),
        );
        config.id = self.id.clone();
        config.endpoint = self.endpoint.clone();
        config.cost_per_request = self.cost_per_request;
        config.max_concurrent_requests = self.max_concurrent_requests;
        config.priority = self.priority;
        config.enabled = self.enabled;
        config.health_monitoring = self.health_monitoring;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let registry = config.registry_config();
        assert_eq!(registry.refresh_interval, Duration::from_secs(60));
        assert_eq!(registry.breaker.failure_threshold, 5);
        assert_eq!(
            registry.health.basic_interval,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[breaker]
failure_threshold = 9
recovery_timeout_secs = 15.0

[health]
basic_interval_secs = 30

[registry]
degraded_health_threshold = 40.0

[[providers]]
name = "openai"
provider_type = "ai_model"
region = "us-east-1"
cost_per_request = 0.02
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.breaker.failure_threshold, 9);
        assert!((config.breaker.recovery_timeout_secs - 15.0).abs() < f64::EPSILON);
        assert_eq!(config.health.basic_interval_secs, 30);
        assert!((config.registry.degraded_health_threshold - 40.0).abs() < f64::EPSILON);

        let providers = config.provider_configs();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name, "openai");
        assert!((providers[0].cost_per_request - 0.02).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.breaker.half_open_max_calls = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.breaker.min_health_score = 150.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.health.basic_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.providers.push(ProviderSettings {
            name: "  ".to_string(),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(
            parsed.breaker.failure_threshold,
            config.breaker.failure_threshold
        );
        assert_eq!(
            parsed.health.basic_interval_secs,
            config.health.basic_interval_secs
        );
    }

    #[test]
    fn test_breaker_settings_round_trip() {
        let settings = BreakerSettings {
            timeout_secs: 12.5,
            ..Default::default()
        };
        let runtime = settings.to_breaker_config();
        assert_eq!(runtime.timeout, Duration::from_secs_f64(12.5));
        assert_eq!(runtime.failure_threshold, 5);
    }
}
