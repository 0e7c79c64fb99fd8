use proptest::prelude::*;
use provider_resilience::{
    CheckType, Config, HealthCheckResult, HealthStatus, ProbeMeasurements,
};
use std::time::Duration;

/// Property-based tests for scoring, banding, and configuration validation
mod health_score_props {
    use super::*;

    fn arb_measurements() -> impl Strategy<Value = ProbeMeasurements> {
        (
            any::<bool>(),
            any::<bool>(),
            0u64..30_000,
            proptest::option::of(0u64..60_000),
            0.0f64..200.0,
            0usize..10,
            0usize..10,
        )
            .prop_map(
                |(connectivity, functionality, rt_ms, p95_ms, cost_eff, errors, warnings)| {
                    ProbeMeasurements {
                        connectivity_success: connectivity,
                        functionality_success: functionality,
                        response_time: Duration::from_millis(rt_ms),
                        p95_response_time: p95_ms.map(Duration::from_millis),
                        cost_efficiency_score: cost_eff,
                        errors: (0..errors).map(|i| format!("error {i}")).collect(),
                        warnings: (0..warnings).map(|i| format!("warning {i}")).collect(),
                        ..Default::default()
                    }
                },
            )
    }

    proptest! {
        #[test]
        fn test_score_always_in_range(m in arb_measurements()) {
            let result = HealthCheckResult::from_measurements(CheckType::Basic, m);
            prop_assert!(result.overall_score >= 0.0);
            prop_assert!(result.overall_score <= 100.0);
        }

        #[test]
        fn test_connectivity_failure_caps_score(m in arb_measurements()) {
            let mut m = m;
            m.connectivity_success = false;
            m.cost_efficiency_score = 100.0;
            let result = HealthCheckResult::from_measurements(CheckType::Basic, m);
            prop_assert!(result.overall_score <= 60.0,
                "connectivity failure must cap the score at 60, got {}",
                result.overall_score);
        }

        #[test]
        fn test_status_matches_score_band(m in arb_measurements()) {
            let result = HealthCheckResult::from_measurements(CheckType::Basic, m);
            let expected = HealthStatus::from_score(result.overall_score);
            prop_assert_eq!(result.status, expected);
        }

        #[test]
        fn test_band_thresholds_monotonic(score in 0.0f64..=100.0) {
            let status = HealthStatus::from_score(score);
            let rank = |s: HealthStatus| match s {
                HealthStatus::Healthy => 0,
                HealthStatus::Warning => 1,
                HealthStatus::Degraded => 2,
                HealthStatus::Critical => 3,
                HealthStatus::Unavailable => 4,
            };
            // A strictly higher score never maps to a worse band
            let better = HealthStatus::from_score((score + 10.0).min(100.0));
            prop_assert!(rank(better) <= rank(status));
        }
    }
}

mod config_validation_props {
    use super::*;

    proptest! {
        #[test]
        fn test_valid_thresholds_accepted(
            failure_threshold in 1u32..=100,
            half_open in 1u32..=10,
            min_health in 0.0f64..=100.0,
        ) {
            let mut config = Config::default();
            config.breaker.failure_threshold = failure_threshold;
            config.breaker.half_open_max_calls = half_open;
            config.breaker.min_health_score = min_health;
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn test_out_of_range_health_score_rejected(min_health in 100.1f64..=1000.0) {
            let mut config = Config::default();
            config.breaker.min_health_score = min_health;
            prop_assert!(config.validate().is_err());
        }

        #[test]
        fn test_zero_intervals_rejected(interval in 0u64..=0) {
            let mut config = Config::default();
            config.health.basic_interval_secs = interval;
            prop_assert!(config.validate().is_err());
        }
    }
}
