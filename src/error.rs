use std::time::Duration;
use thiserror::Error;

/// Comprehensive error categorization for the resilience core
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (permanent failures)
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // I/O errors (potentially transient)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors (usually permanent)
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // Network errors (transient)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Connection refused: {endpoint}")]
    ConnectionRefused { endpoint: String },

    #[error("Rate limit exceeded: retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    #[error("Quota exceeded: {resource}")]
    QuotaExceeded { resource: String },

    // Client errors (permanent)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    // Server errors (transient)
    #[error("Service temporarily unavailable: {service} - {reason}")]
    ServiceUnavailable { service: String, reason: String },

    #[error("Timeout error: operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    // Resilience fast-fail errors (raised by the breaker, never by providers)
    #[error("Circuit breaker open for provider: {provider}")]
    CircuitOpen {
        provider: String,
        retry_after: Duration,
    },

    #[error("Cost limit exceeded for provider {provider}: {limit_per_minute}/min")]
    CostLimitExceeded {
        provider: String,
        limit_per_minute: f64,
    },

    // Registry errors
    #[error("Provider not found: {id}")]
    ProviderNotFound { id: String },

    #[error("Network error: {0}")]
    Network(String),

    // General provider error (opaque message from integration code)
    #[error("Provider error: {0}")]
    Provider(String),
}

/// Error categorization for caller-side handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Permanent errors - retrying will not help
    Permanent,
    /// Transient errors - safe to retry against another provider
    Transient,
    /// Rate limited - back off before retrying
    RateLimited,
    /// Resilience fast-fail - the breaker rejected the call before execution
    Resilience,
}

impl Error {
    /// Categorize the error for caller-side handling
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_)
            | Self::InvalidConfiguration { .. }
            | Self::Serde(_)
            | Self::AuthenticationFailed(_)
            | Self::InvalidResponse(_)
            | Self::ProviderNotFound { .. } => ErrorCategory::Permanent,

            Self::RateLimitExceeded { .. } | Self::QuotaExceeded { .. } => {
                ErrorCategory::RateLimited
            }

            Self::CircuitOpen { .. } | Self::CostLimitExceeded { .. } => ErrorCategory::Resilience,

            Self::Io(_)
            | Self::Http(_)
            | Self::ConnectionRefused { .. }
            | Self::ServiceUnavailable { .. }
            | Self::Timeout { .. }
            | Self::Network(_)
            | Self::Provider(_) => ErrorCategory::Transient,
        }
    }

    /// Check if the caller may retry (against this or another provider)
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::RateLimited
        )
    }

    /// Check if this error was raised by the resilience layer itself rather
    /// than by a provider operation
    #[must_use]
    pub const fn is_fast_fail(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::CostLimitExceeded { .. }
        )
    }

    /// Suggested delay before the caller retries, when the error carries one
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after } | Self::CircuitOpen { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_fail_detection() {
        let open = Error::CircuitOpen {
            provider: "openai".to_string(),
            retry_after: Duration::from_secs(30),
        };
        assert!(open.is_fast_fail());
        assert_eq!(open.category(), ErrorCategory::Resilience);

        let cost = Error::CostLimitExceeded {
            provider: "openai".to_string(),
            limit_per_minute: 10.0,
        };
        assert!(cost.is_fast_fail());

        let timeout = Error::Timeout {
            timeout: Duration::from_secs(30),
        };
        assert!(!timeout.is_fast_fail());
    }

    #[test]
    fn test_retryable_categories() {
        assert!(Error::Network("reset by peer".to_string()).is_retryable());
        assert!(Error::RateLimitExceeded {
            retry_after: Duration::from_secs(60)
        }
        .is_retryable());
        assert!(!Error::AuthenticationFailed("bad key".to_string()).is_retryable());
        assert!(!Error::CircuitOpen {
            provider: "s3".to_string(),
            retry_after: Duration::from_secs(5),
        }
        .is_retryable());
    }

    #[test]
    fn test_retry_after_propagation() {
        let err = Error::RateLimitExceeded {
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
        assert_eq!(Error::Provider("boom".to_string()).retry_after(), None);
    }
}
