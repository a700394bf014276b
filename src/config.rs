use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name of the service this core instance observes
    pub service_name: String,

    /// Trace recording settings
    pub tracing: TracingConfig,

    /// Metrics aggregation settings
    pub metrics: MetricsConfig,

    /// Alert evaluation and notification settings
    pub alerts: AlertConfig,

    /// Circuit breaker settings
    pub breaker: BreakerConfig,

    /// Retry policy settings
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Maximum finished root traces kept in history (FIFO eviction)
    pub max_trace_history: usize,

    /// Hours after which abandoned running spans and old records are reaped
    pub stale_after_hours: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Maximum snapshots retained per service (FIFO eviction)
    pub max_snapshots_per_service: usize,

    /// Maximum entries in the global error history
    pub max_error_records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Maximum alerts retained in history (FIFO eviction)
    pub max_alert_history: usize,

    /// Per-channel notification delivery timeout in seconds
    pub dispatch_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a half-open trial
    pub reset_timeout_seconds: u64,

    /// Seconds of inactivity before a destination's breaker is evicted
    pub idle_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound on the backoff delay in milliseconds
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after each retry
    pub exponential_base: f64,

    /// Add up to 10% random jitter to each delay
    pub jitter: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            max_trace_history: 1000,
            stale_after_hours: 4,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_snapshots_per_service: 1000,
            max_error_records: 10_000,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_alert_history: 1000,
            dispatch_timeout_seconds: 5,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_seconds: 60,
            idle_ttl_seconds: 3600,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_seconds)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_seconds)
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            tracing: TracingConfig::default(),
            metrics: MetricsConfig::default(),
            alerts: AlertConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let mut config = Config::default();

        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service_name = name;
        }

        if let Ok(max) = env::var("TRACE_HISTORY_MAX") {
            config.tracing.max_trace_history = max
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid TRACE_HISTORY_MAX: {}", e))?;
        }

        if let Ok(hours) = env::var("TRACE_STALE_AFTER_HOURS") {
            config.tracing.stale_after_hours = hours
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid TRACE_STALE_AFTER_HOURS: {}", e))?;
        }

        if let Ok(max) = env::var("METRICS_SNAPSHOTS_PER_SERVICE") {
            config.metrics.max_snapshots_per_service = max
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid METRICS_SNAPSHOTS_PER_SERVICE: {}", e))?;
        }

        if let Ok(max) = env::var("METRICS_ERROR_RECORDS_MAX") {
            config.metrics.max_error_records = max
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid METRICS_ERROR_RECORDS_MAX: {}", e))?;
        }

        if let Ok(max) = env::var("ALERT_HISTORY_MAX") {
            config.alerts.max_alert_history = max
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid ALERT_HISTORY_MAX: {}", e))?;
        }

        if let Ok(timeout) = env::var("ALERT_DISPATCH_TIMEOUT_SECONDS") {
            config.alerts.dispatch_timeout_seconds = timeout
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid ALERT_DISPATCH_TIMEOUT_SECONDS: {}", e))?;
        }

        if let Ok(threshold) = env::var("BREAKER_FAILURE_THRESHOLD") {
            config.breaker.failure_threshold = threshold
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid BREAKER_FAILURE_THRESHOLD: {}", e))?;
        }

        if let Ok(timeout) = env::var("BREAKER_RESET_TIMEOUT_SECONDS") {
            config.breaker.reset_timeout_seconds = timeout
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid BREAKER_RESET_TIMEOUT_SECONDS: {}", e))?;
        }

        if let Ok(ttl) = env::var("BREAKER_IDLE_TTL_SECONDS") {
            config.breaker.idle_ttl_seconds = ttl
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid BREAKER_IDLE_TTL_SECONDS: {}", e))?;
        }

        if let Ok(retries) = env::var("RETRY_MAX_RETRIES") {
            config.retry.max_retries = retries
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid RETRY_MAX_RETRIES: {}", e))?;
        }

        if let Ok(delay) = env::var("RETRY_INITIAL_DELAY_MS") {
            config.retry.initial_delay_ms = delay
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid RETRY_INITIAL_DELAY_MS: {}", e))?;
        }

        if let Ok(delay) = env::var("RETRY_MAX_DELAY_MS") {
            config.retry.max_delay_ms = delay
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid RETRY_MAX_DELAY_MS: {}", e))?;
        }

        if let Ok(jitter) = env::var("RETRY_JITTER") {
            config.retry.jitter = jitter
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid RETRY_JITTER: {}", e))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(anyhow::anyhow!("Service name is required"));
        }

        if self.tracing.max_trace_history == 0 {
            return Err(anyhow::anyhow!("Trace history cap must be greater than 0"));
        }

        if self.metrics.max_snapshots_per_service == 0 {
            return Err(anyhow::anyhow!(
                "Per-service snapshot cap must be greater than 0"
            ));
        }

        if self.metrics.max_error_records == 0 {
            return Err(anyhow::anyhow!("Error history cap must be greater than 0"));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(anyhow::anyhow!(
                "Breaker failure threshold must be greater than 0"
            ));
        }

        if self.retry.exponential_base < 1.0 {
            return Err(anyhow::anyhow!("Retry base must be at least 1.0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tracing.max_trace_history, 1000);
        assert_eq!(config.metrics.max_error_records, 10_000);
        assert_eq!(config.breaker.failure_threshold, 5);
    }

    #[test]
    fn test_validation_rejects_zero_caps() {
        let mut config = Config::default();
        config.tracing.max_trace_history = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.breaker.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_helpers() {
        let config = Config::default();
        assert_eq!(config.breaker.reset_timeout(), Duration::from_secs(60));
        assert_eq!(config.retry.initial_delay(), Duration::from_millis(100));
        assert_eq!(config.retry.max_delay(), Duration::from_secs(10));
    }
}
