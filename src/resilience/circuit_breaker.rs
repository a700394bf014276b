use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
}

/// Failure-count circuit breaker for one destination.
///
/// `Closed` → `Open` once `failure_threshold` consecutive failures pile up;
/// `Open` → `HalfOpen` lazily, when `is_open()` is called after the reset
/// window has elapsed (no timer) — exactly the next call becomes the trial;
/// any success resets to `Closed` with a zero failure count; a failure in
/// `HalfOpen` reopens the circuit and refreshes the failure time.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Arc<RwLock<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            inner: Arc::new(RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
            })),
        }
    }

    /// Whether calls should currently fail fast. Performs the lazy
    /// `Open` → `HalfOpen` transition once the reset window has elapsed,
    /// returning `false` so the next call goes through as a trial.
    pub async fn is_open(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state != CircuitState::Open {
            return false;
        }

        let window_elapsed = inner
            .last_failure_time
            .map(|t| t.elapsed() >= self.reset_timeout)
            .unwrap_or(true);
        if window_elapsed {
            inner.state = CircuitState::HalfOpen;
            info!("Circuit breaker half-open, allowing trial call");
            false
        } else {
            true
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        failures = inner.failure_count,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!("Circuit breaker reopened after failed trial");
            }
            CircuitState::Open => {}
        }
    }

    /// Any success closes the circuit and clears the failure count.
    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        if inner.state != CircuitState::Closed || inner.failure_count > 0 {
            debug!("Circuit breaker closed after success");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
    }

    /// Current state without side effects.
    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    pub async fn stats(&self) -> BreakerStats {
        let inner = self.inner.read().await;
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            seconds_since_last_failure: inner.last_failure_time.map(|t| t.elapsed().as_secs()),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerStats {
    #[serde(serialize_with = "serialize_state")]
    pub state: CircuitState,
    pub failure_count: u32,
    pub seconds_since_last_failure: Option<u64>,
}

fn serialize_state<S: serde::Serializer>(
    state: &CircuitState,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    })
}

struct RegistryEntry {
    breaker: Arc<CircuitBreaker>,
    last_used: Instant,
}

/// Per-destination breakers. The map is kept bounded by evicting
/// destinations idle longer than the configured TTL.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, RegistryEntry>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// The breaker for `destination`, created on first use.
    pub async fn breaker(&self, destination: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.write().await;

        let idle_ttl = self.config.idle_ttl();
        breakers.retain(|dest, entry| {
            let keep = entry.last_used.elapsed() < idle_ttl;
            if !keep {
                debug!(destination = %dest, "Evicted idle circuit breaker");
            }
            keep
        });

        let entry = breakers
            .entry(destination.to_string())
            .or_insert_with(|| RegistryEntry {
                breaker: Arc::new(CircuitBreaker::new(
                    self.config.failure_threshold,
                    self.config.reset_timeout(),
                )),
                last_used: Instant::now(),
            });
        entry.last_used = Instant::now();
        entry.breaker.clone()
    }

    pub async fn destination_count(&self) -> usize {
        self.breakers.read().await.len()
    }

    pub async fn stats(&self) -> HashMap<String, BreakerStats> {
        let breakers = self.breakers.read().await;
        let mut stats = HashMap::with_capacity(breakers.len());
        for (destination, entry) in breakers.iter() {
            stats.insert(destination.clone(), entry.breaker.stats().await);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_threshold_opens_circuit_and_success_resets() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        assert_eq!(cb.state().await, CircuitState::Closed);

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(cb.is_open().await);

        cb.record_success().await;
        let stats = cb.stats().await;
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
    }

    #[tokio::test]
    async fn test_success_between_failures_keeps_circuit_closed() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure().await;
        cb.record_failure().await;
        cb.record_success().await;
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_after_reset_window() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(50));
        cb.record_failure().await;

        // Within the window: open
        assert!(cb.is_open().await);
        assert_eq!(cb.state().await, CircuitState::Open);

        sleep(Duration::from_millis(80)).await;

        // Window elapsed: flips to half-open and lets the trial through
        assert!(!cb.is_open().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(20));
        cb.record_failure().await;
        sleep(Duration::from_millis(40)).await;
        assert!(!cb.is_open().await);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(cb.is_open().await);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(20));
        cb.record_failure().await;
        sleep(Duration::from_millis(40)).await;
        assert!(!cb.is_open().await);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_registry_keys_breakers_by_destination() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let billing = registry.breaker("billing").await;
        billing.record_failure().await;

        let catalog = registry.breaker("catalog").await;
        assert_eq!(catalog.stats().await.failure_count, 0);
        assert_eq!(registry.breaker("billing").await.stats().await.failure_count, 1);
        assert_eq!(registry.destination_count().await, 2);
    }

    #[tokio::test]
    async fn test_registry_evicts_idle_destinations() {
        let config = BreakerConfig {
            idle_ttl_seconds: 0,
            ..Default::default()
        };
        let registry = BreakerRegistry::new(config);
        registry.breaker("billing").await;
        sleep(Duration::from_millis(10)).await;

        // Touching any destination sweeps idle entries first
        registry.breaker("catalog").await;
        let stats = registry.stats().await;
        assert!(!stats.contains_key("billing"));
        assert!(stats.contains_key("catalog"));
    }
}
