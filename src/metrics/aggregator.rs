use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    DependencyStatus, ErrorRecord, OverallStats, PerformanceMetrics, ResourceMetrics,
    ServiceMetricsSnapshot,
};
use crate::config::MetricsConfig;
use crate::error::ErrorKind;

struct AggregatorInner {
    /// Per-service snapshot history, oldest first.
    snapshots: HashMap<String, VecDeque<ServiceMetricsSnapshot>>,
    /// Global error history, oldest first.
    errors: VecDeque<ErrorRecord>,
}

/// Accumulates per-service request/error/resource counters and latency
/// statistics from raw call events. Snapshots are copy-on-write: every
/// recorded event reads the latest snapshot, applies the update to a copy,
/// and appends it.
pub struct MetricsAggregator {
    config: MetricsConfig,
    inner: Arc<RwLock<AggregatorInner>>,
}

impl MetricsAggregator {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(AggregatorInner {
                snapshots: HashMap::new(),
                errors: VecDeque::new(),
            })),
        }
    }

    /// Record one HTTP request outcome. Status >= 400 counts as failed and
    /// is folded into the error counters and the global error history.
    pub async fn record_http_request(
        &self,
        service: &str,
        method: &str,
        path: &str,
        status_code: u16,
        duration_ms: f64,
        error: Option<&str>,
    ) {
        let mut inner = self.inner.write().await;
        let mut snapshot = Self::latest_or_zeroed(&inner, service);

        let requests = &mut snapshot.requests;
        let prior_total = requests.total as f64;
        requests.total += 1;
        requests.avg_latency_ms =
            (requests.avg_latency_ms * prior_total + duration_ms) / (prior_total + 1.0);
        requests.p50_latency_ms = requests.avg_latency_ms * 0.8;
        requests.p95_latency_ms = requests.avg_latency_ms * 1.5;
        requests.p99_latency_ms = requests.avg_latency_ms * 2.0;

        if status_code >= 400 {
            requests.failed += 1;

            let kind = ErrorKind::from_status(status_code);
            let message = error
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {} on {} {}", status_code, method, path));
            let mut context = HashMap::new();
            context.insert("method".to_string(), method.to_string());
            context.insert("path".to_string(), path.to_string());
            context.insert("status_code".to_string(), status_code.to_string());

            Self::fold_error(&mut snapshot, kind);
            Self::push_error(
                &mut inner,
                ErrorRecord::new(service, kind, message, context),
                self.config.max_error_records,
            );
        } else {
            requests.successful += 1;
        }

        self.push_snapshot(&mut inner, snapshot);
    }

    /// Replace the performance section of the service's metrics.
    pub async fn record_performance(&self, service: &str, metrics: PerformanceMetrics) {
        let mut inner = self.inner.write().await;
        let mut snapshot = Self::latest_or_zeroed(&inner, service);
        snapshot.performance = metrics;
        self.push_snapshot(&mut inner, snapshot);
    }

    /// Replace the resource section of the service's metrics.
    pub async fn record_resources(&self, service: &str, metrics: ResourceMetrics) {
        let mut inner = self.inner.write().await;
        let mut snapshot = Self::latest_or_zeroed(&inner, service);
        snapshot.resources = metrics;
        self.push_snapshot(&mut inner, snapshot);
    }

    /// Replace the dependency rollup of the service's metrics.
    pub async fn record_dependencies(&self, service: &str, dependencies: Vec<DependencyStatus>) {
        let mut inner = self.inner.write().await;
        let mut snapshot = Self::latest_or_zeroed(&inner, service);
        snapshot.dependencies = dependencies;
        self.push_snapshot(&mut inner, snapshot);
    }

    /// Record a non-HTTP error against a service: appended to the global
    /// history and folded into the service's error counters.
    pub async fn record_error(
        &self,
        service: &str,
        kind: ErrorKind,
        message: &str,
        context: HashMap<String, String>,
    ) -> ErrorRecord {
        let mut inner = self.inner.write().await;
        let mut snapshot = Self::latest_or_zeroed(&inner, service);

        Self::fold_error(&mut snapshot, kind);

        let record = ErrorRecord::new(service, kind, message, context);
        Self::push_error(&mut inner, record.clone(), self.config.max_error_records);
        self.push_snapshot(&mut inner, snapshot);

        debug!(service, kind = %kind, "Recorded error: {}", message);
        record
    }

    /// Latest snapshot for a service, if any events were recorded.
    pub async fn current(&self, service: &str) -> Option<ServiceMetricsSnapshot> {
        let inner = self.inner.read().await;
        inner
            .snapshots
            .get(service)
            .and_then(|history| history.back().cloned())
    }

    /// The most recent `limit` snapshots for a service, newest first.
    pub async fn history(&self, service: &str, limit: usize) -> Vec<ServiceMetricsSnapshot> {
        let inner = self.inner.read().await;
        inner
            .snapshots
            .get(service)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Latest snapshot of every known service.
    pub async fn all_current(&self) -> Vec<ServiceMetricsSnapshot> {
        let inner = self.inner.read().await;
        let mut snapshots: Vec<ServiceMetricsSnapshot> = inner
            .snapshots
            .values()
            .filter_map(|history| history.back().cloned())
            .collect();
        snapshots.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        snapshots
    }

    /// Cross-service rollup over the latest snapshots. The average response
    /// time is weighted by each service's request volume.
    pub async fn overall_stats(&self) -> OverallStats {
        let snapshots = self.all_current().await;

        let total_requests: u64 = snapshots.iter().map(|s| s.requests.total).sum();
        let total_errors: u64 = snapshots.iter().map(|s| s.errors.total_errors).sum();
        let weighted_latency: f64 = snapshots
            .iter()
            .map(|s| s.requests.avg_latency_ms * s.requests.total as f64)
            .sum();

        OverallStats {
            total_services: snapshots.len(),
            total_requests,
            total_errors,
            average_response_time_ms: if total_requests > 0 {
                weighted_latency / total_requests as f64
            } else {
                0.0
            },
            error_rate: if total_requests > 0 {
                total_errors as f64 / total_requests as f64 * 100.0
            } else {
                0.0
            },
            per_service_status: snapshots
                .iter()
                .map(|s| (s.service_name.clone(), s.health_status()))
                .collect(),
        }
    }

    /// The most recent `limit` error records across all services, newest
    /// first.
    pub async fn recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
        let inner = self.inner.read().await;
        inner.errors.iter().rev().take(limit).cloned().collect()
    }

    pub async fn error_count(&self) -> usize {
        self.inner.read().await.errors.len()
    }

    fn latest_or_zeroed(inner: &AggregatorInner, service: &str) -> ServiceMetricsSnapshot {
        let mut snapshot = inner
            .snapshots
            .get(service)
            .and_then(|history| history.back().cloned())
            .unwrap_or_else(|| ServiceMetricsSnapshot::zeroed(service));
        snapshot.timestamp = Utc::now();
        snapshot
    }

    fn fold_error(snapshot: &mut ServiceMetricsSnapshot, kind: ErrorKind) {
        let errors = &mut snapshot.errors;
        errors.total_errors += 1;
        *errors.by_kind.entry(kind.as_str().to_string()).or_insert(0) += 1;

        let total_requests = snapshot.requests.total;
        errors.error_rate = if total_requests > 0 {
            errors.total_errors as f64 / total_requests as f64 * 100.0
        } else {
            0.0
        };
    }

    fn push_error(inner: &mut AggregatorInner, record: ErrorRecord, cap: usize) {
        inner.errors.push_back(record);
        while inner.errors.len() > cap {
            inner.errors.pop_front();
        }
    }

    fn push_snapshot(&self, inner: &mut AggregatorInner, snapshot: ServiceMetricsSnapshot) {
        let history = inner
            .snapshots
            .entry(snapshot.service_name.clone())
            .or_default();
        history.push_back(snapshot);
        while history.len() > self.config.max_snapshots_per_service {
            history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::HealthStatus;
    use approx::assert_relative_eq;

    fn aggregator() -> MetricsAggregator {
        MetricsAggregator::new(MetricsConfig::default())
    }

    #[tokio::test]
    async fn test_success_increments_successful_and_records_no_error() {
        let agg = aggregator();
        agg.record_http_request("billing", "GET", "/x", 200, 12.0, None)
            .await;

        let snapshot = agg.current("billing").await.unwrap();
        assert_eq!(snapshot.requests.total, 1);
        assert_eq!(snapshot.requests.successful, 1);
        assert_eq!(snapshot.requests.failed, 0);
        assert_eq!(snapshot.errors.total_errors, 0);
        assert_eq!(agg.error_count().await, 0);
    }

    #[tokio::test]
    async fn test_client_error_classified_and_counted() {
        let agg = aggregator();
        agg.record_http_request("billing", "GET", "/x", 404, 10.0, None)
            .await;

        let snapshot = agg.current("billing").await.unwrap();
        assert_eq!(snapshot.requests.failed, 1);
        assert_eq!(snapshot.errors.total_errors, 1);
        assert_eq!(*snapshot.errors.by_kind.get("CLIENT_ERROR").unwrap(), 1);

        let errors = agg.recent_errors(10).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::ClientError);
        assert_eq!(errors[0].context.get("path").unwrap(), "/x");
    }

    #[tokio::test]
    async fn test_incremental_average_and_percentile_multiples() {
        let agg = aggregator();
        agg.record_http_request("svc", "GET", "/a", 200, 100.0, None)
            .await;
        agg.record_http_request("svc", "GET", "/a", 200, 200.0, None)
            .await;
        agg.record_http_request("svc", "GET", "/a", 200, 300.0, None)
            .await;

        let snapshot = agg.current("svc").await.unwrap();
        assert_relative_eq!(snapshot.requests.avg_latency_ms, 200.0);
        assert_relative_eq!(snapshot.requests.p50_latency_ms, 160.0);
        assert_relative_eq!(snapshot.requests.p95_latency_ms, 300.0);
        assert_relative_eq!(snapshot.requests.p99_latency_ms, 400.0);
    }

    #[tokio::test]
    async fn test_error_rate_recomputed_per_error() {
        let agg = aggregator();
        for _ in 0..8 {
            agg.record_http_request("svc", "GET", "/a", 200, 10.0, None)
                .await;
        }
        for _ in 0..2 {
            agg.record_http_request("svc", "GET", "/a", 503, 10.0, Some("upstream down"))
                .await;
        }

        let snapshot = agg.current("svc").await.unwrap();
        assert_relative_eq!(snapshot.errors.error_rate, 20.0);
        assert_eq!(*snapshot.errors.by_kind.get("SERVER_ERROR").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_snapshots_are_copy_on_write_history() {
        let agg = aggregator();
        agg.record_http_request("svc", "GET", "/a", 200, 10.0, None)
            .await;
        agg.record_http_request("svc", "GET", "/a", 200, 30.0, None)
            .await;

        let history = agg.history("svc", 10).await;
        assert_eq!(history.len(), 2);
        // Newest first; the earlier snapshot kept its values
        assert_eq!(history[0].requests.total, 2);
        assert_eq!(history[1].requests.total, 1);
        assert_relative_eq!(history[1].requests.avg_latency_ms, 10.0);
    }

    #[tokio::test]
    async fn test_snapshot_history_bounded() {
        let config = MetricsConfig {
            max_snapshots_per_service: 10,
            ..Default::default()
        };
        let agg = MetricsAggregator::new(config);
        for i in 0..15 {
            agg.record_http_request("svc", "GET", "/a", 200, i as f64, None)
                .await;
        }

        let history = agg.history("svc", 100).await;
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].requests.total, 15);
    }

    #[tokio::test]
    async fn test_error_history_bounded() {
        let config = MetricsConfig {
            max_error_records: 5,
            ..Default::default()
        };
        let agg = MetricsAggregator::new(config);
        for i in 0..8 {
            agg.record_error(
                "svc",
                ErrorKind::ServerError,
                &format!("error {}", i),
                HashMap::new(),
            )
            .await;
        }

        assert_eq!(agg.error_count().await, 5);
        let errors = agg.recent_errors(10).await;
        assert_eq!(errors[0].message, "error 7");
        assert_eq!(errors[4].message, "error 3");
    }

    #[tokio::test]
    async fn test_overall_stats_rollup() {
        let agg = aggregator();
        agg.record_http_request("billing", "GET", "/a", 200, 100.0, None)
            .await;
        agg.record_http_request("billing", "GET", "/a", 500, 100.0, None)
            .await;
        agg.record_http_request("catalog", "GET", "/b", 200, 50.0, None)
            .await;

        let stats = agg.overall_stats().await;
        assert_eq!(stats.total_services, 2);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.total_errors, 1);
        assert_relative_eq!(stats.error_rate, 100.0 / 3.0);
        // billing is at 50% error rate -> degraded, not yet unhealthy
        assert_eq!(
            stats.per_service_status.get("billing"),
            Some(&HealthStatus::Degraded)
        );
        assert_eq!(
            stats.per_service_status.get("catalog"),
            Some(&HealthStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn test_section_updates_append_snapshots() {
        let agg = aggregator();
        agg.record_resources(
            "svc",
            ResourceMetrics {
                cpu_usage_percent: 42.0,
                memory_usage_mb: 256.0,
                open_connections: 7,
            },
        )
        .await;
        agg.record_performance(
            "svc",
            PerformanceMetrics {
                throughput_rps: 120.0,
                active_requests: 4,
                saturation_percent: 30.0,
            },
        )
        .await;
        agg.record_dependencies(
            "svc",
            vec![DependencyStatus {
                name: "postgres".to_string(),
                health: HealthStatus::Healthy,
                last_checked: Utc::now(),
            }],
        )
        .await;

        let snapshot = agg.current("svc").await.unwrap();
        assert_relative_eq!(snapshot.resources.cpu_usage_percent, 42.0);
        assert_relative_eq!(snapshot.performance.throughput_rps, 120.0);
        assert_eq!(snapshot.dependencies.len(), 1);
        assert_eq!(agg.history("svc", 10).await.len(), 3);
    }
}
