use prometheus::{Gauge, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tracing::error;

use super::OverallStats;

/// Prometheus exposition of the cross-service rollup. The aggregator owns
/// the numbers; this only mirrors the latest `OverallStats` into a registry
/// for scraping.
pub struct MetricsExporter {
    registry: Arc<Registry>,

    pub services_total: IntGauge,
    pub requests_total: IntGauge,
    pub errors_total: IntGauge,
    pub error_rate_percent: Gauge,
    pub avg_response_time_ms: Gauge,
}

impl MetricsExporter {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::new());

        let services_total = IntGauge::with_opts(Opts::new(
            "observed_services_total",
            "Number of services with recorded metrics",
        ))?;
        registry.register(Box::new(services_total.clone()))?;

        let requests_total = IntGauge::with_opts(Opts::new(
            "observed_requests_total",
            "Total requests recorded across all services",
        ))?;
        registry.register(Box::new(requests_total.clone()))?;

        let errors_total = IntGauge::with_opts(Opts::new(
            "observed_errors_total",
            "Total errors recorded across all services",
        ))?;
        registry.register(Box::new(errors_total.clone()))?;

        let error_rate_percent = Gauge::with_opts(Opts::new(
            "observed_error_rate_percent",
            "Overall error rate percentage",
        ))?;
        registry.register(Box::new(error_rate_percent.clone()))?;

        let avg_response_time_ms = Gauge::with_opts(Opts::new(
            "observed_avg_response_time_ms",
            "Request-weighted average response time in milliseconds",
        ))?;
        registry.register(Box::new(avg_response_time_ms.clone()))?;

        Ok(Self {
            registry,
            services_total,
            requests_total,
            errors_total,
            error_rate_percent,
            avg_response_time_ms,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Mirror the latest rollup into the registry.
    pub fn update(&self, stats: &OverallStats) {
        self.services_total.set(stats.total_services as i64);
        self.requests_total.set(stats.total_requests as i64);
        self.errors_total.set(stats.total_errors as i64);
        self.error_rate_percent.set(stats.error_rate);
        self.avg_response_time_ms
            .set(stats.average_response_time_ms);
    }

    /// Render the registry in Prometheus text format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_else(|e| {
                error!("Failed to encode metrics: {}", e);
                String::new()
            })
    }
}
