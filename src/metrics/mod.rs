pub mod aggregator;
pub mod exporter;

pub use aggregator::*;
pub use exporter::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Request counters and latency statistics for one service.
///
/// The three latency percentiles are fixed multiples of the running average
/// (p50 = 0.8x, p95 = 1.5x, p99 = 2x), not a distribution estimate. The
/// field shape is stable so a streaming estimator can replace the heuristic
/// without breaking consumers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub throughput_rps: f64,
    pub active_requests: u32,
    pub saturation_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub total_errors: u64,
    /// Percentage of all requests that failed (0-100)
    pub error_rate: f64,
    pub by_kind: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub cpu_usage_percent: f64,
    pub memory_usage_mb: f64,
    pub open_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub health: HealthStatus,
    pub last_checked: DateTime<Utc>,
}

/// Immutable point-in-time copy of one service's accumulated metrics. A new
/// snapshot is appended per recorded event; stored snapshots are never
/// mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMetricsSnapshot {
    pub service_name: String,
    pub timestamp: DateTime<Utc>,
    pub requests: RequestMetrics,
    pub performance: PerformanceMetrics,
    pub errors: ErrorMetrics,
    pub resources: ResourceMetrics,
    pub dependencies: Vec<DependencyStatus>,
}

impl ServiceMetricsSnapshot {
    pub fn zeroed(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            timestamp: Utc::now(),
            requests: RequestMetrics::default(),
            performance: PerformanceMetrics::default(),
            errors: ErrorMetrics::default(),
            resources: ResourceMetrics::default(),
            dependencies: Vec::new(),
        }
    }

    /// Derived health used by dependency rollups.
    pub fn health_status(&self) -> HealthStatus {
        let error_rate = self.errors.error_rate;
        let avg_latency = self.requests.avg_latency_ms;

        if error_rate > 50.0 || avg_latency > 5000.0 {
            HealthStatus::Unhealthy
        } else if error_rate > 10.0 || avg_latency > 2000.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// One recorded error, kept in a global bounded history and folded into the
/// owning service's error counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub kind: ErrorKind,
    pub message: String,
    pub service: String,
    pub context: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(
        service: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        context: HashMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            service: service.into(),
            context,
            timestamp: Utc::now(),
        }
    }
}

/// Cross-service rollup of the latest snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub total_services: usize,
    pub total_requests: u64,
    pub total_errors: u64,
    pub average_response_time_ms: f64,
    /// Percentage (0-100)
    pub error_rate: f64,
    pub per_service_status: HashMap<String, HealthStatus>,
}
