use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::metrics::ServiceMetricsSnapshot;

/// The closed set of metrics a rule may watch. Parsed from the dotted path
/// at rule creation, so unknown paths fail fast instead of being silently
/// skipped at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricPath {
    RequestsTotal,
    RequestsSuccessful,
    RequestsFailed,
    AvgLatency,
    P50Latency,
    P95Latency,
    P99Latency,
    TotalErrors,
    ErrorRate,
    CpuUsage,
    MemoryUsage,
    OpenConnections,
    ThroughputRps,
    ActiveRequests,
    SaturationPercent,
}

impl MetricPath {
    /// Resolve this metric against a snapshot.
    pub fn resolve(&self, snapshot: &ServiceMetricsSnapshot) -> f64 {
        match self {
            MetricPath::RequestsTotal => snapshot.requests.total as f64,
            MetricPath::RequestsSuccessful => snapshot.requests.successful as f64,
            MetricPath::RequestsFailed => snapshot.requests.failed as f64,
            MetricPath::AvgLatency => snapshot.requests.avg_latency_ms,
            MetricPath::P50Latency => snapshot.requests.p50_latency_ms,
            MetricPath::P95Latency => snapshot.requests.p95_latency_ms,
            MetricPath::P99Latency => snapshot.requests.p99_latency_ms,
            MetricPath::TotalErrors => snapshot.errors.total_errors as f64,
            MetricPath::ErrorRate => snapshot.errors.error_rate,
            MetricPath::CpuUsage => snapshot.resources.cpu_usage_percent,
            MetricPath::MemoryUsage => snapshot.resources.memory_usage_mb,
            MetricPath::OpenConnections => snapshot.resources.open_connections as f64,
            MetricPath::ThroughputRps => snapshot.performance.throughput_rps,
            MetricPath::ActiveRequests => snapshot.performance.active_requests as f64,
            MetricPath::SaturationPercent => snapshot.performance.saturation_percent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricPath::RequestsTotal => "requests.total",
            MetricPath::RequestsSuccessful => "requests.successful",
            MetricPath::RequestsFailed => "requests.failed",
            MetricPath::AvgLatency => "requests.avgLatency",
            MetricPath::P50Latency => "requests.p50Latency",
            MetricPath::P95Latency => "requests.p95Latency",
            MetricPath::P99Latency => "requests.p99Latency",
            MetricPath::TotalErrors => "errors.totalErrors",
            MetricPath::ErrorRate => "errors.errorRate",
            MetricPath::CpuUsage => "resources.cpuUsage",
            MetricPath::MemoryUsage => "resources.memoryUsage",
            MetricPath::OpenConnections => "resources.openConnections",
            MetricPath::ThroughputRps => "performance.throughputRps",
            MetricPath::ActiveRequests => "performance.activeRequests",
            MetricPath::SaturationPercent => "performance.saturationPercent",
        }
    }
}

impl FromStr for MetricPath {
    type Err = CoreError;

    /// Accepts the dotted camelCase wire names and their snake_case
    /// equivalents.
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        let path = match normalized.as_str() {
            "requests.total" => MetricPath::RequestsTotal,
            "requests.successful" => MetricPath::RequestsSuccessful,
            "requests.failed" => MetricPath::RequestsFailed,
            "requests.avglatency" | "requests.avglatencyms" => MetricPath::AvgLatency,
            "requests.p50latency" | "requests.p50latencyms" => MetricPath::P50Latency,
            "requests.p95latency" | "requests.p95latencyms" => MetricPath::P95Latency,
            "requests.p99latency" | "requests.p99latencyms" => MetricPath::P99Latency,
            "errors.totalerrors" | "errors.total" => MetricPath::TotalErrors,
            "errors.errorrate" => MetricPath::ErrorRate,
            "resources.cpuusage" | "resources.cpuusagepercent" => MetricPath::CpuUsage,
            "resources.memoryusage" | "resources.memoryusagemb" => MetricPath::MemoryUsage,
            "resources.openconnections" => MetricPath::OpenConnections,
            "performance.throughputrps" | "performance.throughput" => MetricPath::ThroughputRps,
            "performance.activerequests" => MetricPath::ActiveRequests,
            "performance.saturationpercent" | "performance.saturation" => {
                MetricPath::SaturationPercent
            }
            _ => return Err(CoreError::UnknownMetric(s.to_string())),
        };
        Ok(path)
    }
}

impl std::fmt::Display for MetricPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    GreaterThan,
    LessThan,
    Equal,
    NotEqual,
    GreaterOrEqual,
    LessOrEqual,
}

impl ConditionOperator {
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            ConditionOperator::GreaterThan => value > threshold,
            ConditionOperator::LessThan => value < threshold,
            ConditionOperator::Equal => (value - threshold).abs() < f64::EPSILON,
            ConditionOperator::NotEqual => (value - threshold).abs() >= f64::EPSILON,
            ConditionOperator::GreaterOrEqual => value >= threshold,
            ConditionOperator::LessOrEqual => value <= threshold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::GreaterThan => ">",
            ConditionOperator::LessThan => "<",
            ConditionOperator::Equal => "==",
            ConditionOperator::NotEqual => "!=",
            ConditionOperator::GreaterOrEqual => ">=",
            ConditionOperator::LessOrEqual => "<=",
        }
    }
}

impl FromStr for ConditionOperator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ">" => Ok(ConditionOperator::GreaterThan),
            "<" => Ok(ConditionOperator::LessThan),
            "==" => Ok(ConditionOperator::Equal),
            "!=" => Ok(ConditionOperator::NotEqual),
            ">=" => Ok(ConditionOperator::GreaterOrEqual),
            "<=" => Ok(ConditionOperator::LessOrEqual),
            _ => Err(CoreError::InvalidRule(format!("unknown operator: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

/// A rule's trigger condition. `duration_seconds`/`aggregation` are part of
/// the authored rule shape; evaluation compares the latest snapshot value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCondition {
    pub metric: MetricPath,
    pub operator: ConditionOperator,
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<String>,
}

/// Operator-authored alert rule. Mutable via create/update/delete; not
/// versioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    pub enabled: bool,
    pub notification_channels: Vec<String>,
    pub cooldown_seconds: u64,
    pub last_triggered: Option<DateTime<Utc>>,
}

/// Input for `create_rule`. The metric path and operator are strings here
/// and parsed into their typed forms on creation.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    pub name: String,
    pub description: String,
    pub metric: String,
    pub operator: String,
    pub threshold: f64,
    pub severity: AlertSeverity,
    pub enabled: bool,
    pub notification_channels: Vec<String>,
    pub cooldown_seconds: u64,
    pub duration_seconds: Option<u64>,
    pub aggregation: Option<String>,
}

impl Default for RuleSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            metric: String::new(),
            operator: ">".to_string(),
            threshold: 0.0,
            severity: AlertSeverity::Warning,
            enabled: true,
            notification_channels: vec!["log".to_string()],
            cooldown_seconds: 300,
            duration_seconds: None,
            aggregation: None,
        }
    }
}

impl RuleSpec {
    pub fn into_rule(self) -> Result<AlertRule> {
        if self.name.is_empty() {
            return Err(CoreError::InvalidRule("rule name is required".to_string()));
        }
        Ok(AlertRule {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            condition: AlertCondition {
                metric: self.metric.parse()?,
                operator: self.operator.parse()?,
                threshold: self.threshold,
                duration_seconds: self.duration_seconds,
                aggregation: self.aggregation,
            },
            severity: self.severity,
            enabled: self.enabled,
            notification_channels: self.notification_channels,
            cooldown_seconds: self.cooldown_seconds,
            last_triggered: None,
        })
    }
}

/// Partial update for `update_rule`; unset fields are left as-is.
#[derive(Debug, Clone, Default)]
pub struct RulePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metric: Option<String>,
    pub operator: Option<String>,
    pub threshold: Option<f64>,
    pub severity: Option<AlertSeverity>,
    pub enabled: Option<bool>,
    pub notification_channels: Option<Vec<String>>,
    pub cooldown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertStatus {
    Active,
    Resolved,
    Suppressed,
}

/// One fired instance of a rule. At most one `Active` alert exists per rule
/// at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub status: AlertStatus,
    pub context: HashMap<String, String>,
}
