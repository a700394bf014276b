pub mod alert;
pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod resilience;
pub mod trace;

pub use config::Config;
pub use error::{CallError, CoreError, ErrorKind, Result};

// Re-export tracing types for convenience
pub use trace::{
    ExportedSpan, Span, SpanOptions, SpanOutcome, TraceContext, TraceRecord, TraceRecorder,
    TraceStatus,
};

// Re-export metrics types
pub use metrics::{
    ErrorRecord, HealthStatus, MetricsAggregator, MetricsExporter, OverallStats,
    ServiceMetricsSnapshot,
};

// Re-export alerting types
pub use alert::{
    Alert, AlertEvaluator, AlertRule, AlertSeverity, AlertStatus, LogNotificationHandler,
    MetricPath, NotificationDispatcher, NotificationHandler, RulePatch, RuleSpec,
};

// Re-export resilience types
pub use resilience::{
    BreakerRegistry, BreakerStats, CircuitBreaker, CircuitState, RetryManager, RetryObserver,
};

// Re-export client types
pub use client::{
    CallOptions, CallOutcome, EventHandler, HttpMethod, HttpTransport, Message, MessageBus,
    MessageHandler, ServiceClient, Subscription, Transport,
};
