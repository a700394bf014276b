use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identity of one hop within a call chain. Immutable once created; this is
/// the explicit per-chain context callers thread through `start_child_span`
/// and `finish` instead of relying on any process-wide "current span".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub parent_span_id: Option<Uuid>,
    pub service: String,
    pub operation: String,
    pub start_time: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl TraceContext {
    /// Root context for a new call chain.
    pub fn new_root(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            parent_span_id: None,
            service: service.into(),
            operation: operation.into(),
            start_time: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Context for a hop beneath `parent`, sharing its trace id.
    pub fn child_of(
        parent: &TraceContext,
        service: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: parent.trace_id,
            span_id: Uuid::new_v4(),
            parent_span_id: Some(parent.span_id),
            service: service.into(),
            operation: operation.into(),
            start_time: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SpanStatus {
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One append-only log entry attached to a span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanLog {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// One timed hop. Open (mutable via the recorder) while `Running`,
/// immutable once finished. Children are exclusively owned: they live and
/// die with this span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub context: TraceContext,
    pub status: SpanStatus,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tags: HashMap<String, String>,
    pub logs: Vec<SpanLog>,
    pub children: Vec<Span>,
}

impl Span {
    pub fn new(context: TraceContext) -> Self {
        Self {
            context,
            status: SpanStatus::Running,
            end_time: None,
            error: None,
            tags: HashMap::new(),
            logs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.context.start_time).num_milliseconds())
    }

    /// This span plus its whole subtree, depth-first.
    pub fn iter_subtree(&self) -> Vec<&Span> {
        let mut spans = vec![self];
        for child in &self.children {
            spans.extend(child.iter_subtree());
        }
        spans
    }

    pub fn span_count(&self) -> usize {
        1 + self.children.iter().map(Span::span_count).sum::<usize>()
    }
}

/// How a span (and, for roots, the whole trace) ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanOutcome {
    Success,
    Error(String),
    Timeout(String),
}

impl SpanOutcome {
    pub fn error_message(&self) -> Option<&str> {
        match self {
            SpanOutcome::Success => None,
            SpanOutcome::Error(msg) | SpanOutcome::Timeout(msg) => Some(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TraceStatus {
    Success,
    Error,
    Timeout,
}

/// The persisted, finished form of a root span and its subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_id: Uuid,
    pub service: String,
    pub operation: String,
    pub duration_ms: i64,
    pub status: TraceStatus,
    pub root: Span,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TraceRecord {
    pub fn span_count(&self) -> usize {
        self.root.span_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_context_shares_trace_id() {
        let root = TraceContext::new_root("checkout", "place_order");
        let child = TraceContext::child_of(&root, "checkout", "charge_card");

        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_span_id, Some(root.span_id));
        assert_ne!(child.span_id, root.span_id);
        assert!(root.is_root());
        assert!(!child.is_root());
    }

    #[test]
    fn test_subtree_iteration_counts_every_hop() {
        let root_ctx = TraceContext::new_root("svc", "root");
        let mut root = Span::new(root_ctx.clone());
        let mut child = Span::new(TraceContext::child_of(&root_ctx, "svc", "child"));
        child
            .children
            .push(Span::new(TraceContext::child_of(&child.context, "svc", "leaf")));
        root.children.push(child);

        assert_eq!(root.span_count(), 3);
        assert_eq!(root.iter_subtree().len(), 3);
    }
}
