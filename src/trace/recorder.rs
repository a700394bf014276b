use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::export::ExportedSpan;
use super::span::{
    LogLevel, Span, SpanLog, SpanOutcome, SpanStatus, TraceContext, TraceRecord, TraceStatus,
};
use crate::config::TracingConfig;

/// Options for opening a span.
#[derive(Debug, Clone, Default)]
pub struct SpanOptions {
    /// Service name override; defaults to the recorder's own service
    pub service: Option<String>,
    /// Initial context metadata
    pub metadata: HashMap<String, String>,
    /// Propagated context from an upstream hop (cross-service parent)
    pub parent: Option<TraceContext>,
}

struct RecorderInner {
    /// Spans not yet assembled into a persisted trace, keyed by span id.
    /// Finished non-root spans stay here until their root finishes.
    open: HashMap<Uuid, Span>,
    /// Parent span id -> child span ids, for subtree assembly.
    child_index: HashMap<Uuid, Vec<Uuid>>,
    /// Finished root traces, oldest first.
    history: VecDeque<TraceRecord>,
}

/// Creates and finishes spans, assembles span trees, and keeps a bounded
/// FIFO history of finished root traces.
pub struct TraceRecorder {
    service_name: String,
    config: TracingConfig,
    inner: Arc<RwLock<RecorderInner>>,
}

impl TraceRecorder {
    pub fn new(service_name: impl Into<String>, config: TracingConfig) -> Self {
        Self {
            service_name: service_name.into(),
            config,
            inner: Arc::new(RwLock::new(RecorderInner {
                open: HashMap::new(),
                child_index: HashMap::new(),
                history: VecDeque::new(),
            })),
        }
    }

    /// Open a span. With `opts.parent` set the span joins the propagated
    /// trace; otherwise it roots a new one.
    pub async fn start_span(&self, operation: &str, opts: SpanOptions) -> TraceContext {
        let service = opts
            .service
            .unwrap_or_else(|| self.service_name.clone());

        let mut context = match &opts.parent {
            Some(parent) => TraceContext::child_of(parent, service, operation),
            None => TraceContext::new_root(service, operation),
        };
        context.metadata.extend(opts.metadata);

        self.register(Span::new(context.clone())).await;
        context
    }

    /// Open a span beneath an explicitly passed parent context. The parent
    /// travels with the call chain, so concurrent chains never contend over
    /// a shared "current span".
    pub async fn start_child_span(
        &self,
        parent: &TraceContext,
        operation: &str,
        opts: SpanOptions,
    ) -> TraceContext {
        let service = opts
            .service
            .unwrap_or_else(|| parent.service.clone());

        let mut context = TraceContext::child_of(parent, service, operation);
        context.metadata.extend(opts.metadata);

        self.register(Span::new(context.clone())).await;
        context
    }

    async fn register(&self, span: Span) {
        let mut inner = self.inner.write().await;
        if let Some(parent_id) = span.context.parent_span_id {
            inner
                .child_index
                .entry(parent_id)
                .or_default()
                .push(span.context.span_id);
        }
        inner.open.insert(span.context.span_id, span);
    }

    /// Append a log entry to an open span. Logging against a finished or
    /// unknown span is dropped; bookkeeping never fails the caller.
    pub async fn log(
        &self,
        ctx: &TraceContext,
        level: LogLevel,
        message: &str,
        data: Option<serde_json::Value>,
    ) {
        let mut inner = self.inner.write().await;
        match inner.open.get_mut(&ctx.span_id) {
            Some(span) if span.status == SpanStatus::Running => {
                span.logs.push(SpanLog {
                    timestamp: Utc::now(),
                    level,
                    message: message.to_string(),
                    data,
                });
            }
            _ => debug!(span_id = %ctx.span_id, "Dropped log for finished or unknown span"),
        }
    }

    /// Set a tag on an open span (last write wins).
    pub async fn tag(&self, ctx: &TraceContext, key: &str, value: &str) {
        let mut inner = self.inner.write().await;
        match inner.open.get_mut(&ctx.span_id) {
            Some(span) if span.status == SpanStatus::Running => {
                span.tags.insert(key.to_string(), value.to_string());
            }
            _ => debug!(span_id = %ctx.span_id, "Dropped tag for finished or unknown span"),
        }
    }

    /// Finish a span. Finishing a root assembles its full subtree into a
    /// `TraceRecord` and appends it to bounded history; finishing a
    /// non-root span only marks it complete, leaving it owned by its
    /// parent. Returns the persisted record when one was produced.
    pub async fn finish(&self, ctx: &TraceContext, outcome: SpanOutcome) -> Option<TraceRecord> {
        let mut inner = self.inner.write().await;

        let span = match inner.open.get_mut(&ctx.span_id) {
            Some(span) => span,
            None => {
                debug!(span_id = %ctx.span_id, "Finish called for unknown span");
                return None;
            }
        };
        if span.status != SpanStatus::Running {
            debug!(span_id = %ctx.span_id, "Finish called twice for span");
            return None;
        }

        span.end_time = Some(Utc::now());
        span.error = outcome.error_message().map(str::to_string);
        span.status = match outcome {
            SpanOutcome::Success => SpanStatus::Completed,
            SpanOutcome::Error(_) | SpanOutcome::Timeout(_) => SpanStatus::Error,
        };

        // A span persists when nothing above it is locally open: true roots,
        // and subtree roots whose parent lives in an upstream process.
        let locally_rooted = match ctx.parent_span_id {
            None => true,
            Some(parent_id) => !inner.open.contains_key(&parent_id),
        };
        if !locally_rooted {
            return None;
        }

        let root = Self::assemble(&mut inner, ctx.span_id)?;
        let end_time = root.end_time.unwrap_or_else(Utc::now);
        let record = TraceRecord {
            trace_id: root.context.trace_id,
            service: root.context.service.clone(),
            operation: root.context.operation.clone(),
            duration_ms: (end_time - root.context.start_time).num_milliseconds(),
            status: match outcome {
                SpanOutcome::Success => TraceStatus::Success,
                SpanOutcome::Error(_) => TraceStatus::Error,
                SpanOutcome::Timeout(_) => TraceStatus::Timeout,
            },
            start_time: root.context.start_time,
            end_time,
            root,
        };

        inner.history.push_back(record.clone());
        while inner.history.len() > self.config.max_trace_history {
            inner.history.pop_front();
        }

        debug!(
            trace_id = %record.trace_id,
            spans = record.span_count(),
            duration_ms = record.duration_ms,
            "Persisted trace record"
        );
        Some(record)
    }

    /// Detach `span_id` and its whole subtree from the open table.
    fn assemble(inner: &mut RecorderInner, span_id: Uuid) -> Option<Span> {
        let mut span = inner.open.remove(&span_id)?;
        if let Some(child_ids) = inner.child_index.remove(&span_id) {
            for child_id in child_ids {
                if let Some(child) = Self::assemble(inner, child_id) {
                    span.children.push(child);
                }
            }
        }
        Some(span)
    }

    /// Currently running spans, newest first.
    pub async fn open_spans(&self) -> Vec<Span> {
        let inner = self.inner.read().await;
        let mut spans: Vec<Span> = inner
            .open
            .values()
            .filter(|s| s.status == SpanStatus::Running)
            .cloned()
            .collect();
        spans.sort_by(|a, b| b.context.start_time.cmp(&a.context.start_time));
        spans
    }

    /// The most recent `limit` finished traces, newest first.
    pub async fn recent_traces(&self, limit: usize) -> Vec<TraceRecord> {
        let inner = self.inner.read().await;
        inner.history.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get_trace(&self, trace_id: Uuid) -> Option<TraceRecord> {
        let inner = self.inner.read().await;
        inner
            .history
            .iter()
            .rev()
            .find(|record| record.trace_id == trace_id)
            .cloned()
    }

    pub async fn trace_count(&self) -> usize {
        self.inner.read().await.history.len()
    }

    /// Flatten the most recent `limit` traces into exportable hop records
    /// for a standard tracing backend.
    pub async fn export_recent(&self, limit: usize) -> Vec<ExportedSpan> {
        let inner = self.inner.read().await;
        inner
            .history
            .iter()
            .rev()
            .take(limit)
            .flat_map(ExportedSpan::from_record)
            .collect()
    }

    /// Remove abandoned running spans and over-age history. Time-based:
    /// nothing is retroactively cancelled, stale spans are simply dropped.
    pub async fn cleanup_stale(&self) -> usize {
        let cutoff = Utc::now() - Duration::hours(self.config.stale_after_hours as i64);
        let mut inner = self.inner.write().await;

        let stale_ids: Vec<Uuid> = inner
            .open
            .values()
            .filter(|s| s.status == SpanStatus::Running && s.context.start_time < cutoff)
            .map(|s| s.context.span_id)
            .collect();
        for span_id in &stale_ids {
            if let Some(span) = inner.open.remove(span_id) {
                warn!(
                    span_id = %span_id,
                    operation = %span.context.operation,
                    "Reaped stale running span"
                );
            }
            inner.child_index.remove(span_id);
        }

        let before = inner.history.len();
        inner.history.retain(|record| record.end_time >= cutoff);
        let removed = stale_ids.len() + before - inner.history.len();

        if removed > 0 {
            info!(removed, "Cleaned up stale trace data");
        }
        removed
    }
}
