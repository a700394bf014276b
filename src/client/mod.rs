pub mod messaging;
pub mod transport;

pub use messaging::*;
pub use transport::*;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::correlation;
use crate::error::{CallError, ErrorKind};
use crate::metrics::MetricsAggregator;
use crate::resilience::{BreakerRegistry, CircuitBreaker, RetryManager, RetryObserver};
use crate::trace::{LogLevel, SpanOptions, SpanOutcome, TraceContext, TraceRecorder};

/// Per-call options. Everything is optional; defaults come from the
/// client's configuration.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Reuse a propagated correlation id instead of minting one
    pub correlation_id: Option<String>,
    /// Namespace prefix for a minted correlation id
    pub correlation_prefix: Option<String>,
    /// Extra headers for the outbound request
    pub headers: HashMap<String, String>,
    /// Logical destination override (breaker/metrics key)
    pub destination: Option<String>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    /// Join an existing call chain instead of rooting a new trace
    pub parent: Option<TraceContext>,
}

/// Uniform result of every client operation. The client never returns an
/// error to its caller; all failure paths fold into `success: false`.
#[derive(Debug, Clone, Serialize)]
pub struct CallOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub correlation_id: String,
}

/// The facade callers use for outbound calls, messages and events. Wires
/// together tracing, metrics, retry and circuit breaking, and propagates
/// correlation ids on every path.
pub struct ServiceClient {
    service_name: String,
    destination: String,
    default_timeout: Duration,
    retry_config: crate::config::RetryConfig,
    transport: Arc<dyn Transport>,
    recorder: Arc<TraceRecorder>,
    metrics: Arc<MetricsAggregator>,
    breakers: Arc<BreakerRegistry>,
    bus: Arc<MessageBus>,
}

impl ServiceClient {
    pub fn new(
        config: &Config,
        destination: impl Into<String>,
        transport: Arc<dyn Transport>,
        recorder: Arc<TraceRecorder>,
        metrics: Arc<MetricsAggregator>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            service_name: config.service_name.clone(),
            destination: destination.into(),
            default_timeout: Duration::from_secs(30),
            retry_config: config.retry.clone(),
            transport,
            recorder,
            metrics,
            breakers,
            bus: Arc::new(MessageBus::new()),
        }
    }

    pub async fn get(&self, path: &str, opts: CallOptions) -> CallOutcome {
        self.call(HttpMethod::Get, path, None, opts).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        opts: CallOptions,
    ) -> CallOutcome {
        self.call(HttpMethod::Post, path, Some(body), opts).await
    }

    pub async fn put(&self, path: &str, body: serde_json::Value, opts: CallOptions) -> CallOutcome {
        self.call(HttpMethod::Put, path, Some(body), opts).await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: serde_json::Value,
        opts: CallOptions,
    ) -> CallOutcome {
        self.call(HttpMethod::Patch, path, Some(body), opts).await
    }

    pub async fn delete(&self, path: &str, opts: CallOptions) -> CallOutcome {
        self.call(HttpMethod::Delete, path, None, opts).await
    }

    /// Perform one resilient outbound call: span, breaker check, retries,
    /// per-attempt metrics, uniform outcome.
    pub async fn call(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<serde_json::Value>,
        opts: CallOptions,
    ) -> CallOutcome {
        let started = Instant::now();
        let destination = opts
            .destination
            .clone()
            .unwrap_or_else(|| self.destination.clone());
        let correlation_id = opts
            .correlation_id
            .clone()
            .filter(|id| correlation::is_valid(id))
            .unwrap_or_else(|| correlation::generate(opts.correlation_prefix.as_deref()));

        let operation = format!("{} {}", method, path);
        let ctx = match &opts.parent {
            Some(parent) => {
                self.recorder
                    .start_child_span(parent, &operation, SpanOptions::default())
                    .await
            }
            None => self.recorder.start_span(&operation, SpanOptions::default()).await,
        };
        self.recorder.tag(&ctx, "http.method", method.as_str()).await;
        self.recorder.tag(&ctx, "http.path", path).await;
        self.recorder.tag(&ctx, "peer.service", &destination).await;
        self.recorder.tag(&ctx, "correlation_id", &correlation_id).await;

        let breaker = self.breakers.breaker(&destination).await;

        // Open circuit: fail fast, no transport involved, zero duration.
        if breaker.is_open().await {
            let error = CallError::CircuitOpen {
                destination: destination.clone(),
            };
            warn!(destination = %destination, "Call rejected by open circuit");
            self.recorder
                .log(&ctx, LogLevel::Warn, &error.to_string(), None)
                .await;
            self.recorder
                .finish(&ctx, SpanOutcome::Error(error.to_string()))
                .await;
            return CallOutcome {
                success: false,
                data: None,
                error: Some(error.to_string()),
                duration_ms: 0,
                correlation_id,
            };
        }

        let mut headers = opts.headers.clone();
        correlation::inject(&mut headers, &correlation_id, ctx.trace_id);

        let request = TransportRequest {
            method,
            destination: destination.clone(),
            path: path.to_string(),
            headers,
            body,
            timeout: opts.timeout.unwrap_or(self.default_timeout),
        };

        let mut retry_config = self.retry_config.clone();
        if let Some(max_retries) = opts.max_retries {
            retry_config.max_retries = max_retries;
        }
        let retry = RetryManager::new(retry_config);
        let observer = BreakerObserver {
            breaker: breaker.clone(),
            destination: destination.clone(),
        };

        let result = retry
            .execute(
                || self.attempt(request.clone(), breaker.clone()),
                &observer,
            )
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(response) => {
                self.recorder.finish(&ctx, SpanOutcome::Success).await;
                CallOutcome {
                    success: true,
                    data: response.body,
                    error: None,
                    duration_ms,
                    correlation_id,
                }
            }
            Err(error) => {
                self.recorder
                    .log(&ctx, LogLevel::Error, &error.to_string(), None)
                    .await;
                let outcome = match &error {
                    CallError::Timeout { .. } => SpanOutcome::Timeout(error.to_string()),
                    _ => SpanOutcome::Error(error.to_string()),
                };
                self.recorder.finish(&ctx, outcome).await;
                CallOutcome {
                    success: false,
                    data: None,
                    error: Some(error.to_string()),
                    duration_ms,
                    correlation_id,
                }
            }
        }
    }

    /// One transport attempt with metrics and breaker bookkeeping.
    async fn attempt(
        &self,
        request: TransportRequest,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<TransportResponse, CallError> {
        let attempt_start = Instant::now();
        let result = self.transport.send(&request).await;
        let elapsed_ms = attempt_start.elapsed().as_millis() as f64;

        match result {
            // 1xx/2xx only: a 3xx surfacing here means the transport did not
            // resolve the redirect, which is a logged, non-retried failure
            Ok(response) if response.status < 300 => {
                self.metrics
                    .record_http_request(
                        &request.destination,
                        request.method.as_str(),
                        &request.path,
                        response.status,
                        elapsed_ms,
                        None,
                    )
                    .await;
                breaker.record_success().await;
                Ok(response)
            }
            Ok(response) => {
                let message = response
                    .body
                    .as_ref()
                    .and_then(|b| b.get("error"))
                    .and_then(|e| e.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("HTTP {}", response.status));
                let error = CallError::from_status(response.status, message);
                self.metrics
                    .record_http_request(
                        &request.destination,
                        request.method.as_str(),
                        &request.path,
                        response.status,
                        elapsed_ms,
                        Some(&error.to_string()),
                    )
                    .await;
                // Only destination faults count against the breaker
                if error.kind() == ErrorKind::ServerError {
                    breaker.record_failure().await;
                }
                Err(error)
            }
            Err(error) => {
                let status = match &error {
                    CallError::Timeout { .. } => 504,
                    _ => 503,
                };
                self.metrics
                    .record_http_request(
                        &request.destination,
                        request.method.as_str(),
                        &request.path,
                        status,
                        elapsed_ms,
                        Some(&error.to_string()),
                    )
                    .await;
                breaker.record_failure().await;
                Err(error)
            }
        }
    }

    /// Publish a message to a channel. Subscriber failures are logged into
    /// the publish span; the publisher always gets a successful outcome for
    /// a completed fan-out.
    pub async fn send_message(
        &self,
        channel: &str,
        payload: serde_json::Value,
        opts: CallOptions,
    ) -> CallOutcome {
        let started = Instant::now();
        let correlation_id = opts
            .correlation_id
            .clone()
            .filter(|id| correlation::is_valid(id))
            .unwrap_or_else(|| correlation::generate(opts.correlation_prefix.as_deref()));

        let operation = format!("publish {}", channel);
        let ctx = match &opts.parent {
            Some(parent) => {
                self.recorder
                    .start_child_span(parent, &operation, SpanOptions::default())
                    .await
            }
            None => self.recorder.start_span(&operation, SpanOptions::default()).await,
        };
        self.recorder.tag(&ctx, "messaging.channel", channel).await;
        self.recorder.tag(&ctx, "correlation_id", &correlation_id).await;

        let message = Message {
            id: uuid::Uuid::new_v4(),
            channel: channel.to_string(),
            payload,
            correlation_id: correlation_id.clone(),
            timestamp: chrono::Utc::now(),
        };

        let report = self.bus.deliver_message(&message).await;
        for failure in &report.failures {
            self.recorder
                .log(&ctx, LogLevel::Error, failure, None)
                .await;
        }
        self.recorder.finish(&ctx, SpanOutcome::Success).await;

        CallOutcome {
            success: true,
            data: Some(serde_json::json!({
                "delivered": report.delivered,
                "failed": report.failures.len(),
            })),
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
            correlation_id,
        }
    }

    pub async fn subscribe_to_messages(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Subscription<dyn MessageHandler> {
        let traced = Arc::new(TracedMessageHandler {
            recorder: self.recorder.clone(),
            inner: handler,
        });
        self.bus.subscribe_messages(channel, traced).await
    }

    /// Publish a domain event. Same isolation as messages: handler errors
    /// surface only as logged trace errors.
    pub async fn publish_event(
        &self,
        event_type: &str,
        aggregate_id: &str,
        data: serde_json::Value,
        opts: CallOptions,
    ) -> CallOutcome {
        let started = Instant::now();
        let correlation_id = opts
            .correlation_id
            .clone()
            .filter(|id| correlation::is_valid(id))
            .unwrap_or_else(|| correlation::generate(opts.correlation_prefix.as_deref()));

        let operation = format!("event {}", event_type);
        let ctx = match &opts.parent {
            Some(parent) => {
                self.recorder
                    .start_child_span(parent, &operation, SpanOptions::default())
                    .await
            }
            None => self.recorder.start_span(&operation, SpanOptions::default()).await,
        };
        self.recorder.tag(&ctx, "event.type", event_type).await;
        self.recorder.tag(&ctx, "event.aggregate_id", aggregate_id).await;
        self.recorder.tag(&ctx, "correlation_id", &correlation_id).await;

        let event = EventEnvelope {
            id: uuid::Uuid::new_v4(),
            event_type: event_type.to_string(),
            aggregate_id: aggregate_id.to_string(),
            data,
            correlation_id: correlation_id.clone(),
            timestamp: chrono::Utc::now(),
        };

        let report = self.bus.deliver_event(&event).await;
        for failure in &report.failures {
            self.recorder
                .log(&ctx, LogLevel::Error, failure, None)
                .await;
        }
        self.recorder.finish(&ctx, SpanOutcome::Success).await;

        CallOutcome {
            success: true,
            data: Some(serde_json::json!({
                "delivered": report.delivered,
                "failed": report.failures.len(),
            })),
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
            correlation_id,
        }
    }

    pub async fn subscribe_to_events(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription<dyn EventHandler> {
        let traced = Arc::new(TracedEventHandler {
            recorder: self.recorder.clone(),
            inner: handler,
        });
        self.bus.subscribe_events(event_type, traced).await
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Retry hooks that consult the destination's circuit breaker.
struct BreakerObserver {
    breaker: Arc<CircuitBreaker>,
    destination: String,
}

#[async_trait]
impl RetryObserver for BreakerObserver {
    async fn should_retry(&self, error: &CallError) -> bool {
        error.is_retryable() && !self.breaker.is_open().await
    }

    async fn on_retry(&self, attempt: u32, error: &CallError) {
        debug!(
            destination = %self.destination,
            attempt,
            "Retrying after failure: {}",
            error
        );
    }

    async fn on_success(&self) {}
}

/// Wraps a subscriber so every delivery runs inside its own span and its
/// failures are recorded as trace errors rather than reaching the
/// publisher.
struct TracedMessageHandler {
    recorder: Arc<TraceRecorder>,
    inner: Arc<dyn MessageHandler>,
}

#[async_trait]
impl MessageHandler for TracedMessageHandler {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        let ctx = self
            .recorder
            .start_span(&format!("consume {}", message.channel), SpanOptions::default())
            .await;
        self.recorder
            .tag(&ctx, "messaging.channel", &message.channel)
            .await;
        self.recorder
            .tag(&ctx, "correlation_id", &message.correlation_id)
            .await;

        match self.inner.handle(message).await {
            Ok(()) => {
                self.recorder.finish(&ctx, SpanOutcome::Success).await;
                Ok(())
            }
            Err(e) => {
                warn!(
                    channel = %message.channel,
                    correlation_id = %message.correlation_id,
                    error = %e,
                    "Message handler failed"
                );
                self.recorder
                    .finish(&ctx, SpanOutcome::Error(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }
}

struct TracedEventHandler {
    recorder: Arc<TraceRecorder>,
    inner: Arc<dyn EventHandler>,
}

#[async_trait]
impl EventHandler for TracedEventHandler {
    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        let ctx = self
            .recorder
            .start_span(&format!("handle {}", event.event_type), SpanOptions::default())
            .await;
        self.recorder.tag(&ctx, "event.type", &event.event_type).await;
        self.recorder
            .tag(&ctx, "event.aggregate_id", &event.aggregate_id)
            .await;
        self.recorder
            .tag(&ctx, "correlation_id", &event.correlation_id)
            .await;

        match self.inner.handle(event).await {
            Ok(()) => {
                self.recorder.finish(&ctx, SpanOutcome::Success).await;
                Ok(())
            }
            Err(e) => {
                warn!(
                    event_type = %event.event_type,
                    aggregate_id = %event.aggregate_id,
                    error = %e,
                    "Event handler failed"
                );
                self.recorder
                    .finish(&ctx, SpanOutcome::Error(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, Config, RetryConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Transport that pops scripted results per call.
    struct ScriptedTransport {
        calls: AtomicUsize,
        script: Mutex<Vec<Result<TransportResponse, CallError>>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<TransportResponse, CallError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script),
            })
        }

        fn ok(status: u16) -> Result<TransportResponse, CallError> {
            Ok(TransportResponse {
                status,
                body: Some(serde_json::json!({"status": status})),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: &TransportRequest) -> Result<TransportResponse, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().await;
            if script.is_empty() {
                Self::ok(200)
            } else {
                script.remove(0)
            }
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.service_name = "checkout".to_string();
        config.retry = RetryConfig {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            exponential_base: 2.0,
            jitter: false,
        };
        config.breaker = BreakerConfig {
            failure_threshold: 3,
            reset_timeout_seconds: 60,
            idle_ttl_seconds: 3600,
        };
        config
    }

    struct Harness {
        client: ServiceClient,
        transport: Arc<ScriptedTransport>,
        recorder: Arc<TraceRecorder>,
        metrics: Arc<MetricsAggregator>,
        breakers: Arc<BreakerRegistry>,
    }

    fn harness(script: Vec<Result<TransportResponse, CallError>>) -> Harness {
        let config = fast_config();
        let transport = ScriptedTransport::new(script);
        let recorder = Arc::new(TraceRecorder::new(
            config.service_name.clone(),
            config.tracing.clone(),
        ));
        let metrics = Arc::new(MetricsAggregator::new(config.metrics.clone()));
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let client = ServiceClient::new(
            &config,
            "billing",
            transport.clone(),
            recorder.clone(),
            metrics.clone(),
            breakers.clone(),
        );
        Harness {
            client,
            transport,
            recorder,
            metrics,
            breakers,
        }
    }

    #[tokio::test]
    async fn test_successful_get_records_span_and_metrics() {
        let h = harness(vec![ScriptedTransport::ok(200)]);
        let outcome = h.client.get("/health", CallOptions::default()).await;

        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert!(crate::correlation::is_valid(&outcome.correlation_id));

        let traces = h.recorder.recent_traces(10).await;
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].operation, "GET /health");
        assert_eq!(traces[0].root.tags.get("peer.service").unwrap(), "billing");

        let snapshot = h.metrics.current("billing").await.unwrap();
        assert_eq!(snapshot.requests.total, 1);
        assert_eq!(snapshot.requests.successful, 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retried_to_success() {
        let h = harness(vec![ScriptedTransport::ok(502), ScriptedTransport::ok(200)]);
        let outcome = h.client.get("/items", CallOptions::default()).await;

        assert!(outcome.success);
        assert_eq!(h.transport.call_count(), 2);

        // Both attempts were recorded
        let snapshot = h.metrics.current("billing").await.unwrap();
        assert_eq!(snapshot.requests.total, 2);
        assert_eq!(snapshot.requests.failed, 1);

        // The intervening success reset the breaker
        let breaker = h.breakers.breaker("billing").await;
        assert_eq!(breaker.stats().await.failure_count, 0);
    }

    #[tokio::test]
    async fn test_client_error_returns_without_retry() {
        let h = harness(vec![ScriptedTransport::ok(404)]);
        let outcome = h.client.get("/missing", CallOptions::default()).await;

        assert!(!outcome.success);
        assert_eq!(h.transport.call_count(), 1);
        assert!(outcome.error.unwrap().contains("client error"));

        // 4xx does not count against the breaker
        let breaker = h.breakers.breaker("billing").await;
        assert_eq!(breaker.stats().await.failure_count, 0);
    }

    #[tokio::test]
    async fn test_redirect_response_fails_without_retry() {
        let h = harness(vec![ScriptedTransport::ok(301)]);
        let outcome = h.client.get("/moved", CallOptions::default()).await;

        assert!(!outcome.success);
        assert_eq!(h.transport.call_count(), 1);
        assert!(outcome.error.unwrap().contains("redirect"));

        // Redirects count against neither the breaker nor the failure totals
        let breaker = h.breakers.breaker("billing").await;
        assert_eq!(breaker.stats().await.failure_count, 0);
        let snapshot = h.metrics.current("billing").await.unwrap();
        assert_eq!(snapshot.requests.total, 1);
        assert_eq!(snapshot.requests.failed, 0);

        let traces = h.recorder.recent_traces(10).await;
        assert_eq!(traces[0].status, crate::trace::TraceStatus::Error);
    }

    #[tokio::test]
    async fn test_never_throws_on_exhausted_retries() {
        let h = harness(vec![
            ScriptedTransport::ok(500),
            ScriptedTransport::ok(500),
            ScriptedTransport::ok(500),
        ]);
        let outcome = h.client.get("/flaky", CallOptions::default()).await;

        assert!(!outcome.success);
        assert_eq!(h.transport.call_count(), 3); // 1 attempt + 2 retries
        assert!(outcome.error.is_some());

        let traces = h.recorder.recent_traces(10).await;
        assert_eq!(traces[0].status, crate::trace::TraceStatus::Error);
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast_without_transport() {
        let h = harness(vec![]);
        let breaker = h.breakers.breaker("billing").await;
        for _ in 0..3 {
            breaker.record_failure().await;
        }

        let outcome = h.client.get("/health", CallOptions::default()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.duration_ms, 0);
        assert_eq!(h.transport.call_count(), 0);
        assert!(outcome.error.unwrap().contains("circuit open"));
    }

    #[tokio::test]
    async fn test_correlation_id_reused_and_prefixed() {
        let h = harness(vec![ScriptedTransport::ok(200), ScriptedTransport::ok(200)]);

        let supplied = crate::correlation::generate(Some("edge"));
        let outcome = h
            .client
            .get(
                "/a",
                CallOptions {
                    correlation_id: Some(supplied.clone()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(outcome.correlation_id, supplied);

        let outcome = h
            .client
            .get(
                "/b",
                CallOptions {
                    correlation_prefix: Some("checkout".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(outcome.correlation_id.starts_with("checkout_"));
    }

    #[tokio::test]
    async fn test_parent_context_joins_chain() {
        let h = harness(vec![ScriptedTransport::ok(200)]);
        let parent = h
            .recorder
            .start_span("handle_request", SpanOptions::default())
            .await;

        let outcome = h
            .client
            .get(
                "/downstream",
                CallOptions {
                    parent: Some(parent.clone()),
                    ..Default::default()
                },
            )
            .await;
        assert!(outcome.success);

        let record = h
            .recorder
            .finish(&parent, SpanOutcome::Success)
            .await
            .unwrap();
        assert_eq!(record.span_count(), 2);
        assert_eq!(record.root.children[0].context.operation, "GET /downstream");
    }

    #[tokio::test]
    async fn test_message_handler_errors_stay_with_subscriber() {
        struct Exploding;

        #[async_trait]
        impl MessageHandler for Exploding {
            async fn handle(&self, _message: &Message) -> anyhow::Result<()> {
                anyhow::bail!("subscriber exploded")
            }
        }

        let h = harness(vec![]);
        let _sub = h
            .client
            .subscribe_to_messages("orders", Arc::new(Exploding))
            .await;

        let outcome = h
            .client
            .send_message("orders", serde_json::json!({"order": 1}), CallOptions::default())
            .await;

        // Publisher sees success; the failure lives in trace data
        assert!(outcome.success);
        assert_eq!(outcome.data.unwrap()["failed"], 1);

        let traces = h.recorder.recent_traces(10).await;
        let consume = traces
            .iter()
            .find(|t| t.operation == "consume orders")
            .unwrap();
        assert_eq!(consume.status, crate::trace::TraceStatus::Error);
    }

    #[tokio::test]
    async fn test_event_publish_and_unsubscribe() {
        struct Counting(AtomicUsize);

        #[async_trait]
        impl EventHandler for Counting {
            async fn handle(&self, _event: &EventEnvelope) -> anyhow::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let h = harness(vec![]);
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let sub = h
            .client
            .subscribe_to_events("order.placed", counter.clone())
            .await;

        let outcome = h
            .client
            .publish_event(
                "order.placed",
                "order-42",
                serde_json::json!({"total": 99}),
                CallOptions::default(),
            )
            .await;
        assert!(outcome.success);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        sub.unsubscribe().await;
        h.client
            .publish_event(
                "order.placed",
                "order-43",
                serde_json::json!({"total": 5}),
                CallOptions::default(),
            )
            .await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
