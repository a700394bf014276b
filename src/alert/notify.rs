use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::rules::Alert;

/// Delivery endpoint for one notification channel. Channel names are
/// free-form strings referenced by alert rules.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn notify(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Fans an alert out to its rule's channels. Fire-and-forget: one attempt
/// per channel per trigger, no retry. Each channel runs independently under
/// its own timeout, so a blocking or failing handler never delays or fails
/// delivery to the others.
pub struct NotificationDispatcher {
    timeout: Duration,
    handlers: RwLock<HashMap<String, Arc<dyn NotificationHandler>>>,
}

impl NotificationDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_handler(&self, channel: &str, handler: Arc<dyn NotificationHandler>) {
        let mut handlers = self.handlers.write().await;
        if handlers.insert(channel.to_string(), handler).is_some() {
            debug!(channel, "Replaced notification handler");
        }
    }

    /// Deliver `alert` to every listed channel. Returns the number of
    /// channels that accepted delivery.
    pub async fn dispatch(&self, alert: &Alert, channels: &[String]) -> usize {
        let handlers = self.handlers.read().await;
        let deliveries = channels.iter().map(|channel| {
            let handler = handlers.get(channel).cloned();
            async move {
                let handler = match handler {
                    Some(handler) => handler,
                    None => {
                        warn!(
                            channel,
                            rule = %alert.rule_name,
                            "No handler registered for notification channel"
                        );
                        return false;
                    }
                };

                match tokio::time::timeout(self.timeout, handler.notify(alert)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!(
                            channel,
                            rule = %alert.rule_name,
                            severity = ?alert.severity,
                            error = %e,
                            "Notification handler failed"
                        );
                        false
                    }
                    Err(_) => {
                        warn!(
                            channel,
                            rule = %alert.rule_name,
                            timeout = ?self.timeout,
                            "Notification handler timed out"
                        );
                        false
                    }
                }
            }
        });

        futures::future::join_all(deliveries)
            .await
            .into_iter()
            .filter(|delivered| *delivered)
            .count()
    }
}

/// Built-in channel that writes alerts to the process log.
pub struct LogNotificationHandler;

#[async_trait]
impl NotificationHandler for LogNotificationHandler {
    async fn notify(&self, alert: &Alert) -> anyhow::Result<()> {
        use super::rules::{AlertSeverity, AlertStatus};
        let action = match alert.status {
            AlertStatus::Active => "TRIGGERED",
            AlertStatus::Resolved => "RESOLVED",
            AlertStatus::Suppressed => "SUPPRESSED",
        };
        let line = format!("[ALERT {}] {} - {}", action, alert.rule_name, alert.message);
        match alert.severity {
            AlertSeverity::Critical => tracing::error!("{}", line),
            AlertSeverity::Warning => tracing::warn!("{}", line),
            AlertSeverity::Info => tracing::info!("{}", line),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::rules::{AlertSeverity, AlertStatus};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn test_alert() -> Alert {
        Alert {
            id: Uuid::new_v4(),
            rule_id: Uuid::new_v4(),
            rule_name: "high_error_rate".to_string(),
            severity: AlertSeverity::Warning,
            message: "error rate 20 over threshold 10".to_string(),
            triggered_at: Utc::now(),
            resolved_at: None,
            status: AlertStatus::Active,
            context: HashMap::new(),
        }
    }

    struct CountingHandler(AtomicUsize);

    #[async_trait]
    impl NotificationHandler for CountingHandler {
        async fn notify(&self, _alert: &Alert) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl NotificationHandler for FailingHandler {
        async fn notify(&self, _alert: &Alert) -> anyhow::Result<()> {
            anyhow::bail!("webhook unreachable")
        }
    }

    struct HangingHandler;

    #[async_trait]
    impl NotificationHandler for HangingHandler {
        async fn notify(&self, _alert: &Alert) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_block_others() {
        let dispatcher = NotificationDispatcher::new(Duration::from_millis(200));
        let counter = Arc::new(CountingHandler(AtomicUsize::new(0)));
        dispatcher.register_handler("ok", counter.clone()).await;
        dispatcher
            .register_handler("broken", Arc::new(FailingHandler))
            .await;

        let delivered = dispatcher
            .dispatch(&test_alert(), &["broken".to_string(), "ok".to_string()])
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hanging_channel_is_timed_out() {
        let dispatcher = NotificationDispatcher::new(Duration::from_millis(50));
        let counter = Arc::new(CountingHandler(AtomicUsize::new(0)));
        dispatcher.register_handler("ok", counter.clone()).await;
        dispatcher
            .register_handler("slow", Arc::new(HangingHandler))
            .await;

        let start = std::time::Instant::now();
        let delivered = dispatcher
            .dispatch(&test_alert(), &["slow".to_string(), "ok".to_string()])
            .await;

        assert_eq!(delivered, 1);
        // Channels run concurrently: total time is one timeout, not two
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_unknown_channel_is_skipped() {
        let dispatcher = NotificationDispatcher::new(Duration::from_millis(50));
        let delivered = dispatcher
            .dispatch(&test_alert(), &["nowhere".to_string()])
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_log_handler_accepts_alert() {
        let handler = LogNotificationHandler;
        assert!(handler.notify(&test_alert()).await.is_ok());
    }
}
