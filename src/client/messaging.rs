use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// One message published to a named channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel: String,
    pub payload: serde_json::Value,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
}

/// One domain event published against an aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_id: String,
    pub data: serde_json::Value,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()>;
}

type HandlerMap<H> = HashMap<String, HashMap<u64, Arc<H>>>;

/// Handle returned from subscribe calls; consuming it detaches the handler.
pub struct Subscription<H: ?Sized> {
    key: String,
    id: u64,
    registry: Weak<RwLock<HandlerMap<H>>>,
}

impl<H: ?Sized + Send + Sync> Subscription<H> {
    pub async fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut map = registry.write().await;
            if let Some(handlers) = map.get_mut(&self.key) {
                handlers.remove(&self.id);
                if handlers.is_empty() {
                    map.remove(&self.key);
                }
            }
        }
    }
}

/// Outcome of one fan-out delivery. Handler failures are isolated per
/// subscriber and reported here for trace logging; they never reach the
/// publisher as errors.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failures: Vec<String>,
}

/// In-process pub/sub for messages (by channel) and events (by type).
pub struct MessageBus {
    next_id: AtomicU64,
    messages: Arc<RwLock<HandlerMap<dyn MessageHandler>>>,
    events: Arc<RwLock<HandlerMap<dyn EventHandler>>>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            messages: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn subscribe_messages(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Subscription<dyn MessageHandler> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut map = self.messages.write().await;
        map.entry(channel.to_string()).or_default().insert(id, handler);
        debug!(channel, "Registered message subscriber");
        Subscription {
            key: channel.to_string(),
            id,
            registry: Arc::downgrade(&self.messages),
        }
    }

    pub async fn subscribe_events(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription<dyn EventHandler> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut map = self.events.write().await;
        map.entry(event_type.to_string())
            .or_default()
            .insert(id, handler);
        debug!(event_type, "Registered event subscriber");
        Subscription {
            key: event_type.to_string(),
            id,
            registry: Arc::downgrade(&self.events),
        }
    }

    pub async fn deliver_message(&self, message: &Message) -> DeliveryReport {
        let handlers: Vec<Arc<dyn MessageHandler>> = {
            let map = self.messages.read().await;
            map.get(&message.channel)
                .map(|h| h.values().cloned().collect())
                .unwrap_or_default()
        };

        let results =
            futures::future::join_all(handlers.iter().map(|h| h.handle(message))).await;
        Self::report(results)
    }

    pub async fn deliver_event(&self, event: &EventEnvelope) -> DeliveryReport {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let map = self.events.read().await;
            map.get(&event.event_type)
                .map(|h| h.values().cloned().collect())
                .unwrap_or_default()
        };

        let results = futures::future::join_all(handlers.iter().map(|h| h.handle(event))).await;
        Self::report(results)
    }

    fn report(results: Vec<anyhow::Result<()>>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for result in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => report.failures.push(e.to_string()),
            }
        }
        report
    }
}
