use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::notify::NotificationDispatcher;
use super::rules::{Alert, AlertRule, AlertSeverity, AlertStatus, RulePatch, RuleSpec};
use crate::config::AlertConfig;
use crate::error::{CoreError, Result};
use crate::metrics::ServiceMetricsSnapshot;

struct EvaluatorInner {
    rules: HashMap<Uuid, AlertRule>,
    /// At most one Active alert per rule.
    active: HashMap<Uuid, Alert>,
    /// Bounded FIFO alert history, oldest first.
    history: VecDeque<Alert>,
}

/// Evaluates rule conditions against metrics snapshots and manages the
/// alert lifecycle: trigger (subject to cooldown), resolve, suppress.
pub struct AlertEvaluator {
    config: AlertConfig,
    dispatcher: Arc<NotificationDispatcher>,
    inner: Arc<RwLock<EvaluatorInner>>,
}

impl AlertEvaluator {
    pub fn new(config: AlertConfig, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            inner: Arc::new(RwLock::new(EvaluatorInner {
                rules: HashMap::new(),
                active: HashMap::new(),
                history: VecDeque::new(),
            })),
        }
    }

    pub fn dispatcher(&self) -> Arc<NotificationDispatcher> {
        self.dispatcher.clone()
    }

    /// Create a rule. The metric path and operator are validated here, so a
    /// typo fails loudly instead of being silently skipped at evaluation.
    pub async fn create_rule(&self, spec: RuleSpec) -> Result<Uuid> {
        let rule = spec.into_rule()?;
        let id = rule.id;
        let mut inner = self.inner.write().await;
        info!(rule = %rule.name, metric = %rule.condition.metric, "Created alert rule");
        inner.rules.insert(id, rule);
        Ok(id)
    }

    pub async fn update_rule(&self, id: Uuid, patch: RulePatch) -> Result<()> {
        let mut inner = self.inner.write().await;
        let rule = inner
            .rules
            .get_mut(&id)
            .ok_or(CoreError::RuleNotFound(id))?;

        if let Some(name) = patch.name {
            rule.name = name;
        }
        if let Some(description) = patch.description {
            rule.description = description;
        }
        if let Some(metric) = patch.metric {
            rule.condition.metric = metric.parse()?;
        }
        if let Some(operator) = patch.operator {
            rule.condition.operator = operator.parse()?;
        }
        if let Some(threshold) = patch.threshold {
            rule.condition.threshold = threshold;
        }
        if let Some(severity) = patch.severity {
            rule.severity = severity;
        }
        if let Some(enabled) = patch.enabled {
            rule.enabled = enabled;
        }
        if let Some(channels) = patch.notification_channels {
            rule.notification_channels = channels;
        }
        if let Some(cooldown) = patch.cooldown_seconds {
            rule.cooldown_seconds = cooldown;
        }

        info!(rule = %rule.name, "Updated alert rule");
        Ok(())
    }

    /// Delete a rule and evict its alert state, so the per-rule maps stay
    /// bounded by the live rule set.
    pub async fn delete_rule(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let rule = inner.rules.remove(&id).ok_or(CoreError::RuleNotFound(id))?;
        if let Some(mut alert) = inner.active.remove(&id) {
            alert.status = AlertStatus::Suppressed;
            alert.resolved_at = Some(Utc::now());
            Self::sync_history(&mut inner, &alert);
        }
        info!(rule = %rule.name, "Deleted alert rule");
        Ok(())
    }

    /// Evaluate every rule against a snapshot. Returns the alerts whose
    /// state changed (newly triggered or resolved). Notification dispatch
    /// happens after lock release and its failures never abort evaluation.
    pub async fn evaluate(&self, snapshot: &ServiceMetricsSnapshot) -> Vec<Alert> {
        let now = Utc::now();
        let mut dispatches: Vec<(Alert, Vec<String>)> = Vec::new();

        {
            let mut inner = self.inner.write().await;
            let rules: Vec<AlertRule> = inner.rules.values().cloned().collect();

            for rule in rules {
                let rule_id = rule.id;

                if !rule.enabled {
                    // A disabled rule stops claiming anything about its
                    // condition: its active alert leaves the board as
                    // Suppressed, without a resolve notification.
                    if let Some(mut alert) = inner.active.remove(&rule_id) {
                        alert.status = AlertStatus::Suppressed;
                        alert.resolved_at = Some(now);
                        Self::sync_history(&mut inner, &alert);
                        debug!(rule = %rule.name, "Suppressed alert for disabled rule");
                    }
                    continue;
                }

                let value = rule.condition.metric.resolve(snapshot);
                let met = rule.condition.operator.compare(value, rule.condition.threshold);
                let is_active = inner.active.contains_key(&rule_id);

                match (met, is_active) {
                    (true, false) => {
                        let in_cooldown = rule.last_triggered.is_some_and(|t| {
                            now - t < Duration::seconds(rule.cooldown_seconds as i64)
                        });
                        if in_cooldown {
                            debug!(rule = %rule.name, "Condition met but rule is cooling down");
                            continue;
                        }

                        let alert = Self::build_alert(&rule, snapshot, value, now);
                        inner.active.insert(rule_id, alert.clone());
                        inner.history.push_back(alert.clone());
                        while inner.history.len() > self.config.max_alert_history {
                            inner.history.pop_front();
                        }
                        if let Some(r) = inner.rules.get_mut(&rule_id) {
                            r.last_triggered = Some(now);
                        }

                        match alert.severity {
                            AlertSeverity::Critical => error!("ALERT: {}", alert.message),
                            AlertSeverity::Warning => warn!("ALERT: {}", alert.message),
                            AlertSeverity::Info => info!("ALERT: {}", alert.message),
                        }
                        dispatches.push((alert, rule.notification_channels.clone()));
                    }
                    (false, true) => {
                        if let Some(mut alert) = inner.active.remove(&rule_id) {
                            alert.status = AlertStatus::Resolved;
                            alert.resolved_at = Some(now);
                            Self::sync_history(&mut inner, &alert);
                            info!(rule = %rule.name, "Resolved alert");
                            dispatches.push((alert, rule.notification_channels.clone()));
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut changed = Vec::with_capacity(dispatches.len());
        for (alert, channels) in dispatches {
            self.dispatcher.dispatch(&alert, &channels).await;
            changed.push(alert);
        }
        changed
    }

    fn build_alert(
        rule: &AlertRule,
        snapshot: &ServiceMetricsSnapshot,
        value: f64,
        now: chrono::DateTime<Utc>,
    ) -> Alert {
        let mut context = HashMap::new();
        context.insert("service".to_string(), snapshot.service_name.clone());
        context.insert("metric".to_string(), rule.condition.metric.to_string());
        context.insert("observed_value".to_string(), format!("{}", value));
        context.insert(
            "threshold".to_string(),
            format!("{}", rule.condition.threshold),
        );

        Alert {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            severity: rule.severity.clone(),
            message: format!(
                "{}: {} is {} (threshold {} {})",
                rule.description,
                rule.condition.metric,
                value,
                rule.condition.operator.as_str(),
                rule.condition.threshold
            ),
            triggered_at: now,
            resolved_at: None,
            status: AlertStatus::Active,
            context,
        }
    }

    fn sync_history(inner: &mut EvaluatorInner, alert: &Alert) {
        if let Some(entry) = inner.history.iter_mut().find(|a| a.id == alert.id) {
            *entry = alert.clone();
        }
    }

    pub async fn get_rule(&self, id: Uuid) -> Option<AlertRule> {
        self.inner.read().await.rules.get(&id).cloned()
    }

    pub async fn list_rules(&self) -> Vec<AlertRule> {
        let inner = self.inner.read().await;
        let mut rules: Vec<AlertRule> = inner.rules.values().cloned().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    pub async fn active_alerts(&self) -> Vec<Alert> {
        let inner = self.inner.read().await;
        let mut alerts: Vec<Alert> = inner.active.values().cloned().collect();
        alerts.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        alerts
    }

    /// All alerts, newest first.
    pub async fn alerts(&self, limit: usize) -> Vec<Alert> {
        let inner = self.inner.read().await;
        inner.history.iter().rev().take(limit).cloned().collect()
    }
}
