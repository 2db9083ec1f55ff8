//! Alert Service - in-memory operational alert storage
//!
//! Provides:
//! - Alert storage with categories and severity levels
//! - Anti-flap suppression per alert key
//! - Automatic cleanup of old alerts
//! - Optional notification integration (Telegram, Teams, etc.)

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Alert categories for the message processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertCategory {
    /// Dead-letter queue growth
    DeadLetter,
    /// Admission pipeline issues
    Admission,
    /// Rate limiter / dedupe store degradation
    Limiter,
    /// Chat platform delivery issues
    ChatDelivery,
    /// Model call failures
    Model,
    /// Configuration problems
    Configuration,
}

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warn,
    Error,
    Critical,
}

/// A raised operational alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub category: AlertCategory,
    pub severity: AlertSeverity,
    pub message: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(
        category: AlertCategory,
        severity: AlertSeverity,
        message: String,
        source: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category,
            severity,
            message,
            source,
            created_at: Utc::now(),
            acknowledged: false,
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.created_at).num_minutes()
    }
}

/// Sink that delivers alerts to an external channel.
#[async_trait::async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: &Alert);
}

/// Configuration for the alert service.
#[derive(Debug, Clone)]
pub struct AlertServiceConfig {
    /// Maximum age of alerts in hours before auto-cleanup
    pub max_alert_age_hours: i64,
    /// Maximum number of alerts to keep
    pub max_alerts: usize,
    /// Suppression window for repeated alerts with the same key
    pub suppression_minutes: i64,
}

impl Default for AlertServiceConfig {
    fn default() -> Self {
        Self {
            max_alert_age_hours: 24,
            max_alerts: 1000,
            suppression_minutes: 30,
        }
    }
}

/// In-memory alert service with anti-flap suppression.
pub struct AlertService {
    alerts: RwLock<HashMap<String, Alert>>,
    last_raised: RwLock<HashMap<String, DateTime<Utc>>>,
    config: AlertServiceConfig,
    notifier: RwLock<Option<Arc<dyn AlertNotifier>>>,
}

impl AlertService {
    pub fn new(config: AlertServiceConfig) -> Self {
        Self {
            alerts: RwLock::new(HashMap::new()),
            last_raised: RwLock::new(HashMap::new()),
            config,
            notifier: RwLock::new(None),
        }
    }

    /// Attach a notifier for delivering alerts to an external channel.
    pub fn set_notifier(&self, notifier: Arc<dyn AlertNotifier>) {
        *self.notifier.write() = Some(notifier);
        info!("Alert notifier attached");
    }

    /// Raise an alert unless one with the same key fired inside the
    /// suppression window. Returns the alert id when raised.
    pub fn raise(
        &self,
        key: &str,
        category: AlertCategory,
        severity: AlertSeverity,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Option<String> {
        let now = Utc::now();
        {
            let mut last = self.last_raised.write();
            if let Some(prev) = last.get(key) {
                if now - *prev < ChronoDuration::minutes(self.config.suppression_minutes) {
                    debug!(key = %key, "Alert suppressed inside anti-flap window");
                    return None;
                }
            }
            last.insert(key.to_string(), now);
        }

        let alert = Alert::new(category, severity, message.into(), source.into());
        let id = alert.id.clone();

        let mut alerts = self.alerts.write();
        if alerts.len() >= self.config.max_alerts {
            Self::evict_oldest(&mut alerts);
        }

        debug!(id = %id, category = ?category, severity = ?severity, "Alert raised");
        alerts.insert(id.clone(), alert.clone());
        drop(alerts);

        if let Some(ref notifier) = *self.notifier.read() {
            let notifier = notifier.clone();
            tokio::spawn(async move {
                notifier.notify(&alert).await;
            });
        }

        Some(id)
    }

    pub fn get_all(&self) -> Vec<Alert> {
        self.alerts.read().values().cloned().collect()
    }

    pub fn get_by_severity(&self, severity: AlertSeverity) -> Vec<Alert> {
        self.alerts
            .read()
            .values()
            .filter(|a| a.severity == severity)
            .cloned()
            .collect()
    }

    pub fn acknowledge(&self, id: &str) -> bool {
        let mut alerts = self.alerts.write();
        if let Some(alert) = alerts.get_mut(id) {
            alert.acknowledged = true;
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> usize {
        self.alerts.read().len()
    }

    /// Periodic cleanup: drop alerts past their max age.
    pub fn cleanup(&self) {
        let threshold_minutes = self.config.max_alert_age_hours * 60;
        let mut alerts = self.alerts.write();
        let before = alerts.len();
        alerts.retain(|_, a| a.age_minutes() <= threshold_minutes);
        let removed = before - alerts.len();
        if removed > 0 {
            info!(removed = removed, "Cleared old alerts");
        }
    }

    fn evict_oldest(alerts: &mut HashMap<String, Alert>) {
        let to_remove = alerts.len() / 10;
        if to_remove == 0 {
            return;
        }
        let mut sorted: Vec<_> = alerts
            .iter()
            .map(|(id, a)| (id.clone(), a.created_at))
            .collect();
        sorted.sort_by_key(|(_, created)| *created);
        for (id, _) in sorted.into_iter().take(to_remove) {
            alerts.remove(&id);
        }
    }
}

impl Default for AlertService {
    fn default() -> Self {
        Self::new(AlertServiceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn raise_and_list() {
        let service = AlertService::default();
        let id = service
            .raise(
                "dlq-threshold",
                AlertCategory::DeadLetter,
                AlertSeverity::Error,
                "DLQ above threshold",
                "dlq-manager",
            )
            .unwrap();

        let all = service.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
    }

    #[tokio::test]
    async fn repeated_key_is_suppressed() {
        let service = AlertService::default();
        assert!(service
            .raise(
                "dlq-threshold",
                AlertCategory::DeadLetter,
                AlertSeverity::Error,
                "first",
                "dlq-manager",
            )
            .is_some());
        assert!(service
            .raise(
                "dlq-threshold",
                AlertCategory::DeadLetter,
                AlertSeverity::Error,
                "second",
                "dlq-manager",
            )
            .is_none());
        assert_eq!(service.count(), 1);
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let service = AlertService::default();
        assert!(service
            .raise("a", AlertCategory::Limiter, AlertSeverity::Warn, "a", "t")
            .is_some());
        assert!(service
            .raise("b", AlertCategory::Limiter, AlertSeverity::Warn, "b", "t")
            .is_some());
        assert_eq!(service.count(), 2);
    }
}
