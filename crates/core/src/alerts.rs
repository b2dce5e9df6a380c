// Failure alerting
//
// Notified when the trailing-24h failed delivery count reaches the configured threshold.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Alert raised when failures cross the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct FailureAlert {
    /// Failed deliveries in the trailing 24h
    pub recent_failures: u64,
    pub threshold: u32,
    pub contact: Option<String>,
    /// Delivery whose failure crossed the threshold
    pub delivery_id: Uuid,
    pub subscription_id: Uuid,
    pub raised_at: DateTime<Utc>,
}

/// Receives failure alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: FailureAlert);
}

/// Alert sink that writes a warning to the log
#[derive(Debug, Default, Clone)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, alert: FailureAlert) {
        tracing::warn!(
            recent_failures = alert.recent_failures,
            threshold = alert.threshold,
            contact = alert.contact.as_deref().unwrap_or("<none>"),
            delivery_id = %alert.delivery_id,
            subscription_id = %alert.subscription_id,
            "Webhook failure threshold reached"
        );
    }
}
