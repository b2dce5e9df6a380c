// Database models (internal, converted to core domain types at the store boundary)

use chrono::{DateTime, Utc};
use hookline_core::{Delivery, DeliveryTotals, Event, ScheduledRetry, Subscription, SubscriptionTotals};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Subscriptions
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub name: String,
    pub endpoint: String,
    pub event_types: Vec<String>,
    /// Plaintext or sealed; see `SecretCipher`
    pub secret: String,
    pub active: bool,
    pub retry_limit: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRow {
    /// Convert with an already-opened secret
    pub fn into_subscription(self, secret: String) -> Subscription {
        Subscription {
            id: self.id,
            name: self.name,
            endpoint: self.endpoint,
            event_types: self.event_types,
            secret,
            active: self.active,
            retry_limit: self.retry_limit.map(|v| v as u32),
            timeout_seconds: self.timeout_seconds.map(|v| v as u32),
            success_count: self.success_count.max(0) as u64,
            failure_count: self.failure_count.max(0) as u64,
            last_delivery_at: self.last_delivery_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub(crate) const SUBSCRIPTION_COLUMNS: &str = "id, name, endpoint, event_types, secret, active, \
     retry_limit, timeout_seconds, success_count, failure_count, last_delivery_at, \
     created_at, updated_at";

// ============================================
// Events
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub source: String,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            event_type: row.event_type,
            payload: row.payload,
            occurred_at: row.occurred_at,
            source: row.source,
        }
    }
}

// ============================================
// Deliveries
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct DeliveryRow {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub status: String,
    pub attempts: i32,
    pub response_code: Option<i32>,
    pub response_time_ms: Option<i64>,
    pub error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DeliveryRow> for Delivery {
    type Error = String;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(Delivery {
            id: row.id,
            subscription_id: row.subscription_id,
            event_id: row.event_id,
            event_type: row.event_type,
            status: row.status.parse()?,
            attempts: row.attempts.max(0) as u32,
            response_code: row.response_code.map(|v| v as u16),
            response_time_ms: row.response_time_ms.map(|v| v.max(0) as u64),
            error: row.error,
            delivered_at: row.delivered_at,
            retry_of: row.retry_of,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) const DELIVERY_COLUMNS: &str = "id, subscription_id, event_id, event_type, status, \
     attempts, response_code, response_time_ms, error, delivered_at, retry_of, \
     created_at, updated_at";

// ============================================
// Aggregates
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct DeliveryTotalsRow {
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
    pub average_response_time_ms: f64,
    pub recent_failures: i64,
}

impl From<DeliveryTotalsRow> for DeliveryTotals {
    fn from(row: DeliveryTotalsRow) -> Self {
        DeliveryTotals {
            total: row.total.max(0) as u64,
            successful: row.successful.max(0) as u64,
            failed: row.failed.max(0) as u64,
            average_response_time_ms: row.average_response_time_ms,
            recent_failures: row.recent_failures.max(0) as u64,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionTotalsRow {
    pub total: i64,
    pub active: i64,
}

impl From<SubscriptionTotalsRow> for SubscriptionTotals {
    fn from(row: SubscriptionTotalsRow) -> Self {
        SubscriptionTotals {
            total: row.total.max(0) as u64,
            active: row.active.max(0) as u64,
        }
    }
}

// ============================================
// Retry queue
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct RetryRow {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub subscription_id: Uuid,
    pub event: serde_json::Value,
    pub attempt: i32,
    pub due_at: DateTime<Utc>,
    pub claimed_until: Option<DateTime<Utc>>,
}

impl TryFrom<RetryRow> for ScheduledRetry {
    type Error = serde_json::Error;

    fn try_from(row: RetryRow) -> Result<Self, Self::Error> {
        Ok(ScheduledRetry {
            id: row.id,
            delivery_id: row.delivery_id,
            subscription_id: row.subscription_id,
            event: serde_json::from_value(row.event)?,
            attempt: row.attempt.max(0) as u32,
            due_at: row.due_at,
            claimed_until: row.claimed_until,
        })
    }
}

// ============================================
// Settings
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct SettingsRow {
    pub settings: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}
