// Event domain type
//
// An occurrence raised by the rest of the application. Its JSON form is exactly the
// body POSTed to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::{Result, WebhookError};
use crate::event_types::WebhookEventType;

/// Source recorded on synthetic test events
pub const TEST_EVENT_SOURCE: &str = "hookline.test";

/// Event - immutable occurrence matched against subscriptions' event types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique identifier for the event.
    pub id: Uuid,
    /// Event type key (e.g. `user.created`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary structured payload.
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
    /// Component that raised the event.
    pub source: String,
}

impl Event {
    /// Create an event, validating the type against the catalog
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        source: impl Into<String>,
    ) -> Result<Self> {
        let event_type = event_type.into();
        if !WebhookEventType::is_known(&event_type) {
            return Err(WebhookError::validation(
                "type",
                format!("unknown event type: {event_type}"),
            ));
        }
        Ok(Self {
            id: Uuid::now_v7(),
            event_type,
            payload,
            occurred_at: Utc::now(),
            source: source.into(),
        })
    }

    /// Synthetic `webhook.test` event for manual verification of a subscription
    pub fn test(subscription_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: WebhookEventType::WebhookTest.as_str().to_string(),
            payload: serde_json::json!({
                "subscription_id": subscription_id,
                "message": "This is a test delivery",
            }),
            occurred_at: Utc::now(),
            source: TEST_EVENT_SOURCE.to_string(),
        }
    }

    /// Serialize to the exact bytes sent over the wire (and signed)
    pub fn to_wire_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
