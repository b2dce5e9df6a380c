// Event type catalog
//
// The fixed list of event types producers may raise and subscriptions may filter on.

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Known webhook event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum WebhookEventType {
    #[serde(rename = "user.created")]
    UserCreated,
    #[serde(rename = "user.updated")]
    UserUpdated,
    #[serde(rename = "user.deleted")]
    UserDeleted,
    #[serde(rename = "payment.succeeded")]
    PaymentSucceeded,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "payment.refunded")]
    PaymentRefunded,
    #[serde(rename = "subscription.created")]
    SubscriptionCreated,
    #[serde(rename = "subscription.updated")]
    SubscriptionUpdated,
    #[serde(rename = "subscription.cancelled")]
    SubscriptionCancelled,
    #[serde(rename = "invoice.created")]
    InvoiceCreated,
    #[serde(rename = "invoice.paid")]
    InvoicePaid,
    #[serde(rename = "order.created")]
    OrderCreated,
    #[serde(rename = "order.fulfilled")]
    OrderFulfilled,
    /// Synthetic event sent by operator-triggered test deliveries
    #[serde(rename = "webhook.test")]
    WebhookTest,
}

const ALL: [WebhookEventType; 14] = [
    WebhookEventType::UserCreated,
    WebhookEventType::UserUpdated,
    WebhookEventType::UserDeleted,
    WebhookEventType::PaymentSucceeded,
    WebhookEventType::PaymentFailed,
    WebhookEventType::PaymentRefunded,
    WebhookEventType::SubscriptionCreated,
    WebhookEventType::SubscriptionUpdated,
    WebhookEventType::SubscriptionCancelled,
    WebhookEventType::InvoiceCreated,
    WebhookEventType::InvoicePaid,
    WebhookEventType::OrderCreated,
    WebhookEventType::OrderFulfilled,
    WebhookEventType::WebhookTest,
];

impl WebhookEventType {
    /// Every catalogued event type
    pub fn all() -> &'static [WebhookEventType] {
        &ALL
    }

    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserCreated => "user.created",
            Self::UserUpdated => "user.updated",
            Self::UserDeleted => "user.deleted",
            Self::PaymentSucceeded => "payment.succeeded",
            Self::PaymentFailed => "payment.failed",
            Self::PaymentRefunded => "payment.refunded",
            Self::SubscriptionCreated => "subscription.created",
            Self::SubscriptionUpdated => "subscription.updated",
            Self::SubscriptionCancelled => "subscription.cancelled",
            Self::InvoiceCreated => "invoice.created",
            Self::InvoicePaid => "invoice.paid",
            Self::OrderCreated => "order.created",
            Self::OrderFulfilled => "order.fulfilled",
            Self::WebhookTest => "webhook.test",
        }
    }

    /// Look up an event type by wire name
    pub fn parse(s: &str) -> Option<Self> {
        ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Whether `s` names a catalogued event type
    pub fn is_known(s: &str) -> bool {
        Self::parse(s).is_some()
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
