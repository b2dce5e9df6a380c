// Error types for the webhook engine

use thiserror::Error;
use uuid::Uuid;

use crate::delivery::DeliveryStatus;

/// Result type alias for webhook engine operations
pub type Result<T> = std::result::Result<T, WebhookError>;

/// Errors that can occur in the webhook engine
///
/// Transient delivery failures (timeouts, non-2xx responses) are not errors at this
/// level: they are folded into a [`crate::DeliveryOutcome`] and recorded on the delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// A subscription field is malformed
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// An illegal delivery state change was attempted
    #[error("invalid delivery state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    /// Missing or invalid secret, out-of-range settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Subscription not found
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    /// Delivery not found
    #[error("delivery not found: {0}")]
    DeliveryNotFound(Uuid),

    /// Backing store failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl WebhookError {
    /// Create a validation error for the given field
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        WebhookError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        WebhookError::Configuration(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        WebhookError::Storage(msg.into())
    }

    /// Whether this error was caused by caller input (as opposed to the engine or store)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WebhookError::Validation { .. } | WebhookError::Configuration(_)
        )
    }

    /// Whether this error signals a missing entity
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            WebhookError::SubscriptionNotFound(_) | WebhookError::DeliveryNotFound(_)
        )
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::Storage(format!("serialization failed: {err}"))
    }
}
