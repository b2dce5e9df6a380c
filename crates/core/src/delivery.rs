// Delivery domain types and state machine
//
// A delivery is one attempt-chain for a single (event, subscription) pair:
//
//   pending ──► success
//      │  └───► failed
//      ▼
//   retrying ─► success | failed
//      ▲  │
//      └──┘
//
// success and failed are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::{Result, WebhookError};
use crate::event::Event;

/// Delivery status.
/// - `pending`: created, first attempt not yet recorded
/// - `retrying`: an attempt failed and another one is scheduled
/// - `success`: an attempt got a 2xx response
/// - `failed`: attempts exhausted or abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Success,
    Failed,
}

impl DeliveryStatus {
    /// Whether no further transition is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether `self -> next` is a permitted transition
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Success)
                | (Pending, Retrying)
                | (Pending, Failed)
                | (Retrying, Retrying)
                | (Retrying, Success)
                | (Retrying, Failed)
        )
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Retrying => write!(f, "retrying"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "retrying" => Ok(Self::Retrying),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// Delivery - attempt-chain of one event against one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Delivery {
    /// Unique identifier for the delivery.
    pub id: Uuid,
    /// Subscription the event is delivered to.
    pub subscription_id: Uuid,
    /// Event being delivered.
    pub event_id: Uuid,
    /// Type of the event being delivered.
    pub event_type: String,
    /// Current state.
    pub status: DeliveryStatus,
    /// Attempts performed so far.
    pub attempts: u32,
    /// HTTP status of the latest attempt, if a response was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    /// Latency of the latest attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// Error of the latest failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set only on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    /// Failed delivery this one was manually retried from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// New pending delivery of `event` to `subscription_id`
    pub fn pending(subscription_id: Uuid, event: &Event) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            subscription_id,
            event_id: event.id,
            event_type: event.event_type.clone(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            response_code: None,
            response_time_ms: None,
            error: None,
            delivered_at: None,
            retry_of: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark this delivery as a manual retry of `previous`
    pub fn retry_of(mut self, previous: Uuid) -> Self {
        self.retry_of = Some(previous);
        self
    }

    /// Apply a transition, enforcing the state machine.
    ///
    /// On error the delivery is left unchanged.
    pub fn apply(&mut self, transition: DeliveryTransition, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(transition.status) {
            return Err(WebhookError::InvalidStateTransition {
                from: self.status,
                to: transition.status,
            });
        }

        let is_success = transition.status == DeliveryStatus::Success;
        let has_2xx = transition
            .response_code
            .is_some_and(|code| (200..300).contains(&code));
        if is_success != (transition.delivered_at.is_some() && has_2xx) {
            // success <=> delivered_at set and 2xx code
            return Err(WebhookError::InvalidStateTransition {
                from: self.status,
                to: transition.status,
            });
        }

        self.status = transition.status;
        self.attempts = transition.attempts;
        self.response_code = transition.response_code;
        self.response_time_ms = transition.response_time_ms;
        self.error = transition.error;
        self.delivered_at = transition.delivered_at;
        self.updated_at = now;
        Ok(())
    }
}

/// State change recorded after an attempt (or when a pending retry is abandoned)
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryTransition {
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub response_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl DeliveryTransition {
    /// Attempt succeeded with a 2xx response
    pub fn success(
        attempts: u32,
        response_code: u16,
        response_time_ms: u64,
        delivered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: DeliveryStatus::Success,
            attempts,
            response_code: Some(response_code),
            response_time_ms: Some(response_time_ms),
            error: None,
            delivered_at: Some(delivered_at),
        }
    }

    /// Attempt failed; `status` is `Retrying` or `Failed`
    pub fn failure(
        status: DeliveryStatus,
        attempts: u32,
        response_code: Option<u16>,
        response_time_ms: Option<u64>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status,
            attempts,
            response_code,
            response_time_ms,
            error: Some(error.into()),
            delivered_at: None,
        }
    }
}
