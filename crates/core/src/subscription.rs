// Subscription domain types
//
// A subscription is a registered destination for events: endpoint, event-type filter,
// signing secret and optional retry/timeout overrides.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::Result;
use crate::settings::Settings;
use crate::validation;

/// Prefix of generated signing secrets
pub const SECRET_PREFIX: &str = "whsec_";

/// Subscription - a registered webhook destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Subscription {
    /// Unique identifier for the subscription.
    pub id: Uuid,
    /// Human label.
    pub name: String,
    /// Destination URL for deliveries.
    pub endpoint: String,
    /// Event types this subscription receives. Never empty.
    pub event_types: Vec<String>,
    /// Signing secret. Never serialized; see [`Subscription::secret_hint`].
    #[serde(skip_serializing, default)]
    pub secret: String,
    /// Inactive subscriptions are skipped by the dispatcher.
    pub active: bool,
    /// Retry limit override (1-10). Falls back to the global default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_limit: Option<u32>,
    /// Timeout override in seconds (5-300). Falls back to the global default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    /// Number of successful delivery attempts.
    pub success_count: u64,
    /// Number of failed delivery attempts.
    pub failure_count: u64,
    /// Time of the most recent attempt, successful or not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_delivery_at: Option<DateTime<Utc>>,
    /// Timestamp when the subscription was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp when the subscription was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Input for registering a subscription
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct NewSubscription {
    /// Human label.
    pub name: String,
    /// Destination URL.
    pub endpoint: String,
    /// Event types to subscribe to.
    pub event_types: Vec<String>,
    /// Signing secret. Generated when omitted.
    #[serde(default)]
    pub secret: Option<String>,
    /// Defaults to true.
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub retry_limit: Option<u32>,
    #[serde(default)]
    pub timeout_seconds: Option<u32>,
}

/// Partial update of a subscription. Only provided fields change.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SubscriptionUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Replaces the existing event types.
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
    /// Rotates the signing secret.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    /// `null` clears the override so the global default applies again.
    #[serde(default, deserialize_with = "present")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<u32>))]
    pub retry_limit: Option<Option<u32>>,
    /// `null` clears the override so the global default applies again.
    #[serde(default, deserialize_with = "present")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<u32>))]
    pub timeout_seconds: Option<Option<u32>>,
}

/// Distinguish an explicit `null` (`Some(None)`) from an absent field (`None`)
fn present<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl Subscription {
    /// Build a validated subscription from registration input
    pub fn from_new(input: NewSubscription, now: DateTime<Utc>) -> Result<Self> {
        let secret = match input.secret {
            Some(secret) => secret,
            None => generate_secret(),
        };
        let subscription = Self {
            id: Uuid::now_v7(),
            name: input.name,
            endpoint: input.endpoint,
            event_types: validation::normalize_event_types(&input.event_types)?,
            secret,
            active: input.active.unwrap_or(true),
            retry_limit: input.retry_limit,
            timeout_seconds: input.timeout_seconds,
            success_count: 0,
            failure_count: 0,
            last_delivery_at: None,
            created_at: now,
            updated_at: now,
        };
        subscription.validate()?;
        Ok(subscription)
    }

    /// Check every invariant of the record
    pub fn validate(&self) -> Result<()> {
        validation::validate_name(&self.name)?;
        validation::validate_endpoint(&self.endpoint)?;
        validation::normalize_event_types(&self.event_types)?;
        validation::validate_secret(&self.secret)?;
        if let Some(limit) = self.retry_limit {
            validation::validate_retry_limit("retry_limit", limit)?;
        }
        if let Some(timeout) = self.timeout_seconds {
            validation::validate_timeout_seconds("timeout_seconds", timeout)?;
        }
        Ok(())
    }

    /// Merge a partial update and re-validate the result.
    ///
    /// `self` is left untouched; the caller commits the returned record.
    pub fn merged(&self, update: SubscriptionUpdate, now: DateTime<Utc>) -> Result<Self> {
        let mut merged = self.clone();
        if let Some(name) = update.name {
            merged.name = name;
        }
        if let Some(endpoint) = update.endpoint {
            merged.endpoint = endpoint;
        }
        if let Some(event_types) = update.event_types {
            merged.event_types = validation::normalize_event_types(&event_types)?;
        }
        if let Some(secret) = update.secret {
            merged.secret = secret;
        }
        if let Some(active) = update.active {
            merged.active = active;
        }
        if let Some(limit) = update.retry_limit {
            merged.retry_limit = limit;
        }
        if let Some(timeout) = update.timeout_seconds {
            merged.timeout_seconds = timeout;
        }
        merged.validate()?;
        merged.updated_at = now;
        Ok(merged)
    }

    /// Whether an event of `event_type` should be delivered here
    pub fn matches(&self, event_type: &str) -> bool {
        self.active && self.event_types.iter().any(|t| t == event_type)
    }

    /// Retry limit in effect, falling back to the global default
    pub fn effective_retry_limit(&self, settings: &Settings) -> u32 {
        self.retry_limit.unwrap_or(settings.global_retry_limit)
    }

    /// Per-attempt timeout in effect, falling back to the global default
    pub fn effective_timeout(&self, settings: &Settings) -> Duration {
        Duration::from_secs(
            self.timeout_seconds
                .unwrap_or(settings.global_timeout_seconds) as u64,
        )
    }

    /// Masked form of the secret, safe to display (e.g. `whsec_****9f2a`)
    pub fn secret_hint(&self) -> String {
        let chars: Vec<char> = self.secret.chars().collect();
        if chars.len() <= 8 {
            return "****".to_string();
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        if self.secret.starts_with(SECRET_PREFIX) {
            format!("{SECRET_PREFIX}****{tail}")
        } else {
            format!("****{tail}")
        }
    }
}

/// Generate a random signing secret (`whsec_` + 64 hex chars)
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}
