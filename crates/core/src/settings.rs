// Settings Registry
//
// Process-wide configuration consumed by the dispatcher. Readers take an
// `Arc<Settings>` snapshot; writers build a new record and swap it in, so a reader
// never observes a half-applied update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::backoff::BackoffStrategy;
use crate::error::{Result, WebhookError};
use crate::store::SettingsStore;
use crate::validation::{self, RETRY_LIMIT_RANGE, TIMEOUT_SECONDS_RANGE};

/// Default number of attempts per delivery
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Default per-attempt timeout, in seconds
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 30;

/// Default trailing-24h failure count that triggers an alert
pub const DEFAULT_ALERT_THRESHOLD: u32 = 5;

/// IP allow-list applied to endpoint hosts before sending
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct IpAllowList {
    pub enabled: bool,
    /// IP addresses or host names
    #[serde(default)]
    pub entries: Vec<String>,
}

impl IpAllowList {
    /// Whether a request to `host` may be sent
    pub fn permits(&self, host: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let host = host.trim_start_matches('[').trim_end_matches(']');
        self.entries.iter().any(|e| e.eq_ignore_ascii_case(host))
    }
}

/// Engine settings (singleton)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Settings {
    /// Attempts per delivery when a subscription has no override (1-10)
    pub global_retry_limit: u32,
    /// Per-attempt timeout when a subscription has no override (5-300)
    pub global_timeout_seconds: u32,
    pub backoff_strategy: BackoffStrategy,
    /// Sign outgoing payloads with the subscription secret
    pub signature_verification: bool,
    pub ip_allow_list: IpAllowList,
    /// Alert when this many deliveries failed in the trailing 24h. 0 disables alerting.
    pub alert_threshold: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_contact: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            global_retry_limit: DEFAULT_RETRY_LIMIT,
            global_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            backoff_strategy: BackoffStrategy::default(),
            signature_verification: true,
            ip_allow_list: IpAllowList::default(),
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            alert_contact: None,
            updated_at: Utc::now(),
        }
    }
}

impl Settings {
    /// Check every range and format constraint
    pub fn validate(&self) -> Result<()> {
        if !RETRY_LIMIT_RANGE.contains(&self.global_retry_limit) {
            return Err(WebhookError::config(format!(
                "global_retry_limit must be between {} and {}, got {}",
                RETRY_LIMIT_RANGE.start(),
                RETRY_LIMIT_RANGE.end(),
                self.global_retry_limit
            )));
        }
        if !TIMEOUT_SECONDS_RANGE.contains(&self.global_timeout_seconds) {
            return Err(WebhookError::config(format!(
                "global_timeout_seconds must be between {} and {}, got {}",
                TIMEOUT_SECONDS_RANGE.start(),
                TIMEOUT_SECONDS_RANGE.end(),
                self.global_timeout_seconds
            )));
        }
        for entry in &self.ip_allow_list.entries {
            validation::validate_allow_list_entry(entry)?;
        }
        if let Some(contact) = &self.alert_contact {
            validation::validate_alert_contact(contact)?;
        }
        Ok(())
    }
}

/// Partial settings update. Only provided fields change.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SettingsUpdate {
    #[serde(default)]
    pub global_retry_limit: Option<u32>,
    #[serde(default)]
    pub global_timeout_seconds: Option<u32>,
    #[serde(default)]
    pub backoff_strategy: Option<BackoffStrategy>,
    #[serde(default)]
    pub signature_verification: Option<bool>,
    #[serde(default)]
    pub ip_allow_list: Option<IpAllowList>,
    #[serde(default)]
    pub alert_threshold: Option<u32>,
    /// Empty string clears the contact
    #[serde(default)]
    pub alert_contact: Option<String>,
}

impl SettingsUpdate {
    fn apply_to(self, current: &Settings, now: DateTime<Utc>) -> Settings {
        let mut next = current.clone();
        if let Some(v) = self.global_retry_limit {
            next.global_retry_limit = v;
        }
        if let Some(v) = self.global_timeout_seconds {
            next.global_timeout_seconds = v;
        }
        if let Some(v) = self.backoff_strategy {
            next.backoff_strategy = v;
        }
        if let Some(v) = self.signature_verification {
            next.signature_verification = v;
        }
        if let Some(v) = self.ip_allow_list {
            next.ip_allow_list = v;
        }
        if let Some(v) = self.alert_threshold {
            next.alert_threshold = v;
        }
        if let Some(v) = self.alert_contact {
            next.alert_contact = if v.trim().is_empty() { None } else { Some(v) };
        }
        next.updated_at = now;
        next
    }
}

/// Holder of the current settings snapshot
pub struct SettingsRegistry {
    current: RwLock<Arc<Settings>>,
    store: Arc<dyn SettingsStore>,
}

impl SettingsRegistry {
    /// Registry starting from defaults
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            current: RwLock::new(Arc::new(Settings::default())),
            store,
        }
    }

    /// Registry starting from the persisted record, or defaults when none exists
    pub async fn load(store: Arc<dyn SettingsStore>) -> Result<Self> {
        let settings = match store.get().await? {
            Some(persisted) => persisted,
            None => Settings::default(),
        };
        settings.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(settings)),
            store,
        })
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<Settings> {
        self.current.read().clone()
    }

    /// Validate, persist and publish a settings change.
    ///
    /// On error the current snapshot is unchanged.
    pub async fn update(&self, update: SettingsUpdate) -> Result<Arc<Settings>> {
        let next = update.apply_to(&self.current(), Utc::now());
        next.validate()?;
        self.store.put(&next).await?;

        let next = Arc::new(next);
        *self.current.write() = next.clone();
        info!(
            global_retry_limit = next.global_retry_limit,
            global_timeout_seconds = next.global_timeout_seconds,
            backoff_strategy = %next.backoff_strategy,
            signature_verification = next.signature_verification,
            "Settings updated"
        );
        Ok(next)
    }
}
