//! Field validation for subscriptions and settings.
//!
//! Checks:
//! - Endpoint URLs are absolute `http`/`https` URLs with a host
//! - Event types are non-empty and present in the catalog
//! - Retry limits and timeouts stay inside their bounds

use std::net::IpAddr;
use std::ops::RangeInclusive;

use crate::error::{Result, WebhookError};
use crate::event_types::WebhookEventType;

/// Allowed values for a subscription's retry limit
pub const RETRY_LIMIT_RANGE: RangeInclusive<u32> = 1..=10;

/// Allowed values for a subscription's timeout, in seconds
pub const TIMEOUT_SECONDS_RANGE: RangeInclusive<u32> = 5..=300;

/// Maximum length of a subscription name, in characters
pub const MAX_NAME_CHARS: usize = 255;

// ---------------------------------------------------------------------------
// Subscription fields
// ---------------------------------------------------------------------------

/// Validate a subscription name
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(WebhookError::validation("name", "must not be empty"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(WebhookError::validation(
            "name",
            format!("must be at most {MAX_NAME_CHARS} characters"),
        ));
    }
    Ok(())
}

/// Validate a delivery endpoint URL.
///
/// Returns the parsed URL so callers can reuse the host.
pub fn validate_endpoint(endpoint: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(endpoint)
        .map_err(|e| WebhookError::validation("endpoint", format!("invalid URL: {e}")))?;

    match parsed.scheme() {
        "https" | "http" => {}
        scheme => {
            return Err(WebhookError::validation(
                "endpoint",
                format!("unsupported URL scheme: {scheme}"),
            ));
        }
    }

    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed),
        _ => Err(WebhookError::validation("endpoint", "URL must have a host")),
    }
}

/// Validate and normalize event types: non-empty, catalogued, duplicates removed.
pub fn normalize_event_types(event_types: &[String]) -> Result<Vec<String>> {
    if event_types.is_empty() {
        return Err(WebhookError::validation(
            "event_types",
            "at least one event type is required",
        ));
    }

    let mut normalized: Vec<String> = Vec::with_capacity(event_types.len());
    for et in event_types {
        if !WebhookEventType::is_known(et) {
            return Err(WebhookError::validation(
                "event_types",
                format!("unknown event type: {et}"),
            ));
        }
        if !normalized.contains(et) {
            normalized.push(et.clone());
        }
    }
    Ok(normalized)
}

/// Validate a retry limit override
pub fn validate_retry_limit(field: &'static str, value: u32) -> Result<()> {
    if !RETRY_LIMIT_RANGE.contains(&value) {
        return Err(WebhookError::validation(
            field,
            format!(
                "must be between {} and {}, got {value}",
                RETRY_LIMIT_RANGE.start(),
                RETRY_LIMIT_RANGE.end()
            ),
        ));
    }
    Ok(())
}

/// Validate a timeout override, in seconds
pub fn validate_timeout_seconds(field: &'static str, value: u32) -> Result<()> {
    if !TIMEOUT_SECONDS_RANGE.contains(&value) {
        return Err(WebhookError::validation(
            field,
            format!(
                "must be between {} and {}, got {value}",
                TIMEOUT_SECONDS_RANGE.start(),
                TIMEOUT_SECONDS_RANGE.end()
            ),
        ));
    }
    Ok(())
}

/// Validate a signing secret
pub fn validate_secret(secret: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(WebhookError::config("subscription secret must not be empty"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings fields
// ---------------------------------------------------------------------------

/// Validate an allow-list entry: an IP address or a host name
pub fn validate_allow_list_entry(entry: &str) -> Result<()> {
    if entry.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    let valid_host = !entry.is_empty()
        && entry.len() <= 253
        && entry.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        });
    if !valid_host {
        return Err(WebhookError::config(format!(
            "invalid IP allow-list entry: {entry}"
        )));
    }
    Ok(())
}

/// Validate an alert contact address
pub fn validate_alert_contact(contact: &str) -> Result<()> {
    let mut parts = contact.splitn(2, '@');
    let local = parts.next().unwrap_or_default();
    let domain = parts.next().unwrap_or_default();
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || contact.contains(' ') {
        return Err(WebhookError::config(format!(
            "invalid alert contact address: {contact}"
        )));
    }
    Ok(())
}
