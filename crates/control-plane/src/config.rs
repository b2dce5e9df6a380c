// Process configuration loaded from environment variables
// Decision: No DATABASE_URL means in-memory dev mode, not a startup error
// Decision: Runtime delivery settings (retry limit, backoff, ...) live in the
// Settings Registry, not here; this only covers process wiring.

use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Default HTTP listen address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9300";

/// Control plane configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// HTTP listen address
    pub bind_addr: String,
    /// PostgreSQL URL; None selects the in-memory backend
    pub database_url: Option<String>,
    /// How often the retry worker polls for due retries
    pub retry_poll_interval: Duration,
    /// Maximum retries claimed per poll
    pub retry_batch_size: usize,
    /// Maximum retries running at once
    pub retry_max_in_flight: usize,
    /// Origins allowed for cross-origin requests. Empty disables CORS.
    pub cors_allowed_origins: Vec<String>,
    /// Prefix for API routes, e.g. "/api" results in /api/v1/subscriptions
    pub api_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            database_url: None,
            retry_poll_interval: Duration::from_secs(1),
            retry_batch_size: 32,
            retry_max_in_flight: 64,
            cors_allowed_origins: Vec::new(),
            api_prefix: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let retry_poll_interval = match get("HOOKLINE_RETRY_POLL_INTERVAL_MS") {
            Some(ms) => Duration::from_millis(positive(
                "HOOKLINE_RETRY_POLL_INTERVAL_MS",
                &ms,
                "a positive number of milliseconds",
            )?),
            None => defaults.retry_poll_interval,
        };

        let retry_batch_size = match get("HOOKLINE_RETRY_BATCH_SIZE") {
            Some(n) => positive("HOOKLINE_RETRY_BATCH_SIZE", &n, "a positive integer")? as usize,
            None => defaults.retry_batch_size,
        };

        let retry_max_in_flight = match get("HOOKLINE_RETRY_MAX_IN_FLIGHT") {
            Some(n) => positive("HOOKLINE_RETRY_MAX_IN_FLIGHT", &n, "a positive integer")? as usize,
            None => defaults.retry_max_in_flight,
        };

        // Example: CORS_ALLOWED_ORIGINS="https://app.example.com,https://admin.example.com"
        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind_addr: get("HOOKLINE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: get("DATABASE_URL"),
            retry_poll_interval,
            retry_batch_size,
            retry_max_in_flight,
            cors_allowed_origins,
            api_prefix: get("API_PREFIX").unwrap_or_default(),
        })
    }

    /// Whether the process runs without a database
    pub fn is_dev_mode(&self) -> bool {
        self.database_url.is_none()
    }
}

/// Parse a strictly positive integer
fn positive(key: &str, value: &str, expected: &str) -> Result<u64> {
    let n: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{key} must be {expected}"))?;
    if n == 0 {
        bail!("{key} must be {expected}, got 0");
    }
    Ok(n)
}
