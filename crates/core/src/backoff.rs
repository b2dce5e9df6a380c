//! Backoff policy for delivery retries

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Base delay for exponential and linear backoff
pub const BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for exponential backoff
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Constant delay for fixed backoff
pub const FIXED_DELAY: Duration = Duration::from_secs(5);

/// Strategy used to space out retries of a failed delivery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `min(1s * 2^(attempt-1), 30s)`
    #[default]
    Exponential,
    /// `1s * attempt`
    Linear,
    /// Always 5s
    Fixed,
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exponential => write!(f, "exponential"),
            Self::Linear => write!(f, "linear"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

impl std::str::FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exponential" => Ok(Self::Exponential),
            "linear" => Ok(Self::Linear),
            "fixed" => Ok(Self::Fixed),
            other => Err(format!("unknown backoff strategy: {other}")),
        }
    }
}

/// Delay to wait after attempt `attempt` (1-based) failed, before the next one.
///
/// Attempt 0 is treated as attempt 1.
pub fn delay(attempt: u32, strategy: BackoffStrategy) -> Duration {
    let attempt = attempt.max(1);
    match strategy {
        BackoffStrategy::Exponential => {
            // 2^5 = 32s already exceeds the cap, so larger exponents never matter
            let exponent = (attempt - 1).min(5);
            (BASE_DELAY * 2u32.pow(exponent)).min(MAX_DELAY)
        }
        BackoffStrategy::Linear => BASE_DELAY.saturating_mul(attempt),
        BackoffStrategy::Fixed => FIXED_DELAY,
    }
}
