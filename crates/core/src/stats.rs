// Stats Aggregator
//
// Rollups over subscriptions and delivery history, computed at query time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::delivery::{Delivery, DeliveryStatus};
use crate::error::Result;
use crate::store::{DeliveryStore, SubscriptionStore};
use crate::subscription::Subscription;

/// Window of `recent_failures`
const RECENT_WINDOW_HOURS: i64 = 24;

/// Summary of webhook activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct StatsSummary {
    pub total_subscriptions: u64,
    pub active_subscriptions: u64,
    pub total_deliveries: u64,
    pub successful_deliveries: u64,
    pub failed_deliveries: u64,
    /// Percentage of deliveries that succeeded, 0-100
    pub success_rate: f64,
    /// Mean over deliveries with a recorded response time
    pub average_response_time_ms: f64,
    /// Failed deliveries created in the trailing 24h
    pub recent_failures: u64,
}

/// Subscription counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionTotals {
    pub total: u64,
    pub active: u64,
}

impl SubscriptionTotals {
    pub fn from_subscriptions(subscriptions: &[Subscription]) -> Self {
        Self {
            total: subscriptions.len() as u64,
            active: subscriptions.iter().filter(|s| s.active).count() as u64,
        }
    }
}

/// Delivery aggregates, as computed by a store
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeliveryTotals {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// Mean over deliveries with a recorded response time, 0 when there are none
    pub average_response_time_ms: f64,
    /// Failed deliveries created inside the requested window
    pub recent_failures: u64,
}

impl DeliveryTotals {
    /// Aggregate raw records; `recent_failures` covers `(since, until]`
    pub fn from_deliveries(
        deliveries: &[Delivery],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Self {
        let count = |status: DeliveryStatus| {
            deliveries.iter().filter(|d| d.status == status).count() as u64
        };

        let timings: Vec<u64> = deliveries
            .iter()
            .filter_map(|d| d.response_time_ms)
            .collect();
        let average_response_time_ms = if timings.is_empty() {
            0.0
        } else {
            timings.iter().sum::<u64>() as f64 / timings.len() as f64
        };

        Self {
            total: deliveries.len() as u64,
            successful: count(DeliveryStatus::Success),
            failed: count(DeliveryStatus::Failed),
            average_response_time_ms,
            recent_failures: deliveries
                .iter()
                .filter(|d| {
                    d.status == DeliveryStatus::Failed
                        && d.created_at > since
                        && d.created_at <= until
                })
                .count() as u64,
        }
    }
}

impl StatsSummary {
    pub fn new(subscriptions: SubscriptionTotals, deliveries: DeliveryTotals) -> Self {
        let success_rate = if deliveries.total == 0 {
            0.0
        } else {
            (deliveries.successful as f64 / deliveries.total as f64 * 100.0).clamp(0.0, 100.0)
        };

        Self {
            total_subscriptions: subscriptions.total,
            active_subscriptions: subscriptions.active,
            total_deliveries: deliveries.total,
            successful_deliveries: deliveries.successful,
            failed_deliveries: deliveries.failed,
            success_rate,
            average_response_time_ms: deliveries.average_response_time_ms,
            recent_failures: deliveries.recent_failures,
        }
    }
}

/// Computes [`StatsSummary`] from the stores
pub struct StatsAggregator {
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
}

impl StatsAggregator {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
    ) -> Self {
        Self {
            subscriptions,
            deliveries,
        }
    }

    pub async fn summary(&self) -> Result<StatsSummary> {
        self.summary_at(Utc::now()).await
    }

    /// Summary with `recent_failures` relative to `now`
    pub async fn summary_at(&self, now: DateTime<Utc>) -> Result<StatsSummary> {
        let subscriptions = self.subscriptions.subscription_totals().await?;
        let since = now - chrono::Duration::hours(RECENT_WINDOW_HOURS);
        let deliveries = self.deliveries.delivery_totals(since, now).await?;
        Ok(StatsSummary::new(subscriptions, deliveries))
    }
}
