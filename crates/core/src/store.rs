// Repository traits for pluggable backends
//
// The dispatcher, stats aggregator and settings registry only talk to these traits:
// - In-memory implementations (crate::memory) for dev mode and tests
// - PostgreSQL implementations (hookline-storage) for production

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delivery::{Delivery, DeliveryTransition};
use crate::error::Result;
use crate::event::Event;
use crate::settings::Settings;
use crate::stats::{DeliveryTotals, SubscriptionTotals};
use crate::subscription::{NewSubscription, Subscription, SubscriptionUpdate};

/// Window into a newest-first listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 100;
    pub const MAX_LIMIT: usize = 1000;

    /// Page of at most `limit` items (clamped to 1..=MAX_LIMIT) after `offset`
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset,
        }
    }

    /// Apply to an already ordered iterator
    pub fn slice<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT, 0)
    }
}

// ============================================================================
// SubscriptionStore
// ============================================================================

/// Storage for webhook subscriptions
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Validate and persist a new subscription
    async fn create(&self, input: NewSubscription) -> Result<Subscription>;

    /// Get a subscription by ID
    async fn get(&self, id: Uuid) -> Result<Option<Subscription>>;

    /// List all subscriptions, oldest first
    async fn list(&self) -> Result<Vec<Subscription>>;

    /// Merge, re-validate and commit a partial update.
    ///
    /// Fails with `SubscriptionNotFound` when the id is unknown.
    async fn update(&self, id: Uuid, update: SubscriptionUpdate) -> Result<Subscription>;

    /// Delete a subscription. Returns false when nothing was removed.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Atomically bump the success or failure counter and set `last_delivery_at`
    async fn record_outcome(&self, id: Uuid, success: bool, at: DateTime<Utc>) -> Result<()>;

    /// Zero both counters
    async fn reset_counters(&self, id: Uuid) -> Result<Subscription>;

    /// Total and active subscription counts
    async fn subscription_totals(&self) -> Result<SubscriptionTotals> {
        Ok(SubscriptionTotals::from_subscriptions(&self.list().await?))
    }

    /// Active subscriptions whose event types contain `event_type`
    async fn find_active_by_event_type(&self, event_type: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.matches(event_type))
            .collect())
    }
}

// ============================================================================
// DeliveryStore
// ============================================================================

/// Storage for delivery records and their state transitions
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Persist a new delivery
    async fn create(&self, delivery: Delivery) -> Result<Delivery>;

    /// Get a delivery by ID
    async fn get(&self, id: Uuid) -> Result<Option<Delivery>>;

    /// Deliveries of one subscription, newest first
    async fn list_by_subscription(&self, subscription_id: Uuid, page: Page)
        -> Result<Vec<Delivery>>;

    /// Every delivery, newest first
    async fn list_all(&self, page: Page) -> Result<Vec<Delivery>>;

    /// `pending` or `retrying` deliveries last updated before `updated_before`,
    /// least recently updated first
    async fn list_unfinished(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Delivery>>;

    /// Apply a state transition.
    ///
    /// Fails with `InvalidStateTransition` when the state machine forbids it; the
    /// stored record is then unchanged.
    async fn update(&self, id: Uuid, transition: DeliveryTransition) -> Result<Delivery>;

    /// Keep the event a delivery was created for, so it can be re-sent later.
    /// Saving the same event twice is a no-op.
    async fn save_event(&self, event: &Event) -> Result<()>;

    /// Look up a saved event
    async fn get_event(&self, id: Uuid) -> Result<Option<Event>>;

    /// Number of failed deliveries created in `(since, until]`
    async fn count_failed_between(&self, since: DateTime<Utc>, until: DateTime<Utc>)
        -> Result<u64>;

    /// Totals over every delivery; `recent_failures` counts failures created in
    /// `(since, until]`
    async fn delivery_totals(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<DeliveryTotals>;
}

// ============================================================================
// SettingsStore
// ============================================================================

/// Storage for the singleton settings record
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Persisted settings, if any were ever saved
    async fn get(&self) -> Result<Option<Settings>>;

    /// Replace the persisted settings
    async fn put(&self, settings: &Settings) -> Result<()>;
}

// ============================================================================
// RetryQueue
// ============================================================================

/// A retry waiting for its due time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledRetry {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub subscription_id: Uuid,
    /// Full event, so the retry does not depend on event storage
    pub event: Event,
    /// Attempt number to perform when due
    pub attempt: u32,
    pub due_at: DateTime<Utc>,
    /// Lease held by the worker that claimed this entry
    pub claimed_until: Option<DateTime<Utc>>,
}

impl ScheduledRetry {
    pub fn new(
        delivery_id: Uuid,
        subscription_id: Uuid,
        event: Event,
        attempt: u32,
        due_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            delivery_id,
            subscription_id,
            event,
            attempt,
            due_at,
            claimed_until: None,
        }
    }

    /// Whether this entry may be claimed at `now`
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now && self.claimed_until.map_or(true, |until| until <= now)
    }
}

/// Durable timer queue of scheduled retries
///
/// Claims are leases: an entry claimed but never completed becomes claimable again
/// once its lease expires, so retries survive a crashed worker.
#[async_trait]
pub trait RetryQueue: Send + Sync {
    /// Enqueue a retry
    async fn schedule(&self, retry: ScheduledRetry) -> Result<()>;

    /// Claim up to `limit` entries due at `now`, earliest first, leased for `lease`
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<ScheduledRetry>>;

    /// Remove a processed entry
    async fn complete(&self, id: Uuid) -> Result<()>;

    /// Whether any entry (claimed or not) exists for `delivery_id`
    async fn is_scheduled(&self, delivery_id: Uuid) -> Result<bool>;

    /// Entries not yet completed
    async fn pending_count(&self) -> Result<usize>;
}
