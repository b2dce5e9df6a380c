// In-memory implementations for dev mode and testing
//
// Keep all data in process memory. Each operation holds the lock for its whole
// read-modify-write, so counter increments and transitions are atomic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::delivery::{Delivery, DeliveryStatus, DeliveryTransition};
use crate::error::{Result, WebhookError};
use crate::event::Event;
use crate::settings::Settings;
use crate::stats::DeliveryTotals;
use crate::store::{
    DeliveryStore, Page, RetryQueue, ScheduledRetry, SettingsStore, SubscriptionStore,
};
use crate::subscription::{NewSubscription, Subscription, SubscriptionUpdate};

// ============================================================================
// InMemorySubscriptionStore
// ============================================================================

/// In-memory subscription store
#[derive(Debug, Default, Clone)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<Uuid, Subscription>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn create(&self, input: NewSubscription) -> Result<Subscription> {
        let subscription = Subscription::from_new(input, Utc::now())?;
        self.subscriptions
            .write()
            .await
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        let mut all: Vec<Subscription> = self.subscriptions.read().await.values().cloned().collect();
        all.sort_by_key(|s| (s.created_at, s.id));
        Ok(all)
    }

    async fn update(&self, id: Uuid, update: SubscriptionUpdate) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let existing = subscriptions
            .get_mut(&id)
            .ok_or(WebhookError::SubscriptionNotFound(id))?;
        let merged = existing.merged(update, Utc::now())?;
        *existing = merged.clone();
        Ok(merged)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.subscriptions.write().await.remove(&id).is_some())
    }

    async fn record_outcome(&self, id: Uuid, success: bool, at: DateTime<Utc>) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(&id)
            .ok_or(WebhookError::SubscriptionNotFound(id))?;
        if success {
            subscription.success_count += 1;
        } else {
            subscription.failure_count += 1;
        }
        subscription.last_delivery_at = Some(at);
        Ok(())
    }

    async fn reset_counters(&self, id: Uuid) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(&id)
            .ok_or(WebhookError::SubscriptionNotFound(id))?;
        subscription.success_count = 0;
        subscription.failure_count = 0;
        subscription.updated_at = Utc::now();
        Ok(subscription.clone())
    }
}

// ============================================================================
// InMemoryDeliveryStore
// ============================================================================

/// In-memory delivery store
#[derive(Debug, Default, Clone)]
pub struct InMemoryDeliveryStore {
    deliveries: Arc<RwLock<HashMap<Uuid, Delivery>>>,
    events: Arc<RwLock<HashMap<Uuid, Event>>>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with deliveries (useful for testing)
    pub async fn seed(&self, deliveries: Vec<Delivery>) {
        let mut map = self.deliveries.write().await;
        for d in deliveries {
            map.insert(d.id, d);
        }
    }
}

fn newest_first(mut deliveries: Vec<Delivery>) -> Vec<Delivery> {
    deliveries.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
    deliveries
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn create(&self, delivery: Delivery) -> Result<Delivery> {
        self.deliveries
            .write()
            .await
            .insert(delivery.id, delivery.clone());
        Ok(delivery)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Delivery>> {
        Ok(self.deliveries.read().await.get(&id).cloned())
    }

    async fn list_by_subscription(
        &self,
        subscription_id: Uuid,
        page: Page,
    ) -> Result<Vec<Delivery>> {
        let matching = self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| d.subscription_id == subscription_id)
            .cloned()
            .collect();
        Ok(page.slice(newest_first(matching)))
    }

    async fn list_all(&self, page: Page) -> Result<Vec<Delivery>> {
        Ok(page.slice(newest_first(
            self.deliveries.read().await.values().cloned().collect(),
        )))
    }

    async fn list_unfinished(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Delivery>> {
        let mut unfinished: Vec<Delivery> = self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| !d.status.is_terminal() && d.updated_at < updated_before)
            .cloned()
            .collect();
        unfinished.sort_by_key(|d| (d.updated_at, d.id));
        unfinished.truncate(limit);
        Ok(unfinished)
    }

    async fn update(&self, id: Uuid, transition: DeliveryTransition) -> Result<Delivery> {
        let mut deliveries = self.deliveries.write().await;
        let delivery = deliveries
            .get_mut(&id)
            .ok_or(WebhookError::DeliveryNotFound(id))?;
        // Apply to a copy so a rejected transition leaves the record untouched
        let mut next = delivery.clone();
        next.apply(transition, Utc::now())?;
        *delivery = next.clone();
        Ok(next)
    }

    async fn save_event(&self, event: &Event) -> Result<()> {
        self.events
            .write()
            .await
            .entry(event.id)
            .or_insert_with(|| event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        Ok(self.events.read().await.get(&id).cloned())
    }

    async fn count_failed_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| {
                d.status == DeliveryStatus::Failed
                    && d.created_at > since
                    && d.created_at <= until
            })
            .count() as u64)
    }

    async fn delivery_totals(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<DeliveryTotals> {
        let deliveries: Vec<Delivery> = self.deliveries.read().await.values().cloned().collect();
        Ok(DeliveryTotals::from_deliveries(&deliveries, since, until))
    }
}

// ============================================================================
// InMemorySettingsStore
// ============================================================================

/// In-memory settings store
#[derive(Debug, Default, Clone)]
pub struct InMemorySettingsStore {
    settings: Arc<RwLock<Option<Settings>>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(&self) -> Result<Option<Settings>> {
        Ok(self.settings.read().await.clone())
    }

    async fn put(&self, settings: &Settings) -> Result<()> {
        *self.settings.write().await = Some(settings.clone());
        Ok(())
    }
}

// ============================================================================
// InMemoryRetryQueue
// ============================================================================

/// In-memory retry queue
///
/// Not durable across restarts; use the PostgreSQL queue in production.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRetryQueue {
    entries: Arc<RwLock<HashMap<Uuid, ScheduledRetry>>>,
}

impl InMemoryRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every pending entry, earliest due first
    pub async fn entries(&self) -> Vec<ScheduledRetry> {
        let mut all: Vec<ScheduledRetry> = self.entries.read().await.values().cloned().collect();
        all.sort_by_key(|r| (r.due_at, r.id));
        all
    }
}

#[async_trait]
impl RetryQueue for InMemoryRetryQueue {
    async fn schedule(&self, retry: ScheduledRetry) -> Result<()> {
        self.entries.write().await.insert(retry.id, retry);
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<ScheduledRetry>> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| WebhookError::config(format!("invalid lease duration: {e}")))?;
        let mut entries = self.entries.write().await;

        let mut due: Vec<&mut ScheduledRetry> = entries
            .values_mut()
            .filter(|r| r.is_claimable(now))
            .collect();
        due.sort_by_key(|r| (r.due_at, r.id));

        Ok(due
            .into_iter()
            .take(limit)
            .map(|r| {
                r.claimed_until = Some(now + lease);
                r.clone()
            })
            .collect())
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        self.entries.write().await.remove(&id);
        Ok(())
    }

    async fn is_scheduled(&self, delivery_id: Uuid) -> Result<bool> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .any(|r| r.delivery_id == delivery_id))
    }

    async fn pending_count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}
