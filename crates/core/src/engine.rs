// Webhook Engine facade
//
// The narrow interface the rest of the application (and the control plane) uses:
// raise events, manage subscriptions, inspect history and stats, tune settings.

use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::delivery::Delivery;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, WebhookError};
use crate::event::Event;
use crate::memory::{
    InMemoryDeliveryStore, InMemoryRetryQueue, InMemorySettingsStore, InMemorySubscriptionStore,
};
use crate::settings::{Settings, SettingsRegistry, SettingsUpdate};
use crate::stats::{StatsAggregator, StatsSummary};
use crate::store::{DeliveryStore, Page, RetryQueue, SettingsStore, SubscriptionStore};
use crate::subscription::{NewSubscription, Subscription, SubscriptionUpdate};
use crate::transport::Transport;

/// Storage backends used by the engine
#[derive(Clone)]
pub struct EngineStores {
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pub retries: Arc<dyn RetryQueue>,
    pub settings: Arc<dyn SettingsStore>,
}

impl EngineStores {
    /// Fresh in-memory stores
    pub fn in_memory() -> Self {
        Self {
            subscriptions: Arc::new(InMemorySubscriptionStore::new()),
            deliveries: Arc::new(InMemoryDeliveryStore::new()),
            retries: Arc::new(InMemoryRetryQueue::new()),
            settings: Arc::new(InMemorySettingsStore::new()),
        }
    }
}

/// Outbound webhook engine
#[derive(Clone)]
pub struct WebhookEngine {
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
    settings: Arc<SettingsRegistry>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<StatsAggregator>,
}

impl WebhookEngine {
    /// Build an engine over `stores`, restoring persisted settings
    pub async fn new(stores: EngineStores, transport: Arc<dyn Transport>) -> Result<Self> {
        let settings = Arc::new(SettingsRegistry::load(stores.settings.clone()).await?);
        let dispatcher = Dispatcher::new(
            stores.subscriptions.clone(),
            stores.deliveries.clone(),
            stores.retries.clone(),
            settings.clone(),
            transport,
        );
        Ok(Self::from_parts(stores, settings, dispatcher))
    }

    /// Assemble an engine around a preconfigured dispatcher
    pub fn from_parts(
        stores: EngineStores,
        settings: Arc<SettingsRegistry>,
        dispatcher: Dispatcher,
    ) -> Self {
        let stats = StatsAggregator::new(stores.subscriptions.clone(), stores.deliveries.clone());
        Self {
            subscriptions: stores.subscriptions,
            deliveries: stores.deliveries,
            settings,
            dispatcher: Arc::new(dispatcher),
            stats: Arc::new(stats),
        }
    }

    /// Engine over fresh in-memory stores
    pub async fn in_memory(transport: Arc<dyn Transport>) -> Result<Self> {
        Self::new(EngineStores::in_memory(), transport).await
    }

    /// Dispatcher, e.g. to drive a [`crate::RetryWorker`]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Raise a domain event.
    ///
    /// Only the event type is checked here; deliveries run in the background and
    /// their failures never reach the caller. Returns the event id.
    pub fn raise_event(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        source: &str,
    ) -> Result<Uuid> {
        let event = Event::new(event_type, payload, source)?;
        let event_id = event.id;
        info!(%event_id, event_type, source, "Event raised");

        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.trigger(&event).await {
                error!(event_id = %event.id, error = %e, "Event dispatch failed");
            }
        });
        Ok(event_id)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub async fn register_subscription(&self, input: NewSubscription) -> Result<Subscription> {
        let subscription = self.subscriptions.create(input).await?;
        info!(
            subscription_id = %subscription.id,
            endpoint = %subscription.endpoint,
            event_types = ?subscription.event_types,
            "Subscription registered"
        );
        Ok(subscription)
    }

    pub async fn update_subscription(
        &self,
        id: Uuid,
        update: SubscriptionUpdate,
    ) -> Result<Subscription> {
        self.subscriptions.update(id, update).await
    }

    /// Delete a subscription. Returns false when it did not exist.
    ///
    /// Scheduled retries for it fail when they come due.
    pub async fn delete_subscription(&self, id: Uuid) -> Result<bool> {
        let removed = self.subscriptions.delete(id).await?;
        if removed {
            self.dispatcher.release_lane(id);
            info!(subscription_id = %id, "Subscription deleted");
        }
        Ok(removed)
    }

    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.subscriptions.list().await
    }

    pub async fn get_subscription(&self, id: Uuid) -> Result<Subscription> {
        self.subscriptions
            .get(id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound(id))
    }

    pub async fn reset_subscription_counters(&self, id: Uuid) -> Result<Subscription> {
        self.subscriptions.reset_counters(id).await
    }

    /// Send a `webhook.test` event to one subscription
    pub async fn test_subscription(&self, id: Uuid) -> Result<Delivery> {
        self.dispatcher.test(id).await
    }

    // ========================================================================
    // Deliveries
    // ========================================================================

    /// One page of delivery history, newest first, optionally for one subscription
    pub async fn delivery_history(
        &self,
        subscription_id: Option<Uuid>,
        page: Page,
    ) -> Result<Vec<Delivery>> {
        match subscription_id {
            Some(id) => self.deliveries.list_by_subscription(id, page).await,
            None => self.deliveries.list_all(page).await,
        }
    }

    pub async fn get_delivery(&self, id: Uuid) -> Result<Delivery> {
        self.deliveries
            .get(id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound(id))
    }

    /// Manually retry a failed delivery
    pub async fn retry_delivery(&self, id: Uuid) -> Result<Delivery> {
        self.dispatcher.manual_retry(id).await
    }

    pub async fn stats(&self) -> Result<StatsSummary> {
        self.stats.summary().await
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.current()
    }

    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<Arc<Settings>> {
        self.settings.update(update).await
    }
}
