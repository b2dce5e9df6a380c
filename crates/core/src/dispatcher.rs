// Dispatcher
//
// Matches events to subscriptions, performs delivery attempts and drives the
// delivery state machine. Failed attempts are put on the retry queue instead of
// sleeping, so waiting for a retry never holds a subscription's lane.
//
// Each subscription has a lane (async mutex): at most one attempt per subscription
// is in flight, while different subscriptions proceed concurrently. Delivery and
// subscription are re-read once the lane is held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::alerts::{AlertSink, FailureAlert, LogAlertSink};
use crate::backoff;
use crate::delivery::{Delivery, DeliveryStatus, DeliveryTransition};
use crate::error::{Result, WebhookError};
use crate::event::Event;
use crate::settings::SettingsRegistry;
use crate::signer::{self, SIGNATURE_HEADER};
use crate::store::{DeliveryStore, RetryQueue, ScheduledRetry, SubscriptionStore};
use crate::subscription::Subscription;
use crate::transport::{Transport, TransportError, WebhookRequest};

/// Lease taken on claimed retries; an unfinished claim is retried after this
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(300);

/// Deliveries untouched for this long with no queue entry are requeued
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);

/// Window used for failure alerting
const ALERT_WINDOW_HOURS: i64 = 24;

/// Result of a single delivery attempt
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    /// 1-based attempt number
    pub attempt: u32,
    pub success: bool,
    /// HTTP status, when a response was received
    pub response_code: Option<u16>,
    /// Wall time of the attempt, when a request was sent
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl DeliveryOutcome {
    fn failed(attempt: u32, attempted_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            attempt,
            success: false,
            response_code: None,
            response_time_ms: None,
            error: Some(error.into()),
            attempted_at,
        }
    }

    /// Transition recording this outcome; failures move to `on_failure`
    pub fn transition(&self, on_failure: DeliveryStatus) -> DeliveryTransition {
        match (self.success, self.response_code) {
            (true, Some(code)) => DeliveryTransition::success(
                self.attempt,
                code,
                self.response_time_ms.unwrap_or_default(),
                self.attempted_at,
            ),
            _ => DeliveryTransition::failure(
                on_failure,
                self.attempt,
                self.response_code,
                self.response_time_ms,
                self.error.clone().unwrap_or_else(|| "delivery failed".to_string()),
            ),
        }
    }
}

/// What happens when an attempt fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnFailure {
    /// Retry through the queue while attempts remain
    Retry,
    /// Single-shot attempt (tests, manual retries): fail immediately
    Fail,
}

/// Orchestrates matching, sending and retry scheduling of deliveries
pub struct Dispatcher {
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
    retries: Arc<dyn RetryQueue>,
    settings: Arc<SettingsRegistry>,
    transport: Arc<dyn Transport>,
    alerts: Arc<dyn AlertSink>,
    lanes: DashMap<Uuid, Arc<Mutex<()>>>,
    claim_lease: Duration,
    /// Set while recent failures are at or above the alert threshold
    alert_raised: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
        retries: Arc<dyn RetryQueue>,
        settings: Arc<SettingsRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            subscriptions,
            deliveries,
            retries,
            settings,
            transport,
            alerts: Arc::new(LogAlertSink),
            lanes: DashMap::new(),
            claim_lease: DEFAULT_CLAIM_LEASE,
            alert_raised: AtomicBool::new(false),
        }
    }

    /// Replace the default (logging) alert sink
    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Set the lease taken on claimed retries
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    fn lane(&self, subscription_id: Uuid) -> Arc<Mutex<()>> {
        self.lanes.entry(subscription_id).or_default().clone()
    }

    /// Drop the lane of a deleted subscription
    pub fn release_lane(&self, subscription_id: Uuid) {
        self.lanes.remove(&subscription_id);
    }

    // ========================================================================
    // Triggering
    // ========================================================================

    /// Deliver an event to every matching active subscription.
    ///
    /// First attempts run concurrently; the returned deliveries reflect them
    /// (`success`, `retrying` or `failed`). Later attempts go through the retry queue.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn trigger(&self, event: &Event) -> Result<Vec<Delivery>> {
        let subscriptions = self
            .subscriptions
            .find_active_by_event_type(&event.event_type)
            .await?;
        if subscriptions.is_empty() {
            debug!("No active subscriptions for event");
            return Ok(Vec::new());
        }

        self.deliveries.save_event(event).await?;
        info!(
            subscriptions = subscriptions.len(),
            "Dispatching event to subscriptions"
        );

        let attempts = subscriptions
            .iter()
            .map(|subscription| self.first_attempt(subscription, event));
        let results = join_all(attempts).await;

        let mut deliveries = Vec::with_capacity(results.len());
        for (subscription, result) in subscriptions.iter().zip(results) {
            match result {
                Ok(delivery) => deliveries.push(delivery),
                Err(e) => log_dispatch_error(&e, subscription.id, "first attempt"),
            }
        }
        Ok(deliveries)
    }

    async fn first_attempt(&self, subscription: &Subscription, event: &Event) -> Result<Delivery> {
        let delivery = self
            .deliveries
            .create(Delivery::pending(subscription.id, event))
            .await?;
        self.attempt_in_lane(delivery.id, subscription.id, event, 1, OnFailure::Retry)
            .await
    }

    /// Perform `attempt` of a delivery inside its subscription's lane.
    ///
    /// While waiting for the lane the subscription may be deleted or deactivated,
    /// and a reclaimed retry may already have been performed, so both records are
    /// read only once the lane is held. Single-shot attempts (`OnFailure::Fail`)
    /// are allowed on inactive subscriptions.
    async fn attempt_in_lane(
        &self,
        delivery_id: Uuid,
        subscription_id: Uuid,
        event: &Event,
        attempt: u32,
        on_failure: OnFailure,
    ) -> Result<Delivery> {
        let lane = self.lane(subscription_id);
        let _guard = lane.lock().await;

        let delivery = self
            .deliveries
            .get(delivery_id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound(delivery_id))?;
        if delivery.status.is_terminal() || delivery.attempts >= attempt {
            debug!(%delivery_id, attempt, status = %delivery.status, "Attempt already performed");
            return Ok(delivery);
        }

        let subscription = match self.subscriptions.get(subscription_id).await? {
            Some(subscription) if subscription.active || on_failure == OnFailure::Fail => {
                subscription
            }
            Some(_) => {
                return self
                    .abandon(&delivery, format!("subscription {subscription_id} is inactive"))
                    .await;
            }
            None => {
                return self
                    .abandon(
                        &delivery,
                        format!("subscription {subscription_id} no longer exists"),
                    )
                    .await;
            }
        };

        let outcome = self
            .deliver_once(&subscription, event, attempt, delivery.id)
            .await;
        if outcome.success {
            return self
                .transition(&delivery, outcome.transition(DeliveryStatus::Success))
                .await;
        }
        match on_failure {
            OnFailure::Retry => {
                self.schedule_retry(&delivery, &subscription, event, &outcome)
                    .await
            }
            OnFailure::Fail => {
                self.transition(&delivery, outcome.transition(DeliveryStatus::Failed))
                    .await
            }
        }
    }

    // ========================================================================
    // Single attempt
    // ========================================================================

    /// Perform one attempt: sign, send within the effective timeout, classify.
    ///
    /// Never fails: every problem becomes a failed outcome. Subscription counters
    /// are updated before returning.
    #[instrument(skip(self, subscription, event), fields(subscription_id = %subscription.id, event_type = %event.event_type))]
    pub async fn deliver_once(
        &self,
        subscription: &Subscription,
        event: &Event,
        attempt: u32,
        delivery_id: Uuid,
    ) -> DeliveryOutcome {
        let outcome = self
            .send_attempt(subscription, event, attempt, delivery_id)
            .await;

        if let Err(e) = self
            .subscriptions
            .record_outcome(subscription.id, outcome.success, outcome.attempted_at)
            .await
        {
            warn!(error = %e, "Failed to record delivery outcome on subscription");
        }

        if outcome.success {
            info!(
                %delivery_id,
                attempt,
                response_code = ?outcome.response_code,
                response_time_ms = ?outcome.response_time_ms,
                "Webhook delivered"
            );
        } else {
            warn!(
                %delivery_id,
                attempt,
                response_code = ?outcome.response_code,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Webhook attempt failed"
            );
        }
        outcome
    }

    async fn send_attempt(
        &self,
        subscription: &Subscription,
        event: &Event,
        attempt: u32,
        delivery_id: Uuid,
    ) -> DeliveryOutcome {
        let attempted_at = Utc::now();
        let settings = self.settings.current();

        let body = match event.to_wire_bytes() {
            Ok(body) => body,
            Err(e) => return DeliveryOutcome::failed(attempt, attempted_at, e.to_string()),
        };

        let host = url::Url::parse(&subscription.endpoint)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        if !settings.ip_allow_list.permits(&host) {
            return DeliveryOutcome::failed(
                attempt,
                attempted_at,
                format!("endpoint host {host} is not in the IP allow-list"),
            );
        }

        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-Webhook-Id".to_string(), event.id.to_string()),
            ("X-Webhook-Event".to_string(), event.event_type.clone()),
            ("X-Webhook-Delivery".to_string(), delivery_id.to_string()),
            ("X-Webhook-Attempt".to_string(), attempt.to_string()),
        ];
        if settings.signature_verification {
            match signer::sign(&body, &subscription.secret) {
                Ok(signature) => headers.push((SIGNATURE_HEADER.to_string(), signature)),
                Err(e) => return DeliveryOutcome::failed(attempt, attempted_at, e.to_string()),
            }
        }

        let timeout = subscription.effective_timeout(&settings);
        let request = WebhookRequest {
            url: subscription.endpoint.clone(),
            headers,
            body,
            timeout,
        };

        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.transport.send(request)).await;
        let elapsed_ms = Some(started.elapsed().as_millis() as u64);

        let (success, response_code, error) = match result {
            Ok(Ok(response)) if response.is_success() => (true, Some(response.status), None),
            Ok(Ok(response)) => (
                false,
                Some(response.status),
                Some(format!("HTTP {}", response.status)),
            ),
            Ok(Err(e)) => (false, None, Some(e.to_string())),
            Err(_) => (false, None, Some(TransportError::Timeout(timeout).to_string())),
        };

        DeliveryOutcome {
            attempt,
            success,
            response_code,
            response_time_ms: elapsed_ms,
            error,
            attempted_at,
        }
    }

    // ========================================================================
    // Retries
    // ========================================================================

    /// Record a failed attempt: enqueue the next attempt and move to `retrying`
    /// while attempts remain, otherwise move to `failed`.
    ///
    /// The queue entry is written first. If the transition is then lost, the entry
    /// still wakes the delivery up; the reverse order could strand it in `retrying`.
    pub async fn schedule_retry(
        &self,
        delivery: &Delivery,
        subscription: &Subscription,
        event: &Event,
        outcome: &DeliveryOutcome,
    ) -> Result<Delivery> {
        let settings = self.settings.current();
        let limit = subscription.effective_retry_limit(&settings);

        if outcome.attempt >= limit {
            return self
                .transition(delivery, outcome.transition(DeliveryStatus::Failed))
                .await;
        }

        let delay = backoff::delay(outcome.attempt, settings.backoff_strategy);
        let due_at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
        self.retries
            .schedule(ScheduledRetry::new(
                delivery.id,
                subscription.id,
                event.clone(),
                outcome.attempt + 1,
                due_at,
            ))
            .await?;
        let updated = self
            .transition(delivery, outcome.transition(DeliveryStatus::Retrying))
            .await?;

        debug!(
            delivery_id = %delivery.id,
            next_attempt = outcome.attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Retry scheduled"
        );
        Ok(updated)
    }

    /// Claim up to `limit` retries due at `now`, leased for the claim lease
    pub async fn claim_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledRetry>> {
        self.retries.claim_due(now, limit, self.claim_lease).await
    }

    /// Run retries due at `now`, at most `limit` of them, and wait for all of them.
    /// Returns how many were handled.
    ///
    /// One-shot drain; `RetryWorker` spawns each claimed retry instead so a slow
    /// lane never delays the next poll.
    #[instrument(skip(self))]
    pub async fn process_due_retries(&self, now: DateTime<Utc>, limit: usize) -> Result<usize> {
        let claimed = self.claim_due_retries(now, limit).await?;
        if claimed.is_empty() {
            return Ok(0);
        }
        debug!(count = claimed.len(), "Processing due retries");

        let results = join_all(claimed.iter().map(|retry| self.run_claimed(retry))).await;
        Ok(results.into_iter().filter(|done| *done).count())
    }

    /// Run one claimed retry and remove it from the queue.
    ///
    /// Returns false when the entry was left claimed; it becomes due again once
    /// the lease expires.
    pub async fn run_claimed(&self, retry: &ScheduledRetry) -> bool {
        match self.run_retry(retry).await {
            Ok(()) => {}
            Err(e @ WebhookError::InvalidStateTransition { .. }) => {
                log_dispatch_error(&e, retry.subscription_id, "retry");
            }
            Err(e) => {
                log_dispatch_error(&e, retry.subscription_id, "retry");
                return false;
            }
        }
        if let Err(e) = self.retries.complete(retry.id).await {
            error!(retry_id = %retry.id, error = %e, "Failed to complete retry");
            return false;
        }
        true
    }

    async fn run_retry(&self, retry: &ScheduledRetry) -> Result<()> {
        let result = self
            .attempt_in_lane(
                retry.delivery_id,
                retry.subscription_id,
                &retry.event,
                retry.attempt,
                OnFailure::Retry,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(WebhookError::DeliveryNotFound(delivery_id)) => {
                warn!(%delivery_id, "Dropping retry for unknown delivery");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Requeue unfinished deliveries that have no queue entry.
    ///
    /// A crash between creating a delivery and its first attempt leaves it `pending`
    /// with nothing scheduled. Only deliveries untouched for `stale_after` are
    /// considered; an attempt still in flight is deduplicated in its lane.
    #[instrument(skip(self))]
    pub async fn recover_stalled(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
        limit: usize,
    ) -> Result<usize> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| WebhookError::config(format!("invalid stale period: {e}")))?;
        let stalled = self
            .deliveries
            .list_unfinished(now - stale_after, limit)
            .await?;

        let mut recovered = 0;
        for delivery in stalled {
            if self.retries.is_scheduled(delivery.id).await? {
                continue;
            }
            let Some(event) = self.deliveries.get_event(delivery.event_id).await? else {
                let reason = format!("event {} is no longer stored", delivery.event_id);
                if let Err(e) = self.abandon(&delivery, reason).await {
                    log_dispatch_error(&e, delivery.subscription_id, "recovery");
                }
                continue;
            };

            self.retries
                .schedule(ScheduledRetry::new(
                    delivery.id,
                    delivery.subscription_id,
                    event,
                    delivery.attempts + 1,
                    now,
                ))
                .await?;
            info!(
                delivery_id = %delivery.id,
                status = %delivery.status,
                next_attempt = delivery.attempts + 1,
                "Requeued stalled delivery"
            );
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Fail a delivery without another attempt
    async fn abandon(&self, delivery: &Delivery, reason: String) -> Result<Delivery> {
        info!(delivery_id = %delivery.id, reason = %reason, "Abandoning scheduled retry");
        let transition = DeliveryTransition::failure(
            DeliveryStatus::Failed,
            delivery.attempts,
            delivery.response_code,
            delivery.response_time_ms,
            reason,
        );
        self.transition(delivery, transition).await
    }

    // ========================================================================
    // Operator actions
    // ========================================================================

    /// Send a synthetic `webhook.test` event: one attempt, no retry.
    ///
    /// Works for inactive subscriptions too.
    pub async fn test(&self, subscription_id: Uuid) -> Result<Delivery> {
        let subscription = self
            .subscriptions
            .get(subscription_id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound(subscription_id))?;

        let event = Event::test(subscription.id);
        self.deliveries.save_event(&event).await?;
        let delivery = self
            .deliveries
            .create(Delivery::pending(subscription.id, &event))
            .await?;
        self.attempt_in_lane(delivery.id, subscription.id, &event, 1, OnFailure::Fail)
            .await
    }

    /// Re-attempt a failed delivery once.
    ///
    /// The failed delivery is left untouched; a new delivery with `retry_of` set
    /// records the attempt, numbered `min(attempts + 1, retry limit)`. Its result is
    /// terminal.
    pub async fn manual_retry(&self, delivery_id: Uuid) -> Result<Delivery> {
        let original = self
            .deliveries
            .get(delivery_id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound(delivery_id))?;
        if original.status != DeliveryStatus::Failed {
            return Err(WebhookError::InvalidStateTransition {
                from: original.status,
                to: DeliveryStatus::Retrying,
            });
        }

        let subscription = self
            .subscriptions
            .get(original.subscription_id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound(original.subscription_id))?;
        let event = self
            .deliveries
            .get_event(original.event_id)
            .await?
            .ok_or_else(|| {
                WebhookError::storage(format!("event {} is no longer stored", original.event_id))
            })?;

        let limit = subscription.effective_retry_limit(&self.settings.current());
        let attempt = (original.attempts + 1).min(limit);

        let delivery = self
            .deliveries
            .create(Delivery::pending(subscription.id, &event).retry_of(original.id))
            .await?;
        info!(
            delivery_id = %delivery.id,
            retry_of = %original.id,
            attempt,
            "Manual retry"
        );
        self.attempt_in_lane(delivery.id, subscription.id, &event, attempt, OnFailure::Fail)
            .await
    }

    // ========================================================================
    // State changes
    // ========================================================================

    async fn transition(
        &self,
        delivery: &Delivery,
        transition: DeliveryTransition,
    ) -> Result<Delivery> {
        let updated = self.deliveries.update(delivery.id, transition).await?;
        if updated.status == DeliveryStatus::Failed {
            self.check_alert(&updated).await;
        }
        Ok(updated)
    }

    /// Notify the alert sink when the trailing-24h failure count rises to or past
    /// the threshold. One alert per crossing; dropping below re-arms it.
    async fn check_alert(&self, failed: &Delivery) {
        let settings = self.settings.current();
        if settings.alert_threshold == 0 {
            return;
        }

        let now = Utc::now();
        let since = now - chrono::Duration::hours(ALERT_WINDOW_HOURS);
        let recent_failures = match self.deliveries.count_failed_between(since, now).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to count recent failures");
                return;
            }
        };

        if recent_failures < settings.alert_threshold as u64 {
            self.alert_raised.store(false, Ordering::SeqCst);
            return;
        }
        if !self.alert_raised.swap(true, Ordering::SeqCst) {
            self.alerts
                .notify(FailureAlert {
                    recent_failures,
                    threshold: settings.alert_threshold,
                    contact: settings.alert_contact.clone(),
                    delivery_id: failed.id,
                    subscription_id: failed.subscription_id,
                    raised_at: now,
                })
                .await;
        }
    }
}

fn log_dispatch_error(err: &WebhookError, subscription_id: Uuid, stage: &str) {
    match err {
        WebhookError::InvalidStateTransition { from, to } => {
            error!(%subscription_id, %from, %to, stage, "Skipping delivery after invalid state transition");
        }
        other => {
            error!(%subscription_id, error = %other, stage, "Delivery dispatch failed");
        }
    }
}
