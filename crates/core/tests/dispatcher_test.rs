// Integration tests for the Dispatcher with in-memory stores and a scripted transport
//
// Retries are driven by calling process_due_retries with a time far enough in the
// future, so no test waits for real backoff delays.
//
// Run with: cargo test -p hookline-core --test dispatcher_test

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use hookline_core::signer::{self, SIGNATURE_HEADER};
use hookline_core::{
    AlertSink, Delivery, DeliveryStatus, DeliveryStore, DeliveryTotals, DeliveryTransition,
    Dispatcher, Event, FailureAlert, InMemoryDeliveryStore, InMemoryRetryQueue,
    InMemorySettingsStore, InMemorySubscriptionStore, NewSubscription, Page, RetryQueue,
    RetryWorker, RetryWorkerConfig, SettingsRegistry, SettingsUpdate, Subscription,
    SubscriptionStore, SubscriptionUpdate, Transport, TransportError, TransportResponse,
    WebhookError, WebhookRequest,
};
use serde_json::json;
use tokio::sync::Notify;
use uuid::Uuid;

// ============================================================================
// Fakes
// ============================================================================

/// Replies with scripted results in order, then 200 once the script runs out
#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<u16, TransportError>>>,
    requests: Mutex<Vec<WebhookRequest>>,
}

impl ScriptedTransport {
    fn with_script(script: Vec<Result<u16, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing(times: usize) -> Self {
        Self::with_script((0..times).map(|_| Ok(500)).collect())
    }

    fn requests(&self) -> Vec<WebhookRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: WebhookRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(200));
        next.map(|status| TransportResponse {
            status,
            body: String::new(),
        })
    }
}

#[derive(Default)]
struct RecordingAlerts {
    alerts: Mutex<Vec<FailureAlert>>,
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn notify(&self, alert: FailureAlert) {
        self.alerts.lock().unwrap().push(alert);
    }
}

/// Holds requests matching `hold` until released, then answers from the script
struct GatedTransport {
    inner: ScriptedTransport,
    hold: Box<dyn Fn(&WebhookRequest) -> bool + Send + Sync>,
    entered: Notify,
    release: Notify,
}

impl GatedTransport {
    fn new(
        inner: ScriptedTransport,
        hold: impl Fn(&WebhookRequest) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            hold: Box::new(hold),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, request: WebhookRequest) -> Result<TransportResponse, TransportError> {
        if (self.hold)(&request) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.send(request).await
    }
}

/// In-memory deliveries whose moves to `retrying` fail, as if the process died
/// between the attempt and its bookkeeping
struct LossyRetryingStore {
    inner: InMemoryDeliveryStore,
}

#[async_trait]
impl DeliveryStore for LossyRetryingStore {
    async fn create(&self, delivery: Delivery) -> hookline_core::Result<Delivery> {
        self.inner.create(delivery).await
    }

    async fn get(&self, id: Uuid) -> hookline_core::Result<Option<Delivery>> {
        self.inner.get(id).await
    }

    async fn list_by_subscription(
        &self,
        subscription_id: Uuid,
        page: Page,
    ) -> hookline_core::Result<Vec<Delivery>> {
        self.inner.list_by_subscription(subscription_id, page).await
    }

    async fn list_all(&self, page: Page) -> hookline_core::Result<Vec<Delivery>> {
        self.inner.list_all(page).await
    }

    async fn list_unfinished(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> hookline_core::Result<Vec<Delivery>> {
        self.inner.list_unfinished(updated_before, limit).await
    }

    async fn update(
        &self,
        id: Uuid,
        transition: DeliveryTransition,
    ) -> hookline_core::Result<Delivery> {
        if transition.status == DeliveryStatus::Retrying {
            return Err(WebhookError::storage("connection reset"));
        }
        self.inner.update(id, transition).await
    }

    async fn save_event(&self, event: &Event) -> hookline_core::Result<()> {
        self.inner.save_event(event).await
    }

    async fn get_event(&self, id: Uuid) -> hookline_core::Result<Option<Event>> {
        self.inner.get_event(id).await
    }

    async fn count_failed_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> hookline_core::Result<u64> {
        self.inner.count_failed_between(since, until).await
    }

    async fn delivery_totals(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> hookline_core::Result<DeliveryTotals> {
        self.inner.delivery_totals(since, until).await
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    dispatcher: Arc<Dispatcher>,
    subscriptions: Arc<InMemorySubscriptionStore>,
    deliveries: Arc<InMemoryDeliveryStore>,
    retries: Arc<InMemoryRetryQueue>,
    settings: Arc<SettingsRegistry>,
    alerts: Arc<RecordingAlerts>,
}

fn harness(transport: Arc<dyn Transport>) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("hookline_core=debug")
        .with_test_writer()
        .try_init();

    let subscriptions = Arc::new(InMemorySubscriptionStore::new());
    let deliveries = Arc::new(InMemoryDeliveryStore::new());
    let retries = Arc::new(InMemoryRetryQueue::new());
    let settings = Arc::new(SettingsRegistry::new(Arc::new(InMemorySettingsStore::new())));
    let alerts = Arc::new(RecordingAlerts::default());

    let dispatcher = Arc::new(
        Dispatcher::new(
            subscriptions.clone(),
            deliveries.clone(),
            retries.clone(),
            settings.clone(),
            transport,
        )
        .with_alert_sink(alerts.clone()),
    );

    Harness {
        dispatcher,
        subscriptions,
        deliveries,
        retries,
        settings,
        alerts,
    }
}

impl Harness {
    async fn subscribe(&self, event_types: &[&str], retry_limit: Option<u32>) -> Subscription {
        self.subscribe_at("https://hooks.example.com/inbox", event_types, retry_limit)
            .await
    }

    async fn subscribe_at(
        &self,
        endpoint: &str,
        event_types: &[&str],
        retry_limit: Option<u32>,
    ) -> Subscription {
        self.subscriptions
            .create(NewSubscription {
                name: "Test endpoint".to_string(),
                endpoint: endpoint.to_string(),
                event_types: event_types.iter().map(|s| s.to_string()).collect(),
                retry_limit,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn subscription(&self, id: Uuid) -> Subscription {
        self.subscriptions.get(id).await.unwrap().unwrap()
    }

    /// Run every retry that would become due within the next hour
    async fn drain_retries(&self) -> usize {
        self.dispatcher
            .process_due_retries(Utc::now() + chrono::Duration::hours(1), 100)
            .await
            .unwrap()
    }

    async fn delivery(&self, id: Uuid) -> Delivery {
        self.deliveries.get(id).await.unwrap().unwrap()
    }

    /// Poll until the delivery reaches `status`, for work done by background tasks
    async fn wait_for_status(&self, id: Uuid, status: DeliveryStatus) -> Delivery {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let delivery = self.delivery(id).await;
            if delivery.status == status {
                return delivery;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "delivery {id} stuck in {}",
                delivery.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn event(event_type: &str) -> Event {
    Event::new(event_type, json!({"user_id": 42}), "accounts").unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_three_failures_exhaust_retries() {
    let transport = Arc::new(ScriptedTransport::failing(3));
    let h = harness(transport.clone());
    let sub = h.subscribe(&["user.created"], Some(3)).await;

    let deliveries = h.dispatcher.trigger(&event("user.created")).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    let first = &deliveries[0];
    assert_eq!(first.status, DeliveryStatus::Retrying);
    assert_eq!(first.attempts, 1);
    assert_eq!(first.response_code, Some(500));

    assert_eq!(h.drain_retries().await, 1);
    let second = h.deliveries.get(first.id).await.unwrap().unwrap();
    assert_eq!(second.status, DeliveryStatus::Retrying);
    assert_eq!(second.attempts, 2);

    assert_eq!(h.drain_retries().await, 1);
    let last = h.deliveries.get(first.id).await.unwrap().unwrap();
    assert_eq!(last.status, DeliveryStatus::Failed);
    assert_eq!(last.attempts, 3);
    assert!(last.delivered_at.is_none());
    assert_eq!(last.error.as_deref(), Some("HTTP 500"));

    // Nothing left to retry
    assert_eq!(h.drain_retries().await, 0);
    assert_eq!(h.retries.pending_count().await.unwrap(), 0);

    assert_eq!(transport.calls(), 3);
    let sub = h.subscription(sub.id).await;
    assert_eq!(sub.failure_count, 3);
    assert_eq!(sub.success_count, 0);
}

#[tokio::test]
async fn test_retry_then_success() {
    let transport = Arc::new(ScriptedTransport::with_script(vec![
        Err(TransportError::Network("connection refused".to_string())),
        Ok(200),
    ]));
    let h = harness(transport.clone());
    let sub = h.subscribe(&["payment.succeeded"], None).await;

    let deliveries = h
        .dispatcher
        .trigger(&event("payment.succeeded"))
        .await
        .unwrap();
    assert_eq!(deliveries[0].status, DeliveryStatus::Retrying);
    assert_eq!(
        deliveries[0].error.as_deref(),
        Some("network error: connection refused")
    );

    h.drain_retries().await;
    let done = h.deliveries.get(deliveries[0].id).await.unwrap().unwrap();
    assert_eq!(done.status, DeliveryStatus::Success);
    assert_eq!(done.attempts, 2);
    assert!(done.delivered_at.is_some());
    assert!(done.error.is_none());

    let attempts: Vec<String> = transport
        .requests()
        .iter()
        .map(|r| r.header("X-Webhook-Attempt").unwrap().to_string())
        .collect();
    assert_eq!(attempts, vec!["1", "2"]);

    let sub = h.subscription(sub.id).await;
    assert_eq!(sub.success_count, 1);
    assert_eq!(sub.failure_count, 1);
}

#[tokio::test]
async fn test_success_on_first_attempt() {
    let transport = Arc::new(ScriptedTransport::default());
    let h = harness(transport.clone());
    let sub = h.subscribe(&["user.created"], None).await;

    let deliveries = h.dispatcher.trigger(&event("user.created")).await.unwrap();
    let d = &deliveries[0];
    assert_eq!(d.status, DeliveryStatus::Success);
    assert_eq!(d.attempts, 1);
    assert_eq!(d.response_code, Some(200));
    assert!(d.delivered_at.is_some());
    assert!(d.response_time_ms.is_some());

    let sub = h.subscription(sub.id).await;
    assert_eq!(sub.success_count, 1);
    assert!(sub.last_delivery_at.is_some());
    assert_eq!(h.retries.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_only_matching_active_subscriptions_receive_event() {
    let transport = Arc::new(ScriptedTransport::default());
    let h = harness(transport.clone());
    let a = h.subscribe(&["user.created", "user.deleted"], None).await;
    let b = h.subscribe(&["user.created"], None).await;
    h.subscribe(&["order.created"], None).await;
    let inactive = h.subscribe(&["user.created"], None).await;
    h.subscriptions
        .update(
            inactive.id,
            SubscriptionUpdate {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let deliveries = h.dispatcher.trigger(&event("user.created")).await.unwrap();
    let mut targets: Vec<_> = deliveries.iter().map(|d| d.subscription_id).collect();
    targets.sort();
    let mut expected = vec![a.id, b.id];
    expected.sort();
    assert_eq!(targets, expected);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_no_matching_subscriptions() {
    let transport = Arc::new(ScriptedTransport::default());
    let h = harness(transport.clone());
    h.subscribe(&["order.created"], None).await;

    let deliveries = h.dispatcher.trigger(&event("user.created")).await.unwrap();
    assert!(deliveries.is_empty());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_deleted_subscription_fails_pending_retry() {
    let transport = Arc::new(ScriptedTransport::failing(1));
    let h = harness(transport.clone());
    let sub = h.subscribe(&["user.created"], Some(5)).await;

    let deliveries = h.dispatcher.trigger(&event("user.created")).await.unwrap();
    assert_eq!(deliveries[0].status, DeliveryStatus::Retrying);

    assert!(h.subscriptions.delete(sub.id).await.unwrap());
    assert_eq!(h.drain_retries().await, 1);

    let d = h.deliveries.get(deliveries[0].id).await.unwrap().unwrap();
    assert_eq!(d.status, DeliveryStatus::Failed);
    assert_eq!(d.attempts, 1);
    assert_eq!(
        d.error.unwrap(),
        format!("subscription {} no longer exists", sub.id)
    );
    // No further network call was made
    assert_eq!(transport.calls(), 1);
    assert_eq!(h.retries.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_deactivated_subscription_fails_pending_retry() {
    let transport = Arc::new(ScriptedTransport::failing(1));
    let h = harness(transport.clone());
    let sub = h.subscribe(&["user.created"], Some(5)).await;

    let deliveries = h.dispatcher.trigger(&event("user.created")).await.unwrap();
    h.subscriptions
        .update(
            sub.id,
            SubscriptionUpdate {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.drain_retries().await;

    let d = h.deliveries.get(deliveries[0].id).await.unwrap().unwrap();
    assert_eq!(d.status, DeliveryStatus::Failed);
    assert_eq!(d.error.unwrap(), format!("subscription {} is inactive", sub.id));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_retry_limit_one_fails_immediately() {
    let transport = Arc::new(ScriptedTransport::failing(1));
    let h = harness(transport);
    h.subscribe(&["user.created"], Some(1)).await;

    let deliveries = h.dispatcher.trigger(&event("user.created")).await.unwrap();
    assert_eq!(deliveries[0].status, DeliveryStatus::Failed);
    assert_eq!(deliveries[0].attempts, 1);
    assert_eq!(h.retries.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_global_retry_limit_applies_without_override() {
    let transport = Arc::new(ScriptedTransport::failing(10));
    let h = harness(transport.clone());
    h.settings
        .update(SettingsUpdate {
            global_retry_limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    h.subscribe(&["user.created"], None).await;

    let deliveries = h.dispatcher.trigger(&event("user.created")).await.unwrap();
    h.drain_retries().await;
    h.drain_retries().await;

    let d = h.deliveries.get(deliveries[0].id).await.unwrap().unwrap();
    assert_eq!(d.status, DeliveryStatus::Failed);
    assert_eq!(d.attempts, 2);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_retry_due_time_follows_backoff() {
    let transport = Arc::new(ScriptedTransport::failing(1));
    let h = harness(transport);
    h.subscribe(&["user.created"], None).await;

    let before = Utc::now();
    h.dispatcher.trigger(&event("user.created")).await.unwrap();

    let entries = h.retries.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempt, 2);
    // Exponential backoff after attempt 1 is 1s
    let delay = entries[0].due_at - before;
    assert!(delay >= chrono::Duration::seconds(1));
    assert!(delay < chrono::Duration::seconds(2));

    // Not due yet
    assert_eq!(
        h.dispatcher
            .process_due_retries(before, 100)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_seven_successes_three_failures_stats() {
    let mut script: Vec<Result<u16, TransportError>> = vec![Ok(200); 7];
    script.extend(vec![Ok(503); 3]);
    let transport = Arc::new(ScriptedTransport::with_script(script));
    let h = harness(transport);
    h.subscribe(&["order.created"], Some(1)).await;

    for _ in 0..10 {
        h.dispatcher.trigger(&event("order.created")).await.unwrap();
    }

    let stats = hookline_core::StatsAggregator::new(h.subscriptions.clone(), h.deliveries.clone())
        .summary()
        .await
        .unwrap();
    assert_eq!(stats.total_deliveries, 10);
    assert_eq!(stats.successful_deliveries, 7);
    assert_eq!(stats.failed_deliveries, 3);
    assert_eq!(stats.success_rate, 70.0);
    assert_eq!(stats.recent_failures, 3);
    assert_eq!(stats.total_subscriptions, 1);
    assert_eq!(stats.active_subscriptions, 1);
}

// ============================================================================
// Wire format
// ============================================================================

#[tokio::test]
async fn test_signature_header_verifies_against_body() {
    let transport = Arc::new(ScriptedTransport::default());
    let h = harness(transport.clone());
    let sub = h.subscribe(&["user.created"], None).await;

    let e = event("user.created");
    let deliveries = h.dispatcher.trigger(&e).await.unwrap();

    let requests = transport.requests();
    let request = &requests[0];
    assert_eq!(request.url, sub.endpoint);
    assert_eq!(request.header("Content-Type"), Some("application/json"));
    assert_eq!(request.header("X-Webhook-Id"), Some(e.id.to_string().as_str()));
    assert_eq!(request.header("X-Webhook-Event"), Some("user.created"));
    assert_eq!(
        request.header("X-Webhook-Delivery"),
        Some(deliveries[0].id.to_string().as_str())
    );

    let signature = request.header(SIGNATURE_HEADER).unwrap();
    assert!(signer::verify(&request.body, signature, &sub.secret));
    assert!(!signer::verify(&request.body, signature, "some-other-secret"));

    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["type"], "user.created");
    assert_eq!(body["source"], "accounts");
    assert_eq!(body["payload"]["user_id"], 42);
}

#[tokio::test]
async fn test_signing_disabled_omits_header() {
    let transport = Arc::new(ScriptedTransport::default());
    let h = harness(transport.clone());
    h.settings
        .update(SettingsUpdate {
            signature_verification: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
    h.subscribe(&["user.created"], None).await;

    h.dispatcher.trigger(&event("user.created")).await.unwrap();
    assert!(transport.requests()[0].header(SIGNATURE_HEADER).is_none());
}

#[tokio::test]
async fn test_ip_allow_list_blocks_without_network_call() {
    let transport = Arc::new(ScriptedTransport::default());
    let h = harness(transport.clone());
    h.settings
        .update(SettingsUpdate {
            ip_allow_list: Some(hookline_core::IpAllowList {
                enabled: true,
                entries: vec!["10.0.0.1".to_string()],
            }),
            ..Default::default()
        })
        .await
        .unwrap();
    h.subscribe(&["user.created"], Some(1)).await;

    let deliveries = h.dispatcher.trigger(&event("user.created")).await.unwrap();
    assert_eq!(deliveries[0].status, DeliveryStatus::Failed);
    assert_eq!(
        deliveries[0].error.as_deref(),
        Some("endpoint host hooks.example.com is not in the IP allow-list")
    );
    assert_eq!(transport.calls(), 0);
}

// ============================================================================
// Timeouts and ordering
// ============================================================================

/// Never answers within any reasonable timeout
struct HangingTransport;

#[async_trait]
impl Transport for HangingTransport {
    async fn send(&self, _request: WebhookRequest) -> Result<TransportResponse, TransportError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(TransportResponse {
            status: 200,
            body: String::new(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure() {
    let h = harness(Arc::new(HangingTransport));
    let sub = h
        .subscriptions
        .create(NewSubscription {
            name: "Slow".to_string(),
            endpoint: "https://slow.example.com/hook".to_string(),
            event_types: vec!["user.created".to_string()],
            retry_limit: Some(2),
            timeout_seconds: Some(5),
            ..Default::default()
        })
        .await
        .unwrap();

    let deliveries = h.dispatcher.trigger(&event("user.created")).await.unwrap();
    let d = &deliveries[0];
    assert_eq!(d.status, DeliveryStatus::Retrying);
    assert!(d.response_code.is_none());
    assert_eq!(d.error.as_deref(), Some("request timed out after 5s"));
    assert!(d.response_time_ms.unwrap() >= 5000);

    let sub = h.subscription(sub.id).await;
    assert_eq!(sub.failure_count, 1);
}

/// Tracks how many requests per endpoint are in flight at once
#[derive(Default)]
struct ConcurrencyTracker {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    order: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for ConcurrencyTracker {
    async fn send(&self, request: WebhookRequest) -> Result<TransportResponse, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        self.order
            .lock()
            .unwrap()
            .push(body["payload"]["seq"].to_string());

        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(TransportResponse {
            status: 200,
            body: String::new(),
        })
    }
}

#[tokio::test]
async fn test_one_delivery_in_flight_per_subscription() {
    let tracker = Arc::new(ConcurrencyTracker::default());
    let h = harness(tracker.clone());
    h.subscribe(&["order.created"], None).await;

    let events: Vec<Event> = (0..5)
        .map(|seq| Event::new("order.created", json!({"seq": seq}), "orders").unwrap())
        .collect();
    let results = join_all(events.iter().map(|e| h.dispatcher.trigger(e))).await;

    for result in results {
        assert_eq!(result.unwrap()[0].status, DeliveryStatus::Success);
    }
    assert_eq!(tracker.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.order.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn test_subscriptions_deliver_concurrently() {
    let tracker = Arc::new(ConcurrencyTracker::default());
    let h = harness(tracker.clone());
    for _ in 0..3 {
        h.subscribe(&["order.created"], None).await;
    }

    let e = Event::new("order.created", json!({"seq": 0}), "orders").unwrap();
    let deliveries = h.dispatcher.trigger(&e).await.unwrap();
    assert_eq!(deliveries.len(), 3);
    assert_eq!(tracker.max_in_flight.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Operator actions
// ============================================================================

#[tokio::test]
async fn test_test_delivery_is_single_shot() {
    let transport = Arc::new(ScriptedTransport::failing(1));
    let h = harness(transport.clone());
    let sub = h.subscribe(&["user.created"], Some(5)).await;
    h.subscriptions
        .update(
            sub.id,
            SubscriptionUpdate {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let d = h.dispatcher.test(sub.id).await.unwrap();
    assert_eq!(d.event_type, "webhook.test");
    assert_eq!(d.status, DeliveryStatus::Failed);
    assert_eq!(d.attempts, 1);
    assert_eq!(h.retries.pending_count().await.unwrap(), 0);
    assert_eq!(
        transport.requests()[0].header("X-Webhook-Event"),
        Some("webhook.test")
    );

    // Counted like any other attempt
    assert_eq!(h.subscription(sub.id).await.failure_count, 1);

    let d = h.dispatcher.test(sub.id).await.unwrap();
    assert_eq!(d.status, DeliveryStatus::Success);
}

#[tokio::test]
async fn test_test_unknown_subscription() {
    let h = harness(Arc::new(ScriptedTransport::default()));
    let id = Uuid::now_v7();
    assert!(matches!(
        h.dispatcher.test(id).await.unwrap_err(),
        WebhookError::SubscriptionNotFound(x) if x == id
    ));
}

#[tokio::test]
async fn test_manual_retry_creates_new_delivery() {
    let transport = Arc::new(ScriptedTransport::failing(2));
    let h = harness(transport.clone());
    let sub = h.subscribe(&["invoice.paid"], Some(2)).await;

    let first = h.dispatcher.trigger(&event("invoice.paid")).await.unwrap()[0].clone();
    h.drain_retries().await;
    let failed = h.deliveries.get(first.id).await.unwrap().unwrap();
    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert_eq!(failed.attempts, 2);

    let retried = h.dispatcher.manual_retry(failed.id).await.unwrap();
    assert_ne!(retried.id, failed.id);
    assert_eq!(retried.retry_of, Some(failed.id));
    assert_eq!(retried.event_id, failed.event_id);
    assert_eq!(retried.status, DeliveryStatus::Success);
    // Attempt number is capped at the retry limit
    assert_eq!(retried.attempts, 2);
    assert_eq!(
        transport.requests().last().unwrap().header("X-Webhook-Attempt"),
        Some("2")
    );

    // Original is terminal and untouched
    assert_eq!(h.deliveries.get(failed.id).await.unwrap().unwrap(), failed);
    assert_eq!(h.subscription(sub.id).await.success_count, 1);
}

#[tokio::test]
async fn test_manual_retry_requires_failed_delivery() {
    let transport = Arc::new(ScriptedTransport::failing(2));
    let h = harness(transport);
    h.subscribe(&["invoice.paid"], Some(3)).await;

    let deliveries = h.dispatcher.trigger(&event("invoice.paid")).await.unwrap();
    let d = &deliveries[0];
    assert_eq!(d.status, DeliveryStatus::Retrying);

    // Only failed deliveries can be retried manually
    let err = h.dispatcher.manual_retry(d.id).await.unwrap_err();
    assert!(matches!(
        err,
        WebhookError::InvalidStateTransition {
            from: DeliveryStatus::Retrying,
            ..
        }
    ));
}

#[tokio::test]
async fn test_manual_retry_rejects_success() {
    let h = harness(Arc::new(ScriptedTransport::default()));
    h.subscribe(&["user.created"], None).await;
    let d = h.dispatcher.trigger(&event("user.created")).await.unwrap()[0].clone();

    let err = h.dispatcher.manual_retry(d.id).await.unwrap_err();
    assert!(matches!(
        err,
        WebhookError::InvalidStateTransition {
            from: DeliveryStatus::Success,
            ..
        }
    ));
    assert_eq!(h.deliveries.get(d.id).await.unwrap().unwrap(), d);

    assert!(matches!(
        h.dispatcher
            .manual_retry(Uuid::now_v7())
            .await
            .unwrap_err(),
        WebhookError::DeliveryNotFound(_)
    ));
}

// ============================================================================
// Races and recovery
// ============================================================================

#[tokio::test]
async fn test_subscription_deleted_while_retry_waits_for_lane() {
    let transport = Arc::new(GatedTransport::new(ScriptedTransport::failing(1), |r| {
        r.header("X-Webhook-Event") == Some("webhook.test")
    }));
    let h = harness(transport.clone());
    let sub = h.subscribe(&["user.created"], Some(5)).await;

    let first = h.dispatcher.trigger(&event("user.created")).await.unwrap()[0].clone();
    assert_eq!(first.status, DeliveryStatus::Retrying);

    // A test delivery holds the lane while the retry queues up behind it
    let holder = h.dispatcher.test(sub.id);
    let contender = async {
        transport.entered.notified().await;
        let delete_then_release = async {
            while !h
                .retries
                .entries()
                .await
                .iter()
                .any(|r| r.claimed_until.is_some())
            {
                tokio::task::yield_now().await;
            }
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            assert!(h.subscriptions.delete(sub.id).await.unwrap());
            transport.release.notify_one();
        };
        let (drained, ()) = tokio::join!(h.drain_retries(), delete_then_release);
        drained
    };
    let (tested, drained) = tokio::join!(holder, contender);

    assert_eq!(tested.unwrap().status, DeliveryStatus::Success);
    assert_eq!(drained, 1);
    let d = h.delivery(first.id).await;
    assert_eq!(d.status, DeliveryStatus::Failed);
    assert_eq!(d.attempts, 1);
    assert_eq!(
        d.error.unwrap(),
        format!("subscription {} no longer exists", sub.id)
    );
    // Only the first attempt and the test delivery reached the network
    assert_eq!(transport.inner.calls(), 2);
    assert_eq!(h.retries.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_slow_retry_does_not_hold_back_other_subscriptions() {
    const SLOW: &str = "https://slow.example.com/hook";
    let transport = Arc::new(GatedTransport::new(ScriptedTransport::failing(2), |r| {
        r.url == SLOW && r.header("X-Webhook-Attempt") == Some("2")
    }));
    let h = harness(transport.clone());
    h.subscribe_at(SLOW, &["user.created"], Some(3)).await;
    h.subscribe_at("https://fast.example.com/hook", &["order.created"], Some(3))
        .await;

    let slow = h.dispatcher.trigger(&event("user.created")).await.unwrap()[0].clone();
    assert_eq!(slow.status, DeliveryStatus::Retrying);

    let worker = RetryWorker::new(
        h.dispatcher.clone(),
        RetryWorkerConfig::default().with_poll_interval(Duration::from_millis(20)),
    );
    worker.start();

    // The slow subscription's retry is now in flight and stays there
    tokio::time::timeout(Duration::from_secs(10), transport.entered.notified())
        .await
        .expect("slow retry never started");

    let fast = h.dispatcher.trigger(&event("order.created")).await.unwrap()[0].clone();
    assert_eq!(fast.status, DeliveryStatus::Retrying);

    let fast = h.wait_for_status(fast.id, DeliveryStatus::Success).await;
    assert_eq!(fast.attempts, 2);
    assert_eq!(h.delivery(slow.id).await.status, DeliveryStatus::Retrying);

    transport.release.notify_one();
    let slow = h.wait_for_status(slow.id, DeliveryStatus::Success).await;
    assert_eq!(slow.attempts, 2);

    worker.shutdown().await;
    assert!(!worker.is_running());
    assert_eq!(h.retries.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_lost_retrying_transition_leaves_retry_queued() {
    let transport = Arc::new(ScriptedTransport::failing(1));
    let subscriptions = Arc::new(InMemorySubscriptionStore::new());
    let deliveries = Arc::new(LossyRetryingStore {
        inner: InMemoryDeliveryStore::new(),
    });
    let retries = Arc::new(InMemoryRetryQueue::new());
    let settings = Arc::new(SettingsRegistry::new(Arc::new(InMemorySettingsStore::new())));
    let dispatcher = Dispatcher::new(
        subscriptions.clone(),
        deliveries.clone(),
        retries.clone(),
        settings,
        transport.clone(),
    );
    subscriptions
        .create(NewSubscription {
            name: "Accounts".to_string(),
            endpoint: "https://hooks.example.com/inbox".to_string(),
            event_types: vec!["user.created".to_string()],
            retry_limit: Some(3),
            ..Default::default()
        })
        .await
        .unwrap();

    // The attempt fails and recording it fails too
    let triggered = dispatcher.trigger(&event("user.created")).await.unwrap();
    assert!(triggered.is_empty());

    let entries = retries.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempt, 2);
    let stuck = deliveries.get(entries[0].delivery_id).await.unwrap().unwrap();
    assert_eq!(stuck.status, DeliveryStatus::Pending);

    dispatcher
        .process_due_retries(Utc::now() + chrono::Duration::hours(1), 10)
        .await
        .unwrap();
    let done = deliveries.get(stuck.id).await.unwrap().unwrap();
    assert_eq!(done.status, DeliveryStatus::Success);
    assert_eq!(done.attempts, 2);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_recover_stalled_requeues_unattempted_delivery() {
    let transport = Arc::new(ScriptedTransport::default());
    let h = harness(transport.clone());
    let sub = h.subscribe(&["user.created"], None).await;

    // Stored right before a crash, never attempted
    let e = event("user.created");
    h.deliveries.save_event(&e).await.unwrap();
    let stranded = h.deliveries.create(Delivery::pending(sub.id, &e)).await.unwrap();
    let lost_event = event("user.created");
    let orphan = h
        .deliveries
        .create(Delivery::pending(sub.id, &lost_event))
        .await
        .unwrap();

    let stale_after = Duration::from_secs(600);
    let recovered = h
        .dispatcher
        .recover_stalled(Utc::now(), stale_after, 100)
        .await
        .unwrap();
    assert_eq!(recovered, 0, "recent deliveries are left alone");

    let later = Utc::now() + chrono::Duration::minutes(11);
    assert_eq!(
        h.dispatcher.recover_stalled(later, stale_after, 100).await.unwrap(),
        1
    );
    // Already queued
    assert_eq!(
        h.dispatcher.recover_stalled(later, stale_after, 100).await.unwrap(),
        0
    );

    let orphan = h.delivery(orphan.id).await;
    assert_eq!(orphan.status, DeliveryStatus::Failed);
    assert_eq!(
        orphan.error.unwrap(),
        format!("event {} is no longer stored", lost_event.id)
    );

    assert_eq!(h.drain_retries().await, 1);
    let stranded = h.delivery(stranded.id).await;
    assert_eq!(stranded.status, DeliveryStatus::Success);
    assert_eq!(stranded.attempts, 1);
    assert_eq!(transport.calls(), 1);
}

// ============================================================================
// Alerting
// ============================================================================

#[tokio::test]
async fn test_alert_fires_when_threshold_reached() {
    let transport = Arc::new(ScriptedTransport::failing(3));
    let h = harness(transport);
    h.settings
        .update(SettingsUpdate {
            alert_threshold: Some(2),
            alert_contact: Some("oncall@example.com".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    h.subscribe(&["user.created"], Some(1)).await;

    h.dispatcher.trigger(&event("user.created")).await.unwrap();
    assert!(h.alerts.alerts.lock().unwrap().is_empty());

    h.dispatcher.trigger(&event("user.created")).await.unwrap();
    h.dispatcher.trigger(&event("user.created")).await.unwrap();

    let alerts = h.alerts.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].recent_failures, 2);
    assert_eq!(alerts[0].threshold, 2);
    assert_eq!(alerts[0].contact.as_deref(), Some("oncall@example.com"));
}

#[tokio::test]
async fn test_alert_fires_when_count_jumps_past_threshold() {
    let transport = Arc::new(ScriptedTransport::failing(3));
    let h = harness(transport);
    h.settings
        .update(SettingsUpdate {
            alert_threshold: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    for _ in 0..3 {
        h.subscribe(&["user.created"], Some(1)).await;
    }

    // Three concurrent failures may all be counted before any check runs
    let deliveries = h.dispatcher.trigger(&event("user.created")).await.unwrap();
    assert!(deliveries.iter().all(|d| d.status == DeliveryStatus::Failed));

    let alerts = h.alerts.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].recent_failures >= 2);
}

#[tokio::test]
async fn test_lowered_threshold_alerts_on_next_failure() {
    let transport = Arc::new(ScriptedTransport::failing(5));
    let h = harness(transport);
    h.settings
        .update(SettingsUpdate {
            alert_threshold: Some(10),
            ..Default::default()
        })
        .await
        .unwrap();
    h.subscribe(&["user.created"], Some(1)).await;

    for _ in 0..3 {
        h.dispatcher.trigger(&event("user.created")).await.unwrap();
    }
    assert!(h.alerts.alerts.lock().unwrap().is_empty());

    h.settings
        .update(SettingsUpdate {
            alert_threshold: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    h.dispatcher.trigger(&event("user.created")).await.unwrap();
    h.dispatcher.trigger(&event("user.created")).await.unwrap();

    let alerts = h.alerts.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].recent_failures, 4);
    assert_eq!(alerts[0].threshold, 2);
}
