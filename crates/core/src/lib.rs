// Outbound Webhook Delivery Engine
//
// Registers webhook subscriptions, delivers domain events to them with HMAC
// signatures, retries failures with backoff and keeps delivery history.
//
// Key design decisions:
// - Storage is behind traits (SubscriptionStore, DeliveryStore, RetryQueue, SettingsStore)
// - In-memory implementations ship here; PostgreSQL lives in hookline-storage
// - Retries are entries in a durable queue polled by RetryWorker, not sleeping tasks
// - Network I/O goes through the Transport trait so tests can inject fakes
// - A manual retry creates a new Delivery (retry_of) and never reopens a terminal one

pub mod alerts;
pub mod backoff;
pub mod delivery;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event;
pub mod event_types;
pub mod memory;
pub mod settings;
pub mod signer;
pub mod stats;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod validation;
pub mod worker;

// Re-exports for convenience
pub use alerts::{AlertSink, FailureAlert, LogAlertSink};
pub use backoff::BackoffStrategy;
pub use delivery::{Delivery, DeliveryStatus, DeliveryTransition};
pub use dispatcher::{DeliveryOutcome, Dispatcher};
pub use engine::{EngineStores, WebhookEngine};
pub use error::{Result, WebhookError};
pub use event::Event;
pub use event_types::WebhookEventType;
pub use memory::{
    InMemoryDeliveryStore, InMemoryRetryQueue, InMemorySettingsStore, InMemorySubscriptionStore,
};
pub use settings::{IpAllowList, Settings, SettingsRegistry, SettingsUpdate};
pub use stats::{DeliveryTotals, StatsAggregator, StatsSummary, SubscriptionTotals};
pub use store::{
    DeliveryStore, Page, RetryQueue, ScheduledRetry, SettingsStore, SubscriptionStore,
};
pub use subscription::{NewSubscription, Subscription, SubscriptionUpdate};
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse, WebhookRequest};
pub use worker::{RetryWorker, RetryWorkerConfig};
