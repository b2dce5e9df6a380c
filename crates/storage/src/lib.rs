// PostgreSQL storage layer with sqlx
//
// Implements the hookline-core repository traits against PostgreSQL:
// - SubscriptionStore, DeliveryStore, SettingsStore, RetryQueue on PgWebhookStore
// - SecretCipher for subscription secrets at rest
//
// Decision: Domain rules (validation, delivery state machine) stay in hookline-core;
// this crate only locks rows and persists the results.
// Decision: The retry queue is claimed with FOR UPDATE SKIP LOCKED plus a lease, so
// several control-plane replicas can run retry workers against one database.

pub mod encryption;
pub mod models;
pub mod repositories;

pub use encryption::{generate_encryption_key, SecretCipher};
pub use models::*;
pub use repositories::PgWebhookStore;
