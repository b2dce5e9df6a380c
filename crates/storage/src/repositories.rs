// PostgreSQL implementations of the core repository traits
//
// One pool serves all four traits. Read-modify-write operations (subscription update,
// delivery transition) lock the row with SELECT ... FOR UPDATE and run the domain
// checks in Rust, so both backends share one set of rules.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::{
    Delivery, DeliveryStore, DeliveryTotals, DeliveryTransition, Event, NewSubscription, Page,
    Result, RetryQueue, ScheduledRetry, Settings, SettingsStore, Subscription, SubscriptionStore,
    SubscriptionTotals, SubscriptionUpdate, WebhookError,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::encryption::SecretCipher;
use crate::models::*;

/// Map a sqlx error to a storage error, logging it with the failed operation
fn db_err(op: &'static str) -> impl Fn(sqlx::Error) -> WebhookError {
    move |e| {
        error!("Failed to {}: {}", op, e);
        WebhookError::storage(format!("failed to {op}: {e}"))
    }
}

/// PostgreSQL-backed store for subscriptions, deliveries, settings and retries
#[derive(Clone)]
pub struct PgWebhookStore {
    pool: PgPool,
    cipher: Option<SecretCipher>,
}

impl PgWebhookStore {
    pub fn new(pool: PgPool, cipher: Option<SecretCipher>) -> Self {
        Self { pool, cipher }
    }

    /// Connect to `database_url`
    pub async fn connect(database_url: &str, cipher: Option<SecretCipher>) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("failed to connect to PostgreSQL")?;
        Ok(Self::new(pool, cipher))
    }

    /// Apply embedded migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn seal_secret(&self, secret: &str) -> Result<String> {
        match &self.cipher {
            Some(cipher) => cipher
                .seal(secret)
                .map_err(|e| WebhookError::storage(e.to_string())),
            None => Ok(secret.to_string()),
        }
    }

    fn subscription_from_row(&self, row: SubscriptionRow) -> Result<Subscription> {
        let secret = match &self.cipher {
            Some(cipher) => cipher.open(&row.secret).map_err(|e| {
                error!(subscription_id = %row.id, "Failed to decrypt secret: {}", e);
                WebhookError::storage(format!("failed to decrypt secret of {}", row.id))
            })?,
            None => row.secret.clone(),
        };
        Ok(row.into_subscription(secret))
    }

    /// Re-encrypt every secret not sealed with the primary key.
    ///
    /// Run after rotating `SECRETS_ENCRYPTION_KEY`. Returns the number of rows rewritten.
    pub async fn reseal_secrets(&self) -> anyhow::Result<usize> {
        let Some(cipher) = &self.cipher else {
            return Ok(0);
        };

        let rows: Vec<(Uuid, String)> =
            sqlx::query_as("SELECT id, secret FROM webhook_subscriptions")
                .fetch_all(&self.pool)
                .await?;

        let mut resealed = 0;
        for (id, stored) in rows {
            if cipher.is_current(&stored) {
                continue;
            }
            let sealed = cipher.seal(&cipher.open(&stored)?)?;
            sqlx::query("UPDATE webhook_subscriptions SET secret = $2 WHERE id = $1 AND secret = $3")
                .bind(id)
                .bind(&sealed)
                .bind(&stored)
                .execute(&self.pool)
                .await?;
            resealed += 1;
        }

        info!(resealed, key_id = cipher.primary_key_id(), "Resealed subscription secrets");
        Ok(resealed)
    }
}

// ============================================================================
// SubscriptionStore
// ============================================================================

#[async_trait]
impl SubscriptionStore for PgWebhookStore {
    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn create(&self, input: NewSubscription) -> Result<Subscription> {
        let subscription = Subscription::from_new(input, Utc::now())?;
        let sealed = self.seal_secret(&subscription.secret)?;

        sqlx::query(
            r#"
            INSERT INTO webhook_subscriptions
                (id, name, endpoint, event_types, secret, active, retry_limit, timeout_seconds,
                 success_count, failure_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, 0, $9, $9)
            "#,
        )
        .bind(subscription.id)
        .bind(&subscription.name)
        .bind(&subscription.endpoint)
        .bind(&subscription.event_types)
        .bind(&sealed)
        .bind(subscription.active)
        .bind(subscription.retry_limit.map(|v| v as i32))
        .bind(subscription.timeout_seconds.map(|v| v as i32))
        .bind(subscription.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("create subscription"))?;

        debug!(subscription_id = %subscription.id, "created subscription");
        Ok(subscription)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions WHERE id = $1");
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("get subscription"))?;

        row.map(|r| self.subscription_from_row(r)).transpose()
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions ORDER BY created_at, id"
        );
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("list subscriptions"))?;

        rows.into_iter()
            .map(|r| self.subscription_from_row(r))
            .collect()
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: Uuid, update: SubscriptionUpdate) -> Result<Subscription> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("begin transaction"))?;

        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions WHERE id = $1 FOR UPDATE"
        );
        let row: SubscriptionRow = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err("lock subscription"))?
            .ok_or(WebhookError::SubscriptionNotFound(id))?;

        let existing = self.subscription_from_row(row)?;
        // Validation failure drops the transaction, leaving the row untouched
        let merged = existing.merged(update, Utc::now())?;
        let sealed = if merged.secret == existing.secret {
            None
        } else {
            Some(self.seal_secret(&merged.secret)?)
        };

        sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET name = $2, endpoint = $3, event_types = $4, secret = COALESCE($5, secret),
                active = $6, retry_limit = $7, timeout_seconds = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&merged.name)
        .bind(&merged.endpoint)
        .bind(&merged.event_types)
        .bind(sealed)
        .bind(merged.active)
        .bind(merged.retry_limit.map(|v| v as i32))
        .bind(merged.timeout_seconds.map(|v| v as i32))
        .bind(merged.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err("update subscription"))?;

        tx.commit().await.map_err(db_err("commit subscription update"))?;
        Ok(merged)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhook_subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete subscription"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_outcome(&self, id: Uuid, success: bool, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET success_count = success_count + CASE WHEN $2 THEN 1 ELSE 0 END,
                failure_count = failure_count + CASE WHEN $2 THEN 0 ELSE 1 END,
                last_delivery_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(success)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err("record delivery outcome"))?;

        if result.rows_affected() == 0 {
            return Err(WebhookError::SubscriptionNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset_counters(&self, id: Uuid) -> Result<Subscription> {
        let sql = format!(
            r#"
            UPDATE webhook_subscriptions
            SET success_count = 0, failure_count = 0, updated_at = NOW()
            WHERE id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        let row: SubscriptionRow = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("reset subscription counters"))?
            .ok_or(WebhookError::SubscriptionNotFound(id))?;

        self.subscription_from_row(row)
    }

    async fn subscription_totals(&self) -> Result<SubscriptionTotals> {
        let row: SubscriptionTotalsRow = sqlx::query_as(
            r#"
            SELECT COUNT(*) AS total, COUNT(*) FILTER (WHERE active) AS active
            FROM webhook_subscriptions
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("count subscriptions"))?;
        Ok(row.into())
    }

    async fn find_active_by_event_type(&self, event_type: &str) -> Result<Vec<Subscription>> {
        let sql = format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM webhook_subscriptions
            WHERE active AND $1 = ANY(event_types)
            ORDER BY created_at, id
            "#
        );
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(event_type)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("find subscriptions by event type"))?;

        rows.into_iter()
            .map(|r| self.subscription_from_row(r))
            .collect()
    }
}

// ============================================================================
// DeliveryStore
// ============================================================================

fn delivery_from_row(row: DeliveryRow) -> Result<Delivery> {
    Delivery::try_from(row).map_err(WebhookError::storage)
}

#[async_trait]
impl DeliveryStore for PgWebhookStore {
    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id))]
    async fn create(&self, delivery: Delivery) -> Result<Delivery> {
        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries
                (id, subscription_id, event_id, event_type, status, attempts, response_code,
                 response_time_ms, error, delivered_at, retry_of, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.subscription_id)
        .bind(delivery.event_id)
        .bind(&delivery.event_type)
        .bind(delivery.status.to_string())
        .bind(delivery.attempts as i32)
        .bind(delivery.response_code.map(i32::from))
        .bind(delivery.response_time_ms.map(|v| v as i64))
        .bind(&delivery.error)
        .bind(delivery.delivered_at)
        .bind(delivery.retry_of)
        .bind(delivery.created_at)
        .bind(delivery.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("create delivery"))?;

        Ok(delivery)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Delivery>> {
        let sql = format!("SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = $1");
        let row: Option<DeliveryRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("get delivery"))?;

        row.map(delivery_from_row).transpose()
    }

    async fn list_by_subscription(
        &self,
        subscription_id: Uuid,
        page: Page,
    ) -> Result<Vec<Delivery>> {
        let sql = format!(
            r#"
            SELECT {DELIVERY_COLUMNS}
            FROM webhook_deliveries
            WHERE subscription_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let rows: Vec<DeliveryRow> = sqlx::query_as(&sql)
            .bind(subscription_id)
            .bind(page.limit as i64)
            .bind(page.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("list deliveries"))?;

        rows.into_iter().map(delivery_from_row).collect()
    }

    async fn list_all(&self, page: Page) -> Result<Vec<Delivery>> {
        let sql = format!(
            r#"
            SELECT {DELIVERY_COLUMNS}
            FROM webhook_deliveries
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#
        );
        let rows: Vec<DeliveryRow> = sqlx::query_as(&sql)
            .bind(page.limit as i64)
            .bind(page.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("list deliveries"))?;

        rows.into_iter().map(delivery_from_row).collect()
    }

    async fn list_unfinished(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Delivery>> {
        let sql = format!(
            r#"
            SELECT {DELIVERY_COLUMNS}
            FROM webhook_deliveries
            WHERE status IN ('pending', 'retrying') AND updated_at < $1
            ORDER BY updated_at, id
            LIMIT $2
            "#
        );
        let rows: Vec<DeliveryRow> = sqlx::query_as(&sql)
            .bind(updated_before)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("list unfinished deliveries"))?;

        rows.into_iter().map(delivery_from_row).collect()
    }

    #[instrument(skip(self, transition), fields(to = %transition.status))]
    async fn update(&self, id: Uuid, transition: DeliveryTransition) -> Result<Delivery> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("begin transaction"))?;

        let sql = format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = $1 FOR UPDATE"
        );
        let row: DeliveryRow = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err("lock delivery"))?
            .ok_or(WebhookError::DeliveryNotFound(id))?;

        let mut delivery = delivery_from_row(row)?;
        delivery.apply(transition, Utc::now())?;

        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = $2, attempts = $3, response_code = $4, response_time_ms = $5,
                error = $6, delivered_at = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delivery.status.to_string())
        .bind(delivery.attempts as i32)
        .bind(delivery.response_code.map(i32::from))
        .bind(delivery.response_time_ms.map(|v| v as i64))
        .bind(&delivery.error)
        .bind(delivery.delivered_at)
        .bind(delivery.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err("update delivery"))?;

        tx.commit().await.map_err(db_err("commit delivery update"))?;
        Ok(delivery)
    }

    async fn save_event(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_events (id, event_type, payload, occurred_at, source)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.occurred_at)
        .bind(&event.source)
        .execute(&self.pool)
        .await
        .map_err(db_err("save event"))?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT id, event_type, payload, occurred_at, source FROM webhook_events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get event"))?;
        Ok(row.map(Event::from))
    }

    async fn count_failed_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM webhook_deliveries
            WHERE status = 'failed' AND created_at > $1 AND created_at <= $2
            "#,
        )
        .bind(since)
        .bind(until)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("count failed deliveries"))?;
        Ok(count.max(0) as u64)
    }

    async fn delivery_totals(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<DeliveryTotals> {
        let row: DeliveryTotalsRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'success') AS successful,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COALESCE(AVG(response_time_ms)::float8, 0) AS average_response_time_ms,
                COUNT(*) FILTER (
                    WHERE status = 'failed' AND created_at > $1 AND created_at <= $2
                ) AS recent_failures
            FROM webhook_deliveries
            "#,
        )
        .bind(since)
        .bind(until)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("aggregate deliveries"))?;
        Ok(row.into())
    }
}

// ============================================================================
// SettingsStore
// ============================================================================

#[async_trait]
impl SettingsStore for PgWebhookStore {
    async fn get(&self) -> Result<Option<Settings>> {
        let row: Option<SettingsRow> =
            sqlx::query_as("SELECT settings, updated_at FROM webhook_settings WHERE id")
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err("load settings"))?;

        match row {
            Some(row) => {
                let mut settings: Settings = serde_json::from_value(row.settings)?;
                settings.updated_at = row.updated_at;
                Ok(Some(settings))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, settings))]
    async fn put(&self, settings: &Settings) -> Result<()> {
        let value = serde_json::to_value(settings)?;
        sqlx::query(
            r#"
            INSERT INTO webhook_settings (id, settings, updated_at)
            VALUES (TRUE, $1, $2)
            ON CONFLICT (id) DO UPDATE SET settings = EXCLUDED.settings, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(value)
        .bind(settings.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("save settings"))?;
        Ok(())
    }
}

// ============================================================================
// RetryQueue
// ============================================================================

#[async_trait]
impl RetryQueue for PgWebhookStore {
    #[instrument(skip(self, retry), fields(delivery_id = %retry.delivery_id, attempt = retry.attempt))]
    async fn schedule(&self, retry: ScheduledRetry) -> Result<()> {
        let event = serde_json::to_value(&retry.event)?;
        sqlx::query(
            r#"
            INSERT INTO webhook_retry_queue
                (id, delivery_id, subscription_id, event, attempt, due_at, claimed_until)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(retry.id)
        .bind(retry.delivery_id)
        .bind(retry.subscription_id)
        .bind(event)
        .bind(retry.attempt as i32)
        .bind(retry.due_at)
        .bind(retry.claimed_until)
        .execute(&self.pool)
        .await
        .map_err(db_err("schedule retry"))?;

        debug!(due_at = %retry.due_at, "scheduled retry");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<ScheduledRetry>> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| WebhookError::config(format!("invalid claim lease: {e}")))?;

        // SKIP LOCKED lets several workers poll the same queue without contention;
        // expired leases are claimable again.
        let rows: Vec<RetryRow> = sqlx::query_as(
            r#"
            WITH claimable AS (
                SELECT id
                FROM webhook_retry_queue
                WHERE due_at <= $1
                  AND (claimed_until IS NULL OR claimed_until <= $1)
                ORDER BY due_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE webhook_retry_queue q
            SET claimed_until = $3
            FROM claimable c
            WHERE q.id = c.id
            RETURNING q.id, q.delivery_id, q.subscription_id, q.event, q.attempt,
                      q.due_at, q.claimed_until
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .bind(now + lease)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("claim due retries"))?;

        let mut claimed = rows
            .into_iter()
            .map(ScheduledRetry::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        // RETURNING does not preserve the CTE order
        claimed.sort_by_key(|r| (r.due_at, r.id));

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed due retries");
        }
        Ok(claimed)
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM webhook_retry_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("complete retry"))?;
        Ok(())
    }

    async fn is_scheduled(&self, delivery_id: Uuid) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM webhook_retry_queue WHERE delivery_id = $1)",
        )
        .bind(delivery_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("check retry queue"))
    }

    async fn pending_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM webhook_retry_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("count pending retries"))?;
        Ok(count.max(0) as usize)
    }
}
