// Storage backend selection
// Decision: Use enum dispatch to pick the backend once at startup; the engine itself
// only sees the repository traits.
//
// PostgreSQL (production) when DATABASE_URL is set, in-memory (dev mode) otherwise.

use std::sync::Arc;

use anyhow::{Context, Result};
use hookline_core::EngineStores;
use hookline_storage::{PgWebhookStore, SecretCipher};

use crate::config::Config;

/// Storage backend that can be either PostgreSQL or in-memory
#[derive(Clone)]
pub enum StorageBackend {
    /// PostgreSQL database (production)
    Postgres(PgWebhookStore),
    /// In-memory stores (dev mode), lost on restart
    InMemory(EngineStores),
}

impl StorageBackend {
    /// Connect to PostgreSQL and apply migrations
    pub async fn postgres(database_url: &str) -> Result<Self> {
        let cipher = SecretCipher::from_env().context("invalid SECRETS_ENCRYPTION_KEY")?;
        if cipher.is_none() {
            tracing::warn!(
                "SECRETS_ENCRYPTION_KEY not set; subscription secrets are stored unencrypted"
            );
        }
        let store = PgWebhookStore::connect(database_url, cipher).await?;
        store.migrate().await?;
        Ok(Self::Postgres(store))
    }

    /// Create an in-memory storage backend
    pub fn in_memory() -> Self {
        Self::InMemory(EngineStores::in_memory())
    }

    /// Pick the backend the configuration asks for
    pub async fn from_config(config: &Config) -> Result<Self> {
        match &config.database_url {
            Some(url) => Self::postgres(url).await,
            None => Ok(Self::in_memory()),
        }
    }

    /// Check if this is dev mode (in-memory)
    pub fn is_dev_mode(&self) -> bool {
        matches!(self, Self::InMemory(_))
    }

    /// Repository handles for the engine
    pub fn stores(&self) -> EngineStores {
        match self {
            Self::Postgres(store) => {
                let store = Arc::new(store.clone());
                EngineStores {
                    subscriptions: store.clone(),
                    deliveries: store.clone(),
                    retries: store.clone(),
                    settings: store,
                }
            }
            Self::InMemory(stores) => stores.clone(),
        }
    }
}
