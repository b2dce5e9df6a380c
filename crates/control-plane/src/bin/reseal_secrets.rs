// Re-encrypt subscription secrets with the current primary key
//
// Usage, after rotating keys:
//   SECRETS_ENCRYPTION_KEY=<new key_id:base64> \
//   SECRETS_ENCRYPTION_KEY_PREVIOUS=<old key_id:base64> \
//   DATABASE_URL=... cargo run --bin reseal-secrets
//
// Plaintext secrets left over from before encryption was enabled are sealed too.

use anyhow::{bail, Context, Result};
use hookline_storage::{PgWebhookStore, SecretCipher};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hookline_storage=info".into()),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
    let Some(cipher) = SecretCipher::from_env().context("invalid encryption keys")? else {
        bail!("SECRETS_ENCRYPTION_KEY is required");
    };

    let store = PgWebhookStore::connect(&database_url, Some(cipher)).await?;
    store.migrate().await?;
    let resealed = store.reseal_secrets().await?;
    println!("Resealed {resealed} subscription secret(s)");
    Ok(())
}
