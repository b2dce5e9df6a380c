// Encryption of subscription secrets at rest
//
// AES-256-GCM with a random nonce per value. Keys are versioned ("key_id:base64_key")
// so the primary key can be rotated while values sealed with older keys stay readable.
//
// Stored form: `enc:v1:<key_id>:<base64 nonce>:<base64 ciphertext+tag>`.
// Values without the `enc:` prefix are plaintext and returned as-is.

use std::collections::HashMap;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const SEALED_PREFIX: &str = "enc:v1:";

/// Seals and opens subscription secrets
#[derive(Clone)]
pub struct SecretCipher {
    primary_id: String,
    keys: Arc<HashMap<String, Aes256Gcm>>,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("primary_id", &self.primary_id)
            .field("key_count", &self.keys.len())
            .finish()
    }
}

impl SecretCipher {
    /// Build from a primary key and older keys still accepted for opening
    pub fn new(primary: &str, previous: &[&str]) -> Result<Self> {
        let (primary_id, primary_cipher) = parse_key(primary)?;
        let mut keys = HashMap::from([(primary_id.clone(), primary_cipher)]);

        for key in previous {
            let (id, cipher) = parse_key(key)?;
            if keys.insert(id.clone(), cipher).is_some() {
                bail!("duplicate encryption key id: {id}");
            }
        }

        Ok(Self {
            primary_id,
            keys: Arc::new(keys),
        })
    }

    /// Read `SECRETS_ENCRYPTION_KEY` (and `SECRETS_ENCRYPTION_KEY_PREVIOUS`).
    /// Returns None when no key is configured.
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(primary) = std::env::var("SECRETS_ENCRYPTION_KEY") else {
            return Ok(None);
        };
        let previous = std::env::var("SECRETS_ENCRYPTION_KEY_PREVIOUS").ok();
        let previous: Vec<&str> = previous.as_deref().into_iter().collect();
        Self::new(&primary, &previous).map(Some)
    }

    pub fn primary_key_id(&self) -> &str {
        &self.primary_id
    }

    /// Encrypt a secret with the primary key
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let cipher = self
            .keys
            .get(&self.primary_id)
            .context("primary encryption key missing")?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("secret encryption failed: {e}"))?;

        Ok(format!(
            "{SEALED_PREFIX}{}:{}:{}",
            self.primary_id,
            BASE64.encode(nonce_bytes),
            BASE64.encode(ciphertext)
        ))
    }

    /// Decrypt a stored secret; plaintext values pass through
    pub fn open(&self, stored: &str) -> Result<String> {
        let Some(sealed) = stored.strip_prefix(SEALED_PREFIX) else {
            return Ok(stored.to_string());
        };

        let mut parts = sealed.splitn(3, ':');
        let (Some(key_id), Some(nonce), Some(ciphertext)) =
            (parts.next(), parts.next(), parts.next())
        else {
            bail!("malformed sealed secret");
        };

        let cipher = self
            .keys
            .get(key_id)
            .with_context(|| format!("unknown encryption key id '{key_id}'"))?;
        let nonce = BASE64.decode(nonce).context("invalid nonce encoding")?;
        if nonce.len() != NONCE_SIZE {
            bail!("invalid nonce length {}", nonce.len());
        }
        let ciphertext = BASE64
            .decode(ciphertext)
            .context("invalid ciphertext encoding")?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|e| anyhow::anyhow!("secret decryption failed: {e}"))?;
        String::from_utf8(plaintext).context("decrypted secret is not valid UTF-8")
    }

    /// Whether a stored value is sealed with the current primary key
    pub fn is_current(&self, stored: &str) -> bool {
        stored
            .strip_prefix(SEALED_PREFIX)
            .and_then(|rest| rest.split(':').next())
            .is_some_and(|key_id| key_id == self.primary_id)
    }
}

fn parse_key(key: &str) -> Result<(String, Aes256Gcm)> {
    let Some((id, encoded)) = key.split_once(':') else {
        bail!("invalid key format, expected 'key_id:base64_key'");
    };
    if id.is_empty() {
        bail!("encryption key id must not be empty");
    }
    let bytes = BASE64
        .decode(encoded)
        .with_context(|| format!("key '{id}' is not valid base64"))?;
    if bytes.len() != KEY_SIZE {
        bail!(
            "key '{id}' must be {KEY_SIZE} bytes, got {} bytes",
            bytes.len()
        );
    }
    let cipher = Aes256Gcm::new_from_slice(&bytes)
        .map_err(|e| anyhow::anyhow!("failed to create cipher for key '{id}': {e}"))?;
    Ok((id.to_string(), cipher))
}

/// Generate a random key in `key_id:base64_key` form
pub fn generate_encryption_key(key_id: &str) -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    format!("{key_id}:{}", BASE64.encode(key))
}
