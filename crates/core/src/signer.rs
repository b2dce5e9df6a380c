//! HMAC-SHA256 payload signing
//!
//! Signatures are `sha256=<hex>` over the exact bytes that are transmitted, so a
//! receiver can verify the body before parsing it.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{Result, WebhookError};

type HmacSha256 = Hmac<Sha256>;

/// Algorithm tag prefixed to every signature
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Header carrying the signature on outbound requests
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Hex length of a SHA-256 MAC
const MAC_HEX_LEN: usize = 64;

fn mac_for(secret: &str) -> Result<HmacSha256> {
    if secret.is_empty() {
        return Err(WebhookError::config("signing secret must not be empty"));
    }
    <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::config(format!("invalid signing secret: {e}")))
}

/// Sign a payload with the subscription secret.
///
/// Deterministic: the same payload and secret always produce the same signature.
pub fn sign(payload: &[u8], secret: &str) -> Result<String> {
    let mut mac = mac_for(secret)?;
    mac.update(payload);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a signature produced by [`sign`].
///
/// Malformed signatures and empty secrets yield `false`; this never errors.
pub fn verify(payload: &[u8], signature: &str, secret: &str) -> bool {
    let Some(hex_part) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    if hex_part.len() != MAC_HEX_LEN || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return false;
    }
    let Ok(expected) = sign(payload, secret) else {
        return false;
    };

    // Compare the full tagged string; lengths already match so this is constant time.
    let provided = signature.to_ascii_lowercase();
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret_key_12345";

    #[test]
    fn test_sign_is_deterministic() {
        let a = sign(b"payload", SECRET).unwrap();
        let b = sign(b"payload", SECRET).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sign_format() {
        let sig = sign(b"payload", SECRET).unwrap();
        assert!(sig.starts_with("sha256="));
        let hex_part = &sig["sha256=".len()..];
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let sig = sign(b"what do ya want for nothing?", "Jefe").unwrap();
        assert_eq!(
            sig,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_empty_secret_is_configuration_error() {
        let err = sign(b"payload", "").unwrap_err();
        assert!(matches!(err, WebhookError::Configuration(_)));
    }

    #[test]
    fn test_verify_roundtrip() {
        let body = br#"{"id":"1","type":"user.created"}"#;
        let sig = sign(body, SECRET).unwrap();
        assert!(verify(body, &sig, SECRET));
    }

    #[test]
    fn test_verify_accepts_uppercase_hex() {
        let sig = sign(b"payload", SECRET).unwrap();
        let upper = format!("sha256={}", sig["sha256=".len()..].to_ascii_uppercase());
        assert!(verify(b"payload", &upper, SECRET));
    }

    #[test]
    fn test_verify_rejects_payload_bit_flip() {
        let body = b"payload".to_vec();
        let sig = sign(&body, SECRET).unwrap();
        for i in 0..body.len() {
            for bit in 0..8 {
                let mut flipped = body.clone();
                flipped[i] ^= 1 << bit;
                assert!(!verify(&flipped, &sig, SECRET));
            }
        }
    }

    #[test]
    fn test_verify_rejects_signature_bit_flip() {
        let sig = sign(b"payload", SECRET).unwrap();
        let bytes = sig.as_bytes();
        for i in "sha256=".len()..bytes.len() {
            let mut flipped = bytes.to_vec();
            flipped[i] ^= 0x01;
            let flipped = String::from_utf8_lossy(&flipped).to_string();
            assert!(!verify(b"payload", &flipped, SECRET));
        }
    }

    #[test]
    fn test_verify_wrong_secret() {
        let sig = sign(b"payload", SECRET).unwrap();
        assert!(!verify(b"payload", &sig, "whsec_other"));
    }

    #[test]
    fn test_verify_malformed_inputs() {
        assert!(!verify(b"payload", "", SECRET));
        assert!(!verify(b"payload", "sha256=", SECRET));
        assert!(!verify(b"payload", "sha1=abcdef", SECRET));
        assert!(!verify(b"payload", "sha256=not-hex-at-all", SECRET));
        assert!(!verify(b"payload", &"sha256=zz".repeat(10), SECRET));
        let sig = sign(b"payload", SECRET).unwrap();
        assert!(!verify(b"payload", &sig, ""));
    }
}
