// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HMAC-SHA256 payload signatures.
//!
//! The `X-Parley-Signature` header carries `sha256=<hex>` computed over the
//! exact request body with the subscription secret as key.

use hmac::{Hmac, Mac};
use parley_core::ParleyError;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Parley-Signature";
pub const EVENT_HEADER: &str = "X-Parley-Event";
pub const EVENT_ID_HEADER: &str = "X-Parley-Event-Id";
pub const TIMESTAMP_HEADER: &str = "X-Parley-Timestamp";

/// Compute the header value for `body`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, ParleyError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ParleyError::Internal(format!("hmac key: {e}")))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a received header value in constant time.
pub fn verify(secret: &str, header: &str, body: &[u8]) -> bool {
    let Some(hex_digest) = header.trim().strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        let sig = sign("key", b"The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(
            sig,
            "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn verify_accepts_own_signature_only() {
        let body = br#"{"event":"message.sent"}"#;
        let sig = sign("s3cret", body).unwrap();
        assert!(verify("s3cret", &sig, body));
        assert!(!verify("other", &sig, body));
        assert!(!verify("s3cret", &sig, b"tampered"));
        assert!(!verify("s3cret", "md5=abc", body));
        assert!(!verify("s3cret", "sha256=zz", body));
    }
}
