//! Webhook signature verification.
//!
//! The provider signs each delivery with the endpoint secret and sends
//! `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]`. The signed payload
//! is `"{t}.{raw body}"`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Why a webhook delivery was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("timestamp outside tolerance")]
    TimestampOutsideTolerance,
    #[error("no matching signature")]
    NoMatchingSignature,
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
#[must_use]
pub fn compute_signature(payload: &[u8], secret: &str, timestamp: i64) -> String {
    hex::encode(signing_mac(payload, secret, timestamp).finalize().into_bytes())
}

/// Verify a signature header against the raw request body.
///
/// # Errors
///
/// Returns `MalformedHeader` if `t` or every `v1` is missing,
/// `TimestampOutsideTolerance` if `t` is more than `tolerance_secs` away
/// from `now`, and `NoMatchingSignature` if no `v1` value matches.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }

    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(SignatureError::TimestampOutsideTolerance);
    }

    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate).is_ok_and(|expected| {
            signing_mac(payload, secret, timestamp)
                .verify_slice(&expected)
                .is_ok()
        })
    });

    if matched {
        Ok(())
    } else {
        Err(SignatureError::NoMatchingSignature)
    }
}

#[allow(clippy::expect_used)] // HMAC accepts keys of any length
fn signing_mac(payload: &[u8], secret: &str, timestamp: i64) -> Hmac<Sha256> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"invoice.payment_failed"}"#;
    const NOW: i64 = 1_735_689_600;

    fn header(timestamp: i64, signature: &str) -> String {
        format!("t={timestamp},v1={signature}")
    }

    #[test]
    fn test_valid_signature() {
        let sig = compute_signature(BODY, SECRET, NOW);
        assert_eq!(
            verify_signature(BODY, &header(NOW, &sig), SECRET, 300, NOW + 10),
            Ok(())
        );
    }

    #[test]
    fn test_any_v1_may_match() {
        let sig = compute_signature(BODY, SECRET, NOW);
        let header = format!("t={NOW},v1={},v0=legacy,v1={sig}", "ab".repeat(32));
        assert_eq!(verify_signature(BODY, &header, SECRET, 300, NOW), Ok(()));
    }

    #[test]
    fn test_tampered_body() {
        let sig = compute_signature(BODY, SECRET, NOW);
        assert_eq!(
            verify_signature(b"{}", &header(NOW, &sig), SECRET, 300, NOW),
            Err(SignatureError::NoMatchingSignature)
        );
    }

    #[test]
    fn test_wrong_secret() {
        let sig = compute_signature(BODY, "whsec_other", NOW);
        assert_eq!(
            verify_signature(BODY, &header(NOW, &sig), SECRET, 300, NOW),
            Err(SignatureError::NoMatchingSignature)
        );
    }

    #[test]
    fn test_old_timestamp() {
        let sig = compute_signature(BODY, SECRET, NOW);
        assert_eq!(
            verify_signature(BODY, &header(NOW, &sig), SECRET, 300, NOW + 301),
            Err(SignatureError::TimestampOutsideTolerance)
        );
    }

    #[test]
    fn test_extreme_timestamps_are_rejected() {
        for timestamp in [i64::MIN, i64::MAX] {
            assert_eq!(
                verify_signature(BODY, &header(timestamp, "00"), SECRET, 300, NOW),
                Err(SignatureError::TimestampOutsideTolerance)
            );
        }
        assert_eq!(
            verify_signature(BODY, &header(NOW, "00"), SECRET, 300, i64::MIN),
            Err(SignatureError::TimestampOutsideTolerance)
        );
    }

    #[test]
    fn test_malformed_headers() {
        assert_eq!(
            verify_signature(BODY, "v1=abc", SECRET, 300, NOW),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_signature(BODY, &format!("t={NOW}"), SECRET, 300, NOW),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_signature(BODY, "garbage", SECRET, 300, NOW),
            Err(SignatureError::MalformedHeader)
        );
    }

    #[test]
    fn test_non_hex_signature() {
        assert_eq!(
            verify_signature(BODY, &header(NOW, "zz-not-hex"), SECRET, 300, NOW),
            Err(SignatureError::NoMatchingSignature)
        );
    }
}
