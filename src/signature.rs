// src/signature.rs

//! Mailgun webhook signature check.
//!
//! Mailgun signs `timestamp + token` with HMAC-SHA256 under the account's
//! webhook signing key and sends the hex digest as `signature`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

/// Default replay window.
pub const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("webhook signing key not configured")]
    MissingSigningKey,
    #[error("missing signature fields: timestamp, token and signature are required")]
    MissingFields,
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("timestamp too old ({age_secs}s)")]
    Stale { age_secs: i64 },
    #[error("signature mismatch")]
    Mismatch,
}

/// Freshness and HMAC check against an explicit `now` (unix seconds).
pub fn verify_at(
    signing_key: Option<&str>,
    timestamp: &str,
    token: &str,
    signature: &str,
    max_age_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let key = signing_key
        .filter(|k| !k.is_empty())
        .ok_or(SignatureError::MissingSigningKey)?;

    if timestamp.is_empty() || token.is_empty() || signature.is_empty() {
        return Err(SignatureError::MissingFields);
    }

    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp(timestamp.to_string()))?;

    let age_secs = now
        .checked_sub(ts)
        .ok_or_else(|| SignatureError::InvalidTimestamp(timestamp.to_string()))?;
    if age_secs > max_age_secs {
        return Err(SignatureError::Stale { age_secs });
    }

    let expected = hex::decode(signature).map_err(|_| SignatureError::Mismatch)?;
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).map_err(|_| SignatureError::MissingSigningKey)?;
    mac.update(timestamp.as_bytes());
    mac.update(token.as_bytes());
    // verify_slice compares in constant time
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// [`verify_at`] with the current wall clock.
pub fn verify(
    signing_key: Option<&str>,
    timestamp: &str,
    token: &str,
    signature: &str,
    max_age_secs: i64,
) -> Result<(), SignatureError> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    verify_at(signing_key, timestamp, token, signature, max_age_secs, now)
}

/// Hex HMAC-SHA256 of `timestamp + token`.
#[cfg(test)]
pub fn sign(signing_key: &str, timestamp: &str, token: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.as_bytes());
    mac.update(token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "key-3ax6xnjp29jd6fds4gc373sgvjxteol0";
    const NOW: i64 = 1_700_000_000;

    fn check(ts: &str, token: &str, sig: &str) -> Result<(), SignatureError> {
        verify_at(Some(KEY), ts, token, sig, MAX_TIMESTAMP_AGE_SECS, NOW)
    }

    #[test]
    fn test_valid_signature() {
        let ts = NOW.to_string();
        let sig = sign(KEY, &ts, "tok123");
        assert_eq!(check(&ts, "tok123", &sig), Ok(()));
        // deterministic
        assert_eq!(sig, sign(KEY, &ts, "tok123"));
    }

    #[test]
    fn test_single_character_flips() {
        let ts = NOW.to_string();
        let sig = sign(KEY, &ts, "tok123");

        let mut flipped_sig = sig.clone();
        let last = if sig.ends_with('0') { "1" } else { "0" };
        flipped_sig.replace_range(sig.len() - 1.., last);
        assert_eq!(check(&ts, "tok123", &flipped_sig), Err(SignatureError::Mismatch));

        assert_eq!(check(&ts, "tok124", &sig), Err(SignatureError::Mismatch));

        let earlier = (NOW - 1).to_string();
        assert_eq!(check(&earlier, "tok123", &sig), Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_stale_timestamp_rejected_even_if_signed() {
        let ts = (NOW - 301).to_string();
        let sig = sign(KEY, &ts, "tok");
        assert_eq!(
            check(&ts, "tok", &sig),
            Err(SignatureError::Stale { age_secs: 301 })
        );

        let edge = (NOW - 300).to_string();
        let sig = sign(KEY, &edge, "tok");
        assert_eq!(check(&edge, "tok", &sig), Ok(()));
    }

    #[test]
    fn test_missing_key_fails_closed() {
        let ts = NOW.to_string();
        let sig = sign(KEY, &ts, "tok");
        assert_eq!(
            verify_at(None, &ts, "tok", &sig, 300, NOW),
            Err(SignatureError::MissingSigningKey)
        );
        assert_eq!(
            verify_at(Some(""), &ts, "tok", &sig, 300, NOW),
            Err(SignatureError::MissingSigningKey)
        );
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(check("", "tok", "ab"), Err(SignatureError::MissingFields));
        assert_eq!(check("1", "", "ab"), Err(SignatureError::MissingFields));
        assert_eq!(check("1", "tok", ""), Err(SignatureError::MissingFields));
    }

    #[test]
    fn test_out_of_range_timestamp_is_invalid() {
        let ts = i64::MIN.to_string();
        assert_eq!(
            check(&ts, "tok", "abcd"),
            Err(SignatureError::InvalidTimestamp(ts.clone()))
        );
    }

    #[test]
    fn test_non_numeric_timestamp() {
        assert!(matches!(
            check("yesterday", "tok", "abcd"),
            Err(SignatureError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_non_hex_signature_is_mismatch() {
        let ts = NOW.to_string();
        assert_eq!(check(&ts, "tok", "zz-not-hex"), Err(SignatureError::Mismatch));
    }
}
