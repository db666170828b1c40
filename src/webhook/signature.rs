//! Processor webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`. The
//! MAC is HMAC-SHA256 over `"<t>." ++ raw body`, using the raw request bytes
//! exactly as received.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Processor-Signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("signature header has no timestamp")]
    MissingTimestamp,
    #[error("signature header has no v1 signature")]
    MissingSignature,
    #[error("timestamp outside tolerance ({skew}s skew)")]
    TimestampOutOfTolerance { skew: i64 },
    #[error("signature mismatch")]
    Mismatch,
    #[error("invalid webhook secret")]
    InvalidSecret,
}

#[derive(Debug, PartialEq, Eq)]
struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<ParsedHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or(SignatureError::MalformedHeader)?;
        match key {
            "t" => {
                let parsed = value
                    .parse::<i64>()
                    .map_err(|_| SignatureError::MalformedHeader)?;
                timestamp = Some(parsed);
            }
            "v1" => {
                // A v1 entry that is not hex can never match; skip it so
                // a sibling entry can still verify.
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Verifies a signature header against the raw body.
///
/// `now` is unix seconds. Timestamps too far in the past or the future are
/// both rejected. Comparison is constant time.
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let header = header
        .filter(|h| !h.trim().is_empty())
        .ok_or(SignatureError::MissingHeader)?;
    let parsed = parse_header(header)?;

    let skew = now - parsed.timestamp;
    if skew.abs() > tolerance_secs {
        return Err(SignatureError::TimestampOutOfTolerance { skew });
    }

    let mac = mac_for(secret, parsed.timestamp, payload)?;
    let matched = parsed
        .signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok());

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Produces a valid header for `payload` at `timestamp`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let mac = mac_for(secret, timestamp, payload)?;
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;
    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;

    fn verify(header: &str) -> Result<(), SignatureError> {
        verify_signature(BODY, Some(header), SECRET, DEFAULT_TOLERANCE_SECS, NOW)
    }

    #[test]
    fn test_valid_signature_is_accepted() {
        let header = sign_payload(BODY, SECRET, NOW).unwrap();
        assert_eq!(verify(&header), Ok(()));
    }

    #[test]
    fn test_any_matching_v1_entry_is_accepted() {
        let good = sign_payload(BODY, SECRET, NOW).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={}", NOW, "ab".repeat(32), good_sig);
        assert_eq!(verify(&header), Ok(()));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let header = sign_payload(BODY, "other_secret", NOW).unwrap();
        assert_eq!(verify(&header), Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let header = sign_payload(BODY, SECRET, NOW).unwrap();
        let tampered = br#"{"id":"evt_1","type":"payment_intent.payment_failed"}"#;
        assert_eq!(
            verify_signature(tampered, Some(&header), SECRET, DEFAULT_TOLERANCE_SECS, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_whitespace_in_body_matters() {
        // Re-serialized JSON must not verify; only the raw bytes do.
        let header = sign_payload(BODY, SECRET, NOW).unwrap();
        let reformatted = br#"{"id": "evt_1", "type": "payment_intent.succeeded"}"#;
        assert!(verify_signature(reformatted, Some(&header), SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
    }

    #[test]
    fn test_stale_and_future_timestamps_are_rejected() {
        let stale = sign_payload(BODY, SECRET, NOW - 301).unwrap();
        assert!(matches!(
            verify(&stale),
            Err(SignatureError::TimestampOutOfTolerance { skew: 301 })
        ));

        let future = sign_payload(BODY, SECRET, NOW + 301).unwrap();
        assert!(matches!(
            verify(&future),
            Err(SignatureError::TimestampOutOfTolerance { skew: -301 })
        ));

        let edge = sign_payload(BODY, SECRET, NOW - 300).unwrap();
        assert_eq!(verify(&edge), Ok(()));
    }

    #[test]
    fn test_malformed_headers() {
        assert_eq!(
            verify_signature(BODY, None, SECRET, DEFAULT_TOLERANCE_SECS, NOW),
            Err(SignatureError::MissingHeader)
        );
        assert_eq!(
            verify_signature(BODY, Some("  "), SECRET, DEFAULT_TOLERANCE_SECS, NOW),
            Err(SignatureError::MissingHeader)
        );
        assert_eq!(verify("garbage"), Err(SignatureError::MalformedHeader));
        assert_eq!(verify("t=abc,v1=00"), Err(SignatureError::MalformedHeader));
        assert_eq!(verify("v1=00ff"), Err(SignatureError::MissingTimestamp));
        assert_eq!(
            verify(&format!("t={}", NOW)),
            Err(SignatureError::MissingSignature)
        );
        assert_eq!(
            verify(&format!("t={},v1=not-hex", NOW)),
            Err(SignatureError::MissingSignature)
        );
    }

    #[test]
    fn test_unknown_schemes_are_ignored() {
        let header = sign_payload(BODY, SECRET, NOW).unwrap();
        let with_v0 = format!("{},v0=deadbeef", header);
        assert_eq!(verify(&with_v0), Ok(()));
    }
}
