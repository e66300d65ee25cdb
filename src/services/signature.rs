//! Slash command request authentication.
//!
//! Every request is signed by the chat platform with HMAC-SHA256 over
//! `v0:<timestamp>:<form body>`, where the form body is re-encoded the way the
//! platform encodes it (RFC1738 flavour: `+` for spaces, `(` and `)` kept
//! literal, everything else outside the unreserved set percent-encoded).

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const TIMESTAMP_HEADER: &str = "x-request-timestamp";
pub const SLACK_SIGNATURE_HEADER: &str = "x-slack-signature";
pub const SLACK_TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Maximum allowed skew between the request timestamp and our clock.
pub const REPLAY_WINDOW_SECS: i64 = 300;

const SIGNATURE_VERSION: &str = "v0";

/// Why a request was turned away. Only ever logged, never sent to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("missing header {0}")]
    MissingHeader(&'static str),

    #[error("timestamp is not a unix time")]
    MalformedTimestamp,

    #[error("timestamp outside replay window (skew {0}s)")]
    StaleTimestamp(i64),

    #[error("signature is not a v0 hex digest")]
    MalformedSignature,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("empty signing secret")]
    MissingSecret,
}

pub struct RequestAuthenticator;

impl RequestAuthenticator {
    /// Pull `(timestamp, signature)` out of the request, accepting both the
    /// generic and the Slack-specific header names.
    pub fn extract_headers(headers: &HeaderMap) -> Result<(String, String), Rejection> {
        let timestamp = Self::get_header(headers, TIMESTAMP_HEADER)
            .or_else(|| Self::get_header(headers, SLACK_TIMESTAMP_HEADER))
            .ok_or(Rejection::MissingHeader(TIMESTAMP_HEADER))?;
        let signature = Self::get_header(headers, SIGNATURE_HEADER)
            .or_else(|| Self::get_header(headers, SLACK_SIGNATURE_HEADER))
            .ok_or(Rejection::MissingHeader(SIGNATURE_HEADER))?;
        Ok((timestamp, signature))
    }

    /// Verify a request against the current wall clock.
    pub fn verify(
        raw_body: &[u8],
        timestamp: &str,
        signature: &str,
        secret: &str,
    ) -> Result<(), Rejection> {
        Self::verify_at(
            raw_body,
            timestamp,
            signature,
            secret,
            chrono::Utc::now().timestamp(),
        )
    }

    /// Verify a request as if the current unix time were `now`.
    pub fn verify_at(
        raw_body: &[u8],
        timestamp: &str,
        signature: &str,
        secret: &str,
        now: i64,
    ) -> Result<(), Rejection> {
        if secret.is_empty() {
            return Err(Rejection::MissingSecret);
        }

        let sent_at: i64 = timestamp
            .parse()
            .map_err(|_| Rejection::MalformedTimestamp)?;
        let skew = now.saturating_sub(sent_at);
        if skew.saturating_abs() > REPLAY_WINDOW_SECS {
            return Err(Rejection::StaleTimestamp(skew));
        }

        let provided = signature
            .strip_prefix("v0=")
            .and_then(|hex_sig| hex::decode(hex_sig).ok())
            .ok_or(Rejection::MalformedSignature)?;

        let mac = Self::mac_for(timestamp, &canonical_body(raw_body), secret)?;

        // verify_slice compares in constant time
        mac.verify_slice(&provided)
            .map_err(|_| Rejection::SignatureMismatch)
    }

    /// Produce the `v0=<hex>` signature for a timestamp and an already
    /// canonical form body.
    #[cfg(test)]
    pub fn sign(timestamp: &str, encoded_body: &str, secret: &str) -> Result<String, Rejection> {
        let mac = Self::mac_for(timestamp, encoded_body, secret)?;
        Ok(format!(
            "{}={}",
            SIGNATURE_VERSION,
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    fn mac_for(timestamp: &str, encoded_body: &str, secret: &str) -> Result<HmacSha256, Rejection> {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| Rejection::MissingSecret)?;
        mac.update(SIGNATURE_VERSION.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(encoded_body.as_bytes());
        Ok(mac)
    }

    fn get_header(headers: &HeaderMap, name: &str) -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

/// Decode a form body and encode it again with the platform's conventions,
/// keeping field order.
pub fn canonical_body(raw_body: &[u8]) -> String {
    url::form_urlencoded::parse(raw_body)
        .map(|(key, value)| format!("{}={}", encode_rfc1738(&key), encode_rfc1738(&value)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn encode_rfc1738(input: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let mut out = String::with_capacity(input.len());
    for &byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'(' | b')' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push(HEX[(byte >> 4) as usize] as char);
                out.push(HEX[(byte & 0x0f) as usize] as char);
            }
        }
    }
    out
}
