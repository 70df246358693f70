//! Authentication wire format shared by server and client.
//!
//! Two schemes exist. The CSRF scheme pairs a session cookie with a signed
//! token mirrored in the readable `csrf-token` cookie and echoed back in the
//! `X-CSRF-Token` header. The HMAC scheme signs every request with a shared
//! secret over `METHOD:PATH:TIMESTAMP:NONCE[:BODY]`.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub type HmacSha256 = Hmac<Sha256>;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const APP_ID_HEADER: &str = "x-app-id";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";
pub const NONCE_HEADER: &str = "x-nonce";

/// Readable (non-HttpOnly) cookie mirroring the session's CSRF token.
pub const CSRF_COOKIE: &str = "csrf-token";
/// Default name of the HttpOnly session cookie.
pub const DEFAULT_SESSION_COOKIE: &str = "chatgate.sid";

pub const CSRF_INIT_PATH: &str = "/csrf-init";

/// Build an HMAC key. HMAC accepts keys of any length, so this cannot fail.
pub fn hmac_key(secret: &[u8]) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC-SHA256 accepts keys of any length")
}

/// Canonical HMAC payload: `METHOD:PATH:TIMESTAMP:NONCE[:BODY]`.
///
/// The body segment is only appended when the body is non-empty.
pub fn signing_payload(
    method: &str,
    path: &str,
    timestamp_ms: i64,
    nonce: &str,
    body: &[u8],
) -> Vec<u8> {
    let mut payload =
        format!("{}:{}:{}:{}", method.to_ascii_uppercase(), path, timestamp_ms, nonce)
            .into_bytes();
    if !body.is_empty() {
        payload.push(b':');
        payload.extend_from_slice(body);
    }
    payload
}

/// Lowercase hex HMAC-SHA256 of `payload` under `secret`.
pub fn sign_payload(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = hmac_key(secret);
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Body returned with an authentication denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDenialBody {
    pub error: String,
    pub code: String,
    #[serde(
        rename = "requiresReauth",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub requires_reauth: Option<bool>,
}

impl AuthDenialBody {
    /// Whether the client should drop its session state and initialize again.
    pub fn demands_reauth(&self) -> bool {
        self.requires_reauth.unwrap_or(false) || self.code.starts_with("csrf_")
    }
}

/// Response of `GET /csrf-init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfInitResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_without_body_has_four_segments() {
        let payload = signing_payload("post", "/api/chat", 1_700_000_000_000, "abc", b"");
        assert_eq!(payload, b"POST:/api/chat:1700000000000:abc");
    }

    #[test]
    fn payload_appends_raw_body() {
        let payload = signing_payload("POST", "/api/chat", 5, "n", br#"{"a":1}"#);
        assert_eq!(payload, br#"POST:/api/chat:5:n:{"a":1}"#);
    }

    #[test]
    fn signature_depends_on_every_segment() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let sig = sign_payload(secret, &signing_payload("GET", "/x", 1, "n", b""));
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        assert_ne!(sig, sign_payload(secret, &signing_payload("GET", "/y", 1, "n", b"")));
        assert_ne!(sig, sign_payload(secret, &signing_payload("GET", "/x", 2, "n", b"")));
        assert_ne!(sig, sign_payload(secret, &signing_payload("GET", "/x", 1, "m", b"")));
        assert_ne!(sig, sign_payload(b"another-secret", &signing_payload("GET", "/x", 1, "n", b"")));
    }

    #[test]
    fn denial_body_reauth_detection() {
        let body: AuthDenialBody =
            serde_json::from_str(r#"{"error":"x","code":"csrf_expired"}"#).unwrap();
        assert!(body.demands_reauth());

        let body: AuthDenialBody = serde_json::from_str(
            r#"{"error":"x","code":"forbidden","requiresReauth":true}"#,
        )
        .unwrap();
        assert!(body.demands_reauth());

        let body: AuthDenialBody =
            serde_json::from_str(r#"{"error":"x","code":"bad_signature"}"#).unwrap();
        assert!(!body.demands_reauth());
    }
}
