//! Stateless per-request HMAC header scheme.
//!
//! A request carries `X-App-ID`, `X-Timestamp` (epoch ms), `X-Nonce` and
//! `X-Signature`, the lowercase hex HMAC-SHA256 of
//! `METHOD:PATH:TIMESTAMP:NONCE[:BODY]`. The path is signed without the query
//! string.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::request::Parts;
use tracing::warn;

use chatgate_protocol::Clock;
use chatgate_protocol::auth::{
    APP_ID_HEADER, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, sign_payload, signing_payload,
};

use super::AuthError;
use super::middleware::{Decision, Denial};
use super::token::constant_time_eq;
use crate::store::NonceStore;

/// Header values pulled from a request before the body is read.
struct Credentials<'a> {
    timestamp_ms: i64,
    nonce: &'a str,
    signature: &'a str,
}

/// Verifies signed request headers against the shared secret.
pub struct HmacHeaderAuth {
    secret: Arc<[u8]>,
    app_id: String,
    max_skew: Duration,
    max_body_bytes: usize,
    nonces: Arc<NonceStore>,
    clock: Arc<dyn Clock>,
}

impl HmacHeaderAuth {
    pub fn new(
        secret: impl AsRef<[u8]>,
        app_id: impl Into<String>,
        max_skew: Duration,
        max_body_bytes: usize,
        nonces: Arc<NonceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            app_id: app_id.into(),
            max_skew,
            max_body_bytes,
            nonces,
            clock,
        }
    }

    pub fn nonces(&self) -> &Arc<NonceStore> {
        &self.nonces
    }

    fn header<'a>(parts: &'a Parts, name: &'static str) -> Result<&'a str, AuthError> {
        parts
            .headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingCredential(name))
    }

    fn credentials<'a>(&self, parts: &'a Parts) -> Result<Credentials<'a>, AuthError> {
        let app_id = Self::header(parts, APP_ID_HEADER)?;
        let timestamp = Self::header(parts, TIMESTAMP_HEADER)?;
        let signature = Self::header(parts, SIGNATURE_HEADER)?;
        let nonce = Self::header(parts, NONCE_HEADER)?;

        if app_id != self.app_id {
            return Err(AuthError::UnknownApp);
        }

        let timestamp_ms: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| AuthError::MalformedToken)?;
        let skew_ms = self.clock.now_ms().saturating_sub(timestamp_ms).saturating_abs();
        if skew_ms > self.max_skew.as_millis() as i64 {
            return Err(AuthError::Expired);
        }

        if self.nonces.contains(nonce) {
            return Err(AuthError::NonceReplay);
        }

        Ok(Credentials {
            timestamp_ms,
            nonce,
            signature,
        })
    }

    fn verify(&self, parts: &Parts, body: &Bytes) -> Result<(), AuthError> {
        let credentials = self.credentials(parts)?;

        let payload = signing_payload(
            parts.method.as_str(),
            parts.uri.path(),
            credentials.timestamp_ms,
            credentials.nonce,
            body,
        );
        let expected = sign_payload(&self.secret, &payload);
        if !constant_time_eq(&expected, credentials.signature) {
            return Err(AuthError::BadSignature);
        }

        // Consume the nonce only once the signature holds; the insert is the
        // authoritative replay check when two copies race past `contains`.
        if !self.nonces.insert(credentials.nonce) {
            return Err(AuthError::NonceReplay);
        }
        Ok(())
    }

    /// Run the scheme against a request, buffering its body.
    ///
    /// On success the request is rebuilt with the same body bytes.
    pub async fn authenticate(&self, req: Request) -> Decision {
        let (parts, body) = req.into_parts();

        // Reject on headers alone before paying for the body.
        if let Err(err) = self.credentials(&parts) {
            return self.deny(&parts, err);
        }

        let bytes = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %parts.uri.path(), "failed to buffer signed body: {err}");
                return Decision::Deny(Denial::payload_too_large(self.max_body_bytes));
            }
        };

        match self.verify(&parts, &bytes) {
            Ok(()) => Decision::Allow(Request::from_parts(parts, Body::from(bytes))),
            Err(err) => self.deny(&parts, err),
        }
    }

    fn deny(&self, parts: &Parts, err: AuthError) -> Decision {
        warn!(
            code = err.hmac_code(),
            path = %parts.uri.path(),
            "hmac verification failed: {err}"
        );
        Decision::Deny(Denial::hmac(&err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_protocol::ManualClock;

    const SECRET: &[u8] = b"test-secret-for-unit-tests-minimum-32-chars";
    const NOW: i64 = 1_700_000_000_000;

    fn scheme() -> HmacHeaderAuth {
        HmacHeaderAuth::new(
            SECRET,
            "chat-web",
            Duration::from_secs(300),
            1024,
            Arc::new(NonceStore::new()),
            Arc::new(ManualClock::new(NOW)),
        )
    }

    fn signed(timestamp_ms: i64, nonce: &str, body: &'static str) -> Request {
        let payload = signing_payload("POST", "/api/chat", timestamp_ms, nonce, body.as_bytes());
        Request::builder()
            .method("POST")
            .uri("/api/chat?stream=1")
            .header(APP_ID_HEADER, "chat-web")
            .header(TIMESTAMP_HEADER, timestamp_ms.to_string())
            .header(NONCE_HEADER, nonce)
            .header(SIGNATURE_HEADER, sign_payload(SECRET, &payload))
            .body(Body::from(body))
            .unwrap()
    }

    fn code(decision: Decision) -> String {
        match decision {
            Decision::Allow(_) => panic!("expected denial"),
            Decision::Deny(denial) => denial.code().to_string(),
        }
    }

    #[tokio::test]
    async fn test_valid_request_keeps_body() {
        let auth = scheme();
        let decision = auth.authenticate(signed(NOW, "n1", r#"{"messages":[]}"#)).await;
        let Decision::Allow(req) = decision else {
            panic!("expected allow");
        };
        let body = axum::body::to_bytes(req.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"messages":[]}"#);
        assert!(auth.nonces().contains("n1"));
    }

    #[tokio::test]
    async fn test_replay_is_rejected() {
        let auth = scheme();
        assert!(matches!(
            auth.authenticate(signed(NOW, "n1", "x")).await,
            Decision::Allow(_)
        ));
        assert_eq!(code(auth.authenticate(signed(NOW, "n1", "x")).await), "nonce_replay");
    }

    #[tokio::test]
    async fn test_skew_is_symmetric() {
        let auth = scheme();
        assert!(matches!(
            auth.authenticate(signed(NOW - 300_000, "a", "")).await,
            Decision::Allow(_)
        ));
        assert_eq!(code(auth.authenticate(signed(NOW - 300_001, "b", "")).await), "expired");
        assert_eq!(code(auth.authenticate(signed(NOW + 300_001, "c", "")).await), "expired");
    }

    #[tokio::test]
    async fn test_failed_signature_does_not_consume_nonce() {
        let auth = scheme();
        let mut req = signed(NOW, "n1", "x");
        req.headers_mut()
            .insert(SIGNATURE_HEADER, "00".repeat(32).parse().unwrap());
        assert_eq!(code(auth.authenticate(req).await), "bad_signature");
        assert!(!auth.nonces().contains("n1"));
    }

    #[tokio::test]
    async fn test_missing_and_malformed_headers() {
        let auth = scheme();
        let mut req = signed(NOW, "n1", "");
        req.headers_mut().remove(NONCE_HEADER);
        assert_eq!(code(auth.authenticate(req).await), "missing_credential");

        let mut req = signed(NOW, "n2", "");
        req.headers_mut()
            .insert(TIMESTAMP_HEADER, "yesterday".parse().unwrap());
        assert_eq!(code(auth.authenticate(req).await), "malformed_token");

        let mut req = signed(NOW, "n3", "");
        req.headers_mut().insert(APP_ID_HEADER, "other".parse().unwrap());
        assert_eq!(code(auth.authenticate(req).await), "unknown_app");
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let auth = scheme();
        let big: &'static str = Box::leak("a".repeat(2048).into_boxed_str());
        let decision = auth.authenticate(signed(NOW, "n1", big)).await;
        assert_eq!(code(decision), "payload_too_large");
    }
}
