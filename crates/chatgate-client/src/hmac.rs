//! Per-request HMAC header signing.

use std::sync::Arc;

use reqwest::RequestBuilder;

use chatgate_protocol::auth::{
    APP_ID_HEADER, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, sign_payload, signing_payload,
};
use chatgate_protocol::{Clock, OsRandom, RandomSource, SystemClock};

/// Bytes of randomness per nonce.
pub const NONCE_BYTES: usize = 16;

/// Header values for one signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub app_id: String,
    pub timestamp_ms: i64,
    pub nonce: String,
    pub signature: String,
}

impl SignedHeaders {
    pub fn pairs(&self) -> [(&'static str, String); 4] {
        [
            (APP_ID_HEADER, self.app_id.clone()),
            (TIMESTAMP_HEADER, self.timestamp_ms.to_string()),
            (NONCE_HEADER, self.nonce.clone()),
            (SIGNATURE_HEADER, self.signature.clone()),
        ]
    }
}

/// Signs requests with the shared secret. Signing is synchronous and
/// stateless; a rejected request is never retried.
#[derive(Clone)]
pub struct HmacSigner {
    secret: Arc<[u8]>,
    app_id: String,
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RandomSource>,
}

impl HmacSigner {
    pub fn new(secret: impl AsRef<[u8]>, app_id: impl Into<String>) -> Self {
        Self::with_sources(secret, app_id, Arc::new(SystemClock), Arc::new(OsRandom))
    }

    pub fn with_sources(
        secret: impl AsRef<[u8]>,
        app_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            app_id: app_id.into(),
            clock,
            rng,
        }
    }

    /// Compute the headers for `method path` carrying `body`.
    ///
    /// `path` excludes the query string.
    pub fn sign(&self, method: &str, path: &str, body: &[u8]) -> SignedHeaders {
        let timestamp_ms = self.clock.now_ms();
        let nonce = self.rng.hex(NONCE_BYTES);
        let payload = signing_payload(method, path, timestamp_ms, &nonce, body);
        SignedHeaders {
            app_id: self.app_id.clone(),
            timestamp_ms,
            nonce,
            signature: sign_payload(&self.secret, &payload),
        }
    }

    /// Attach freshly computed headers to a request.
    pub fn apply(&self, builder: RequestBuilder, method: &str, path: &str, body: &[u8]) -> RequestBuilder {
        self.sign(method, path, body)
            .pairs()
            .into_iter()
            .fold(builder, |builder, (name, value)| builder.header(name, value))
    }
}
