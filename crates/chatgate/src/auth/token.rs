//! Signed, time-bound opaque tokens.
//!
//! Wire form: `base64("<timestamp-ms>:<random-hex>:<signature-hex>")` where the
//! signature is HMAC-SHA256 over `"<timestamp-ms>:<random-hex>"`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;

use chatgate_protocol::auth::sign_payload;
use chatgate_protocol::{Clock, RandomSource};

use super::AuthError;

/// Bytes of randomness carried by every token.
pub const TOKEN_RANDOM_BYTES: usize = 16;

/// Decoded token.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedToken {
    pub timestamp_ms: i64,
    pub random: String,
    pub signature: String,
}

impl SignedToken {
    /// Encode into the opaque wire form.
    pub fn encode(&self) -> String {
        STANDARD.encode(format!(
            "{}:{}:{}",
            self.timestamp_ms, self.random, self.signature
        ))
    }
}

impl fmt::Debug for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedToken")
            .field("timestamp_ms", &self.timestamp_ms)
            .field("random", &self.random)
            .field("signature", &"<redacted>")
            .finish()
    }
}

/// Compare two strings without short-circuiting on the first differing byte.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Issues and verifies [`SignedToken`]s under one secret and TTL.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Arc<[u8]>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RandomSource>,
}

impl TokenCodec {
    pub fn new(
        secret: impl AsRef<[u8]>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            ttl,
            clock,
            rng,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh token stamped with the current time.
    pub fn issue(&self) -> SignedToken {
        let timestamp_ms = self.clock.now_ms();
        let random = self.rng.hex(TOKEN_RANDOM_BYTES);
        let signature = sign_payload(
            &self.secret,
            format!("{timestamp_ms}:{random}").as_bytes(),
        );
        SignedToken {
            timestamp_ms,
            random,
            signature,
        }
    }

    /// Verify an encoded token.
    ///
    /// Checks, in order: decoding and shape (`MalformedToken`), signature
    /// (`BadSignature`, compared in constant time), age (`Expired`).
    pub fn verify(&self, token: &str) -> Result<SignedToken, AuthError> {
        let decoded = STANDARD
            .decode(token.trim())
            .map_err(|_| AuthError::MalformedToken)?;
        let text = String::from_utf8(decoded).map_err(|_| AuthError::MalformedToken)?;

        let parts: Vec<&str> = text.split(':').collect();
        let [timestamp, random, signature] = parts.as_slice() else {
            return Err(AuthError::MalformedToken);
        };

        let expected = sign_payload(&self.secret, format!("{timestamp}:{random}").as_bytes());
        if !constant_time_eq(&expected, signature) {
            return Err(AuthError::BadSignature);
        }

        let timestamp_ms: i64 = timestamp.parse().map_err(|_| AuthError::MalformedToken)?;
        let age_ms = self.clock.now_ms().saturating_sub(timestamp_ms);
        if age_ms > self.ttl.as_millis() as i64 {
            return Err(AuthError::Expired);
        }

        Ok(SignedToken {
            timestamp_ms,
            random: (*random).to_string(),
            signature: (*signature).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_protocol::{FixedRandom, ManualClock};

    const SECRET: &[u8] = b"test-secret-for-unit-tests-minimum-32-chars";
    const TTL: Duration = Duration::from_secs(600);

    fn codec(clock: Arc<ManualClock>) -> TokenCodec {
        TokenCodec::new(SECRET, TTL, clock, Arc::new(FixedRandom::new(7)))
    }

    fn tamper(token: &str, f: impl FnOnce(&str) -> String) -> String {
        let text = String::from_utf8(STANDARD.decode(token).unwrap()).unwrap();
        STANDARD.encode(f(&text))
    }

    #[test]
    fn test_issue_then_verify() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let codec = codec(clock);
        let token = codec.issue();
        assert_eq!(token.random.len(), TOKEN_RANDOM_BYTES * 2);

        let verified = codec.verify(&token.encode()).unwrap();
        assert_eq!(verified, token);
    }

    #[test]
    fn test_expires_after_ttl() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let codec = codec(clock.clone());
        let encoded = codec.issue().encode();

        clock.advance_ms(TTL.as_millis() as i64);
        assert!(codec.verify(&encoded).is_ok(), "exactly at TTL is still valid");

        clock.advance_ms(1);
        assert_eq!(codec.verify(&encoded), Err(AuthError::Expired));
    }

    #[test]
    fn test_every_signature_character_is_checked() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let codec = codec(clock);
        let token = codec.issue();
        let encoded = token.encode();

        for idx in 0..token.signature.len() {
            for replacement in ['0', 'f', 'A', 'z', '!'] {
                let mut sig: Vec<char> = token.signature.chars().collect();
                if sig[idx] == replacement {
                    continue;
                }
                sig[idx] = replacement;
                let sig: String = sig.into_iter().collect();
                let forged = tamper(&encoded, |text| {
                    let (head, _) = text.rsplit_once(':').unwrap();
                    format!("{head}:{sig}")
                });
                assert_eq!(
                    codec.verify(&forged),
                    Err(AuthError::BadSignature),
                    "index {idx} replaced with {replacement}"
                );
            }
        }
    }

    #[test]
    fn test_wrong_secret_is_bad_signature() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let issuer = TokenCodec::new(
            b"some-other-secret-that-is-long-enough!!",
            TTL,
            clock.clone(),
            Arc::new(FixedRandom::new(1)),
        );
        let encoded = issuer.issue().encode();
        assert_eq!(codec(clock).verify(&encoded), Err(AuthError::BadSignature));
    }

    #[test]
    fn test_malformed_tokens() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let codec = codec(clock);
        let encoded = codec.issue().encode();

        let cases = [
            "not base64 at all".to_string(),
            STANDARD.encode("only:two"),
            STANDARD.encode("a:b:c:d"),
            tamper(&encoded, |text| format!("{text}:extra")),
            String::new(),
        ];
        for case in cases {
            assert_eq!(codec.verify(&case), Err(AuthError::MalformedToken), "{case}");
        }
    }

    #[test]
    fn test_timestamp_tampering_breaks_signature() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let codec = codec(clock);
        let encoded = codec.issue().encode();
        let forged = tamper(&encoded, |text| text.replacen("1700000000000", "1700000000001", 1));
        assert_eq!(codec.verify(&forged), Err(AuthError::BadSignature));
    }

    #[test]
    fn test_debug_redacts_signature() {
        let clock = Arc::new(ManualClock::new(0));
        let token = codec(clock).issue();
        let debug = format!("{token:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&token.signature));
    }
}
