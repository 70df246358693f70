//! Authentication errors.

use thiserror::Error;

/// Authentication errors.
///
/// Every variant is terminal for the request it was raised on; the relay
/// never retries authentication server-side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// A required header or cookie was not supplied.
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    /// Token or header could not be decoded.
    #[error("malformed token")]
    MalformedToken,

    /// Signature does not verify against the shared secret.
    #[error("invalid signature")]
    BadSignature,

    /// Token is past its TTL, or the request timestamp is outside the allowed skew.
    #[error("credential expired")]
    Expired,

    /// Nonce was already consumed.
    #[error("nonce already used")]
    NonceReplay,

    /// No live session, or the session holds no token.
    #[error("no active session")]
    SessionAbsent,

    /// Header token differs from the session token.
    #[error("token does not match session")]
    TokenMismatch,

    /// App id header does not name this deployment.
    #[error("unknown app id")]
    UnknownApp,

    /// Internal error.
    #[error("internal auth error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Reason code reported by the CSRF-session scheme.
    pub fn csrf_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredential(_) => "csrf_missing",
            AuthError::TokenMismatch => "csrf_mismatch",
            AuthError::Expired => "csrf_expired",
            AuthError::Internal(_) => "internal_error",
            AuthError::MalformedToken
            | AuthError::BadSignature
            | AuthError::SessionAbsent
            | AuthError::NonceReplay
            | AuthError::UnknownApp => "csrf_invalid",
        }
    }

    /// Reason code reported by the HMAC-header scheme.
    pub fn hmac_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredential(_) => "missing_credential",
            AuthError::MalformedToken => "malformed_token",
            AuthError::BadSignature | AuthError::TokenMismatch => "bad_signature",
            AuthError::Expired => "expired",
            AuthError::NonceReplay => "nonce_replay",
            AuthError::SessionAbsent => "session_absent",
            AuthError::UnknownApp => "unknown_app",
            AuthError::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        let err = AuthError::MissingCredential("x-nonce");
        assert_eq!(err.to_string(), "missing credential: x-nonce");
        assert_eq!(AuthError::NonceReplay.to_string(), "nonce already used");
    }

    #[test]
    fn test_csrf_codes() {
        assert_eq!(AuthError::MissingCredential("x").csrf_code(), "csrf_missing");
        assert_eq!(AuthError::SessionAbsent.csrf_code(), "csrf_invalid");
        assert_eq!(AuthError::BadSignature.csrf_code(), "csrf_invalid");
        assert_eq!(AuthError::TokenMismatch.csrf_code(), "csrf_mismatch");
        assert_eq!(AuthError::Expired.csrf_code(), "csrf_expired");
    }

    #[test]
    fn test_hmac_codes() {
        assert_eq!(AuthError::NonceReplay.hmac_code(), "nonce_replay");
        assert_eq!(AuthError::UnknownApp.hmac_code(), "unknown_app");
        assert_eq!(AuthError::Expired.hmac_code(), "expired");
    }
}
