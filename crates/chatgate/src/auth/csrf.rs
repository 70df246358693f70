//! Session-bound CSRF token scheme.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::HeaderMap;
use tracing::{debug, warn};

use chatgate_protocol::auth::CSRF_HEADER;

use super::cookies::{CookiePolicy, cookie_value};
use super::middleware::{Decision, Denial};
use super::token::{TokenCodec, constant_time_eq};
use super::AuthError;
use crate::api::session::SessionContext;
use crate::store::SessionStore;

/// A token freshly bound to a session by `GET /csrf-init`.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub session_id: String,
    pub token: String,
}

/// Verifies the `X-CSRF-Token` header against the caller's session.
pub struct CsrfSessionAuth {
    codec: TokenCodec,
    sessions: Arc<SessionStore>,
    cookies: CookiePolicy,
}

impl CsrfSessionAuth {
    pub fn new(codec: TokenCodec, sessions: Arc<SessionStore>, cookies: CookiePolicy) -> Self {
        Self {
            codec,
            sessions,
            cookies,
        }
    }

    pub fn cookies(&self) -> &CookiePolicy {
        &self.cookies
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Issue a token and store it on the caller's session.
    ///
    /// Reuses the live session named by `session_id`, otherwise creates one.
    /// Any previously stored token is replaced.
    pub fn init_session(&self, session_id: Option<&str>) -> Result<IssuedToken, AuthError> {
        let session_id = match session_id.and_then(|id| self.sessions.touch(id)) {
            Some(session) => session.id,
            None => self.sessions.create(),
        };

        let token = self.codec.issue().encode();
        if !self.sessions.set_csrf_token(&session_id, token.clone()) {
            return Err(AuthError::Internal(
                "session disappeared while storing token".to_string(),
            ));
        }

        debug!("issued csrf token");
        Ok(IssuedToken { session_id, token })
    }

    fn check(&self, headers: &HeaderMap, session_id: Option<&str>) -> Result<(), AuthError> {
        let header_token = headers
            .get(CSRF_HEADER)
            .and_then(|h| h.to_str().ok())
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredential(CSRF_HEADER))?;

        let stored = session_id
            .and_then(|id| self.sessions.csrf_token(id))
            .ok_or(AuthError::SessionAbsent)?;

        if !constant_time_eq(header_token, &stored) {
            return Err(AuthError::TokenMismatch);
        }

        self.codec.verify(header_token)?;
        Ok(())
    }

    /// Run the scheme against a request.
    ///
    /// Any failure destroys the session and tells the browser to drop both
    /// cookies so the next attempt starts from a fresh `/csrf-init`.
    pub fn authenticate(&self, req: Request) -> Decision {
        let session_id = req
            .extensions()
            .get::<SessionContext>()
            .map(|ctx| ctx.id.clone())
            .or_else(|| cookie_value(req.headers(), &self.cookies.session_cookie));

        match self.check(req.headers(), session_id.as_deref()) {
            Ok(()) => Decision::Allow(req),
            Err(err) => {
                if let Some(id) = &session_id {
                    self.sessions.destroy(id);
                }
                warn!(
                    code = err.csrf_code(),
                    path = %req.uri().path(),
                    "csrf verification failed: {err}"
                );
                Decision::Deny(Denial::csrf(&err, self.cookies.clear_all()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::header::COOKIE;
    use chatgate_protocol::{FixedRandom, ManualClock};

    const SECRET: &[u8] = b"test-secret-for-unit-tests-minimum-32-chars";

    fn scheme(clock: Arc<ManualClock>) -> CsrfSessionAuth {
        let rng = Arc::new(FixedRandom::new(3));
        let codec = TokenCodec::new(SECRET, Duration::from_secs(600), clock.clone(), rng.clone());
        let sessions = Arc::new(SessionStore::new(
            Duration::from_secs(3600),
            false,
            clock,
            rng,
        ));
        CsrfSessionAuth::new(
            codec,
            sessions,
            CookiePolicy {
                session_cookie: "chatgate.sid".to_string(),
                session_max_age: Duration::from_secs(3600),
                token_max_age: Duration::from_secs(600),
                secure: false,
            },
        )
    }

    fn request(session: Option<&str>, token: Option<&str>) -> Request {
        let mut builder = Request::builder().method("POST").uri("/api/chat");
        if let Some(session) = session {
            builder = builder.header(COOKIE, format!("chatgate.sid={session}"));
        }
        if let Some(token) = token {
            builder = builder.header(CSRF_HEADER, token);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn denial_code(decision: Decision) -> String {
        match decision {
            Decision::Allow(_) => panic!("expected denial"),
            Decision::Deny(denial) => denial.code().to_string(),
        }
    }

    #[test]
    fn test_matching_token_is_allowed() {
        let auth = scheme(Arc::new(ManualClock::new(1_000_000)));
        let issued = auth.init_session(None).unwrap();
        let decision = auth.authenticate(request(Some(&issued.session_id), Some(&issued.token)));
        assert!(matches!(decision, Decision::Allow(_)));
        assert_eq!(auth.sessions().len(), 1);
    }

    #[test]
    fn test_init_reuses_live_session() {
        let auth = scheme(Arc::new(ManualClock::new(1_000_000)));
        let first = auth.init_session(None).unwrap();
        let second = auth.init_session(Some(&first.session_id)).unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_ne!(first.token, second.token);
        assert_eq!(auth.sessions().len(), 1);
    }

    #[test]
    fn test_missing_header_destroys_session() {
        let auth = scheme(Arc::new(ManualClock::new(1_000_000)));
        let issued = auth.init_session(None).unwrap();
        let code = denial_code(auth.authenticate(request(Some(&issued.session_id), None)));
        assert_eq!(code, "csrf_missing");
        assert!(auth.sessions().is_empty());
    }

    #[test]
    fn test_unknown_session_is_invalid() {
        let auth = scheme(Arc::new(ManualClock::new(1_000_000)));
        let issued = auth.init_session(None).unwrap();
        let code = denial_code(auth.authenticate(request(Some("nope"), Some(&issued.token))));
        assert_eq!(code, "csrf_invalid");
        let code = denial_code(auth.authenticate(request(None, Some(&issued.token))));
        assert_eq!(code, "csrf_invalid");
    }

    #[test]
    fn test_mismatched_token() {
        let auth = scheme(Arc::new(ManualClock::new(1_000_000)));
        let a = auth.init_session(None).unwrap();
        let b = auth.init_session(None).unwrap();
        let code = denial_code(auth.authenticate(request(Some(&a.session_id), Some(&b.token))));
        assert_eq!(code, "csrf_mismatch");
        assert_eq!(auth.sessions().len(), 1, "only the offending session is destroyed");
    }

    #[test]
    fn test_expired_token() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let auth = scheme(clock.clone());
        let issued = auth.init_session(None).unwrap();
        clock.advance_ms(600_001);
        let code = denial_code(auth.authenticate(request(Some(&issued.session_id), Some(&issued.token))));
        assert_eq!(code, "csrf_expired");
    }
}
