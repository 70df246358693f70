//! Authentication middleware.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header::SET_COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::error;

use chatgate_protocol::AuthDenialBody;

use super::{AuthError, CsrfSessionAuth, HmacHeaderAuth};
use crate::config::AuthScheme;

/// Outcome of running an authenticator over a request.
pub enum Decision {
    /// Proceed to the handler with this (possibly rebuilt) request.
    Allow(Request),
    /// Short-circuit with this response.
    Deny(Denial),
}

/// A rejected request, rendered as `{error, code[, requiresReauth]}`.
#[derive(Debug)]
pub struct Denial {
    status: StatusCode,
    body: AuthDenialBody,
    set_cookies: Vec<String>,
}

impl Denial {
    /// CSRF-scheme denial: always 403 and always demands re-initialization.
    pub fn csrf(err: &AuthError, set_cookies: Vec<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            body: AuthDenialBody {
                error: err.to_string(),
                code: err.csrf_code().to_string(),
                requires_reauth: Some(true),
            },
            set_cookies,
        }
    }

    /// HMAC-scheme denial.
    pub fn hmac(err: &AuthError) -> Self {
        let status = match err {
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        };
        Self {
            status,
            body: AuthDenialBody {
                error: err.to_string(),
                code: err.hmac_code().to_string(),
                requires_reauth: None,
            },
            set_cookies: Vec::new(),
        }
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            body: AuthDenialBody {
                error: format!("request body exceeds {limit} bytes"),
                code: "payload_too_large".to_string(),
                requires_reauth: None,
            },
            set_cookies: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.body.code
    }
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        for cookie in self.set_cookies {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().append(SET_COOKIE, value);
                }
                Err(e) => error!("invalid Set-Cookie value on denial: {e}"),
            }
        }
        response
    }
}

/// The configured authentication strategy.
pub enum Authenticator {
    CsrfSession(CsrfSessionAuth),
    HmacHeader(HmacHeaderAuth),
}

impl Authenticator {
    pub fn scheme(&self) -> AuthScheme {
        match self {
            Authenticator::CsrfSession(_) => AuthScheme::Csrf,
            Authenticator::HmacHeader(_) => AuthScheme::Hmac,
        }
    }

    /// The CSRF strategy, when it is the active one.
    pub fn as_csrf(&self) -> Option<&CsrfSessionAuth> {
        match self {
            Authenticator::CsrfSession(csrf) => Some(csrf),
            Authenticator::HmacHeader(_) => None,
        }
    }

    pub async fn authenticate(&self, req: Request) -> Decision {
        match self {
            Authenticator::CsrfSession(csrf) => csrf.authenticate(req),
            Authenticator::HmacHeader(hmac) => hmac.authenticate(req).await,
        }
    }
}

/// Guard protected routes with the configured authenticator.
///
/// A denial is returned directly; the inner handler never runs.
pub async fn require_auth(
    State(auth): State<Arc<Authenticator>>,
    req: Request,
    next: Next,
) -> Response {
    match auth.authenticate(req).await {
        Decision::Allow(req) => next.run(req).await,
        Decision::Deny(denial) => denial.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csrf_denial_shape() {
        let denial = Denial::csrf(&AuthError::Expired, vec!["csrf-token=; Max-Age=0".into()]);
        assert_eq!(denial.status(), StatusCode::FORBIDDEN);
        assert_eq!(denial.code(), "csrf_expired");

        let response = denial.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 1);
    }

    #[test]
    fn test_hmac_denial_status() {
        assert_eq!(
            Denial::hmac(&AuthError::NonceReplay).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Denial::hmac(&AuthError::Internal("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
