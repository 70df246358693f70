//! Session cookie middleware for the CSRF scheme.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, header::SET_COOKIE},
    middleware::Next,
    response::Response,
};
use tracing::error;

use super::AppState;
use crate::auth::cookie_value;

/// Session resolved for the current request.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: String,
}

/// Resolve the session cookie, roll its expiry and expose it to handlers.
///
/// With `save_uninitialized` a session is created for cookieless requests.
/// The refreshed cookie is only attached when the handler (or the
/// authenticator) did not set or clear the session cookie itself.
pub async fn session_layer(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(csrf) = state.authenticator.as_csrf() else {
        return next.run(req).await;
    };
    let policy = csrf.cookies();

    let live = cookie_value(req.headers(), &policy.session_cookie)
        .and_then(|id| state.sessions.touch(&id));
    let session_id = match live {
        Some(session) => Some(session.id),
        None if state.sessions.save_uninitialized() => Some(state.sessions.create()),
        None => None,
    };

    if let Some(id) = &session_id {
        req.extensions_mut().insert(SessionContext { id: id.clone() });
    }

    let mut response = next.run(req).await;

    let Some(id) = session_id else {
        return response;
    };
    let already_set = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| policy.is_session_cookie(v));
    if !already_set && state.sessions.touch(&id).is_some() {
        match HeaderValue::from_str(&policy.session_cookie(&id)) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => error!("invalid session cookie value: {e}"),
        }
    }
    response
}
