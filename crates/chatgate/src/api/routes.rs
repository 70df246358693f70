//! API route definitions.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use chatgate_protocol::auth::CSRF_INIT_PATH;

use super::handlers;
use super::session::session_layer;
use super::state::AppState;
use crate::auth::require_auth;
use crate::config::AuthScheme;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let max_body = state.config.server.max_body_bytes();

    // Protected routes: the authenticator runs before every handler here
    let protected_routes = Router::new()
        .route("/api/chat", post(handlers::chat))
        .route_layer(middleware::from_fn_with_state(
            state.authenticator.clone(),
            require_auth,
        ))
        .with_state(state.clone());

    // Public routes (no authentication)
    let mut public_routes = Router::new().route("/health", get(handlers::health));
    if state.scheme() == AuthScheme::Csrf {
        public_routes = public_routes.route(CSRF_INIT_PATH, get(handlers::csrf_init));
    }
    let public_routes = public_routes.with_state(state.clone());

    let mut router = Router::new().merge(public_routes).merge(protected_routes);
    if state.scheme() == AuthScheme::Csrf {
        router = router.layer(middleware::from_fn_with_state(state, session_layer));
    }

    router
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
}
