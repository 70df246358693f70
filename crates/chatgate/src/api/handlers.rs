//! HTTP handlers.

use axum::{
    Json,
    body::Body,
    extract::{Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, info};

use chatgate_protocol::{ChatRequest, CsrfInitResponse};

use super::AppState;
use super::error::ApiError;
use super::session::SessionContext;
use crate::auth::cookie_value;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub auth_scheme: String,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        auth_scheme: state.scheme().to_string(),
    })
}

/// Issue a CSRF token bound to the caller's session.
///
/// Sets the HttpOnly session cookie and the readable `csrf-token` cookie.
pub async fn csrf_init(State(state): State<AppState>, req: Request) -> Result<Response, ApiError> {
    let csrf = state
        .authenticator
        .as_csrf()
        .ok_or_else(|| ApiError::not_found("csrf scheme is not enabled"))?;

    let session_id = req
        .extensions()
        .get::<SessionContext>()
        .map(|ctx| ctx.id.clone())
        .or_else(|| cookie_value(req.headers(), &csrf.cookies().session_cookie));

    let issued = csrf.init_session(session_id.as_deref())?;
    info!("csrf session initialised");

    let mut response = Json(CsrfInitResponse { success: true }).into_response();
    for cookie in [
        csrf.cookies().session_cookie(&issued.session_id),
        csrf.cookies().csrf_cookie(&issued.token),
    ] {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| ApiError::internal(format!("invalid cookie value: {e}")))?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

/// Relay a chat request to the provider.
///
/// Streamed requests are passed through as `text/event-stream`; others
/// return the provider's JSON unchanged.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if request.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }

    let upstream = state.provider.complete(&request).await?;

    if request.stream {
        return build_sse_response(Body::from_stream(upstream.bytes_stream()));
    }

    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| ApiError::bad_gateway(format!("reading provider response: {e}")))?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .map_err(|e| ApiError::internal(format!("building response: {e}")))
}

fn build_sse_response(body: Body) -> Result<Response, ApiError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .map_err(|e| {
            error!("Failed to build SSE response: {:?}", e);
            ApiError::internal("failed to build stream response")
        })
}
