//! Loopback relay and provider for client tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Json, Router,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use chatgate::api::{self, AppState};
use chatgate::config::{AppConfig, AuthScheme};
use chatgate_protocol::{ManualClock, OsRandom};

pub const SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";
pub const APP_ID: &str = "chat-test";
pub const NOW_MS: i64 = 1_700_000_000_000;
pub const MISSING_MODEL: &str = "missing-model";

async fn completions(Json(body): Json<Value>) -> Response {
    if body["model"] == MISSING_MODEL {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"message": "The model `missing-model` does not exist"}})),
        )
            .into_response();
    }

    if body["stream"] == true {
        let stream = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"lookup\",\"arguments\":\"{}\"}}]}}]}\n\n",
            "data: [DONE]\n\n",
        );
        return ([(header::CONTENT_TYPE, "text/event-stream")], stream).into_response();
    }

    Json(json!({
        "choices": [{"message": {"role": "assistant", "content": "Hello"}}]
    }))
    .into_response()
}

/// Serve a router on an ephemeral loopback port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub async fn spawn_provider() -> String {
    let router = Router::new().route("/v1/chat/completions", post(completions));
    format!("{}/v1", serve(router).await)
}

/// A running relay in front of the mock provider.
pub struct Relay {
    pub url: String,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
}

pub async fn spawn_relay(scheme: AuthScheme) -> Relay {
    let provider_url = spawn_provider().await;

    let mut config = AppConfig::default();
    config.auth.scheme = scheme;
    config.auth.secret = Some(SECRET.to_string());
    config.auth.app_id = APP_ID.to_string();
    config.provider.base_url = provider_url;
    config.provider.timeout_secs = 5;

    let clock = Arc::new(ManualClock::new(NOW_MS));
    let state = AppState::from_config(config, clock.clone(), Arc::new(OsRandom)).unwrap();
    let url = serve(api::create_router(state.clone())).await;
    Relay { url, state, clock }
}
