//! Test utilities and common setup.

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use futures::stream;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use chatgate::api::{self, AppState};
use chatgate::config::{AppConfig, AuthScheme};
use chatgate_protocol::{ManualClock, OsRandom};

pub const SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";
pub const APP_ID: &str = "chat-test";
pub const NOW_MS: i64 = 1_700_000_000_000;

/// Model name the mock provider rejects.
pub const MISSING_MODEL: &str = "missing-model";

/// Stand-in for the hosted provider, served on a loopback port.
#[derive(Clone)]
pub struct MockProvider {
    pub base_url: String,
    pub calls: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn completions(State(calls): State<Arc<AtomicUsize>>, Json(body): Json<Value>) -> Response {
    calls.fetch_add(1, Ordering::SeqCst);

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

pub async fn spawn_provider() -> MockProvider {
    let calls = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(calls.clone());
    let base = serve(router).await;
    MockProvider {
        base_url: format!("{base}/v1"),
        calls,
    }
}

/// Content frames sent by the slow provider before `[DONE]`.
pub const SLOW_FRAMES: u32 = 3;

/// Provider that streams one frame every `interval`.
pub async fn spawn_slow_provider(interval: Duration) -> String {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(move || async move {
            let frames = stream::unfold(0u32, move |n| async move {
                if n > SLOW_FRAMES {
                    return None;
                }
                tokio::time::sleep(interval).await;
                let frame = if n == SLOW_FRAMES {
                    "data: [DONE]\n\n".to_string()
                } else {
                    format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{n}\"}}}}]}}\n\n")
                };
                Some((Ok::<_, Infallible>(frame), n + 1))
            });
            ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(frames)).into_response()
        }),
    );
    format!("{}/v1", serve(router).await)
}

pub fn test_config(scheme: AuthScheme, provider_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.auth.scheme = scheme;
    config.auth.secret = Some(SECRET.to_string());
    config.auth.app_id = APP_ID.to_string();
    config.provider.base_url = provider_url.to_string();
    config.provider.timeout_secs = 5;
    config
}

/// Router plus the handles tests need to poke at.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub provider: MockProvider,
}

pub async fn test_app_with(config: impl FnOnce(&mut AppConfig), scheme: AuthScheme) -> TestApp {
    let provider = spawn_provider().await;
    let mut app_config = test_config(scheme, &provider.base_url);
    config(&mut app_config);

    let clock = Arc::new(ManualClock::new(NOW_MS));
    let state = AppState::from_config(app_config, clock.clone(), Arc::new(OsRandom)).unwrap();
    TestApp {
        router: api::create_router(state.clone()),
        state,
        clock,
        provider,
    }
}

pub async fn test_app(scheme: AuthScheme) -> TestApp {
    test_app_with(|_| {}, scheme).await
}

/// `name=value` pairs from every `Set-Cookie` header of a response.
pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// Value of a cookie set by the response, if any.
pub fn cookie_from(response: &Response, name: &str) -> Option<String> {
    set_cookies(response).iter().find_map(|cookie| {
        let pair = cookie.split(';').next()?;
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

pub async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
