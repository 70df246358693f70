//! Upstream chat-completion provider client.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use chatgate_protocol::{ChatRequest, Message, Role};

use crate::config::{ConfigValidationError, ProviderConfig};

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised while talking to the provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Provider answered with a non-2xx status.
    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Connection failed.
    #[error("Failed to connect to provider at {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// Client could not be configured.
    #[error("invalid provider configuration: {0}")]
    Config(#[from] ConfigValidationError),
}

#[derive(Debug, Serialize)]
struct UpstreamMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct UpstreamRequest<'a> {
    model: &'a str,
    messages: Vec<UpstreamMessage<'a>>,
    stream: bool,
}

/// Messages the provider should see.
///
/// Tool-call messages only exist for display and empty assistant
/// placeholders carry nothing.
fn upstream_messages(messages: &[Message]) -> Vec<UpstreamMessage<'_>> {
    messages
        .iter()
        .filter_map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::System => "system",
                Role::Assistant if !message.content.is_empty() => "assistant",
                Role::Assistant | Role::Agent => return None,
            };
            Some(UpstreamMessage {
                role,
                content: &message.content,
            })
        })
        .collect()
}

/// Extract a human-readable message from a provider error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            let error = value.get("error")?;
            error
                .get("message")
                .and_then(|m| m.as_str())
                .or_else(|| error.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        // No whole-request deadline here: streamed bodies may outlive it.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key()?,
            default_model: config.default_model.clone(),
            timeout: config.timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forward a chat request and return the raw successful response.
    ///
    /// The caller decides whether to stream or buffer the body.
    pub async fn complete(&self, request: &ChatRequest) -> ProviderResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let model = request
            .model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);
        let body = UpstreamRequest {
            model,
            messages: upstream_messages(&request.messages),
            stream: request.stream,
        };

        debug!(model, stream = request.stream, "forwarding chat request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if !request.stream {
            builder = builder.timeout(self.timeout);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                ProviderError::ConnectionFailed {
                    url: url.clone(),
                    message: e.to_string(),
                }
            } else {
                ProviderError::RequestFailed(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(ProviderError::Rejected {
            status: status.as_u16(),
            message: error_message(&text),
        })
    }
}
