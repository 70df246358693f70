//! Chat client for the relay's `/api/chat` endpoint.

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use chatgate_protocol::{AuthDenialBody, ChatRequest, Completion};

use crate::csrf::CsrfSession;
use crate::error::{ClientError, ClientResult};
use crate::hmac::HmacSigner;
use crate::reassembler::{Conversation, StreamOutcome};

/// Path of the protected chat endpoint.
pub const CHAT_PATH: &str = "/api/chat";

/// How requests are authenticated.
pub enum ClientAuth {
    Csrf(CsrfSession),
    Hmac(HmacSigner),
}

impl ClientAuth {
    pub fn csrf(base_url: &str) -> ClientResult<Self> {
        Ok(Self::Csrf(CsrfSession::new(base_url)?))
    }

    pub fn hmac(secret: impl AsRef<[u8]>, app_id: impl Into<String>) -> Self {
        Self::Hmac(HmacSigner::new(secret, app_id))
    }
}

/// `{error, code}` body of relay error responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct ChatClient {
    http: Client,
    chat_url: Url,
    auth: ClientAuth,
}

impl ChatClient {
    pub fn new(base_url: &str, auth: ClientAuth) -> ClientResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid base url {base_url}: {e}")))?;
        let chat_url = base
            .join(CHAT_PATH)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        let http = match &auth {
            ClientAuth::Csrf(session) => session.http().clone(),
            ClientAuth::Hmac(_) => Client::builder().build()?,
        };
        Ok(Self {
            http,
            chat_url,
            auth,
        })
    }

    pub fn auth(&self) -> &ClientAuth {
        &self.auth
    }

    /// Send `request` and fold the response into `conversation`.
    ///
    /// The caller appends its own user message before calling. Any failure
    /// leaves the conversation in [`ChatStatus::Error`]; cancelling `cancel`
    /// at any point yields [`StreamOutcome::Aborted`] and an idle
    /// conversation.
    ///
    /// [`ChatStatus::Error`]: crate::reassembler::ChatStatus::Error
    pub async fn send_chat(
        &self,
        conversation: &mut Conversation,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> ClientResult<StreamOutcome> {
        conversation.begin();
        let result = self.exchange(conversation, request, cancel).await;
        if result.is_err() {
            conversation.fail();
        }
        result
    }

    async fn exchange(
        &self,
        conversation: &mut Conversation,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> ClientResult<StreamOutcome> {
        let body = serde_json::to_vec(request)
            .map_err(|e| ClientError::InvalidRequest(format!("encoding chat request: {e}")))?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("chat request cancelled before a response arrived");
                conversation.abort();
                return Ok(StreamOutcome::Aborted);
            }
            response = self.send(&body) => response?,
        };
        let response = check_status(response).await?;

        if is_event_stream(&response) {
            debug!("consuming event stream");
            return conversation
                .consume_stream(response.bytes_stream(), cancel)
                .await;
        }

        let completion: Completion = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        conversation.apply_completion(completion);
        Ok(StreamOutcome::Completed)
    }

    async fn send(&self, body: &[u8]) -> ClientResult<Response> {
        match &self.auth {
            ClientAuth::Csrf(session) => {
                session
                    .send(|http| {
                        http.post(self.chat_url.clone())
                            .header(CONTENT_TYPE, "application/json")
                            .body(body.to_vec())
                    })
                    .await
            }
            ClientAuth::Hmac(signer) => {
                let builder = self
                    .http
                    .post(self.chat_url.clone())
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.to_vec());
                let response = signer
                    .apply(builder, "POST", self.chat_url.path(), body)
                    .send()
                    .await?;
                Ok(response)
            }
        }
    }
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"))
}

/// Map non-success responses to client errors.
async fn check_status(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    match status {
        StatusCode::BAD_GATEWAY => {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or_else(|_| text.trim().to_string());
            Err(ClientError::UpstreamRejected {
                status: status.as_u16(),
                message,
            })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            let (code, message) = match serde_json::from_str::<AuthDenialBody>(&text) {
                Ok(body) => (body.code, body.error),
                Err(_) => ("unknown".to_string(), text.trim().to_string()),
            };
            Err(ClientError::AuthRejected {
                status: status.as_u16(),
                code,
                message,
            })
        }
        _ => Err(ClientError::Http {
            status: status.as_u16(),
            message: text.trim().to_string(),
        }),
    }
}
