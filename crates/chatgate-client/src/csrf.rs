//! CSRF session client.
//!
//! The relay hands out a session cookie plus a readable `csrf-token` cookie
//! from `GET /csrf-init`; every protected request echoes the token in the
//! `X-CSRF-Token` header. A denial that demands re-authentication triggers
//! exactly one re-initialization and one retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use chatgate_protocol::auth::{CSRF_COOKIE, CSRF_HEADER, CSRF_INIT_PATH};
use chatgate_protocol::{AuthDenialBody, CsrfInitResponse};

use crate::error::{ClientError, ClientResult};

/// Where a request is in the authentication cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Idle,
    /// Obtaining a token (cached or via `/csrf-init`).
    Authenticating,
    /// First attempt in flight.
    Sent,
    /// First attempt was denied; re-initializing.
    RetryOnce,
    /// Second and last attempt in flight.
    Sent2,
}

/// A rejected response, decoded.
struct Rejection {
    status: StatusCode,
    body: Option<AuthDenialBody>,
}

impl Rejection {
    fn demands_reauth(&self) -> bool {
        self.body.as_ref().is_some_and(AuthDenialBody::demands_reauth)
    }

    fn into_error(self) -> ClientError {
        let (code, message) = match self.body {
            Some(body) => (body.code, body.error),
            None => ("unknown".to_string(), "request was not authorized".to_string()),
        };
        ClientError::AuthRejected {
            status: self.status.as_u16(),
            code,
            message,
        }
    }
}

/// Read a cookie out of a `Cookie` header value.
fn cookie_from_header(header: &str, name: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name && !value.is_empty()).then(|| value.to_string())
    })
}

/// HTTP client bound to one relay session.
pub struct CsrfSession {
    http: Client,
    jar: Arc<Jar>,
    base_url: Url,
    init_lock: Mutex<()>,
    inits: AtomicUsize,
}

impl CsrfSession {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid base url {base_url}: {e}")))?;
        let jar = Arc::new(Jar::default());
        let http = Client::builder().cookie_provider(jar.clone()).build()?;
        Ok(Self {
            http,
            jar,
            base_url,
            init_lock: Mutex::new(()),
            inits: AtomicUsize::new(0),
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Number of `/csrf-init` round trips performed so far.
    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    /// Token currently held in the readable cookie.
    pub fn current_token(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base_url)?;
        cookie_from_header(header.to_str().ok()?, CSRF_COOKIE)
    }

    fn clear_token_cookie(&self) {
        self.jar.add_cookie_str(
            &format!("{CSRF_COOKIE}=; Path=/; Max-Age=0"),
            &self.base_url,
        );
    }

    /// Return the current token, initializing the session if there is none.
    ///
    /// Concurrent callers without a token share a single `/csrf-init`.
    pub async fn ensure_token(&self) -> ClientResult<String> {
        if let Some(token) = self.current_token() {
            return Ok(token);
        }

        let _guard = self.init_lock.lock().await;
        if let Some(token) = self.current_token() {
            return Ok(token);
        }
        self.initialize().await
    }

    /// Drop `stale` and obtain a fresh token.
    ///
    /// If another caller already replaced `stale`, its token is reused.
    async fn reinitialize(&self, stale: &str) -> ClientResult<String> {
        let _guard = self.init_lock.lock().await;
        match self.current_token() {
            Some(token) if token != stale => return Ok(token),
            Some(_) => self.clear_token_cookie(),
            None => {}
        }
        self.initialize().await
    }

    async fn initialize(&self) -> ClientResult<String> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        let url = self
            .base_url
            .join(CSRF_INIT_PATH)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::InitFailed(format!("{status}: {}", text.trim())));
        }

        let body: CsrfInitResponse = response
            .json()
            .await
            .map_err(|e| ClientError::InitFailed(format!("invalid init response: {e}")))?;
        if !body.success {
            return Err(ClientError::InitFailed("relay reported failure".to_string()));
        }

        let token = self
            .current_token()
            .ok_or_else(|| ClientError::InitFailed(format!("no {CSRF_COOKIE} cookie set")))?;
        info!("csrf session initialised");
        Ok(token)
    }

    /// Decode an auth denial; other responses are handed back.
    async fn rejection(response: Response) -> Result<Response, Rejection> {
        let status = response.status();
        if status != StatusCode::FORBIDDEN && status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let body = response.json::<AuthDenialBody>().await.ok();
        Err(Rejection { status, body })
    }

    /// Send a protected request built by `build`, attaching the token.
    ///
    /// `build` is called once per attempt, so it must be able to rebuild the
    /// request body.
    pub async fn send<F>(&self, build: F) -> ClientResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut phase = AuthPhase::Idle;
        let mut token = String::new();

        loop {
            debug!(?phase, "csrf request");
            phase = match phase {
                AuthPhase::Idle => AuthPhase::Authenticating,
                AuthPhase::Authenticating => {
                    token = self.ensure_token().await?;
                    AuthPhase::Sent
                }
                AuthPhase::Sent | AuthPhase::Sent2 => {
                    let response = build(&self.http).header(CSRF_HEADER, &token).send().await?;
                    let rejection = match Self::rejection(response).await {
                        Ok(response) => return Ok(response),
                        Err(rejection) => rejection,
                    };
                    if phase == AuthPhase::Sent && rejection.demands_reauth() {
                        warn!(status = %rejection.status, "csrf token rejected; re-initialising once");
                        AuthPhase::RetryOnce
                    } else {
                        return Err(rejection.into_error());
                    }
                }
                AuthPhase::RetryOnce => {
                    token = self.reinitialize(&token).await?;
                    AuthPhase::Sent2
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_parsing() {
        let header = "chatgate.sid=abc; csrf-token=MTIzOmFiOmNk==";
        assert_eq!(
            cookie_from_header(header, CSRF_COOKIE).as_deref(),
            Some("MTIzOmFiOmNk==")
        );
        assert_eq!(cookie_from_header("csrf-token=", CSRF_COOKIE), None);
        assert_eq!(cookie_from_header("other=1", CSRF_COOKIE), None);
    }

    #[test]
    fn test_rejection_reauth() {
        let rejection = Rejection {
            status: StatusCode::FORBIDDEN,
            body: Some(AuthDenialBody {
                error: "expired".into(),
                code: "csrf_expired".into(),
                requires_reauth: None,
            }),
        };
        assert!(rejection.demands_reauth());

        let plain = Rejection {
            status: StatusCode::FORBIDDEN,
            body: None,
        };
        assert!(!plain.demands_reauth());
        assert!(matches!(
            plain.into_error(),
            ClientError::AuthRejected { status: 403, .. }
        ));
    }

    #[test]
    fn test_jar_roundtrip() {
        let session = CsrfSession::new("http://127.0.0.1:9").unwrap();
        assert_eq!(session.current_token(), None);

        session
            .jar
            .add_cookie_str("csrf-token=tok; Path=/; SameSite=Strict", session.base_url());
        assert_eq!(session.current_token().as_deref(), Some("tok"));

        session.clear_token_cookie();
        assert_eq!(session.current_token(), None);
    }
}
