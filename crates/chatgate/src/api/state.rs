//! Application state shared across handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::info;

use chatgate_protocol::{Clock, RandomSource};

use crate::auth::{Authenticator, CookiePolicy, CsrfSessionAuth, HmacHeaderAuth, TokenCodec};
use crate::config::{AppConfig, AuthScheme};
use crate::provider::ProviderClient;
use crate::store::{NonceStore, SessionStore};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub sessions: Arc<SessionStore>,
    pub nonces: Arc<NonceStore>,
    pub provider: ProviderClient,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Build the state from validated configuration.
    pub fn from_config(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        config.validate().context("validating configuration")?;
        let secret = config.auth.resolve_secret()?;

        let sessions = Arc::new(SessionStore::new(
            config.session.idle_ttl(),
            config.session.save_uninitialized,
            clock.clone(),
            rng.clone(),
        ));
        let nonces = Arc::new(NonceStore::new());

        let authenticator = match config.auth.scheme {
            AuthScheme::Csrf => {
                let codec = TokenCodec::new(&secret, config.auth.token_ttl(), clock, rng);
                let cookies = CookiePolicy {
                    session_cookie: config.session.cookie_name.clone(),
                    session_max_age: config.session.idle_ttl(),
                    token_max_age: config.auth.token_ttl(),
                    secure: config.auth.secure_cookies,
                };
                Authenticator::CsrfSession(CsrfSessionAuth::new(codec, sessions.clone(), cookies))
            }
            AuthScheme::Hmac => Authenticator::HmacHeader(HmacHeaderAuth::new(
                &secret,
                config.auth.app_id.clone(),
                config.auth.max_skew(),
                config.server.max_body_bytes(),
                nonces.clone(),
                clock,
            )),
        };

        let provider = ProviderClient::new(&config.provider).context("creating provider client")?;

        Ok(Self {
            authenticator: Arc::new(authenticator),
            sessions,
            nonces,
            provider,
            config: Arc::new(config),
        })
    }

    pub fn scheme(&self) -> AuthScheme {
        self.authenticator.scheme()
    }

    /// Spawn the timers that maintain the stores.
    ///
    /// Only the active scheme's store gets a task.
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        match self.scheme() {
            AuthScheme::Csrf => {
                let interval = self.config.session.sweep_interval();
                info!(interval_secs = interval.as_secs(), "starting session sweep");
                vec![self.sessions.start_sweep_task(interval)]
            }
            AuthScheme::Hmac => {
                let interval = self.config.auth.nonce_clear_interval();
                info!(interval_secs = interval.as_secs(), "starting nonce eviction");
                vec![self.nonces.start_eviction_task(interval)]
            }
        }
    }
}
