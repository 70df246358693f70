//! Relay configuration.
//!
//! Layered as defaults, then the TOML file, then `CHATGATE__SECTION__KEY`
//! environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "chatgate";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "CHATGATE";

/// Minimum accepted length of the shared secret.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub session: SessionConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on request bodies, in KiB.
    pub max_body_kb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_body_kb: 1024,
        }
    }
}

impl ServerConfig {
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_kb.saturating_mul(1024)
    }
}

/// Which authentication scheme guards the protected routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// Session-bound CSRF tokens (browser clients).
    #[default]
    Csrf,
    /// Per-request HMAC headers (programmatic clients).
    Hmac,
}

impl std::fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthScheme::Csrf => write!(f, "csrf"),
            AuthScheme::Hmac => write!(f, "hmac"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub scheme: AuthScheme,
    /// Shared secret. Accepts `env:VAR_NAME`. REQUIRED.
    pub secret: Option<String>,
    /// Application id expected in `X-App-ID` (HMAC scheme).
    pub app_id: String,
    /// Lifetime of issued CSRF tokens.
    pub token_ttl_secs: u64,
    /// Allowed clock skew for HMAC timestamps, either direction.
    pub max_skew_secs: u64,
    /// How often the used-nonce set is cleared.
    pub nonce_clear_interval_secs: u64,
    /// Mark cookies `Secure`. Enable behind HTTPS.
    pub secure_cookies: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            scheme: AuthScheme::Csrf,
            // No default secret - must be explicitly configured
            secret: None,
            app_id: "chatgate-web".to_string(),
            token_ttl_secs: 600,
            max_skew_secs: 300,
            nonce_clear_interval_secs: 600,
            secure_cookies: false,
        }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn max_skew(&self) -> Duration {
        Duration::from_secs(self.max_skew_secs)
    }

    pub fn nonce_clear_interval(&self) -> Duration {
        Duration::from_secs(self.nonce_clear_interval_secs)
    }

    /// Resolve the shared secret, expanding `env:VAR_NAME` syntax.
    pub fn resolve_secret(&self) -> Result<String, ConfigValidationError> {
        let value = self
            .secret
            .as_deref()
            .ok_or(ConfigValidationError::MissingSecret)?;
        let secret = resolve_secret_ref(value)?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigValidationError::SecretTooShort);
        }
        Ok(secret)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.resolve_secret()?;
        if self.scheme == AuthScheme::Hmac && self.app_id.trim().is_empty() {
            return Err(ConfigValidationError::MissingAppId);
        }
        if self.token_ttl_secs == 0 || self.nonce_clear_interval_secs == 0 {
            return Err(ConfigValidationError::ZeroDuration);
        }
        Ok(())
    }

    /// Generate a random secret suitable for `auth.secret`.
    pub fn generate_secret() -> String {
        use rand::Rng;

        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        const SECRET_LENGTH: usize = 64;

        let mut rng = rand::rng();
        (0..SECRET_LENGTH)
            .map(|_| {
                let idx = rng.random_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    /// Idle lifetime; every request that touches the session extends it.
    pub idle_ttl_secs: u64,
    /// Create a session for every request that arrives without one.
    pub save_uninitialized: bool,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: chatgate_protocol::auth::DEFAULT_SESSION_COOKIE.to_string(),
            idle_ttl_secs: 3600,
            save_uninitialized: false,
            sweep_interval_secs: 300,
        }
    }
}

impl SessionConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible API (without `/chat/completions`).
    pub base_url: String,
    /// Bearer key. Accepts `env:VAR_NAME`.
    pub api_key: Option<String>,
    /// Model used when a request does not name one.
    pub default_model: String,
    /// Longest silence tolerated between reads of a provider response.
    /// Non-streamed requests also use it as their total deadline.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            default_model: "gpt-4o-mini".to_string(),
            timeout_secs: 300,
            connect_timeout_secs: 10,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigValidationError> {
        self.api_key.as_deref().map(resolve_secret_ref).transpose()
    }
}

impl AppConfig {
    /// Load configuration from `path` (optional) layered with the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let built = Config::builder()
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("loading config from {}", path.display()))?;

        let config: AppConfig = built
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(config)
    }

    /// Load configuration, writing the defaults first if the file is missing.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            write_default_config(path)?;
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.auth.validate()?;
        self.provider.resolve_api_key()?;
        Ok(())
    }
}

/// Expand an `env:VAR_NAME` reference; other values are returned as-is.
pub fn resolve_secret_ref(value: &str) -> Result<String, ConfigValidationError> {
    match value.strip_prefix("env:") {
        Some(var_name) => match std::env::var(var_name) {
            Ok(secret) if !secret.is_empty() => Ok(secret),
            Ok(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
            Err(_) => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
        },
        None => Ok(value.to_string()),
    }
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push('\n');
    body.push_str("# File: ");
    body.push_str(&path.display().to_string());
    body.push_str("\n# Set auth.secret (or CHATGATE__AUTH__SECRET) before serving.\n\n");
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

/// Resolve the config file path, honouring an explicit override.
pub fn config_file_path(override_path: Option<PathBuf>) -> Result<PathBuf> {
    match override_path {
        Some(path) => {
            let expanded = match path.to_str() {
                Some(text) => {
                    PathBuf::from(shellexpand::full(text).context("expanding path")?.to_string())
                }
                None => path,
            };
            if expanded.is_dir() {
                Ok(expanded.join("config.toml"))
            } else {
                Ok(expanded)
            }
        }
        None => Ok(default_config_dir()?.join("config.toml")),
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// `auth.secret` is not set.
    MissingSecret,
    /// Secret is shorter than [`MIN_SECRET_LEN`].
    SecretTooShort,
    /// HMAC scheme without an app id.
    MissingAppId,
    /// A TTL or interval is zero.
    ZeroDuration,
    /// Environment variable not found (for `env:VAR_NAME` syntax).
    EnvVarNotFound(String),
    /// Environment variable is empty (for `env:VAR_NAME` syntax).
    EnvVarEmpty(String),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSecret => write!(
                f,
                "auth.secret is required. Set CHATGATE__AUTH__SECRET or secret in config (try `chatgate gen-secret`)."
            ),
            Self::SecretTooShort => write!(
                f,
                "auth.secret must be at least {MIN_SECRET_LEN} characters long."
            ),
            Self::MissingAppId => write!(f, "auth.app_id is required for the hmac scheme."),
            Self::ZeroDuration => write!(
                f,
                "auth.token_ttl_secs and auth.nonce_clear_interval_secs must be positive."
            ),
            Self::EnvVarNotFound(var) => write!(
                f,
                "Environment variable '{var}' not found (referenced via env:{var} in config)."
            ),
            Self::EnvVarEmpty(var) => write!(
                f,
                "Environment variable '{var}' is empty (referenced via env:{var} in config)."
            ),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

#[cfg(test)]
#[allow(clippy::field_reassign_with_default)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.auth.scheme, AuthScheme::Csrf);
        assert_eq!(config.auth.token_ttl(), Duration::from_secs(600));
        assert_eq!(config.auth.max_skew(), Duration::from_secs(300));
        assert_eq!(config.session.cookie_name, "chatgate.sid");
        assert_eq!(config.server.max_body_bytes(), 1024 * 1024);
    }

    #[test]
    fn test_secret_is_required() {
        let mut auth = AuthConfig::default();
        assert_eq!(auth.validate(), Err(ConfigValidationError::MissingSecret));

        auth.secret = Some("short".to_string());
        assert_eq!(auth.validate(), Err(ConfigValidationError::SecretTooShort));

        auth.secret = Some(SECRET.to_string());
        assert!(auth.validate().is_ok());
    }

    #[test]
    fn test_hmac_requires_app_id() {
        let mut auth = AuthConfig::default();
        auth.secret = Some(SECRET.to_string());
        auth.scheme = AuthScheme::Hmac;
        auth.app_id = " ".to_string();
        assert_eq!(auth.validate(), Err(ConfigValidationError::MissingAppId));
    }

    #[test]
    fn test_env_reference_resolution() {
        assert_eq!(
            resolve_secret_ref("env:CHATGATE_TEST_VAR_THAT_DOES_NOT_EXIST"),
            Err(ConfigValidationError::EnvVarNotFound(
                "CHATGATE_TEST_VAR_THAT_DOES_NOT_EXIST".to_string()
            ))
        );
        let path = std::env::var("PATH").unwrap();
        assert_eq!(resolve_secret_ref("env:PATH"), Ok(path));
        assert_eq!(resolve_secret_ref("plain").as_deref(), Ok("plain"));
    }

    #[test]
    fn test_generated_secret_validates() {
        let mut auth = AuthConfig::default();
        auth.secret = Some(AuthConfig::generate_secret());
        assert!(auth.validate().is_ok());
        assert_ne!(AuthConfig::generate_secret(), AuthConfig::generate_secret());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            format!(
                "[auth]\nscheme = \"hmac\"\nsecret = \"{SECRET}\"\napp_id = \"cli\"\n\n[server]\nport = 4100\n"
            ),
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.auth.scheme, AuthScheme::Hmac);
        assert_eq!(config.auth.app_id, "cli");
        assert_eq!(config.server.port, 4100);
        assert_eq!(config.server.host, "127.0.0.1", "unset keys keep defaults");
        assert!(config.auth.validate().is_ok());
    }

    #[test]
    fn test_load_or_init_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = AppConfig::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.auth.token_ttl_secs, 600);

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("# Configuration for chatgate"));
        assert!(written.contains("[session]"));
    }
}
