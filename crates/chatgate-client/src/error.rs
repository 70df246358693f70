//! Client error types.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced to callers of the chat client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or stream failure.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] reqwest::Error),

    /// The relay reached the provider, which refused the request.
    #[error("{message}")]
    UpstreamRejected { status: u16, message: String },

    /// Authentication was refused, after the one allowed re-initialization
    /// where the scheme permits it.
    #[error("authentication rejected ({status} {code}): {message}")]
    AuthRejected {
        status: u16,
        code: String,
        message: String,
    },

    /// `GET /csrf-init` did not yield a token.
    #[error("csrf initialization failed: {0}")]
    InitFailed(String),

    /// Invalid base URL or header value.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Any other non-success response.
    #[error("unexpected response ({status}): {message}")]
    Http { status: u16, message: String },

    /// Response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether retrying with fresh credentials could help.
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::AuthRejected { .. } | ClientError::InitFailed(_))
    }
}
