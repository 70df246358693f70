//! Client side of the chatgate relay.
//!
//! Authenticates requests with either a CSRF session or per-request HMAC
//! headers and reassembles streamed completions into chat messages.

pub mod client;
pub mod csrf;
pub mod error;
pub mod hmac;
pub mod reassembler;

pub use client::{CHAT_PATH, ChatClient, ClientAuth};
pub use csrf::{AuthPhase, CsrfSession};
pub use error::{ClientError, ClientResult};
pub use hmac::{HmacSigner, SignedHeaders};
pub use reassembler::{
    ChatStatus, Conversation, DEFAULT_MAX_LINE_BYTES, Frame, LineBuffer, StreamAccumulator,
    StreamOutcome, parse_line,
};
