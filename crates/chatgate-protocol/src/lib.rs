//! Canonical protocol types for chatgate.
//!
//! Shared by the relay server and its clients: chat message and completion
//! chunk shapes, the authentication headers and signing payload, and the
//! clock / randomness seams both sides inject for deterministic tests.

pub mod auth;
pub mod clock;
pub mod messages;
pub mod upstream;

pub use auth::{AuthDenialBody, CsrfInitResponse, sign_payload, signing_payload};
pub use clock::{Clock, FixedRandom, ManualClock, OsRandom, RandomSource, SystemClock};
pub use messages::{
    ChatRequest, Completion, CompletionChunk, ContentKind, Message, Role, ToolCall,
};
pub use upstream::upstream_error_hint;
