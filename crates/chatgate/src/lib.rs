//! Authenticating chat relay.
//!
//! Sits between a browser or CLI chat client and a hosted OpenAI-compatible
//! provider: requests are authenticated (CSRF session or HMAC headers) and
//! then relayed, with streamed completions passed through untouched.

pub mod api;
pub mod auth;
pub mod config;
pub mod provider;
pub mod store;
