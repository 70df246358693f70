//! Request authentication.
//!
//! Two interchangeable schemes guard the protected routes:
//! - CSRF session: a signed token bound to a server-side session, echoed in
//!   the `X-CSRF-Token` header
//! - HMAC headers: every request signed with a shared secret, replay-guarded
//!   by a nonce set

mod cookies;
mod csrf;
mod error;
mod hmac;
mod middleware;
mod token;

pub use cookies::{CookiePolicy, cookie_value};
pub use csrf::{CsrfSessionAuth, IssuedToken};
pub use error::AuthError;
pub use hmac::HmacHeaderAuth;
pub use middleware::{Authenticator, Decision, Denial, require_auth};
pub use token::{SignedToken, TOKEN_RANDOM_BYTES, TokenCodec};
