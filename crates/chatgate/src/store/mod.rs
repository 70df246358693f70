//! Process-wide state backing the authenticator.

mod nonce;
mod session;

pub use nonce::NonceStore;
pub use session::{Session, SessionStore};
