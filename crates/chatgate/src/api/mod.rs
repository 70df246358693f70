//! HTTP API: routes, handlers and session middleware.

mod error;
mod handlers;
mod routes;
pub mod session;
mod state;

pub use error::{ApiError, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
