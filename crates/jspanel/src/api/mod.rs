//! HTTP API module.
//!
//! REST endpoints for containers and their files, plus the WebSocket log viewer.

mod error;
mod handlers;
mod routes;
mod state;
mod ws_logs;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
