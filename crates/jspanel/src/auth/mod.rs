//! Operator authentication.
//!
//! A single operator account from config, HS256 session tokens and an
//! axum middleware guarding every route except login and health.

mod config;
mod error;
mod middleware;
mod session;

pub use config::{AuthConfig, ConfigValidationError};
pub use error::AuthError;
pub use middleware::{AuthState, CurrentUser, SESSION_COOKIE, auth_middleware};
pub use session::{Claims, JwtSessionStore, Principal, SessionStore};
