//! Authentication middleware.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use log::{debug, info, warn};

use super::{AuthConfig, AuthError, JwtSessionStore, Principal, SessionStore};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "auth_token";

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }

    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

pub(crate) fn token_from_cookie_header<'a>(
    cookie_header: &'a str,
    cookie_name: &str,
) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next()?;
        if key == "token" {
            urlencoding::decode(value).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

/// Find the session token on a request: header, then cookie, then query.
pub(crate) fn request_token(parts: &Parts) -> Result<Option<String>, AuthError> {
    if let Some(header) = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        return bearer_token_from_header(header).map(|t| Some(t.to_string()));
    }

    if let Some(token) = parts
        .headers
        .get(axum::http::header::COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookie_header| token_from_cookie_header(cookie_header, SESSION_COOKIE))
        .filter(|t| !t.is_empty())
    {
        return Ok(Some(token.to_string()));
    }

    Ok(parts.uri.query().and_then(token_from_query))
}

/// Authentication state shared across handlers.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    sessions: Arc<dyn SessionStore>,
}

impl AuthState {
    /// Create auth state from config.
    ///
    /// Uses the configured JWT secret or generates a random one, in which
    /// case sessions do not survive a restart.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let secret = match config
            .resolve_jwt_secret()
            .map_err(|e| AuthError::Internal(e.to_string()))?
        {
            Some(secret) => secret,
            None => {
                warn!("No JWT secret configured, generated an ephemeral one");
                AuthConfig::generate_jwt_secret()
            }
        };

        let sessions = Arc::new(JwtSessionStore::new(&secret, config.token_ttl_hours));
        Ok(Self::with_sessions(config, sessions))
    }

    pub fn with_sessions(config: AuthConfig, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Check credentials and issue a session token.
    pub fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        if !self.config.verify_credentials(username, password) {
            info!("Rejected login for '{}'", username);
            return Err(AuthError::InvalidCredentials);
        }

        debug!("Issuing session for '{}'", username);
        self.sessions.issue(username)
    }

    pub fn logout(&self, token: &str) {
        self.sessions.revoke(token);
    }

    pub fn validate_token(&self, token: &str) -> Result<Principal, AuthError> {
        self.sessions.validate(token)
    }

    /// Session cookie carrying `token`.
    pub fn session_cookie(&self, token: &str) -> String {
        let secure = if self.config.secure_cookie {
            " Secure;"
        } else {
            ""
        };
        format!(
            "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax;{secure} Max-Age={}",
            self.config.token_ttl_hours.max(1) * 3600
        )
    }

    /// Cookie that clears the session.
    pub fn clear_cookie(&self) -> String {
        format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }
}

/// Authenticated operator extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub principal: Principal,
    /// Raw token the request was authenticated with.
    pub token: String,
}

impl CurrentUser {
    pub fn username(&self) -> &str {
        &self.principal.username
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}

/// Authentication middleware.
///
/// Validates the session token and injects `CurrentUser` into request extensions.
/// Token sources in priority order:
/// 1. Authorization: Bearer <token> header
/// 2. auth_token cookie
/// 3. token query parameter (for WebSocket connections)
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let (mut parts, body) = req.into_parts();

    let token = request_token(&parts)?.ok_or(AuthError::MissingAuthHeader)?;
    let principal = auth.validate_token(&token)?;

    parts.extensions.insert(CurrentUser { principal, token });

    Ok(next
        .run(axum::http::Request::from_parts(parts, body))
        .await)
}
