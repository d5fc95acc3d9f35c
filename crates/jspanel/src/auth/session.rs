//! Operator sessions backed by signed HS256 tokens.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::warn;
use serde::{Deserialize, Serialize};

use super::AuthError;

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Operator name.
    pub sub: String,
    /// Expiration (unix seconds).
    pub exp: i64,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Token id, used for revocation.
    pub jti: String,
}

/// The authenticated operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub username: String,
    #[serde(skip)]
    pub token_id: String,
    pub expires_at: i64,
}

/// Issues, validates and revokes operator sessions.
pub trait SessionStore: Send + Sync {
    /// Issue a new session token for `username`.
    fn issue(&self, username: &str) -> Result<String, AuthError>;

    /// Validate a token and return the principal it belongs to.
    fn validate(&self, token: &str) -> Result<Principal, AuthError>;

    /// Invalidate a token. Revoking an unknown or expired token is a no-op.
    fn revoke(&self, token: &str);
}

/// Stateless JWT sessions with an in-memory revocation list.
pub struct JwtSessionStore {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_secs: i64,
    /// Revoked token ids mapped to their expiry.
    revoked: RwLock<HashMap<String, i64>>,
}

impl JwtSessionStore {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs: ttl_hours.max(1) * 3600,
            revoked: RwLock::new(HashMap::new()),
        }
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();

        let token_data =
            decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
                warn!("Session token validation failed: {:?}", e);
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::InvalidToken(e.to_string()),
                }
            })?;

        Ok(token_data.claims)
    }

    fn is_revoked(&self, jti: &str) -> bool {
        self.revoked
            .read()
            .map(|revoked| revoked.contains_key(jti))
            .unwrap_or(true)
    }
}

impl SessionStore for JwtSessionStore {
    fn issue(&self, username: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: username.to_string(),
            exp: now + self.ttl_secs,
            iat: now,
            jti: nanoid::nanoid!(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = self.decode_claims(token)?;
        if self.is_revoked(&claims.jti) {
            return Err(AuthError::Revoked);
        }

        Ok(Principal {
            username: claims.sub,
            token_id: claims.jti,
            expires_at: claims.exp,
        })
    }

    fn revoke(&self, token: &str) {
        let Ok(claims) = self.decode_claims(token) else {
            return;
        };

        let now = Utc::now().timestamp();
        if let Ok(mut revoked) = self.revoked.write() {
            revoked.retain(|_, exp| *exp > now);
            revoked.insert(claims.jti, claims.exp);
        }
    }
}
