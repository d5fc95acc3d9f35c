//! Authentication configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operator credentials and token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Operator login name.
    pub username: String,

    /// Plain-text password. Prefer `password_hash`.
    pub password: Option<String>,

    /// Bcrypt hash of the operator password.
    pub password_hash: Option<String>,

    /// JWT secret for HS256. Supports `env:VAR_NAME`.
    /// When unset a random secret is generated at startup.
    pub jwt_secret: Option<String>,

    /// Lifetime of issued session tokens.
    pub token_ttl_hours: i64,

    /// Mark the session cookie `Secure`.
    pub secure_cookie: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: None,
            password_hash: None,
            jwt_secret: None,
            token_ttl_hours: 24,
            secure_cookie: false,
        }
    }
}

impl AuthConfig {
    /// Resolve the JWT secret, expanding `env:VAR_NAME` syntax.
    /// Returns the resolved secret or None if not configured.
    pub fn resolve_jwt_secret(&self) -> Result<Option<String>, ConfigValidationError> {
        match &self.jwt_secret {
            None => Ok(None),
            Some(value) => {
                if let Some(var_name) = value.strip_prefix("env:") {
                    match std::env::var(var_name) {
                        Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
                        Ok(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
                        Err(_) => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
                    }
                } else {
                    Ok(Some(value.clone()))
                }
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.username.trim().is_empty() {
            return Err(ConfigValidationError::MissingUsername);
        }

        if self.password.as_deref().unwrap_or_default().is_empty()
            && self.password_hash.as_deref().unwrap_or_default().is_empty()
        {
            return Err(ConfigValidationError::MissingPassword);
        }

        if let Some(secret) = self.resolve_jwt_secret()?
            && secret.len() < 32
        {
            return Err(ConfigValidationError::JwtSecretTooShort);
        }

        Ok(())
    }

    /// Check a login attempt against the configured operator credentials.
    pub fn verify_credentials(&self, username: &str, password: &str) -> bool {
        if username != self.username {
            return false;
        }

        if let Some(ref hash) = self.password_hash
            && !hash.is_empty()
        {
            return bcrypt::verify(password, hash).unwrap_or(false);
        }

        match self.password.as_deref() {
            Some(expected) if !expected.is_empty() => expected == password,
            _ => false,
        }
    }

    /// Generate a random JWT secret.
    pub fn generate_jwt_secret() -> String {
        const CHARSET: [char; 62] = [
            'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q',
            'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h',
            'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y',
            'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
        ];
        nanoid::nanoid!(64, &CHARSET)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("auth.username must not be empty")]
    MissingUsername,

    #[error("no operator password configured; set auth.password_hash (bcrypt) or auth.password")]
    MissingPassword,

    #[error("JWT secret must be at least 32 characters long")]
    JwtSecretTooShort,

    #[error("environment variable '{0}' not found (referenced via env:{0} in config)")]
    EnvVarNotFound(String),

    #[error("environment variable '{0}' is empty (referenced via env:{0} in config)")]
    EnvVarEmpty(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_password(password: &str) -> AuthConfig {
        AuthConfig {
            password: Some(password.to_string()),
            ..AuthConfig::default()
        }
    }

    #[test]
    fn test_validate_requires_password() {
        assert_eq!(
            AuthConfig::default().validate(),
            Err(ConfigValidationError::MissingPassword)
        );
        assert!(config_with_password("hunter22").validate().is_ok());
    }

    #[test]
    fn test_validate_short_secret() {
        let config = AuthConfig {
            jwt_secret: Some("short".to_string()),
            ..config_with_password("pw")
        };
        assert_eq!(config.validate(), Err(ConfigValidationError::JwtSecretTooShort));
    }

    #[test]
    fn test_resolve_jwt_secret_env_missing() {
        let config = AuthConfig {
            jwt_secret: Some("env:JSPANEL_TEST_SECRET_THAT_DOES_NOT_EXIST".to_string()),
            ..AuthConfig::default()
        };
        assert!(matches!(
            config.resolve_jwt_secret(),
            Err(ConfigValidationError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn test_verify_plain_password() {
        let config = config_with_password("hunter22");
        assert!(config.verify_credentials("admin", "hunter22"));
        assert!(!config.verify_credentials("admin", "wrong"));
        assert!(!config.verify_credentials("root", "hunter22"));
    }

    #[test]
    fn test_verify_bcrypt_hash_takes_precedence() {
        let config = AuthConfig {
            password: Some("plain".to_string()),
            password_hash: Some(bcrypt::hash("hashed", 4).unwrap()),
            ..AuthConfig::default()
        };
        assert!(config.verify_credentials("admin", "hashed"));
        assert!(!config.verify_credentials("admin", "plain"));
    }

    #[test]
    fn test_generated_secret_is_long_enough() {
        assert_eq!(AuthConfig::generate_jwt_secret().len(), 64);
    }
}
