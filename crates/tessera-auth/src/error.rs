//! Error taxonomy for token, session and CSRF handling
//!
//! Configuration errors are raised while constructing components and are
//! meant to abort startup. Every other variant is a per-request failure that
//! the pipeline turns into a JSON response of the form
//! `{ "error": <message>, "code": <CODE> }`.

use http::StatusCode;
use thiserror::Error;

use crate::claims::TokenType;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication and session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Token family has been revoked")]
    TokenFamilyRevoked,

    #[error("Token fingerprint does not match client")]
    FingerprintMismatch,

    #[error("Invalid token type: expected {expected}, got {actual}")]
    InvalidTokenType {
        expected: TokenType,
        actual: TokenType,
    },

    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid session: {0}")]
    SessionInvalid(String),

    #[error("Invalid CSRF Token")]
    CsrfInvalid,

    #[error("Too many requests, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Signing error: {0}")]
    Signing(String),
}

impl AuthError {
    /// Stable machine-readable code, used in JSON error bodies and metrics
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenInvalid(_) => "TOKEN_INVALID",
            AuthError::TokenRevoked => "TOKEN_REVOKED",
            AuthError::TokenFamilyRevoked => "TOKEN_FAMILY_REVOKED",
            AuthError::FingerprintMismatch => "FINGERPRINT_MISMATCH",
            AuthError::InvalidTokenType { .. } => "INVALID_TOKEN_TYPE",
            AuthError::SessionExpired => "SESSION_EXPIRED",
            AuthError::SessionInvalid(_) => "SESSION_INVALID",
            AuthError::CsrfInvalid => "CSRF_INVALID",
            AuthError::RateLimited { .. } => "RATE_LIMITED",
            AuthError::Configuration(_) => "CONFIGURATION_ERROR",
            AuthError::Storage(_) => "STORAGE_ERROR",
            AuthError::Signing(_) => "SIGNING_ERROR",
        }
    }

    /// HTTP status used when this error becomes a response
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::CsrfInvalid => StatusCode::FORBIDDEN,
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Configuration(_) | AuthError::Signing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Check if this error indicates likely token theft or tampering
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            AuthError::TokenFamilyRevoked
                | AuthError::FingerprintMismatch
                | AuthError::SessionInvalid(_)
        )
    }

    /// Render the `{ error, code }` response body
    pub fn to_json_body(&self) -> String {
        // Internal details of storage and signing faults stay in the logs.
        let message = match self {
            AuthError::Storage(_) => "Service temporarily unavailable".to_string(),
            AuthError::Configuration(_) | AuthError::Signing(_) => {
                "Internal authentication error".to_string()
            }
            AuthError::TokenInvalid(_) => "Invalid token".to_string(),
            other => other.to_string(),
        };
        serde_json::json!({ "error": message, "code": self.code() }).to_string()
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match error.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::ImmatureSignature => AuthError::TokenInvalid("token not yet valid".into()),
            ErrorKind::InvalidSignature => AuthError::TokenInvalid("bad signature".into()),
            ErrorKind::InvalidIssuer => AuthError::TokenInvalid("issuer mismatch".into()),
            ErrorKind::InvalidAudience => AuthError::TokenInvalid("audience mismatch".into()),
            ErrorKind::InvalidAlgorithm => AuthError::TokenInvalid("algorithm not allowed".into()),
            _ => AuthError::TokenInvalid(error.to_string()),
        }
    }
}

impl From<config::ConfigError> for AuthError {
    fn from(error: config::ConfigError) -> Self {
        AuthError::Configuration(error.to_string())
    }
}

#[cfg(feature = "redis-storage")]
impl From<redis::RedisError> for AuthError {
    fn from(error: redis::RedisError) -> Self {
        AuthError::Storage(format!("Redis operation failed: {}", error))
    }
}
