//! Token claims and token-pair types
//!
//! Claim names follow RFC 7519 (`sub`, `iat`, `exp`, `nbf`, `jti`, `iss`,
//! `aud`) plus the extension claims `type`, `tokenFamily`, `fingerprint`,
//! `sid` and `tokenVersion`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Short-lived token presented on every request
    Access,
    /// Long-lived, single-use token exchanged for a new pair
    Refresh,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Access => f.write_str("access"),
            TokenType::Refresh => f.write_str("refresh"),
        }
    }
}

/// Signed token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,

    /// Issued at (unix seconds)
    pub iat: u64,

    /// Expiry (unix seconds)
    pub exp: u64,

    /// Not before (unix seconds)
    pub nbf: u64,

    /// Unique token id, the key used for revocation
    pub jti: String,

    pub iss: String,

    pub aud: String,

    #[serde(rename = "type")]
    pub token_type: TokenType,

    /// Shared by every refresh token produced by successive rotations
    #[serde(
        rename = "tokenFamily",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub token_family: Option<String>,

    /// Hash of client signals bound at issuance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Session the token was issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    #[serde(
        rename = "tokenVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub token_version: Option<u64>,
}

impl Claims {
    /// Seconds left before `exp`, zero once expired
    pub fn remaining_secs(&self, now: u64) -> u64 {
        self.exp.saturating_sub(now)
    }
}

/// Identity and bindings for a new token pair
///
/// Registered claims (`iat`, `exp`, `jti`, ...) are filled in by the
/// [`TokenService`](crate::token::TokenService).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRequest {
    pub sub: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub fingerprint: Option<String>,
    pub session_id: Option<String>,
    pub token_version: Option<u64>,
}

impl TokenRequest {
    /// Create a request for the given subject
    pub fn new(sub: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    #[must_use]
    pub fn permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Bind the pair to a client fingerprint
    #[must_use]
    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Bind the pair to a session id (`sid` claim)
    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn token_version(mut self, version: u64) -> Self {
        self.token_version = Some(version);
        self
    }

    /// Rebuild a request from previously verified claims (used on rotation)
    pub(crate) fn from_claims(claims: &Claims) -> Self {
        Self {
            sub: claims.sub.clone(),
            email: claims.email.clone(),
            roles: claims.roles.clone(),
            permissions: claims.permissions.clone(),
            fingerprint: claims.fingerprint.clone(),
            session_id: claims.sid.clone(),
            token_version: claims.token_version,
        }
    }
}

/// Access/refresh token pair returned by issuance and rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry (unix seconds)
    pub expires_at: u64,
    /// Always `"Bearer"`
    pub token_type: String,
}

impl TokenPair {
    pub const BEARER: &'static str = "Bearer";

    /// Seconds until the access token expires, measured from `now`
    pub fn expires_in(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

/// Options for [`TokenService::verify`](crate::token::TokenService::verify)
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Fingerprint re-derived from the current request
    pub fingerprint: Option<String>,
    /// Reject tokens whose fingerprint claim differs from `fingerprint`
    pub require_fingerprint_match: bool,
    /// Reject tokens of any other type
    pub expected_type: Option<TokenType>,
    /// Reject tokens carrying an older `tokenVersion`
    pub min_token_version: Option<u64>,
}

impl VerifyOptions {
    /// Options expecting an access token
    pub fn access() -> Self {
        Self {
            expected_type: Some(TokenType::Access),
            ..Default::default()
        }
    }

    /// Options expecting a refresh token
    pub fn refresh() -> Self {
        Self {
            expected_type: Some(TokenType::Refresh),
            ..Default::default()
        }
    }

    /// Require the token fingerprint to match the given one
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self.require_fingerprint_match = true;
        self
    }

    #[must_use]
    pub fn min_token_version(mut self, version: u64) -> Self {
        self.min_token_version = Some(version);
        self
    }
}

/// Options for [`TokenService::rotate_refresh`](crate::token::TokenService::rotate_refresh)
#[derive(Debug, Clone, Default)]
pub struct RotateOptions {
    /// Fingerprint re-derived from the current request
    pub fingerprint: Option<String>,
    pub require_fingerprint_match: bool,
    /// Start a new family instead of continuing the old one
    pub new_family: bool,
}

/// Successful verification result
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub claims: Claims,
    /// True when the remaining lifetime is within the refresh threshold
    pub is_near_expiry: bool,
    pub remaining: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_claims() -> Claims {
        Claims {
            sub: "u1".into(),
            email: None,
            roles: vec![],
            permissions: vec![],
            iat: 100,
            exp: 1000,
            nbf: 100,
            jti: "j1".into(),
            iss: "tessera".into(),
            aud: "app".into(),
            token_type: TokenType::Refresh,
            token_family: Some("fam".into()),
            fingerprint: None,
            sid: Some("s1".into()),
            token_version: Some(2),
        }
    }

    #[test]
    fn test_extension_claim_names() {
        let value = serde_json::to_value(sample_claims()).unwrap();
        assert_eq!(value["type"], "refresh");
        assert_eq!(value["tokenFamily"], "fam");
        assert_eq!(value["tokenVersion"], 2);
        assert_eq!(value["sid"], "s1");
        assert!(value.get("fingerprint").is_none());
        assert!(value.get("roles").is_none());
    }

    #[test]
    fn test_optional_claims_default_on_decode() {
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "sub": "u1", "iat": 1, "exp": 2, "nbf": 1, "jti": "j",
            "iss": "i", "aud": "a", "type": "access"
        }))
        .unwrap();
        assert_eq!(claims.token_type, TokenType::Access);
        assert!(claims.roles.is_empty());
        assert_eq!(claims.token_family, None);
    }

    #[test]
    fn test_remaining_secs_saturates() {
        let claims = sample_claims();
        assert_eq!(claims.remaining_secs(400), 600);
        assert_eq!(claims.remaining_secs(5000), 0);
    }

    #[test]
    fn test_request_from_claims_keeps_bindings() {
        let request = TokenRequest::from_claims(&sample_claims());
        assert_eq!(request.sub, "u1");
        assert_eq!(request.session_id.as_deref(), Some("s1"));
        assert_eq!(request.token_version, Some(2));
    }
}
