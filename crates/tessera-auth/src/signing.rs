//! Signing context: algorithm, key material and token lifetimes
//!
//! A [`SigningContext`] is built once at startup and shared read-only
//! (behind an `Arc`) by every [`TokenService`](crate::token::TokenService).
//!
//! # Key requirements
//!
//! | Algorithm | Key material | Minimum |
//! |-----------|--------------|---------|
//! | HS256 | shared secret | 32 bytes (warning below) |
//! | HS384 | shared secret | 48 bytes (warning below) |
//! | HS512 | shared secret | 64 bytes (warning below) |
//! | RS256/384/512 | PEM private + public key | both required |
//!
//! Short HMAC secrets are accepted with a warning so existing deployments
//! keep starting; missing RSA keys are a hard configuration error.

use std::fmt;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SigningConfig;
use crate::error::{AuthError, AuthResult};

/// Supported signing algorithms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
pub enum SigningAlgorithm {
    #[default]
    HS256,
    HS384,
    HS512,
    RS256,
    RS384,
    RS512,
}

impl SigningAlgorithm {
    /// Whether this is a shared-secret (HMAC) algorithm
    pub fn is_hmac(&self) -> bool {
        matches!(
            self,
            SigningAlgorithm::HS256 | SigningAlgorithm::HS384 | SigningAlgorithm::HS512
        )
    }

    /// Recommended minimum secret length in bytes for HMAC algorithms
    pub fn min_secret_len(&self) -> Option<usize> {
        match self {
            SigningAlgorithm::HS256 => Some(32),
            SigningAlgorithm::HS384 => Some(48),
            SigningAlgorithm::HS512 => Some(64),
            _ => None,
        }
    }

    /// The `jsonwebtoken` algorithm identifier
    pub fn as_jwt(&self) -> Algorithm {
        match self {
            SigningAlgorithm::HS256 => Algorithm::HS256,
            SigningAlgorithm::HS384 => Algorithm::HS384,
            SigningAlgorithm::HS512 => Algorithm::HS512,
            SigningAlgorithm::RS256 => Algorithm::RS256,
            SigningAlgorithm::RS384 => Algorithm::RS384,
            SigningAlgorithm::RS512 => Algorithm::RS512,
        }
    }
}

/// Process-wide signing state, immutable after construction
pub struct SigningContext {
    algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    leeway: Duration,
}

// Manual Debug impl so key material never reaches logs
impl fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningContext")
            .field("algorithm", &self.algorithm)
            .field("keys", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("leeway", &self.leeway)
            .finish()
    }
}

impl SigningContext {
    /// Build a signing context from configuration
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if:
    /// - an HMAC algorithm has no (or an empty) secret
    /// - an RSA algorithm is missing its private or public key
    /// - a PEM key cannot be parsed
    /// - a token lifetime is zero
    pub fn new(config: &SigningConfig) -> AuthResult<Self> {
        if config.access_token_ttl_secs == 0 || config.refresh_token_ttl_secs == 0 {
            return Err(AuthError::Configuration(
                "token lifetimes must be greater than zero".into(),
            ));
        }

        let algorithm = config.algorithm;
        let (encoding_key, decoding_key) = if algorithm.is_hmac() {
            Self::hmac_keys(algorithm, config)?
        } else {
            Self::rsa_keys(algorithm, config)?
        };

        debug!(
            algorithm = ?algorithm,
            issuer = %config.issuer,
            audience = %config.audience,
            "Signing context initialized"
        );

        Ok(Self {
            algorithm,
            encoding_key,
            decoding_key,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: Duration::from_secs(config.access_token_ttl_secs),
            refresh_ttl: Duration::from_secs(config.refresh_token_ttl_secs),
            leeway: Duration::from_secs(config.leeway_secs),
        })
    }

    fn hmac_keys(
        algorithm: SigningAlgorithm,
        config: &SigningConfig,
    ) -> AuthResult<(EncodingKey, DecodingKey)> {
        let secret = config
            .secret
            .as_ref()
            .map(|s| s.expose_secret().as_bytes())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AuthError::Configuration(format!("{:?} requires a signing secret", algorithm))
            })?;

        if let Some(min) = algorithm.min_secret_len()
            && secret.len() < min
        {
            // Accepted on purpose: refusing to start would break existing deployments.
            warn!(
                algorithm = ?algorithm,
                length = secret.len(),
                recommended = min,
                "Signing secret is shorter than recommended for this algorithm"
            );
        }

        Ok((
            EncodingKey::from_secret(secret),
            DecodingKey::from_secret(secret),
        ))
    }

    fn rsa_keys(
        algorithm: SigningAlgorithm,
        config: &SigningConfig,
    ) -> AuthResult<(EncodingKey, DecodingKey)> {
        let (Some(private_pem), Some(public_pem)) = (&config.private_key_pem, &config.public_key_pem)
        else {
            return Err(AuthError::Configuration(format!(
                "{:?} requires both a private and a public key",
                algorithm
            )));
        };

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.expose_secret().as_bytes())
            .map_err(|e| AuthError::Configuration(format!("invalid RSA private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| AuthError::Configuration(format!("invalid RSA public key: {e}")))?;

        Ok((encoding_key, decoding_key))
    }

    /// Key used to sign new tokens
    pub fn signing_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Key used to verify presented tokens
    pub fn verification_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn leeway(&self) -> Duration {
        self.leeway
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_64: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_hmac_context() {
        let config = SigningConfig::hmac(SigningAlgorithm::HS256, &SECRET_64[..32]);
        let ctx = SigningContext::new(&config).unwrap();
        assert_eq!(ctx.algorithm(), SigningAlgorithm::HS256);
        assert_eq!(ctx.access_ttl(), Duration::from_secs(900));
        assert_eq!(ctx.refresh_ttl(), Duration::from_secs(7 * 24 * 3600));
        assert_eq!(ctx.issuer(), "tessera");
    }

    #[test]
    fn test_short_secret_only_warns() {
        // HS512 wants 64 bytes; 32 is accepted.
        let config = SigningConfig::hmac(SigningAlgorithm::HS512, &SECRET_64[..32]);
        assert!(SigningContext::new(&config).is_ok());
    }

    #[test]
    fn test_missing_secret_rejected() {
        let config = SigningConfig {
            algorithm: SigningAlgorithm::HS256,
            ..Default::default()
        };
        let err = SigningContext::new(&config).unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));

        let config = SigningConfig::hmac(SigningAlgorithm::HS256, "");
        assert!(SigningContext::new(&config).is_err());
    }

    #[test]
    fn test_rsa_requires_both_keys() {
        let config = SigningConfig {
            algorithm: SigningAlgorithm::RS256,
            public_key_pem: Some("-----BEGIN PUBLIC KEY-----".into()),
            ..Default::default()
        };
        let err = SigningContext::new(&config).unwrap_err();
        assert!(err.to_string().contains("private and a public key"));
    }

    #[test]
    fn test_rsa_rejects_garbage_pem() {
        let config = SigningConfig::rsa(SigningAlgorithm::RS256, "not a pem", "also not a pem");
        assert!(matches!(
            SigningContext::new(&config),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let config = SigningConfig::hmac(SigningAlgorithm::HS256, SECRET_64);
        let ctx = SigningContext::new(&config).unwrap();
        let rendered = format!("{:?}", ctx);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(SECRET_64));
    }

    #[test]
    fn test_algorithm_families() {
        assert!(SigningAlgorithm::HS384.is_hmac());
        assert!(!SigningAlgorithm::RS512.is_hmac());
        assert_eq!(SigningAlgorithm::HS384.min_secret_len(), Some(48));
        assert_eq!(SigningAlgorithm::RS256.min_secret_len(), None);
        assert_eq!(SigningAlgorithm::RS384.as_jwt(), Algorithm::RS384);
    }
}
