//! Token issuance, verification, rotation and revocation
//!
//! [`TokenService`] signs access/refresh pairs with a shared
//! [`SigningContext`] and consults a [`RevocationStore`] on every
//! verification.
//!
//! ## Refresh token lifecycle
//!
//! ```text
//! issued ──► active ──► rotated   (rotate_refresh; old jti revoked)
//!               │──────► revoked   (revoke / revoke_family)
//!               └──────► expired   (exp passed)
//! ```
//!
//! `rotated`, `revoked` and `expired` are terminal. Rotation revokes the old
//! `jti` through an atomic insert before the new pair is signed, so when the
//! same refresh token is presented twice concurrently only one caller gets a
//! new pair.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera_auth::claims::{TokenRequest, VerifyOptions};
//! use tessera_auth::config::SigningConfig;
//! use tessera_auth::revocation::MemoryRevocationStore;
//! use tessera_auth::signing::{SigningAlgorithm, SigningContext};
//! use tessera_auth::token::TokenService;
//!
//! # async fn example() -> tessera_auth::error::AuthResult<()> {
//! let signing = SigningContext::new(&SigningConfig::hmac(
//!     SigningAlgorithm::HS256,
//!     "0123456789abcdef0123456789abcdef",
//! ))?;
//! let tokens = TokenService::new(Arc::new(signing), Arc::new(MemoryRevocationStore::new()));
//!
//! let pair = tokens.issue(TokenRequest::new("user-1"))?;
//! let verified = tokens.verify(&pair.access_token, &VerifyOptions::access()).await?;
//! assert_eq!(verified.claims.sub, "user-1");
//!
//! let rotated = tokens.rotate_refresh(&pair.refresh_token, &Default::default()).await?;
//! assert!(tokens.rotate_refresh(&pair.refresh_token, &Default::default()).await.is_err());
//! # let _ = rotated;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Header, Validation};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::audit::{EventBus, SecurityEvent};
use crate::auth_metrics;
use crate::claims::{
    Claims, RotateOptions, TokenPair, TokenRequest, TokenType, VerifiedToken, VerifyOptions,
};
use crate::config::{AuthConfig, TokenConfig};
use crate::error::{AuthError, AuthResult};
use crate::fingerprint::fingerprints_match;
use crate::revocation::RevocationStore;
use crate::signing::SigningContext;
use crate::store::bounded;

/// Revocation state of a decoded token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Revocation {
    Active,
    Revoked,
    FamilyRevoked,
    /// The store could not answer; treated as revoked
    Unavailable,
}

/// Issues and verifies bearer tokens
#[derive(Debug, Clone)]
pub struct TokenService {
    signing: Arc<SigningContext>,
    revocation: Arc<dyn RevocationStore>,
    near_expiry_threshold: Duration,
    revoke_family_on_reuse: bool,
    store_timeout: Duration,
    events: EventBus,
}

impl TokenService {
    /// Create a service with default token policy
    pub fn new(signing: Arc<SigningContext>, revocation: Arc<dyn RevocationStore>) -> Self {
        let defaults = TokenConfig::default();
        Self {
            signing,
            revocation,
            near_expiry_threshold: Duration::from_secs(defaults.near_expiry_threshold_secs),
            revoke_family_on_reuse: defaults.revoke_family_on_reuse,
            store_timeout: crate::config::StoreConfig::default().timeout(),
            events: EventBus::default(),
        }
    }

    /// Create a service using the token and store sections of `config`
    pub fn from_config(
        signing: Arc<SigningContext>,
        revocation: Arc<dyn RevocationStore>,
        config: &AuthConfig,
    ) -> Self {
        Self::new(signing, revocation)
            .with_token_config(&config.tokens)
            .with_store_timeout(config.store.timeout())
    }

    #[must_use]
    pub fn with_token_config(mut self, config: &TokenConfig) -> Self {
        self.near_expiry_threshold = Duration::from_secs(config.near_expiry_threshold_secs);
        self.revoke_family_on_reuse = config.revoke_family_on_reuse;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Publish security events on `events` instead of a private bus
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn access_ttl(&self) -> Duration {
        self.signing.access_ttl()
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.signing.refresh_ttl()
    }

    /// Store used for revocation checks, for logout and admin hooks
    pub fn revocation_store(&self) -> &Arc<dyn RevocationStore> {
        &self.revocation
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Issue a new access/refresh pair in a fresh token family
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Signing`] if the claims cannot be signed.
    pub fn issue(&self, request: TokenRequest) -> AuthResult<TokenPair> {
        let family = Uuid::new_v4().to_string();
        let (pair, access_jti, refresh_jti) = self.issue_in_family(&request, &family)?;

        auth_metrics::record_token_issued("issue");
        self.events.publish(SecurityEvent::TokenIssued {
            subject: request.sub,
            family,
            access_jti,
            refresh_jti,
        });
        Ok(pair)
    }

    fn issue_in_family(
        &self,
        request: &TokenRequest,
        family: &str,
    ) -> AuthResult<(TokenPair, String, String)> {
        let now = jsonwebtoken::get_current_timestamp();
        let access = self.build_claims(request, family, TokenType::Access, now);
        let refresh = self.build_claims(request, family, TokenType::Refresh, now);

        let pair = TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            expires_at: access.exp,
            token_type: TokenPair::BEARER.to_string(),
        };

        debug!(
            sub = %request.sub,
            family = %family,
            access_jti = %access.jti,
            refresh_jti = %refresh.jti,
            "Issued token pair"
        );
        Ok((pair, access.jti, refresh.jti))
    }

    fn build_claims(
        &self,
        request: &TokenRequest,
        family: &str,
        token_type: TokenType,
        now: u64,
    ) -> Claims {
        let ttl = match token_type {
            TokenType::Access => self.signing.access_ttl(),
            TokenType::Refresh => self.signing.refresh_ttl(),
        };
        Claims {
            sub: request.sub.clone(),
            email: request.email.clone(),
            roles: request.roles.clone(),
            permissions: request.permissions.clone(),
            iat: now,
            exp: now + ttl.as_secs(),
            nbf: now,
            jti: Uuid::new_v4().to_string(),
            iss: self.signing.issuer().to_string(),
            aud: self.signing.audience().to_string(),
            token_type,
            token_family: Some(family.to_string()),
            fingerprint: request.fingerprint.clone(),
            sid: request.session_id.clone(),
            token_version: request.token_version,
        }
    }

    fn sign(&self, claims: &Claims) -> AuthResult<String> {
        let header = Header::new(self.signing.algorithm().as_jwt());
        jsonwebtoken::encode(&header, claims, self.signing.signing_key())
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(self.signing.algorithm().as_jwt());
        validation.set_issuer(&[self.signing.issuer()]);
        validation.set_audience(&[self.signing.audience()]);
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss", "aud"]);
        validation.validate_exp = validate_exp;
        validation.validate_nbf = true;
        validation.leeway = self.signing.leeway().as_secs();
        validation
    }

    /// Check signature, algorithm, `exp`, `nbf`, `iss` and `aud`
    fn decode(&self, token: &str, validate_exp: bool) -> AuthResult<Claims> {
        let data = jsonwebtoken::decode::<Claims>(
            token,
            self.signing.verification_key(),
            &self.validation(validate_exp),
        )?;
        Ok(data.claims)
    }

    async fn revocation_of(&self, claims: &Claims) -> Revocation {
        let revoked = bounded(
            "is_revoked",
            self.store_timeout,
            self.revocation.is_revoked(&claims.jti),
        )
        .await;
        match revoked {
            Ok(true) => return Revocation::Revoked,
            Ok(false) => {}
            Err(e) => {
                error!(jti = %claims.jti, error = %e, "Revocation check failed, rejecting token");
                return Revocation::Unavailable;
            }
        }

        // Family revocation only gates refresh tokens
        if claims.token_type != TokenType::Refresh {
            return Revocation::Active;
        }
        let Some(family) = claims.token_family.as_deref() else {
            return Revocation::Active;
        };
        match bounded(
            "is_family_revoked",
            self.store_timeout,
            self.revocation.is_family_revoked(family),
        )
        .await
        {
            Ok(true) => Revocation::FamilyRevoked,
            Ok(false) => Revocation::Active,
            Err(e) => {
                error!(family = %family, error = %e, "Family revocation check failed, rejecting token");
                Revocation::Unavailable
            }
        }
    }

    fn check_type(claims: &Claims, options: &VerifyOptions) -> AuthResult<()> {
        match options.expected_type {
            Some(expected) if expected != claims.token_type => Err(AuthError::InvalidTokenType {
                expected,
                actual: claims.token_type,
            }),
            _ => Ok(()),
        }
    }

    fn check_bindings(&self, claims: &Claims, options: &VerifyOptions) -> AuthResult<()> {
        if let Some(min) = options.min_token_version
            && claims.token_version.unwrap_or(0) < min
        {
            debug!(jti = %claims.jti, min, "Token version below minimum");
            return Err(AuthError::TokenRevoked);
        }

        if options.require_fingerprint_match
            && let Some(bound) = claims.fingerprint.as_deref()
        {
            let matches = options
                .fingerprint
                .as_deref()
                .is_some_and(|presented| fingerprints_match(bound, presented));
            if !matches {
                warn!(sub = %claims.sub, jti = %claims.jti, "Token fingerprint mismatch");
                self.events.publish(SecurityEvent::FingerprintMismatch {
                    scope: "token".to_string(),
                    subject: Some(claims.sub.clone()),
                });
                return Err(AuthError::FingerprintMismatch);
            }
        }
        Ok(())
    }

    fn verified(&self, claims: Claims) -> VerifiedToken {
        let now = jsonwebtoken::get_current_timestamp();
        let remaining = claims.remaining_secs(now);
        VerifiedToken {
            is_near_expiry: remaining <= self.near_expiry_threshold.as_secs(),
            remaining: Duration::from_secs(remaining),
            claims,
        }
    }

    /// Verify a presented token
    ///
    /// Checks run in order: signature and registered claims, revocation
    /// (id, then family for refresh tokens), expected type, minimum version,
    /// fingerprint.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenExpired`] when `exp` has passed
    /// - [`AuthError::TokenInvalid`] for malformed tokens, bad signatures,
    ///   wrong issuer/audience or a future `nbf`
    /// - [`AuthError::TokenRevoked`] when the `jti` is revoked, the version is
    ///   too old or the revocation store is unavailable
    /// - [`AuthError::TokenFamilyRevoked`] when the refresh family is revoked
    /// - [`AuthError::InvalidTokenType`] when the type differs from `expected_type`
    /// - [`AuthError::FingerprintMismatch`] when the fingerprint binding fails
    pub async fn verify(&self, token: &str, options: &VerifyOptions) -> AuthResult<VerifiedToken> {
        let result = self.verify_inner(token, options).await;
        auth_metrics::record_verification(match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        });
        result
    }

    async fn verify_inner(&self, token: &str, options: &VerifyOptions) -> AuthResult<VerifiedToken> {
        let claims = self.decode(token, true)?;

        match self.revocation_of(&claims).await {
            Revocation::Active => {}
            Revocation::Revoked | Revocation::Unavailable => return Err(AuthError::TokenRevoked),
            Revocation::FamilyRevoked => return Err(AuthError::TokenFamilyRevoked),
        }

        Self::check_type(&claims, options)?;
        self.check_bindings(&claims, options)?;
        Ok(self.verified(claims))
    }

    /// Exchange a refresh token for a new pair
    ///
    /// The old token is revoked before the new pair is signed. Presenting an
    /// already-rotated token is reported as [`SecurityEvent::RefreshReuseDetected`]
    /// and, when `revoke_family_on_reuse` is set, revokes the whole family.
    ///
    /// # Errors
    ///
    /// Same as [`verify`](Self::verify) with `expected_type = refresh`, plus
    /// [`AuthError::TokenRevoked`] when another caller rotated the token first
    /// and [`AuthError::Storage`] when the old token cannot be revoked.
    pub async fn rotate_refresh(
        &self,
        refresh_token: &str,
        options: &RotateOptions,
    ) -> AuthResult<TokenPair> {
        let claims = self.decode(refresh_token, true)?;

        let verify_options = VerifyOptions {
            fingerprint: options.fingerprint.clone(),
            require_fingerprint_match: options.require_fingerprint_match,
            expected_type: Some(TokenType::Refresh),
            min_token_version: None,
        };
        Self::check_type(&claims, &verify_options)?;

        match self.revocation_of(&claims).await {
            Revocation::Active => {}
            Revocation::Revoked => return Err(self.on_refresh_reuse(&claims).await),
            Revocation::Unavailable => return Err(AuthError::TokenRevoked),
            Revocation::FamilyRevoked => return Err(AuthError::TokenFamilyRevoked),
        }
        self.check_bindings(&claims, &verify_options)?;

        let now = jsonwebtoken::get_current_timestamp();
        let ttl = Duration::from_secs(claims.remaining_secs(now));
        let won = bounded(
            "revoke",
            self.store_timeout,
            self.revocation.revoke(&claims.jti, ttl),
        )
        .await?;
        if !won {
            warn!(
                sub = %claims.sub,
                jti = %claims.jti,
                "Concurrent rotation of the same refresh token lost the race"
            );
            return Err(AuthError::TokenRevoked);
        }
        auth_metrics::record_revocation("token");

        let mut request = TokenRequest::from_claims(&claims);
        if let Some(fingerprint) = &options.fingerprint {
            request.fingerprint = Some(fingerprint.clone());
        }
        let family = match (&claims.token_family, options.new_family) {
            (Some(family), false) => family.clone(),
            _ => Uuid::new_v4().to_string(),
        };

        let (pair, _, new_refresh_jti) = self.issue_in_family(&request, &family)?;

        auth_metrics::record_token_issued("rotate");
        self.events.publish(SecurityEvent::TokenRotated {
            subject: claims.sub.clone(),
            family,
            old_jti: claims.jti.clone(),
            new_refresh_jti,
        });
        Ok(pair)
    }

    async fn on_refresh_reuse(&self, claims: &Claims) -> AuthError {
        let mut family_revoked = false;
        if self.revoke_family_on_reuse
            && let Some(family) = claims.token_family.as_deref()
        {
            match self.revoke_family_for(family, "refresh token reuse").await {
                Ok(()) => family_revoked = true,
                Err(e) => error!(family = %family, error = %e, "Failed to revoke family after reuse"),
            }
        }

        warn!(
            sub = %claims.sub,
            jti = %claims.jti,
            family_revoked,
            "Revoked refresh token presented again"
        );
        self.events.publish(SecurityEvent::RefreshReuseDetected {
            subject: claims.sub.clone(),
            family: claims.token_family.clone(),
            jti: claims.jti.clone(),
            family_revoked,
        });
        AuthError::TokenRevoked
    }

    /// Revoke a single token until it would have expired anyway
    ///
    /// The signature must be valid, but expiry is not checked; revoking an
    /// already-expired token is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenInvalid`] if the token does not verify, or
    /// [`AuthError::Storage`] if the revocation cannot be written.
    pub async fn revoke(&self, token: &str) -> AuthResult<()> {
        let claims = self.decode(token, false)?;
        let now = jsonwebtoken::get_current_timestamp();
        if claims.exp <= now {
            debug!(jti = %claims.jti, "Token already expired, nothing to revoke");
            return Ok(());
        }

        let ttl = Duration::from_secs(claims.exp - now);
        bounded(
            "revoke",
            self.store_timeout,
            self.revocation.revoke(&claims.jti, ttl),
        )
        .await?;
        auth_metrics::record_revocation("token");

        self.events.publish(SecurityEvent::TokenRevoked {
            jti: claims.jti,
            subject: claims.sub,
        });
        Ok(())
    }

    /// Revoke every refresh token issued under `family_id`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the revocation cannot be written.
    pub async fn revoke_family(&self, family_id: &str) -> AuthResult<()> {
        self.revoke_family_for(family_id, "explicit").await
    }

    /// Revoke a refresh token together with its whole family (logout)
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenInvalid`] if the token does not verify,
    /// [`AuthError::InvalidTokenType`] for access tokens, or
    /// [`AuthError::Storage`] if a revocation cannot be written.
    pub async fn revoke_refresh_family(&self, refresh_token: &str) -> AuthResult<()> {
        let claims = self.decode(refresh_token, false)?;
        Self::check_type(&claims, &VerifyOptions::refresh())?;

        self.revoke(refresh_token).await?;
        if let Some(family) = claims.token_family.as_deref() {
            self.revoke_family_for(family, "logout").await?;
        }
        Ok(())
    }

    async fn revoke_family_for(&self, family_id: &str, reason: &str) -> AuthResult<()> {
        bounded(
            "revoke_family",
            self.store_timeout,
            self.revocation.revoke_family(family_id, self.signing.refresh_ttl()),
        )
        .await?;
        auth_metrics::record_revocation("family");

        self.events.publish(SecurityEvent::FamilyRevoked {
            family: family_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}
