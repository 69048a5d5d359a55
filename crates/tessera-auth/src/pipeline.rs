//! Per-request authentication pipeline
//!
//! [`AuthPipeline::process`] runs the security checks for one request, in
//! order:
//!
//! 1. Rate limit by client IP (when enabled)
//! 2. CSRF double-submit check for mutating methods
//! 3. Session: verify the signed cookie, validate (idle timeout, max age,
//!    fingerprint), or create a fresh session
//! 4. Bearer token extraction: `Authorization` header, then the access-token
//!    cookie, then the query parameter
//! 5. Token verification, producing a [`Principal`]
//!
//! Steps 1–3 can reject the request. A token that fails verification never
//! rejects: the request simply carries no principal and a [`TokenRejection`]
//! describing why, so downstream middleware decides whether authentication
//! is required.
//!
//! The [`tower`](crate::tower) module wraps the pipeline as middleware.

use std::sync::Arc;

use http::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, SET_COOKIE};
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue, Response};
use tracing::{debug, warn};

use crate::audit::{EventBus, SecurityEvent};
use crate::auth_metrics;
use crate::claims::{Claims, RotateOptions, TokenPair, TokenRequest, VerifyOptions};
use crate::config::{AuthConfig, PipelineConfig};
use crate::cookie::read_cookie;
use crate::csrf::{CsrfGuard, CsrfToken};
use crate::error::{AuthError, AuthResult};
use crate::fingerprint::Fingerprint;
use crate::rate_limit::{RateLimitKey, RateLimiter, client_ip};
use crate::revocation::build_revocation_store;
use crate::session::{ClientInfo, SessionCookie, SessionRecord, SessionStore, build_session_backend};
use crate::signing::SigningContext;
use crate::token::TokenService;

/// Verified identity attached to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub sub: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    /// `sid` claim of the token
    pub session_id: Option<String>,
    /// `jti` of the access token
    pub token_id: String,
    /// Access token expiry (unix seconds)
    pub expires_at: u64,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            sub: claims.sub,
            email: claims.email,
            roles: claims.roles,
            permissions: claims.permissions,
            session_id: claims.sid,
            token_id: claims.jti,
            expires_at: claims.exp,
        }
    }
}

/// Why a presented token did not produce a principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRejection {
    /// [`AuthError::code`] of the failure
    pub code: &'static str,
    pub error: AuthError,
}

/// Where the bearer token was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Header,
    Cookie,
    Query,
}

/// Headers to add to the response
#[derive(Debug, Clone, Default)]
pub struct ResponseDecorations {
    /// `Set-Cookie` values, appended in order
    pub set_cookies: Vec<String>,
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

impl ResponseDecorations {
    /// Append everything to `headers`
    pub fn apply(self, headers: &mut HeaderMap) {
        for cookie in self.set_cookies {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                headers.append(SET_COOKIE, value);
            }
        }
        for (name, value) in self.headers {
            headers.insert(name, value);
        }
    }
}

/// Result of a request that passed the pipeline
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub principal: Option<Principal>,
    pub session: Option<SessionRecord>,
    pub csrf_token: CsrfToken,
    pub token_rejection: Option<TokenRejection>,
    pub decorations: ResponseDecorations,
}

/// A request rejected by the pipeline
#[derive(Debug, Clone)]
pub struct PipelineRejection {
    pub error: AuthError,
    pub set_cookies: Vec<String>,
}

impl PipelineRejection {
    fn new(error: AuthError) -> Self {
        Self {
            error,
            set_cookies: Vec::new(),
        }
    }

    /// JSON `{error, code}` response with the matching status
    pub fn into_response<B: From<String>>(self) -> Response<B> {
        let mut response = Response::new(B::from(self.error.to_json_body()));
        *response.status_mut() = self.error.status();

        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let AuthError::RateLimited { retry_after_secs } = self.error {
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        for cookie in self.set_cookies {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                headers.append(SET_COOKIE, value);
            }
        }
        response
    }
}

/// Result of [`AuthPipeline::login`]
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Regenerated, authenticated session
    pub session: SessionRecord,
    pub tokens: TokenPair,
    /// `Set-Cookie` value for the new session id
    pub set_cookie: String,
}

/// Token, session and CSRF checks for one request at a time
#[derive(Debug, Clone)]
pub struct AuthPipeline {
    tokens: TokenService,
    sessions: SessionStore,
    session_cookie: Arc<SessionCookie>,
    csrf: CsrfGuard,
    rate_limiter: Arc<RateLimiter>,
    config: PipelineConfig,
    expiry_header: Option<HeaderName>,
    csrf_header: Option<HeaderName>,
    fingerprinting: bool,
    events: EventBus,
}

impl AuthPipeline {
    /// Build every component from configuration
    ///
    /// All components share one [`EventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] for invalid settings or key
    /// material, or [`AuthError::Storage`] if a Redis backend is unreachable.
    pub async fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        config.validate()?;

        let events = EventBus::default();
        let signing = Arc::new(SigningContext::new(&config.signing)?);
        let revocation = build_revocation_store(&config.store).await?;
        let tokens = TokenService::from_config(signing, revocation, config).with_events(events.clone());

        let backend = build_session_backend(&config.store).await?;
        let sessions = SessionStore::new(backend, &config.session)
            .with_store_timeout(config.store.timeout())
            .with_events(events.clone());

        Ok(Self::new(config, tokens, sessions))
    }

    /// Assemble a pipeline from prebuilt token and session components
    ///
    /// Security events are published on the token service's bus.
    pub fn new(config: &AuthConfig, tokens: TokenService, sessions: SessionStore) -> Self {
        let events = tokens.events().clone();
        let expiry_header = HeaderName::try_from(config.pipeline.near_expiry_header.as_str()).ok();
        let csrf_header = HeaderName::try_from(config.csrf.header_name.as_str()).ok();
        if expiry_header.is_none() || csrf_header.is_none() {
            warn!("Invalid response header name configured, header will not be sent");
        }

        Self {
            tokens,
            sessions,
            session_cookie: Arc::new(SessionCookie::new(&config.session)),
            csrf: CsrfGuard::new(&config.csrf),
            rate_limiter: Arc::new(RateLimiter::from_settings(&config.rate_limit)),
            config: config.pipeline.clone(),
            expiry_header,
            csrf_header,
            fingerprinting: config.fingerprinting,
            events,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn session_cookie(&self) -> &SessionCookie {
        &self.session_cookie
    }

    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn fingerprint(&self, headers: &HeaderMap) -> Option<String> {
        self.fingerprinting.then(|| Fingerprint::from_headers(headers))
    }

    /// Run the pipeline for one request
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineRejection`] for rate limiting (429), CSRF failure
    /// (403), an expired session (401, clears the session cookie) or a
    /// storage failure (503).
    pub async fn process(&self, parts: &Parts) -> Result<PipelineOutcome, PipelineRejection> {
        let headers = &parts.headers;
        let ip = client_ip(headers);
        let mut decorations = ResponseDecorations::default();

        self.check_rate_limit(ip.as_deref())?;
        let csrf_token = self.check_csrf(parts, &mut decorations)?;

        let fingerprint = self.fingerprint(headers);
        let session = self
            .resolve_session(headers, fingerprint.as_deref(), ip, &mut decorations)
            .await?;

        let (principal, token_rejection) = match extract_token(parts, &self.config) {
            None => (None, None),
            Some((token, source)) => {
                if source == TokenSource::Query {
                    warn!(path = %parts.uri.path(), "Access token passed in query string");
                }
                match self
                    .authenticate(&token, fingerprint, &session, &mut decorations)
                    .await
                {
                    Ok(principal) => (Some(principal), None),
                    Err(e) => {
                        debug!(code = e.code(), ?source, "Presented token rejected");
                        (
                            None,
                            Some(TokenRejection {
                                code: e.code(),
                                error: e,
                            }),
                        )
                    }
                }
            }
        };

        Ok(PipelineOutcome {
            principal,
            session: Some(session),
            csrf_token,
            token_rejection,
            decorations,
        })
    }

    fn check_rate_limit(&self, ip: Option<&str>) -> Result<(), PipelineRejection> {
        if !self.rate_limiter.is_enabled() {
            return Ok(());
        }
        let key = RateLimitKey::ip(ip.unwrap_or("unknown"));
        self.rate_limiter.check(&key).map_err(|info| {
            let retry_after_secs = info.retry_after_secs();
            self.events.publish(SecurityEvent::RateLimited {
                key: key.to_string(),
                retry_after_secs,
            });
            PipelineRejection::new(AuthError::RateLimited { retry_after_secs })
        })
    }

    fn check_csrf(
        &self,
        parts: &Parts,
        decorations: &mut ResponseDecorations,
    ) -> Result<CsrfToken, PipelineRejection> {
        let cookie_token = read_cookie(&parts.headers, self.csrf.cookie_name());
        let header_token = parts.headers.get(self.csrf.header_name());

        if let Err(e) = self.csrf.validate(&parts.method, cookie_token, header_token) {
            auth_metrics::record_csrf_rejection();
            self.events.publish(SecurityEvent::CsrfRejected {
                method: parts.method.to_string(),
                path: parts.uri.path().to_string(),
            });
            return Err(PipelineRejection::new(e));
        }

        let token = match cookie_token {
            Some(token) => token.to_string(),
            None => {
                let token = CsrfGuard::generate_token();
                decorations.set_cookies.push(self.csrf.cookie_header(&token));
                token
            }
        };
        if let (Some(name), Ok(value)) = (&self.csrf_header, HeaderValue::from_str(&token)) {
            decorations.headers.push((name.clone(), value));
        }
        Ok(CsrfToken(token))
    }

    async fn resolve_session(
        &self,
        headers: &HeaderMap,
        fingerprint: Option<&str>,
        ip: Option<String>,
        decorations: &mut ResponseDecorations,
    ) -> Result<SessionRecord, PipelineRejection> {
        let session_id = read_cookie(headers, self.session_cookie.name())
            .and_then(|value| self.session_cookie.verify(value));

        if let Some(id) = session_id {
            match self.sessions.validate(&id, fingerprint).await {
                Ok(record) => return Ok(record),
                Err(AuthError::SessionExpired) => {
                    return Err(PipelineRejection {
                        error: AuthError::SessionExpired,
                        set_cookies: vec![self.session_cookie.clear_cookie()],
                    });
                }
                Err(AuthError::SessionInvalid(_)) => {
                    debug!("Unknown session id in cookie, starting a new session");
                }
                Err(e) => return Err(PipelineRejection::new(e)),
            }
        }

        let record = self
            .sessions
            .create(ClientInfo {
                fingerprint: fingerprint.map(str::to_string),
                ip,
            })
            .await
            .map_err(PipelineRejection::new)?;
        decorations
            .set_cookies
            .push(self.session_cookie.set_cookie(&record.id));
        Ok(record)
    }

    async fn authenticate(
        &self,
        token: &str,
        fingerprint: Option<String>,
        session: &SessionRecord,
        decorations: &mut ResponseDecorations,
    ) -> AuthResult<Principal> {
        if !is_token_shaped(token) {
            return Err(AuthError::TokenInvalid("malformed token".into()));
        }

        let options = VerifyOptions {
            require_fingerprint_match: fingerprint.is_some(),
            fingerprint,
            ..VerifyOptions::access()
        };
        let verified = self.tokens.verify(token, &options).await?;

        if self.config.bind_tokens_to_session
            && let Some(sid) = verified.claims.sid.as_deref()
            && sid != session.id
        {
            warn!(sub = %verified.claims.sub, "Token presented with a different session");
            return Err(AuthError::SessionInvalid(
                "token bound to another session".into(),
            ));
        }

        if verified.is_near_expiry
            && let Some(name) = &self.expiry_header
        {
            decorations.headers.push((
                name.clone(),
                HeaderValue::from(verified.remaining.as_secs()),
            ));
        }
        Ok(Principal::from(verified.claims))
    }

    /// Authenticate the session: regenerate its id and issue tokens bound to it
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SessionInvalid`] if `session_id` does not exist,
    /// or a storage/signing error.
    pub async fn login(&self, session_id: &str, mut request: TokenRequest) -> AuthResult<LoginOutcome> {
        let session = self.sessions.login(session_id, request.sub.clone()).await?;

        request.session_id = Some(session.id.clone());
        if self.fingerprinting && request.fingerprint.is_none() {
            request.fingerprint = session.fingerprint.clone();
        }
        let tokens = self.tokens.issue(request)?;

        Ok(LoginOutcome {
            set_cookie: self.session_cookie.set_cookie(&session.id),
            session,
            tokens,
        })
    }

    /// Exchange a refresh token, re-deriving the fingerprint from `headers`
    ///
    /// # Errors
    ///
    /// See [`TokenService::rotate_refresh`].
    pub async fn refresh(&self, headers: &HeaderMap, refresh_token: &str) -> AuthResult<TokenPair> {
        let fingerprint = self.fingerprint(headers);
        let options = RotateOptions {
            require_fingerprint_match: fingerprint.is_some(),
            fingerprint,
            new_family: false,
        };
        self.tokens.rotate_refresh(refresh_token, &options).await
    }

    /// End the session and revoke the presented tokens
    ///
    /// Tokens that are already invalid are skipped. Returns the `Set-Cookie`
    /// value that clears the session cookie.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if a session or revocation write fails.
    pub async fn logout(
        &self,
        session_id: Option<&str>,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> AuthResult<String> {
        if let Some(id) = session_id {
            self.sessions.destroy(id).await?;
        }
        if let Some(token) = access_token {
            ignore_invalid(self.tokens.revoke(token).await)?;
        }
        if let Some(token) = refresh_token {
            ignore_invalid(self.tokens.revoke_refresh_family(token).await)?;
        }
        Ok(self.session_cookie.clear_cookie())
    }
}

fn ignore_invalid(result: AuthResult<()>) -> AuthResult<()> {
    match result {
        Err(AuthError::Storage(msg)) => Err(AuthError::Storage(msg)),
        Err(e) => {
            debug!(code = e.code(), "Skipping revocation of invalid token");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

/// Find the bearer token: `Authorization` header, cookie, then query string
pub fn extract_token(parts: &Parts, config: &PipelineConfig) -> Option<(String, TokenSource)> {
    if let Some(value) = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
        && let Some((scheme, token)) = value.trim().split_once(' ')
        && scheme.eq_ignore_ascii_case("bearer")
        && !token.trim().is_empty()
    {
        return Some((token.trim().to_string(), TokenSource::Header));
    }

    if let Some(name) = &config.access_token_cookie
        && let Some(token) = read_cookie(&parts.headers, name)
    {
        return Some((token.to_string(), TokenSource::Cookie));
    }

    if config.allow_query_token
        && let Some(query) = parts.uri.query()
    {
        return query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, value)| *key == config.query_param && !value.is_empty())
            .map(|(_, value)| (value.to_string(), TokenSource::Query));
    }

    None
}

/// Coarse compact-JWS shape check: three non-empty base64url segments
pub fn is_token_shaped(token: &str) -> bool {
    let mut segments = 0;
    for segment in token.split('.') {
        segments += 1;
        if segments > 3
            || segment.is_empty()
            || !segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return false;
        }
    }
    segments == 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;
    use proptest::prelude::*;

    fn parts(builder: http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_token_shape() {
        assert!(is_token_shaped("aGVhZGVy.cGF5bG9hZA.c2ln"));
        assert!(is_token_shaped("a-b.c_d.e"));
        assert!(!is_token_shaped("a.b"));
        assert!(!is_token_shaped("a.b.c.d"));
        assert!(!is_token_shaped("a..c"));
        assert!(!is_token_shaped("a.b.c="));
        assert!(!is_token_shaped(""));
    }

    #[test]
    fn test_extraction_order() {
        let config = PipelineConfig::default();

        let req = parts(
            Request::builder()
                .uri("/x?access_token=from-query")
                .header(AUTHORIZATION, "Bearer from-header")
                .header("cookie", "access_token=from-cookie"),
        );
        assert_eq!(
            extract_token(&req, &config),
            Some(("from-header".into(), TokenSource::Header))
        );

        let req = parts(
            Request::builder()
                .uri("/x?access_token=from-query")
                .header("cookie", "access_token=from-cookie"),
        );
        assert_eq!(
            extract_token(&req, &config),
            Some(("from-cookie".into(), TokenSource::Cookie))
        );

        let req = parts(Request::builder().uri("/x?a=1&access_token=from-query"));
        assert_eq!(
            extract_token(&req, &config),
            Some(("from-query".into(), TokenSource::Query))
        );
    }

    #[test]
    fn test_query_token_can_be_disabled() {
        let config = PipelineConfig {
            allow_query_token: false,
            ..Default::default()
        };
        let req = parts(Request::builder().uri("/x?access_token=t"));
        assert_eq!(extract_token(&req, &config), None);
    }

    #[test]
    fn test_non_bearer_schemes_ignored() {
        let config = PipelineConfig {
            access_token_cookie: None,
            allow_query_token: false,
            ..Default::default()
        };
        let req = parts(Request::builder().header(AUTHORIZATION, "Basic dXNlcjpwYXNz"));
        assert_eq!(extract_token(&req, &config), None);

        let req = parts(Request::builder().header(AUTHORIZATION, "bearer lower"));
        assert_eq!(
            extract_token(&req, &config),
            Some(("lower".into(), TokenSource::Header))
        );
    }

    #[test]
    fn test_principal_helpers() {
        let principal = Principal {
            sub: "u".into(),
            email: None,
            roles: vec!["admin".into()],
            permissions: vec!["posts:write".into()],
            session_id: None,
            token_id: "j".into(),
            expires_at: 0,
        };
        assert!(principal.has_role("admin"));
        assert!(!principal.has_role("user"));
        assert!(principal.has_permission("posts:write"));
    }

    #[test]
    fn test_rejection_response() {
        let response: Response<String> = PipelineRejection {
            error: AuthError::RateLimited {
                retry_after_secs: 7,
            },
            set_cookies: vec!["sid=; Max-Age=0".into()],
        }
        .into_response();

        assert_eq!(response.status(), http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "7");
        assert_eq!(response.headers()[SET_COOKIE], "sid=; Max-Age=0");
        assert!(response.body().contains("RATE_LIMITED"));
    }

    #[test]
    fn test_decorations_apply() {
        let mut headers = HeaderMap::new();
        ResponseDecorations {
            set_cookies: vec!["a=1".into(), "b=2".into()],
            headers: vec![(
                HeaderName::from_static("x-token-expiring"),
                HeaderValue::from(42u64),
            )],
        }
        .apply(&mut headers);
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 2);
        assert_eq!(headers["x-token-expiring"], "42");
    }

    proptest! {
        #[test]
        fn prop_shape_check_never_panics(s in ".*") {
            let _ = is_token_shaped(&s);
        }

        #[test]
        fn prop_three_segments_accepted(
            a in "[A-Za-z0-9_-]{1,20}",
            b in "[A-Za-z0-9_-]{1,20}",
            c in "[A-Za-z0-9_-]{1,20}",
        ) {
            let token = format!("{a}.{b}.{c}");
            prop_assert!(is_token_shaped(&token));
        }
    }
}
