//! Configuration types for tokens, sessions, CSRF and storage backends
//!
//! Every section has serde defaults, so a minimal configuration only needs
//! the signing secret:
//!
//! ```toml
//! [signing]
//! algorithm = "HS256"
//! secret = "a-secret-of-at-least-thirty-two-bytes!!"
//!
//! [session]
//! secret = "another-secret-used-to-sign-session-cookies"
//! ```
//!
//! Files are loaded with [`AuthConfig::from_file`]. Environment variables
//! prefixed with `TESSERA__` override file values, using `__` as the nesting
//! separator (`TESSERA__SESSION__IDLE_TIMEOUT_SECS=600`).

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{AuthError, AuthResult};
use crate::signing::SigningAlgorithm;

/// Default environment prefix for overrides
pub const ENV_PREFIX: &str = "TESSERA";

/// Complete auth configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub csrf: CsrfConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Bind tokens and sessions to a hash of client signals
    #[serde(default = "default_true")]
    pub fingerprinting: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing: SigningConfig::default(),
            tokens: TokenConfig::default(),
            session: SessionConfig::default(),
            csrf: CsrfConfig::default(),
            store: StoreConfig::default(),
            rate_limit: RateLimitSettings::default(),
            pipeline: PipelineConfig::default(),
            fingerprinting: true,
        }
    }
}

/// Key material, algorithm and token lifetimes
#[derive(Debug, Clone, Deserialize)]
pub struct SigningConfig {
    #[serde(default)]
    pub algorithm: SigningAlgorithm,
    /// Shared secret for HS* algorithms
    #[serde(default)]
    pub secret: Option<SecretString>,
    /// PEM private key for RS* algorithms
    #[serde(default)]
    pub private_key_pem: Option<SecretString>,
    /// PEM public key for RS* algorithms
    #[serde(default)]
    pub public_key_pem: Option<String>,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,
    /// Clock skew tolerance applied to `exp` and `nbf`
    #[serde(default)]
    pub leeway_secs: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::default(),
            secret: None,
            private_key_pem: None,
            public_key_pem: None,
            issuer: default_issuer(),
            audience: default_audience(),
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
            leeway_secs: 0,
        }
    }
}

impl SigningConfig {
    /// HMAC configuration with default lifetimes
    pub fn hmac(algorithm: SigningAlgorithm, secret: impl Into<String>) -> Self {
        Self {
            algorithm,
            secret: Some(SecretString::new(secret.into())),
            ..Default::default()
        }
    }

    /// RSA configuration with default lifetimes
    pub fn rsa(
        algorithm: SigningAlgorithm,
        private_key_pem: impl Into<String>,
        public_key_pem: impl Into<String>,
    ) -> Self {
        Self {
            algorithm,
            private_key_pem: Some(SecretString::new(private_key_pem.into())),
            public_key_pem: Some(public_key_pem.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    #[must_use]
    pub fn access_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl_secs = ttl.as_secs();
        self
    }

    #[must_use]
    pub fn refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl_secs = ttl.as_secs();
        self
    }

    #[must_use]
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.leeway_secs = leeway.as_secs();
        self
    }
}

/// Token lifecycle policy
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Remaining lifetime at or below which a token counts as near expiry
    #[serde(default = "default_near_expiry")]
    pub near_expiry_threshold_secs: u64,
    /// Revoke the whole family when a rotated refresh token is presented again
    #[serde(default)]
    pub revoke_family_on_reuse: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            near_expiry_threshold_secs: default_near_expiry(),
            revoke_family_on_reuse: false,
        }
    }
}

/// `SameSite` cookie attribute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SameSite {
    #[default]
    #[serde(alias = "strict")]
    Strict,
    #[serde(alias = "lax")]
    Lax,
    #[serde(alias = "none")]
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Session cookie and lifetime settings
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Secret used to sign session cookie values
    #[serde(default)]
    pub secret: Option<SecretString>,
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,
    /// Absolute session lifetime, also used as the backend TTL
    #[serde(default = "default_session_max_age")]
    pub max_age_secs: u64,
    /// Maximum gap between requests
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default)]
    pub same_site: SameSite,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: None,
            cookie_name: default_session_cookie(),
            max_age_secs: default_session_max_age(),
            idle_timeout_secs: default_idle_timeout(),
            secure: true,
            same_site: SameSite::default(),
        }
    }
}

impl SessionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Double-submit CSRF settings
#[derive(Debug, Clone, Deserialize)]
pub struct CsrfConfig {
    #[serde(default = "default_csrf_cookie")]
    pub cookie_name: String,
    #[serde(default = "default_csrf_header")]
    pub header_name: String,
    #[serde(default = "default_true")]
    pub secure: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_csrf_cookie(),
            header_name: default_csrf_header(),
            secure: true,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreBackendConfig {
    /// In-process storage (single node, lost on restart)
    #[default]
    Memory,
    /// Redis storage (requires the `redis-storage` feature)
    Redis {
        /// Redis connection URL
        url: String,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
    },
}

/// Store settings shared by revocation and session storage
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackendConfig,
    /// Upper bound on a single store operation
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendConfig::default(),
            timeout_ms: default_store_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Fixed-window admission control
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Requests allowed per window and client
    #[serde(default = "default_rate_requests")]
    pub requests: u32,
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            requests: default_rate_requests(),
            window_secs: default_rate_window(),
        }
    }
}

/// Per-request pipeline behavior
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Cookie consulted when no `Authorization` header is present
    #[serde(default = "default_access_cookie")]
    pub access_token_cookie: Option<String>,
    /// Accept `?access_token=` as a last resort (logged)
    #[serde(default = "default_true")]
    pub allow_query_token: bool,
    #[serde(default = "default_query_param")]
    pub query_param: String,
    /// Drop principals whose `sid` claim differs from the request's session
    #[serde(default)]
    pub bind_tokens_to_session: bool,
    /// Response header carrying remaining seconds for near-expiry tokens
    #[serde(default = "default_expiry_header")]
    pub near_expiry_header: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            access_token_cookie: default_access_cookie(),
            allow_query_token: true,
            query_param: default_query_param(),
            bind_tokens_to_session: false,
            near_expiry_header: default_expiry_header(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_issuer() -> String {
    "tessera".to_string()
}
fn default_audience() -> String {
    "tessera-app".to_string()
}
fn default_access_ttl() -> u64 {
    15 * 60
}
fn default_refresh_ttl() -> u64 {
    7 * 24 * 60 * 60
}
fn default_near_expiry() -> u64 {
    5 * 60
}
fn default_session_cookie() -> String {
    "sid".to_string()
}
fn default_session_max_age() -> u64 {
    24 * 60 * 60
}
fn default_idle_timeout() -> u64 {
    30 * 60
}
fn default_csrf_cookie() -> String {
    "csrf_token".to_string()
}
fn default_csrf_header() -> String {
    "x-csrf-token".to_string()
}
fn default_key_prefix() -> String {
    "tessera".to_string()
}
fn default_store_timeout() -> u64 {
    2000
}
fn default_rate_requests() -> u32 {
    100
}
fn default_rate_window() -> u64 {
    60
}
fn default_access_cookie() -> Option<String> {
    Some("access_token".to_string())
}
fn default_query_param() -> String {
    "access_token".to_string()
}
fn default_expiry_header() -> String {
    "x-token-expiring".to_string()
}

impl AuthConfig {
    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// `TESSERA__*` environment variables override file settings.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the file is missing, has an
    /// unsupported extension, fails to parse, or fails [`validate`](Self::validate).
    pub fn from_file(path: impl AsRef<Path>) -> AuthResult<Self> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(AuthError::Configuration(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => {
                return Err(AuthError::Configuration(
                    "unsupported configuration format, use .toml, .yaml, .yml or .json".into(),
                ));
            }
        };
        let path_str = path.to_str().ok_or_else(|| {
            AuthError::Configuration("configuration path is not valid UTF-8".into())
        })?;

        let config = Config::builder()
            .add_source(File::new(path_str, format))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Load configuration from `TESSERA__*` environment variables only
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] on parse or validation failure.
    pub fn from_env() -> AuthResult<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject settings that cannot work at runtime
    ///
    /// Key material is checked separately by
    /// [`SigningContext::new`](crate::signing::SigningContext::new).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] describing the first bad setting.
    pub fn validate(&self) -> AuthResult<()> {
        if self.signing.access_token_ttl_secs == 0 || self.signing.refresh_token_ttl_secs == 0 {
            return Err(AuthError::Configuration(
                "token lifetimes must be greater than zero".into(),
            ));
        }
        if self.session.max_age_secs == 0 || self.session.idle_timeout_secs == 0 {
            return Err(AuthError::Configuration(
                "session max age and idle timeout must be greater than zero".into(),
            ));
        }
        if self.session.idle_timeout_secs > self.session.max_age_secs {
            return Err(AuthError::Configuration(
                "session idle timeout cannot exceed session max age".into(),
            ));
        }
        if let Some(secret) = &self.session.secret {
            use secrecy::ExposeSecret;
            if secret.expose_secret().is_empty() {
                return Err(AuthError::Configuration("session secret is empty".into()));
            }
        }
        if self.rate_limit.enabled
            && (self.rate_limit.requests == 0 || self.rate_limit.window_secs == 0)
        {
            return Err(AuthError::Configuration(
                "rate limit requests and window must be greater than zero".into(),
            ));
        }
        if self.session.same_site == SameSite::None && !self.session.secure {
            tracing::warn!("SameSite=None session cookies without Secure are rejected by browsers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.signing.access_token_ttl_secs, 900);
        assert_eq!(config.signing.refresh_token_ttl_secs, 604_800);
        assert_eq!(config.session.cookie_name, "sid");
        assert_eq!(config.session.same_site, SameSite::Strict);
        assert!(config.session.secure);
        assert_eq!(config.csrf.header_name, "x-csrf-token");
        assert_eq!(config.store.backend, StoreBackendConfig::Memory);
        assert!(!config.rate_limit.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
fingerprinting = false

[signing]
algorithm = "HS384"
secret = "0123456789abcdef0123456789abcdef0123456789abcdef"
access_token_ttl_secs = 300

[session]
idle_timeout_secs = 120
same_site = "lax"

[store.backend]
type = "redis"
url = "redis://127.0.0.1:6379"
"#
        )
        .unwrap();

        let config = AuthConfig::from_file(file.path()).unwrap();
        assert_eq!(config.signing.algorithm, SigningAlgorithm::HS384);
        assert_eq!(config.signing.access_token_ttl_secs, 300);
        assert_eq!(config.session.idle_timeout_secs, 120);
        assert_eq!(config.session.same_site, SameSite::Lax);
        assert!(!config.fingerprinting);
        assert_eq!(
            config.store.backend,
            StoreBackendConfig::Redis {
                url: "redis://127.0.0.1:6379".into(),
                key_prefix: "tessera".into(),
            }
        );
    }

    #[test]
    fn test_missing_file() {
        let err = AuthConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_idle_timeout_exceeding_max_age_rejected() {
        let mut config = AuthConfig::default();
        config.session.idle_timeout_secs = config.session.max_age_secs + 1;
        assert!(matches!(
            config.validate(),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_rate_limit_rejected_only_when_enabled() {
        let mut config = AuthConfig::default();
        config.rate_limit.requests = 0;
        assert!(config.validate().is_ok());
        config.rate_limit.enabled = true;
        assert!(config.validate().is_err());
    }
}
