//! Double-submit CSRF protection
//!
//! The guard hands each client a random token in an `HttpOnly`,
//! `SameSite=Strict` cookie and mirrors it in a response header. Mutating
//! requests (POST, PUT, PATCH, DELETE) must echo the token back in the
//! request header; a cross-site attacker can make the browser send the
//! cookie but cannot read it to forge the header.
//!
//! Tokens are compared in constant time. When the lengths differ the guard
//! still performs a full-length comparison against a placeholder, so the
//! response time does not reveal the expected length.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::{HeaderValue, Method};
use subtle::ConstantTimeEq;

use crate::config::{CsrfConfig, SameSite};
use crate::cookie::{CookieAttributes, set_cookie};
use crate::error::{AuthError, AuthResult};

/// Random bytes per token
pub const TOKEN_BYTES: usize = 32;

/// A CSRF token, available to handlers through request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl CsrfToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Double-submit CSRF guard
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    cookie_name: String,
    header_name: String,
    secure: bool,
}

impl CsrfGuard {
    pub fn new(config: &CsrfConfig) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            header_name: config.header_name.to_ascii_lowercase(),
            secure: config.secure,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// 32 random bytes, base64url without padding
    pub fn generate_token() -> String {
        URL_SAFE_NO_PAD.encode(rand::random::<[u8; TOKEN_BYTES]>())
    }

    /// Whether `method` changes state and must carry a token
    pub fn requires_check(method: &Method) -> bool {
        matches!(
            *method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    /// Constant-time token comparison
    pub fn is_valid_token(expected: &str, presented: &str) -> bool {
        let expected = expected.as_bytes();
        let presented = presented.as_bytes();

        if expected.len() != presented.len() {
            // Burn the same work as a real comparison before failing.
            let placeholder = vec![0u8; expected.len()];
            let _ = expected.ct_eq(&placeholder);
            return false;
        }
        expected.ct_eq(presented).into()
    }

    /// Check a request against the double-submit rule
    ///
    /// Safe methods always pass.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CsrfInvalid`] for a mutating request when the
    /// cookie is absent, the header is missing or not visible ASCII, or the
    /// two differ.
    pub fn validate(
        &self,
        method: &Method,
        cookie_token: Option<&str>,
        header_token: Option<&HeaderValue>,
    ) -> AuthResult<()> {
        if !Self::requires_check(method) {
            return Ok(());
        }

        let expected = cookie_token.ok_or(AuthError::CsrfInvalid)?;
        let presented = header_token
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::CsrfInvalid)?;

        if Self::is_valid_token(expected, presented) {
            Ok(())
        } else {
            Err(AuthError::CsrfInvalid)
        }
    }

    /// `Set-Cookie` value carrying `token`
    pub fn cookie_header(&self, token: &str) -> String {
        set_cookie(
            &self.cookie_name,
            token,
            &CookieAttributes {
                secure: self.secure,
                same_site: SameSite::Strict,
                max_age: None,
            },
        )
    }
}

impl Default for CsrfGuard {
    fn default() -> Self {
        Self::new(&CsrfConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generated_tokens() {
        let a = CsrfGuard::generate_token();
        let b = CsrfGuard::generate_token();
        assert_ne!(a, b);
        // 32 bytes -> 43 base64url chars without padding
        assert_eq!(a.len(), 43);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_requires_check() {
        assert!(CsrfGuard::requires_check(&Method::POST));
        assert!(CsrfGuard::requires_check(&Method::PUT));
        assert!(CsrfGuard::requires_check(&Method::PATCH));
        assert!(CsrfGuard::requires_check(&Method::DELETE));
        assert!(!CsrfGuard::requires_check(&Method::GET));
        assert!(!CsrfGuard::requires_check(&Method::HEAD));
        assert!(!CsrfGuard::requires_check(&Method::OPTIONS));
    }

    #[test]
    fn test_validate_double_submit() {
        let guard = CsrfGuard::default();
        let token = CsrfGuard::generate_token();
        let header = HeaderValue::from_str(&token).unwrap();

        assert!(guard.validate(&Method::POST, Some(&token), Some(&header)).is_ok());
        assert_eq!(
            guard.validate(&Method::POST, Some(&token), None),
            Err(AuthError::CsrfInvalid)
        );
        assert_eq!(
            guard.validate(&Method::POST, None, Some(&header)),
            Err(AuthError::CsrfInvalid)
        );

        let other = HeaderValue::from_str(&CsrfGuard::generate_token()).unwrap();
        assert_eq!(
            guard.validate(&Method::DELETE, Some(&token), Some(&other)),
            Err(AuthError::CsrfInvalid)
        );
    }

    #[test]
    fn test_safe_methods_skip_check() {
        let guard = CsrfGuard::default();
        assert!(guard.validate(&Method::GET, None, None).is_ok());
    }

    #[test]
    fn test_non_ascii_header_rejected() {
        let guard = CsrfGuard::default();
        let header = HeaderValue::from_bytes(b"\xfftoken").unwrap();
        assert_eq!(
            guard.validate(&Method::POST, Some("token"), Some(&header)),
            Err(AuthError::CsrfInvalid)
        );
    }

    #[test]
    fn test_length_mismatch() {
        assert!(!CsrfGuard::is_valid_token("abc", "abcd"));
        assert!(!CsrfGuard::is_valid_token("", "a"));
        assert!(CsrfGuard::is_valid_token("", ""));
    }

    #[test]
    fn test_cookie_header() {
        let guard = CsrfGuard::default();
        assert_eq!(
            guard.cookie_header("tok"),
            "csrf_token=tok; Path=/; HttpOnly; SameSite=Strict; Secure"
        );

        let guard = CsrfGuard::new(&CsrfConfig {
            secure: false,
            ..Default::default()
        });
        assert_eq!(
            guard.cookie_header("tok"),
            "csrf_token=tok; Path=/; HttpOnly; SameSite=Strict"
        );
    }

    proptest! {
        #[test]
        fn prop_comparator_agrees_with_equality(a in ".{0,64}", b in ".{0,64}") {
            prop_assert_eq!(CsrfGuard::is_valid_token(&a, &b), a == b);
        }

        #[test]
        fn prop_token_equals_itself(a in "[A-Za-z0-9_-]{1,64}") {
            prop_assert!(CsrfGuard::is_valid_token(&a, &a.clone()));
        }
    }
}
