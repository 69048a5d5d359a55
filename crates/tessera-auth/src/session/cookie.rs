//! Signed session cookie values

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::hmac;
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::cookie::{CookieAttributes, clear_cookie, set_cookie};

/// Signs and verifies session ids carried in the session cookie
///
/// Cookie value: `<id>.<base64url(HMAC-SHA256(secret, id))>`. Values with a
/// bad or missing signature verify as `None` and are handled like an absent
/// cookie.
pub struct SessionCookie {
    key: hmac::Key,
    name: String,
    attributes: CookieAttributes,
}

impl fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookie")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

impl SessionCookie {
    /// Build from session configuration
    ///
    /// Without a configured secret a random per-process key is used, which
    /// invalidates every session cookie on restart.
    pub fn new(config: &SessionConfig) -> Self {
        let key = match &config.secret {
            Some(secret) => hmac::Key::new(hmac::HMAC_SHA256, secret.expose_secret().as_bytes()),
            None => {
                warn!("No session secret configured, using a random per-process key");
                hmac::Key::new(hmac::HMAC_SHA256, &rand::random::<[u8; 32]>())
            }
        };
        Self {
            key,
            name: config.cookie_name.clone(),
            attributes: CookieAttributes {
                secure: config.secure,
                same_site: config.same_site,
                max_age: Some(config.max_age_secs),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<id>.<signature>`
    pub fn sign(&self, session_id: &str) -> String {
        let tag = hmac::sign(&self.key, session_id.as_bytes());
        format!("{}.{}", session_id, URL_SAFE_NO_PAD.encode(tag.as_ref()))
    }

    /// Return the session id if the signature is valid
    pub fn verify(&self, value: &str) -> Option<String> {
        let (id, signature) = value.rsplit_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        match hmac::verify(&self.key, id.as_bytes(), &signature) {
            Ok(()) => Some(id.to_string()),
            Err(_) => {
                debug!("Session cookie signature rejected");
                None
            }
        }
    }

    /// `Set-Cookie` value carrying the signed id
    pub fn set_cookie(&self, session_id: &str) -> String {
        set_cookie(&self.name, &self.sign(session_id), &self.attributes)
    }

    /// `Set-Cookie` value that removes the session cookie
    pub fn clear_cookie(&self) -> String {
        clear_cookie(&self.name, &self.attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn cookie_with_secret(secret: &str) -> SessionCookie {
        SessionCookie::new(&SessionConfig {
            secret: Some(SecretString::new(secret.to_string())),
            ..Default::default()
        })
    }

    #[test]
    fn test_sign_and_verify() {
        let cookie = cookie_with_secret("session-secret");
        let signed = cookie.sign("abc123");
        assert!(signed.starts_with("abc123."));
        assert_eq!(cookie.verify(&signed).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_tampered_values_rejected() {
        let cookie = cookie_with_secret("session-secret");
        let signed = cookie.sign("abc123");
        let forged = signed.replacen("abc123", "abc124", 1);
        assert_eq!(cookie.verify(&forged), None);
        assert_eq!(cookie.verify("abc123"), None);
        assert_eq!(cookie.verify("abc123.!!!"), None);
        assert_eq!(cookie.verify(""), None);
    }

    #[test]
    fn test_other_secret_rejected() {
        let signed = cookie_with_secret("one").sign("abc");
        assert_eq!(cookie_with_secret("two").verify(&signed), None);
    }

    #[test]
    fn test_random_key_still_roundtrips() {
        let cookie = SessionCookie::new(&SessionConfig::default());
        let signed = cookie.sign("id");
        assert_eq!(cookie.verify(&signed).as_deref(), Some("id"));
    }

    #[test]
    fn test_set_cookie_header() {
        let cookie = cookie_with_secret("s");
        let header = cookie.set_cookie("id");
        assert!(header.starts_with("sid=id."));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("SameSite=Strict"));
        assert!(header.contains("Max-Age=86400"));
        assert!(header.ends_with("; Secure"));
        assert!(cookie.clear_cookie().contains("Max-Age=0"));
    }
}
