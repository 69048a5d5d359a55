//! Client fingerprints
//!
//! A fingerprint is a SHA-256 digest of low-entropy client signals. It is not
//! a secret and not an identity; it binds a token or session to "the same
//! kind of client" so that a stolen token replayed from a different browser
//! stands out.

use http::HeaderMap;
use http::header::{ACCEPT_ENCODING, ACCEPT_LANGUAGE, USER_AGENT};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Fingerprint derivation helpers
#[derive(Debug, Clone, Copy)]
pub struct Fingerprint;

impl Fingerprint {
    /// Hash `user-agent`, `accept-language` and `accept-encoding`
    ///
    /// Missing headers hash as empty strings.
    pub fn from_headers(headers: &HeaderMap) -> String {
        let read = |name| {
            headers
                .get(name)
                .and_then(|v: &http::HeaderValue| v.to_str().ok())
                .unwrap_or("")
        };
        Self::digest(&[read(USER_AGENT), read(ACCEPT_LANGUAGE), read(ACCEPT_ENCODING)])
    }

    /// Hash a user agent and client IP
    pub fn from_user_agent_and_ip(user_agent: &str, ip: &str) -> String {
        Self::digest(&[user_agent, ip])
    }

    fn digest(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update(b"|");
            }
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Compare two fingerprints in constant time
///
/// Both sides are pre-hashed with BLAKE3 so the comparison length never
/// depends on the inputs.
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    let a = blake3::hash(a.as_bytes());
    let b = blake3::hash(b.as_bytes());
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
