//! Common test utilities for integration tests
//!
//! Builds token services, session stores and pipelines over the in-memory
//! backends, plus browser-like request heads for pipeline tests.

#![allow(dead_code)]

use std::sync::Arc;

use http::request::Parts;
use http::{Method, Request};
use secrecy::SecretString;

use tessera_auth::config::{AuthConfig, SigningConfig};
use tessera_auth::revocation::MemoryRevocationStore;
use tessera_auth::session::{MemorySessionBackend, SessionStore};
use tessera_auth::signing::{SigningAlgorithm, SigningContext};
use tessera_auth::{AuthPipeline, TokenService};

pub const SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const SESSION_SECRET: &str = "integration-session-secret-0123456789";
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";

/// Config with HMAC signing, a fixed session secret and insecure cookies
pub fn test_config() -> AuthConfig {
    let mut config = AuthConfig {
        signing: SigningConfig::hmac(SigningAlgorithm::HS256, SECRET),
        ..Default::default()
    };
    config.session.secret = Some(SecretString::new(SESSION_SECRET.to_string()));
    config.session.secure = false;
    config.csrf.secure = false;
    config
}

pub fn token_service(config: &AuthConfig) -> TokenService {
    let signing = SigningContext::new(&config.signing).expect("valid signing config");
    TokenService::from_config(
        Arc::new(signing),
        Arc::new(MemoryRevocationStore::new()),
        config,
    )
}

pub fn session_store(config: &AuthConfig) -> SessionStore {
    SessionStore::new(Arc::new(MemorySessionBackend::new()), &config.session)
}

pub async fn pipeline(config: &AuthConfig) -> AuthPipeline {
    AuthPipeline::from_config(config)
        .await
        .expect("pipeline builds from test config")
}

/// Request builder with the headers a browser always sends
pub fn browser_request(method: Method, uri: &str) -> http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("user-agent", USER_AGENT)
        .header("accept-language", "en-US,en;q=0.9")
        .header("accept-encoding", "gzip, deflate, br")
        .header("x-forwarded-for", "203.0.113.10")
}

pub fn parts(builder: http::request::Builder) -> Parts {
    builder.body(()).expect("valid request").into_parts().0
}

/// `name=value` pairs from a list of `Set-Cookie` values, for a `Cookie` header
pub fn cookie_header(set_cookies: &[String]) -> String {
    set_cookies
        .iter()
        .filter_map(|c| c.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Value of the named cookie in a list of `Set-Cookie` values
pub fn cookie_value<'a>(set_cookies: &'a [String], name: &str) -> Option<&'a str> {
    set_cookies
        .iter()
        .filter_map(|c| c.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(n, _)| *n == name)
        .map(|(_, v)| v)
}
