//! # Tower middleware
//!
//! [`AuthLayer`] runs the [`AuthPipeline`](crate::pipeline::AuthPipeline) in
//! front of any `tower` service over `http::Request`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use tessera_auth::tower::AuthLayer;
//!
//! let service = ServiceBuilder::new()
//!     .layer(AuthLayer::new(pipeline).bypass_path("/health"))
//!     .service(my_inner_service);
//! ```
//!
//! ## Request Extensions
//!
//! Requests that pass the pipeline carry:
//!
//! - [`Principal`](crate::pipeline::Principal) when a valid access token was presented
//! - [`SessionRecord`](crate::session::SessionRecord) for the current session
//! - [`CsrfToken`](crate::csrf::CsrfToken) to embed in rendered forms
//! - [`TokenRejection`](crate::pipeline::TokenRejection) when a token was presented but refused
//!
//! ```rust,ignore
//! if let Some(principal) = req.extensions().get::<Principal>() {
//!     println!("Authenticated user: {}", principal.sub);
//! }
//! ```
//!
//! Pipeline rejections (rate limit, CSRF, expired session) short-circuit with
//! a JSON error response; the inner service is not called.

mod layer;
mod service;

pub use layer::AuthLayer;
pub use service::{AuthService, AuthServiceFuture};

/// Configuration for the auth layer
#[derive(Debug, Clone)]
pub struct AuthLayerConfig {
    /// Forward requests without a principal to the inner service
    pub allow_anonymous: bool,
    /// Path prefixes that skip the pipeline entirely (e.g. health checks)
    pub bypass_paths: Vec<String>,
}

impl Default for AuthLayerConfig {
    fn default() -> Self {
        Self {
            allow_anonymous: true,
            bypass_paths: Vec::new(),
        }
    }
}

impl AuthLayerConfig {
    /// Reject requests that end up without a principal
    #[must_use]
    pub fn require_auth() -> Self {
        Self {
            allow_anonymous: false,
            ..Default::default()
        }
    }

    /// Add a path prefix to the bypass list
    #[must_use]
    pub fn bypass_path(mut self, path: impl Into<String>) -> Self {
        self.bypass_paths.push(path.into());
        self
    }

    /// Check if a request path should bypass the pipeline
    pub fn should_bypass(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| prefix.ends_with('/') || rest.starts_with('/'))
        })
    }
}
