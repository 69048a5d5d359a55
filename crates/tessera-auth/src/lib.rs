//! # Tessera Auth - Token and Session Security Core
//!
//! Bearer tokens with refresh rotation, revocation, server-side sessions and
//! CSRF protection for Rust web services, packaged as a `tower` middleware.
//!
//! ## Key Features
//!
//! - **Signed tokens** - HS256/384/512 and RS256/384/512 access/refresh pairs
//! - **Refresh rotation** - single-use refresh tokens with reuse detection and
//!   family revocation
//! - **Revocation** - in-memory or Redis, shared across instances
//! - **Sessions** - signed cookies, idle and absolute expiry, id regeneration
//!   on login
//! - **CSRF** - double-submit tokens compared in constant time
//! - **Fingerprinting** - optional binding of tokens and sessions to client
//!   signals
//! - **Security events** - broadcast audit stream for logins, reuse and
//!   rejections
//!
//! ## Architecture
//!
//! - [`signing`] - Algorithm and key material ([`SigningContext`])
//! - [`revocation`] - Revoked token ids and families ([`RevocationStore`])
//! - [`token`] - Issue, verify, rotate and revoke ([`TokenService`])
//! - [`session`] - Server-side sessions ([`SessionStore`])
//! - [`csrf`] - Double-submit guard ([`CsrfGuard`])
//! - [`pipeline`] - Per-request checks ([`AuthPipeline`])
//! - [`tower`] - `Layer`/`Service` wrapping the pipeline
//! - [`audit`] - Security event bus
//! - [`config`] - Configuration loading and validation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tessera_auth::{AuthConfig, AuthPipeline, tower::AuthLayer};
//!
//! let config = AuthConfig::from_file("auth.toml")?;
//! let pipeline = AuthPipeline::from_config(&config).await?;
//!
//! let app = axum::Router::new()
//!     .route("/me", axum::routing::get(me))
//!     .layer(AuthLayer::new(pipeline));
//! ```
//!
//! ## Feature Flags
//!
//! - `redis-storage` - Redis revocation and session backends
//! - `metrics` - Counters through the `metrics` facade
//! - `full` - All features enabled

pub mod audit;
pub mod auth_metrics;
pub mod claims;
pub mod config;
pub mod cookie;
pub mod csrf;
pub mod error;
pub mod fingerprint;
pub mod pipeline;
pub mod rate_limit;
pub mod revocation;
pub mod session;
pub mod signing;
pub(crate) mod store;
pub mod token;
pub mod tower;

#[doc(inline)]
pub use audit::{EventBus, SecurityEvent, SecurityRecord};
#[doc(inline)]
pub use claims::{
    Claims, RotateOptions, TokenPair, TokenRequest, TokenType, VerifiedToken, VerifyOptions,
};
#[doc(inline)]
pub use config::AuthConfig;
#[doc(inline)]
pub use csrf::{CsrfGuard, CsrfToken};
#[doc(inline)]
pub use error::{AuthError, AuthResult};
#[doc(inline)]
pub use fingerprint::Fingerprint;
#[doc(inline)]
pub use pipeline::{AuthPipeline, PipelineOutcome, Principal, TokenRejection};
#[doc(inline)]
pub use revocation::RevocationStore;
#[doc(inline)]
pub use session::{SessionRecord, SessionStore};
#[doc(inline)]
pub use signing::{SigningAlgorithm, SigningContext};
#[doc(inline)]
pub use token::TokenService;
