//! Tower Layer for the auth pipeline

use tower::Layer;

use super::AuthLayerConfig;
use super::service::AuthService;
use crate::pipeline::AuthPipeline;

/// Tower Layer that runs the auth pipeline before the inner service
///
/// # Example
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use tessera_auth::tower::AuthLayer;
///
/// let service = ServiceBuilder::new()
///     .layer(AuthLayer::new(pipeline).require_auth())
///     .service(my_inner_service);
/// ```
#[derive(Debug, Clone)]
pub struct AuthLayer {
    pipeline: AuthPipeline,
    config: AuthLayerConfig,
}

impl AuthLayer {
    /// Create a layer with default configuration (anonymous requests allowed)
    pub fn new(pipeline: AuthPipeline) -> Self {
        Self {
            pipeline,
            config: AuthLayerConfig::default(),
        }
    }

    pub fn with_config(pipeline: AuthPipeline, config: AuthLayerConfig) -> Self {
        Self { pipeline, config }
    }

    /// Reject requests without a valid access token
    #[must_use]
    pub fn require_auth(mut self) -> Self {
        self.config.allow_anonymous = false;
        self
    }

    /// Skip the pipeline for a path prefix
    #[must_use]
    pub fn bypass_path(mut self, path: impl Into<String>) -> Self {
        self.config.bypass_paths.push(path.into());
        self
    }

    pub fn pipeline(&self) -> &AuthPipeline {
        &self.pipeline
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService::new(inner, self.pipeline.clone(), self.config.clone())
    }
}
