//! Tower Service implementation for the auth pipeline
//!
//! For each `http::Request<B>` the service:
//!
//! - Skips everything for configured bypass paths
//! - Runs [`AuthPipeline::process`] on the request head
//! - Returns the rejection response on rate limit, CSRF or session failure
//! - Inserts the pipeline results into the request extensions
//! - Forwards to the inner service and decorates its response with cookies
//!   and headers queued by the pipeline

use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tower_service::Service;

use super::AuthLayerConfig;
use crate::error::AuthError;
use crate::pipeline::{AuthPipeline, PipelineRejection};

/// Tower Service that runs the auth pipeline before the inner service
#[derive(Debug, Clone)]
pub struct AuthService<S> {
    inner: S,
    pipeline: AuthPipeline,
    config: AuthLayerConfig,
}

impl<S> AuthService<S> {
    pub fn new(inner: S, pipeline: AuthPipeline, config: AuthLayerConfig) -> Self {
        Self {
            inner,
            pipeline,
            config,
        }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the inner service
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

/// Boxed future returned by [`AuthService`]
pub type AuthServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

impl<S, B, ResBody> Service<http::Request<B>> for AuthService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = AuthServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if self.config.should_bypass(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let pipeline = self.pipeline.clone();
        let allow_anonymous = self.config.allow_anonymous;

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();

            let outcome = match pipeline.process(&parts).await {
                Ok(outcome) => outcome,
                Err(rejection) => return Ok(rejection.into_response()),
            };

            if outcome.principal.is_none() && !allow_anonymous {
                let error = match outcome.token_rejection {
                    Some(rejection) => rejection.error,
                    None => AuthError::TokenInvalid("no access token".into()),
                };
                return Ok(PipelineRejection {
                    error,
                    set_cookies: outcome.decorations.set_cookies,
                }
                .into_response());
            }

            if let Some(principal) = outcome.principal {
                parts.extensions.insert(principal);
            }
            if let Some(session) = outcome.session {
                parts.extensions.insert(session);
            }
            if let Some(rejection) = outcome.token_rejection {
                parts.extensions.insert(rejection);
            }
            parts.extensions.insert(outcome.csrf_token);

            let mut response = inner.call(http::Request::from_parts(parts, body)).await?;
            outcome.decorations.apply(response.headers_mut());
            Ok(response)
        })
    }
}
