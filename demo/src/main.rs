//! Demo server: session cookies, CSRF and bearer tokens behind axum
//!
//! ```bash
//! RUST_LOG=info,tessera=debug cargo run -p tessera-demo
//!
//! curl -c jar -b jar -i localhost:3000/
//! curl -c jar -b jar -H "x-csrf-token: <token>" -H 'content-type: application/json' \
//!      -d '{"username":"demo","password":"demo"}' localhost:3000/login
//! curl -H "Authorization: Bearer <access_token>" localhost:3000/me
//! ```
//!
//! Set `TESSERA_CONFIG` to load a configuration file; otherwise a
//! development configuration with a fixed secret is used.

use std::net::SocketAddr;

use axum::extract::{Extension, State};
use axum::http::header::{AUTHORIZATION, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tessera_auth::config::SigningConfig;
use tessera_auth::signing::SigningAlgorithm;
use tessera_auth::tower::AuthLayer;
use tessera_auth::{
    AuthConfig, AuthError, AuthPipeline, CsrfToken, Principal, SessionRecord, TokenRequest,
};

const DEV_SECRET: &str = "development-only-secret-change-me-0123456789";

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh_token: String,
}

#[derive(Deserialize, Default)]
struct LogoutBody {
    refresh_token: Option<String>,
}

struct ApiError(AuthError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.0.status(),
            [("content-type", "application/json")],
            self.0.to_json_body(),
        )
            .into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        Self(error)
    }
}

fn load_config() -> anyhow::Result<AuthConfig> {
    if let Ok(path) = std::env::var("TESSERA_CONFIG") {
        return Ok(AuthConfig::from_file(path)?);
    }
    warn!("TESSERA_CONFIG not set, using development configuration");
    let mut config = AuthConfig {
        signing: SigningConfig::hmac(SigningAlgorithm::HS256, DEV_SECRET),
        ..Default::default()
    };
    config.session.secure = false;
    config.csrf.secure = false;
    config.rate_limit.enabled = true;
    Ok(config)
}

async fn index(Extension(csrf): Extension<CsrfToken>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "csrf_token": csrf.as_str() }))
}

async fn health() -> &'static str {
    "ok"
}

async fn login(
    State(pipeline): State<AuthPipeline>,
    Extension(session): Extension<SessionRecord>,
    Json(body): Json<LoginBody>,
) -> Result<Response, ApiError> {
    // Demo credentials only.
    if body.username != "demo" || body.password != "demo" {
        return Ok((StatusCode::UNAUTHORIZED, "invalid credentials").into_response());
    }

    let request = TokenRequest::new(body.username)
        .roles(vec!["user".into()])
        .permissions(vec!["profile:read".into()]);
    let outcome = pipeline.login(&session.id, request).await?;

    Ok(([(SET_COOKIE, outcome.set_cookie)], Json(outcome.tokens)).into_response())
}

async fn refresh(
    State(pipeline): State<AuthPipeline>,
    headers: HeaderMap,
    Json(body): Json<RefreshBody>,
) -> Result<Response, ApiError> {
    let tokens = pipeline.refresh(&headers, &body.refresh_token).await?;
    Ok(Json(tokens).into_response())
}

async fn logout(
    State(pipeline): State<AuthPipeline>,
    Extension(session): Extension<SessionRecord>,
    headers: HeaderMap,
    body: Option<Json<LogoutBody>>,
) -> Result<Response, ApiError> {
    let access = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Json(body) = body.unwrap_or_default();

    let clear = pipeline
        .logout(Some(&session.id), access, body.refresh_token.as_deref())
        .await?;
    Ok(([(SET_COOKIE, clear)], StatusCode::NO_CONTENT).into_response())
}

async fn me(principal: Option<Extension<Principal>>) -> Result<Response, ApiError> {
    let Some(Extension(principal)) = principal else {
        return Err(AuthError::TokenInvalid("authentication required".into()).into());
    };
    Ok(Json(serde_json::json!({
        "sub": principal.sub,
        "roles": principal.roles,
        "permissions": principal.permissions,
        "expires_at": principal.expires_at,
    }))
    .into_response())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let pipeline = AuthPipeline::from_config(&config).await?;

    let mut events = pipeline.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(record) if record.event.is_suspicious() => {
                    warn!(id = %record.id, kind = record.event.kind(), "Suspicious security event");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Security event listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .with_state(pipeline.clone())
        .layer(AuthLayer::new(pipeline).bypass_path("/health"))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Demo listening on http://{addr}");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
