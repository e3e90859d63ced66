//! Request gateway: admission, routing, and the stream handshake
//!
//! One axum router serves both planes: the HTTP control endpoints and the
//! `/ws` upgrade for the stream channel. Every `/api` request passes the
//! global rate limiter; bearer verification happens per-handler via the
//! `AuthUser` extractor so the public endpoints (register, login, health)
//! stay out of its way.

pub mod handlers;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::assistant::AssistantBridge;
use crate::auth::token::strip_bearer;
use crate::auth::{Claims, PasswordService, RateLimitVerdict, RateLimiter, TokenService};
use crate::error::ApiError;
use crate::ssh::ConnectionManager;
use crate::store::{AiQueryStore, ProfileStore, SessionStore, UserStore};
use crate::vault::CredentialVault;

/// Everything the handlers need, wired once in `main`.
#[derive(Clone)]
pub struct AppState {
    pub users: UserStore,
    pub profiles: ProfileStore,
    pub sessions: SessionStore,
    pub queries: AiQueryStore,
    pub vault: Arc<CredentialVault>,
    pub tokens: TokenService,
    pub passwords: PasswordService,
    pub manager: Arc<ConnectionManager>,
    pub assistant: Arc<AssistantBridge>,
    pub global_limiter: Arc<RateLimiter>,
    pub auth_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

/// Build the gateway router.
pub fn router(state: AppState, cors_origin: Option<&str>) -> Router {
    let cors = match cors_origin {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(_) => {
                warn!("CORS_ORIGIN is not a valid header value, allowing any origin");
                CorsLayer::permissive()
            }
        },
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/verify", get(handlers::verify))
        .route("/api/auth/preferences", put(handlers::update_preferences))
        .route(
            "/api/profiles",
            get(handlers::list_profiles).post(handlers::create_profile),
        )
        .route(
            "/api/profiles/:id",
            put(handlers::update_profile).delete(handlers::delete_profile),
        )
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::upgrade))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            global_rate_limit,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Global admission control over the control plane.
async fn global_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path().starts_with("/api") {
        if let RateLimitVerdict::Limited { retry_after_secs } =
            state.global_limiter.check(addr.ip())
        {
            return ApiError::RateLimited { retry_after_secs }.into_response();
        }
    }
    next.run(request).await
}

/// Bearer-token extractor: pulls `Authorization: Bearer …`, verifies it,
/// and hands the handler the claims. Protected handlers just take an
/// `AuthUser` argument.
pub struct AuthUser(pub Claims);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = strip_bearer(header).ok_or(ApiError::Unauthorized)?;
        let claims = state.tokens.verify(token)?;
        Ok(AuthUser(claims))
    }
}
