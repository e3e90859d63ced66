//! Control-plane handlers

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequest, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::auth::{validate_password_strength, RateLimitVerdict};
use crate::error::{ok, ApiError, ApiResult};
use crate::store::{NewCredentials, NewProfile, ProfileUpdate, User};

use super::{AppState, AuthUser};

/// Json extractor whose rejection uses the gateway error envelope instead
/// of axum's default body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
    pub expires_at: i64,
}

/// Body for profile creation: durable fields plus the secrets to encrypt.
#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub profile: NewProfile,
    #[serde(default)]
    pub credentials: NewCredentials,
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    AppJson(body): AppJson<RegisterRequest>,
) -> ApiResult<Response> {
    check_auth_limit(&state, addr)?;

    validate_email(&body.email)?;
    validate_password_strength(&body.password).map_err(|e| ApiError::Validation(e.into()))?;
    if body.name.trim().is_empty() {
        return Err(ApiError::Validation("Name must not be empty".into()));
    }

    let hash = state.passwords.hash(&body.password)?;
    let user = state.users.create(&body.email, &body.name, &hash).await?;
    let (token, expires_at) = state.tokens.mint(&user.id, &user.email)?;

    info!("User registered: {}", user.id);

    Ok((
        StatusCode::CREATED,
        ok(AuthResponse {
            user,
            token,
            expires_at,
        }),
    )
        .into_response())
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    AppJson(body): AppJson<LoginRequest>,
) -> ApiResult<Response> {
    check_auth_limit(&state, addr)?;

    let Some((user, hash)) = state.users.find_by_email(&body.email).await? else {
        return Err(ApiError::InvalidCredentials);
    };

    if !state.passwords.verify(&body.password, &hash)? {
        return Err(ApiError::InvalidCredentials);
    }

    state.users.touch_last_login(&user.id).await?;
    let (token, expires_at) = state.tokens.mint(&user.id, &user.email)?;

    info!("User logged in: {}", user.id);

    Ok(ok(AuthResponse {
        user,
        token,
        expires_at,
    })
    .into_response())
}

/// GET /api/auth/verify
pub async fn verify(State(state): State<AppState>, AuthUser(claims): AuthUser) -> ApiResult<Response> {
    let user = state
        .users
        .find_by_id(&claims.sub)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(ok(json!({ "user": user })).into_response())
}

/// PUT /api/auth/preferences
pub async fn update_preferences(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    AppJson(preferences): AppJson<serde_json::Value>,
) -> ApiResult<Response> {
    if !preferences.is_object() {
        return Err(ApiError::Validation("Preferences must be an object".into()));
    }

    let user = state
        .users
        .update_preferences(&claims.sub, &preferences)
        .await?;

    Ok(ok(json!({ "user": user })).into_response())
}

/// GET /api/profiles
pub async fn list_profiles(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> ApiResult<Response> {
    let profiles = state.profiles.list(&claims.sub).await?;
    Ok(ok(profiles).into_response())
}

/// POST /api/profiles
pub async fn create_profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    AppJson(body): AppJson<CreateProfileRequest>,
) -> ApiResult<Response> {
    let profile = state
        .profiles
        .create(&claims.sub, body.profile, body.credentials, &state.vault)
        .await?;

    Ok((StatusCode::CREATED, ok(profile)).into_response())
}

/// PUT /api/profiles/:id
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(profile_id): Path<String>,
    AppJson(update): AppJson<ProfileUpdate>,
) -> ApiResult<Response> {
    let profile = state
        .profiles
        .update(&claims.sub, &profile_id, update)
        .await?;

    Ok(ok(profile).into_response())
}

/// DELETE /api/profiles/:id
pub async fn delete_profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(profile_id): Path<String>,
) -> ApiResult<Response> {
    state.profiles.delete(&claims.sub, &profile_id).await?;
    Ok(ok(json!({ "ok": true })).into_response())
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    let stats = state.manager.stats();
    Json(json!({
        "status": "ok",
        "uptime": state.started_at.elapsed().as_secs(),
        "timestamp": Utc::now().to_rfc3339(),
        "connections": stats,
    }))
    .into_response()
}

/// The stricter per-source window over the authentication endpoints.
fn check_auth_limit(state: &AppState, addr: SocketAddr) -> ApiResult<()> {
    match state.auth_limiter.check(addr.ip()) {
        RateLimitVerdict::Admitted => Ok(()),
        RateLimitVerdict::Limited { retry_after_secs } => {
            Err(ApiError::RateLimited { retry_after_secs })
        }
    }
}

/// Light email shape check: local part, `@`, dotted domain.
fn validate_email(email: &str) -> ApiResult<()> {
    let valid = email.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty()
            && !domain.is_empty()
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && !email.contains(char::is_whitespace)
    });

    if valid {
        Ok(())
    } else {
        Err(ApiError::Validation("Invalid email address".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("user.name+tag@example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("nodomain@").is_err());
        assert!(validate_email("@nolocal.com").is_err());
        assert!(validate_email("no-at-sign.com").is_err());
        assert!(validate_email("dotless@domain").is_err());
        assert!(validate_email("spaces in@mail.com").is_err());
    }
}
