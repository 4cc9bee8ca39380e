use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AccessResponse, AuthResponse, LoginRequest, PublicUser, RefreshRequest,
            RegisterRequest,
        },
        extractors::CurrentUser,
        jwt::JwtKeys,
        password::{burn_verify, hash_password, verify_password},
        services::{
            issue_pair, normalize_email, require_fields, validate_registration, welcome_mail,
        },
    },
    db::NewUser,
    error::{ApiError, ApiJson},
    mail,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register/", post(register))
        .route("/auth/login/", post(login))
        .route("/auth/token/refresh/", post(refresh))
        .route("/auth/logout/", post(logout))
        .route("/auth/user/", get(current_user))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let reg = validate_registration(payload).map_err(|e| {
        warn!(error = %e, "registration rejected");
        e
    })?;

    // Ensure email is not taken; the unique index catches races.
    if state.store.find_user_by_email(&reg.email).await?.is_some() {
        warn!(email = %reg.email, "email already registered");
        return Err(ApiError::field("email", "user with this email already exists."));
    }

    let hash = hash_password(&reg.password)?;
    let user = state
        .store
        .create_user(NewUser {
            email: &reg.email,
            password_hash: &hash,
            first_name: &reg.first_name,
            last_name: &reg.last_name,
            is_staff: false,
        })
        .await?;

    let keys = JwtKeys::from_ref(&state);
    let tokens = issue_pair(&keys, user.id)?;

    info!(user_id = user.id, email = %user.email, "user registered");
    mail::send_in_background(state.mailer.clone(), welcome_mail(&user));

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            tokens,
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let [email, password] = require_fields([
        ("email", payload.email.as_deref()),
        ("password", payload.password.as_deref()),
    ])?;
    let email = normalize_email(&email);

    let user = match state.store.find_user_by_email(&email).await? {
        Some(u) => u,
        None => {
            burn_verify(&password);
            warn!(email = %email, "login unknown email");
            return Err(ApiError::no_active_account());
        }
    };

    if !verify_password(&password, &user.password_hash)? {
        warn!(email = %email, user_id = user.id, "login invalid password");
        return Err(ApiError::no_active_account());
    }

    if !user.is_active {
        warn!(user_id = user.id, "login inactive user");
        return Err(ApiError::no_active_account());
    }

    let keys = JwtKeys::from_ref(&state);
    let tokens = issue_pair(&keys, user.id)?;

    info!(user_id = user.id, email = %user.email, "user logged in");
    Ok(Json(AuthResponse {
        tokens,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> Result<Json<AccessResponse>, ApiError> {
    let [token] = require_fields([("refresh", payload.refresh.as_deref())])?;
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&token).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        ApiError::token_not_valid()
    })?;

    if state.store.is_token_blacklisted(&claims.jti).await? {
        warn!(user_id = claims.sub, jti = %claims.jti, "blacklisted refresh token presented");
        return Err(ApiError::token_not_valid());
    }

    match state.store.find_user_by_id(claims.sub).await? {
        Some(user) if user.is_active => {}
        _ => {
            warn!(user_id = claims.sub, "refresh for missing or inactive user");
            return Err(ApiError::token_not_valid());
        }
    }

    let access = keys.sign_access(claims.sub)?;
    Ok(Json(AccessResponse { access }))
}

/// Blacklists the given refresh token.
#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> Result<Json<Value>, ApiError> {
    let [token] = require_fields([("refresh", payload.refresh.as_deref())])?;
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&token).map_err(|e| {
        warn!(error = %e, "logout with invalid token");
        ApiError::token_not_valid()
    })?;

    if state.store.find_user_by_id(claims.sub).await?.is_none() {
        return Err(ApiError::token_not_valid());
    }

    let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp as i64)
        .map_err(|e| anyhow::anyhow!("token expiry out of range: {e}"))?;
    state
        .store
        .blacklist_token(&claims.jti, claims.sub, expires_at)
        .await?;

    info!(user_id = claims.sub, "refresh token blacklisted");
    Ok(Json(json!({})))
}

#[instrument(skip_all)]
pub async fn current_user(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(PublicUser::from(&user))
}
