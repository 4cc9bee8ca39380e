use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use super::jwt::JwtKeys;
use crate::{db::User, error::ApiError, state::AppState};

/// Extracts and validates the bearer access token, returning the user ID.
/// Does not touch the database.
pub struct AuthUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(ApiError::not_authenticated)?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or(ApiError::Unauthorized {
                detail: "Authorization header must contain two space-delimited values",
                code: "bad_authorization_header",
            })?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify_access(token.trim()).map_err(|e| {
            warn!(error = %e, "access token rejected");
            ApiError::token_not_valid()
        })?;

        Ok(AuthUser(claims.sub))
    }
}

/// The authenticated user, loaded and required to be active.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;
        match state.store.find_user_by_id(user_id).await? {
            Some(user) if user.is_active => Ok(CurrentUser(user)),
            Some(_) => Err(ApiError::Unauthorized {
                detail: "User is inactive",
                code: "user_inactive",
            }),
            None => Err(ApiError::Unauthorized {
                detail: "User not found",
                code: "user_not_found",
            }),
        }
    }
}

/// An active staff user; anyone else gets 403.
pub struct StaffUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for StaffUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_staff {
            warn!(user_id = user.id, "non-staff user denied admin access");
            return Err(ApiError::permission_denied());
        }
        Ok(StaffUser(user))
    }
}
