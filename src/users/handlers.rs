use axum::{extract::State, routing::get, Json, Router};
use tracing::{info, instrument};

use super::{
    dto::{ProfileResponse, UpdateProfileRequest},
    services::apply_update,
};
use crate::{
    auth::extractors::CurrentUser,
    error::{ApiError, ApiJson},
    state::AppState,
};

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/users/profile/", get(get_profile).patch(update_profile))
}

#[instrument(skip_all)]
pub async fn get_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let profile = state.store.get_or_create_profile(user.id).await?;
    Ok(Json(profile.into()))
}

#[instrument(skip_all)]
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(payload): ApiJson<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let mut profile = state.store.get_or_create_profile(user.id).await?;
    apply_update(&mut profile, payload)?;
    let saved = state.store.save_profile(&profile).await?;
    info!(user_id = user.id, profile_id = saved.id, "profile updated");
    Ok(Json(saved.into()))
}
