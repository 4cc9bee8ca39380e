use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::{
    dto::{ProfileListResponse, ProfileQuery},
    services::like_pattern,
};
use crate::{
    auth::{dto::PublicUser, extractors::StaffUser},
    db::StoreError,
    error::ApiError,
    state::AppState,
};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/profiles/", get(list_profiles))
        .route("/admin/users/:id/deactivate/", post(deactivate_user))
        .route("/admin/users/:id/", delete(delete_user))
}

fn user_not_found(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound => ApiError::NotFound("User not found."),
        other => other.into(),
    }
}

#[instrument(skip(state, staff))]
pub async fn list_profiles(
    State(state): State<AppState>,
    StaffUser(staff): StaffUser,
    Query(q): Query<ProfileQuery>,
) -> Result<Json<ProfileListResponse>, ApiError> {
    let (limit, offset) = q.page();
    let pattern = like_pattern(q.search.as_deref());
    let page = state.store.search_profiles(&pattern, limit, offset).await?;
    info!(staff_id = staff.id, count = page.count, "profiles listed");
    Ok(Json(page.into()))
}

#[instrument(skip(state, staff))]
pub async fn deactivate_user(
    State(state): State<AppState>,
    StaffUser(staff): StaffUser,
    Path(id): Path<i64>,
) -> Result<Json<PublicUser>, ApiError> {
    let user = state
        .store
        .set_user_active(id, false)
        .await
        .map_err(user_not_found)?;
    info!(staff_id = staff.id, user_id = id, "user deactivated");
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, staff))]
pub async fn delete_user(
    State(state): State<AppState>,
    StaffUser(staff): StaffUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if staff.id == id {
        warn!(staff_id = staff.id, "staff tried to delete own account");
        return Err(ApiError::BadRequest("You cannot delete your own account.".into()));
    }
    state.store.delete_user(id).await.map_err(user_not_found)?;
    info!(staff_id = staff.id, user_id = id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
