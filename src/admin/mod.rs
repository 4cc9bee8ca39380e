mod dto;
pub mod handlers;
mod services;

use crate::state::AppState;
use axum::Router;

/// Staff-only routes.
pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::admin_routes())
}
