use crate::state::AppState;
use axum::Router;

mod claims;
pub mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
mod password;
pub(crate) mod services;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}

#[cfg(test)]
pub(crate) use password::hash_password;
