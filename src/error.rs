//! Error type shared by all handlers and the JSON body extractor.

use std::collections::BTreeMap;

use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::db::StoreError;

/// Field name to messages, serialized as `{"email": ["..."]}`.
pub type FieldErrors = BTreeMap<&'static str, Vec<String>>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed: {0:?}")]
    Validation(FieldErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("{detail}")]
    Unauthorized {
        detail: &'static str,
        code: &'static str,
    },

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    NotFound(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field, vec![message.into()]);
        ApiError::Validation(errors)
    }

    pub fn no_active_account() -> Self {
        ApiError::Unauthorized {
            detail: "No active account found with the given credentials",
            code: "no_active_account",
        }
    }

    pub fn token_not_valid() -> Self {
        ApiError::Unauthorized {
            detail: "Token is invalid or expired",
            code: "token_not_valid",
        }
    }

    pub fn not_authenticated() -> Self {
        ApiError::Unauthorized {
            detail: "Authentication credentials were not provided.",
            code: "not_authenticated",
        }
    }

    pub fn permission_denied() -> Self {
        ApiError::Forbidden("You do not have permission to perform this action.")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(fields) => (StatusCode::BAD_REQUEST, Json(fields)).into_response(),
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::Unauthorized { detail, code } => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": detail, "code": code })),
            )
                .into_response(),
            ApiError::Forbidden(detail) => {
                (StatusCode::FORBIDDEN, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::NotFound(detail) => {
                (StatusCode::NOT_FOUND, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::Internal(e) => {
                let chain = format!("{e:#}");
                error!(error = %chain, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate { field } => {
                ApiError::field(field, format!("user with this {field} already exists."))
            }
            StoreError::NotFound => ApiError::NotFound("Not found."),
            StoreError::Database(e) => {
                ApiError::Internal(anyhow::Error::new(e).context("database query"))
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("JSON parse error - {}", rejection.body_text()))
    }
}

/// `Json` that reports body errors as `ApiError::BadRequest`.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
