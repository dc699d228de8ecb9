//! Uniform `IntoResponse` error shape for the admin facade, grounded on the
//! teacher's `api::error::ApiError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub enum AdminError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<crate::models::Error> for AdminError {
    fn from(err: crate::models::Error) -> Self {
        AdminError::Internal(err.to_string())
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AdminError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AdminError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
