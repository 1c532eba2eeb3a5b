//! Mapping of crate errors onto HTTP responses

use crate::Error;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

/// Error returned by HTTP handlers
#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    /// Request rejected before reaching the core
    BadRequest(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        let ApiError::Core(e) = self else {
            return StatusCode::BAD_REQUEST;
        };
        match e.root() {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UnknownOperation(_) | Error::UnknownTableQuery(_) | Error::MalformedPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Core(e) => e.to_string(),
            ApiError::BadRequest(message) => message.clone(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Core(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            error!(error = %message, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
