mod versions;

pub use versions::*;

use axum::{Json, http::StatusCode};
use serde::Serialize;

const UNEXPECTED_ERROR_MESSAGE: &str = "Unexpected error occurred";

/// JSON body sent for every failed request.
///
/// Only `error` is always present; the other fields are included when they apply.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &'static str) -> Self {
        Self {
            error,
            resource: None,
            status: None,
            message: None,
        }
    }
}

/// A 500 response carrying the raw text of whatever went wrong.
pub fn unexpected_error(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            message: Some(message),
            ..ErrorResponse::new(UNEXPECTED_ERROR_MESSAGE)
        }),
    )
}
