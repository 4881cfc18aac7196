use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::{debug, error};
use validator::ValidationErrors;

use crate::model::StoreError;

/// Everything a handler can fail with. The status code is the whole
/// response; error bodies are always empty.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed, missing or out of range input. The reason is logged,
    /// never sent to the client.
    Validation(String),
    /// The email is already taken.
    Conflict,
    NotFound,
    /// Nothing was changed, or the backend failed.
    OperationFailed,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::OperationFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Validation(reason) = &self {
            debug!("Rejected request: {}", reason);
        }

        self.status().into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(email) => {
                debug!("Email {} is already taken", email);
                ApiError::Conflict
            }
            err => {
                error!("User store failed: {}", err);
                ApiError::OperationFailed
            }
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(err: ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(format!("bad JSON body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(format!("bad query string: {}", rejection.body_text()))
    }
}
