use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ledger::LedgerError;
use serde::Serialize;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Database(String),
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(msg) => Self::BadRequest(msg),
            LedgerError::DuplicateHandle(handle) => {
                Self::Conflict(format!("user handle '{}' already exists", handle))
            }
            LedgerError::UnknownUser(handle) => {
                Self::NotFound(format!("user {} not found", handle))
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<common::month::InvalidMonth> for ApiError {
    fn from(err: common::month::InvalidMonth) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<announcer::SchedulerError> for ApiError {
    fn from(err: announcer::SchedulerError) -> Self {
        match err {
            announcer::SchedulerError::UnknownJob(_) => Self::NotFound(err.to_string()),
            _ => Self::Conflict(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        let body = Json(ErrorBody { error: message });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
