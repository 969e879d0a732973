//! Maps the core crates' error taxonomy onto HTTP status codes for the RPC
//! surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use queryrelay_scheduler::SchedulerError;
use queryrelay_state::StateError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// A thin wrapper so handlers can `?`-propagate any of the crates' error
/// types and still get a sensible HTTP status out the other end.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<queryrelay_log::LogError> for ApiError {
    fn from(e: queryrelay_log::LogError) -> Self {
        Self::internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        let status = match &e {
            SchedulerError::NotFound(_) => StatusCode::NOT_FOUND,
            SchedulerError::Conflict(_) => StatusCode::CONFLICT,
            SchedulerError::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            SchedulerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            SchedulerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        let status = match &e {
            StateError::JobNotFound(_) | StateError::ConnectionNotFound(_, _) => StatusCode::NOT_FOUND,
            StateError::InvalidTransition(_) => StatusCode::CONFLICT,
            StateError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
