use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// Device offline or link too degraded; carries a machine-readable
    /// reason so clients can distinguish "will retry" from "rejected"
    #[error("Service unavailable: {0}")]
    Unavailable(String, &'static str),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Too many requests: {0}")]
    TooManyRequests(String, u64),
    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }
}

impl From<jotter_core::Error> for ApiError {
    fn from(error: jotter_core::Error) -> Self {
        use jotter_core::Error as Core;

        match error {
            Core::Offline => Self::Unavailable(error.to_string(), "offline"),
            Core::PoorConnection => Self::Unavailable(error.to_string(), "poor_connection"),
            Core::SyncInProgress(_) => Self::Conflict(error.to_string()),
            Core::RateLimited { retry_after_secs } => {
                Self::TooManyRequests(error.to_string(), retry_after_secs)
            }
            Core::NotFound(id) => Self::NotFound(id),
            Core::InvalidInput(message) | Core::Validation(message) => Self::BadRequest(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason, retry_after) = match &self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, None, None),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, None, None),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, None, None),
            Self::Unavailable(_, reason) => {
                (StatusCode::SERVICE_UNAVAILABLE, Some(*reason), None)
            }
            Self::Conflict(_) => (StatusCode::CONFLICT, None, None),
            Self::TooManyRequests(_, retry_after) => {
                (StatusCode::TOO_MANY_REQUESTS, None, Some(*retry_after))
            }
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None, None),
        };

        let body = ErrorBody {
            error: self.to_string(),
            reason,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = header::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_distinct_statuses() {
        let offline: ApiError = jotter_core::Error::Offline.into();
        assert!(matches!(offline, ApiError::Unavailable(_, "offline")));

        let busy: ApiError = jotter_core::Error::SyncInProgress("user-1".into()).into();
        assert!(matches!(busy, ApiError::Conflict(_)));

        let limited: ApiError = jotter_core::Error::RateLimited {
            retry_after_secs: 12,
        }
        .into();
        assert!(matches!(limited, ApiError::TooManyRequests(_, 12)));
    }

    #[test]
    fn retry_after_header_is_set() {
        let response = ApiError::TooManyRequests("slow down".into(), 30).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "30"
        );
    }
}
