//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::mux::ExchangeError;
use crate::store::StoreError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Gateway error: {0}")]
    BadGateway(String),

    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Rejected(_) => "REJECTED",
            Self::BadGateway(_) => "BAD_GATEWAY",
            Self::GatewayTimeout(_) => "GATEWAY_TIMEOUT",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::BadGateway(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::ServiceUnavailable(msg) | ApiError::GatewayTimeout(msg) => {
                warn!(error_code = code, message = %msg, "Worker unavailable");
            }
            _ => {
                debug!(error_code = code, message = %message, "Client error");
            }
        }

        let body = ErrorResponse {
            error: message,
            code,
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let msg = err.to_string();
        match err {
            StoreError::AuthFailed => ApiError::Unauthorized(msg),
            StoreError::Rejected { .. } => ApiError::Rejected(msg),
            StoreError::Forbidden { .. } => ApiError::Forbidden(msg),
            StoreError::InvalidArgument(_) => ApiError::BadRequest(msg),
            StoreError::Exchange(e) => e.into(),
        }
    }
}

impl From<ExchangeError> for ApiError {
    fn from(err: ExchangeError) -> Self {
        let msg = err.to_string();
        match err {
            ExchangeError::Protocol { .. } => ApiError::BadGateway(msg),
            ExchangeError::Timeout { .. } => ApiError::GatewayTimeout(msg),
            ExchangeError::Unavailable { .. } | ExchangeError::Transport(_) => {
                ApiError::ServiceUnavailable(msg)
            }
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use folio_protocol::{InvalidArgument, Privilege};
    use std::time::Duration;

    #[test]
    fn test_store_errors_map_to_status_codes() {
        let cases = [
            (StoreError::AuthFailed, StatusCode::UNAUTHORIZED),
            (StoreError::Rejected { verb: "buy" }, StatusCode::UNPROCESSABLE_ENTITY),
            (
                StoreError::Forbidden {
                    required: Privilege::Admin,
                    current: Privilege::Staff,
                },
                StatusCode::FORBIDDEN,
            ),
            (
                StoreError::InvalidArgument(InvalidArgument::Whitespace { field: "id" }),
                StatusCode::BAD_REQUEST,
            ),
            (
                StoreError::Exchange(ExchangeError::protocol("show", "bad count")),
                StatusCode::BAD_GATEWAY,
            ),
            (
                StoreError::Exchange(ExchangeError::Timeout {
                    verb: "show".to_string(),
                    timeout: Duration::from_secs(5),
                }),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                StoreError::Exchange(ExchangeError::unavailable("worker exited")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, status) in cases {
            let api_err = ApiError::from(err);
            assert_eq!(api_err.status_code(), status, "{api_err}");
        }
    }

    #[test]
    fn test_forbidden_message_names_both_levels() {
        let api_err = ApiError::from(StoreError::Forbidden {
            required: Privilege::Admin,
            current: Privilege::Customer,
        });
        assert_eq!(api_err.error_code(), "FORBIDDEN");
        assert!(api_err.to_string().contains("admin"));
        assert!(api_err.to_string().contains("customer"));
    }
}
