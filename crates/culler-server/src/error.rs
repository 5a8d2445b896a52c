use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use culler_core::error::AppError;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::Cancelled => (StatusCode::CONFLICT, "cancelled"),
            AppError::RateLimitExceeded => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded"),
            AppError::HostTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            AppError::HostDisconnected(_) | AppError::HostError(_) => {
                (StatusCode::BAD_GATEWAY, "host_error")
            }
            AppError::LookupMiss(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::SerializationError(_) => (StatusCode::BAD_REQUEST, "serialization_error"),
            AppError::StoreError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.0.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (AppError::Conflict("busy".into()), StatusCode::CONFLICT),
            (AppError::Cancelled, StatusCode::CONFLICT),
            (AppError::RateLimitExceeded, StatusCode::TOO_MANY_REQUESTS),
            (
                AppError::HostTimeout {
                    selector: "x".into(),
                    millis: 10,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (AppError::ConfigError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status().0, expected);
        }
    }
}
