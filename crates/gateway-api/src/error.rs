//! Maps the core's [`GatewayError`] to wire-level status codes: 400 on
//! shape violations, 403 on auth failure, 500 otherwise.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gateway_common::GatewayError;

pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::AuthFailure => StatusCode::FORBIDDEN,
            GatewayError::AdmissionCancelled(_)
            | GatewayError::Stopped
            | GatewayError::UpstreamTransient(_)
            | GatewayError::ParseFailure
            | GatewayError::CountMismatch { .. }
            | GatewayError::Internal(_)
            | GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}
