//! API error types mapped onto the HTTP error taxonomy of `spec.md` §7:
//! malformed request -> 400, fetch error -> 502, signer failure -> 502 —
//! all three with `Cache-Control: no-store` so nothing caches a transient
//! or malformed-input response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream fetch failed: {0}")]
    FetchFailed(String),

    #[error("signing failed: {0}")]
    SignerFailed(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::FetchFailed(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ApiError::SignerFailed(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
        };
        (status, [("cache-control", "no-store")], message).into_response()
    }
}
