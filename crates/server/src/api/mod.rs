//! HTTP API modules and shared response helpers.

pub mod health;
pub mod ingest;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

pub(crate) type ApiResult<T> = Result<T, (StatusCode, Json<ErrorBody>)>;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub(crate) fn bad_request(
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            ok: false,
            error: message.into(),
            details,
        }),
    )
}

/// 5xx bodies stay opaque; the real error goes to the logs.
pub(crate) fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<ErrorBody>) {
    tracing::error!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            ok: false,
            error: "internal".to_string(),
            details: None,
        }),
    )
}
