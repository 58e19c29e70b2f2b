use std::fmt::{Debug, Display};

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Logs `e` and renders a bare `{}` body at `code`.
///
/// Error bodies in this API never echo the failure reason back to the
/// caller (unlike the verbose `{"reason": ...}` bodies used elsewhere in
/// this codebase) — the management API's error contract is status-code-only.
pub fn err_resp<T>(e: T, code: StatusCode) -> Response
where
    T: Display + Debug,
{
    tracing::error!(error = %e, status = %code, "request failed");
    (code, Json(json!({}))).into_response()
}

pub fn not_found<T>(e: T) -> Response
where
    T: Display + Debug,
{
    err_resp(e, StatusCode::NOT_FOUND)
}

pub fn conflict<T>(e: T) -> Response
where
    T: Display + Debug,
{
    err_resp(e, StatusCode::CONFLICT)
}

pub fn bad_request<T>(e: T) -> Response
where
    T: Display + Debug,
{
    err_resp(e, StatusCode::BAD_REQUEST)
}

pub fn gone<T>(e: T) -> Response
where
    T: Display + Debug,
{
    err_resp(e, StatusCode::GONE)
}

pub fn internal_server_error<T>(e: T) -> Response
where
    T: Display + Debug,
{
    err_resp(e, StatusCode::INTERNAL_SERVER_ERROR)
}
