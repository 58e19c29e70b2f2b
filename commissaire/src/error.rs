use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use commissaire_common::response;

/// Failures surfaced by the KV adapter.
#[derive(thiserror::Error, Debug)]
pub enum KvError {
    #[error("key not found")]
    NotFound,
    #[error("kv backend error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Failures deserializing or validating a persisted model.
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("malformed record: {0}")]
    BadRecord(String),
}

/// Failures from the host-transport (SSH) or container-manager probe.
/// These never cross the HTTP boundary; they drive Host/progress state
/// transitions instead.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Errors the HTTP handlers translate directly into a status code.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<KvError> for ApiError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::NotFound => ApiError::NotFound,
            KvError::Other(e) => ApiError::Internal(e),
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(e: ModelError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let msg = self.to_string();
        match self {
            ApiError::NotFound => response::not_found(msg),
            ApiError::BadRequest(_) => response::bad_request(msg),
            ApiError::Conflict(_) => response::conflict(msg),
            ApiError::Internal(_) => response::internal_server_error(msg),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// Allow `StatusCode` matching in tests without constructing a full Response.
impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
