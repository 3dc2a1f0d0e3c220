use crate::services::{
    notifier::PublishError, staging::TransferError, storage::StorageError,
    transform::TransformError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Why a pipeline invocation stopped early.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("upload failed: {0}")]
    Upload(#[source] StorageError),
    #[error("could not encode notification: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("notify failed: {0}")]
    Notify(#[from] PublishError),
}

impl PipelineError {
    /// Failures that only mean there was nothing to correct.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Transform(err) if err.is_benign())
    }
}

/// A lightweight wrapper for HTTP-facing errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => AppError::not_found(err.to_string()),
            StorageError::InvalidObjectKey | StorageError::InvalidBucketName(_) => {
                AppError::bad_request(err.to_string())
            }
            other => {
                tracing::error!(error = %other, "storage error");
                AppError::internal("storage error")
            }
        }
    }
}
