//! Error types for the auto-save engine
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Storage Error Enum ==
/// Errors raised inside the storage engine.
///
/// Most of the public engine surface is fail-soft and only logs these;
/// `import_data` and the HTTP layer surface them.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Key not found in the selected backend
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Backend unavailable or over quota
    #[error("Backend error: {0}")]
    Backend(String),

    /// Payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A tagged payload could not be decoded
    #[error("Transform error: {0}")]
    Transform(String),

    /// Durable backend I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// == Auto-Save Error Enum ==
/// Errors returned by the auto-save coordinator handle.
#[derive(Error, Debug)]
pub enum AutoSaveError {
    /// The coordinator task has stopped
    #[error("auto-save coordinator has shut down")]
    ActorShutdown,

    /// No entry with this id is tracked
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

// == IntoResponse Implementations ==
impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let status = match &self {
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::InvalidRequest(_) | StorageError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            StorageError::Backend(_) => StatusCode::INSUFFICIENT_STORAGE,
            StorageError::Transform(_) | StorageError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

impl IntoResponse for AutoSaveError {
    fn into_response(self) -> Response {
        let status = match &self {
            AutoSaveError::ActorShutdown => StatusCode::SERVICE_UNAVAILABLE,
            AutoSaveError::NotFound(_) => StatusCode::NOT_FOUND,
            AutoSaveError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };

        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the storage engine.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
