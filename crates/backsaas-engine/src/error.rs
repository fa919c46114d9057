use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::hooks::HookError;
use crate::store::StoreError;

/// Errors returned by engine HTTP endpoints.
///
/// Each variant maps to a specific HTTP status code at the outermost
/// handler; internal layers surface typed errors and never raw store
/// messages.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineError {
    /// The schema defines no such entity. Maps to 404.
    UnknownEntity { entity: String },
    /// Row not found by id. Maps to 404.
    NotFound { entity: String, id: String },
    /// Request body or parameters failed validation. Maps to 400.
    Validation { message: String },
    /// A validation hook rejected the operation. Maps to 422.
    HookRejected { message: String },
    /// A lifecycle hook stopped the operation. Maps to 400.
    HookStopped { message: String },
    /// Primary-key conflict surfaced from the store. Maps to 409.
    Conflict { entity: String, id: String },
    /// Storage failure. Maps to 500.
    Store { message: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEntity { entity } => {
                write!(f, "unknown entity '{entity}'")
            }
            Self::NotFound { entity, id } => {
                write!(f, "'{entity}' row '{id}' not found")
            }
            Self::Validation { message } => {
                write!(f, "{message}")
            }
            Self::HookRejected { message } => {
                write!(f, "{message}")
            }
            Self::HookStopped { message } => {
                write!(f, "{message}")
            }
            Self::Conflict { entity, id } => {
                write!(f, "'{entity}' row '{id}' already exists")
            }
            Self::Store { message } => {
                write!(f, "storage failure: {message}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Returns the HTTP status code for this error variant.
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownEntity { .. } | Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation { .. } | Self::HookStopped { .. } => StatusCode::BAD_REQUEST,
            Self::HookRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the machine-readable code used in JSON responses.
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownEntity { .. } | Self::NotFound { .. } => "not_found",
            Self::Validation { .. } => "validation_failed",
            Self::HookRejected { .. } => "hook_rejected",
            Self::HookStopped { .. } => "hook_stopped",
            Self::Conflict { .. } => "conflict",
            Self::Store { .. } => "store_error",
        }
    }

    /// Returns the short error label used in JSON responses.
    fn label(&self) -> &'static str {
        match self {
            Self::UnknownEntity { .. } | Self::NotFound { .. } => "Not found",
            Self::Validation { .. } => "Validation failed",
            Self::HookRejected { .. } => "Rejected",
            Self::HookStopped { .. } => "Rejected",
            Self::Conflict { .. } => "Conflict",
            Self::Store { .. } => "Internal server error",
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.label(),
            "message": self.to_string(),
            "code": self.code(),
        });
        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownEntity { entity } => Self::UnknownEntity { entity },
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Validation { message } => Self::Validation { message },
            StoreError::Conflict { entity, id } => Self::Conflict { entity, id },
            StoreError::Provisioning { message }
            | StoreError::Database { message } => Self::Store { message },
            StoreError::Serialization { column, message } => Self::Store {
                message: format!("column '{column}': {message}"),
            },
        }
    }
}

impl From<HookError> for EngineError {
    fn from(err: HookError) -> Self {
        match err {
            HookError::Rejected { message } => Self::HookStopped { message },
            HookError::Failed { message } => Self::HookStopped { message },
        }
    }
}

impl EngineError {
    /// Converts a hook error raised by a validation hook, which maps to
    /// 422 instead of the plain 400 of other `before_*` hooks.
    pub fn from_validation_hook(err: HookError) -> Self {
        match err {
            HookError::Rejected { message } | HookError::Failed { message } => {
                Self::HookRejected { message }
            }
        }
    }
}
