//! Typed error handling for resource managers
//!
//! Every backend translates its native failures into [`ManagerError`] at the
//! manager boundary, so callers can match on the taxonomy instead of on
//! driver-specific errors.
//!
//! # Error Categories
//!
//! - `ItemNotFound`: lookup miss (read, update or delete of an unknown id)
//! - `DuplicateKey`: unique-constraint violation, carries the backend detail
//! - `BackendConflict`: any other persistence-layer rejection, optionally
//!   carrying the statement and parameters when debugging is enabled
//! - `UnsupportedComparator` / `Validation`: a `where` clause that cannot be
//!   turned into conditions for the resource
//!
//! # Example
//!
//! ```rust,ignore
//! match manager.read(&json!(42)).await {
//!     Ok(item) => println!("Found: {:?}", item),
//!     Err(ManagerError::ItemNotFound { id, .. }) => println!("{} not found", id),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Result alias used by every manager operation
pub type ManagerResult<T> = std::result::Result<T, ManagerError>;

/// The error taxonomy surfaced by managers
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No item with this id exists in the resource's collection
    #[error("{resource} with id '{id}' not found")]
    ItemNotFound { resource: String, id: String },

    /// A unique constraint rejected the write
    #[error("duplicate key in {resource}: {detail}")]
    DuplicateKey { resource: String, detail: String },

    /// The backend rejected the write for any other reason
    #[error("backend conflict in {resource}")]
    BackendConflict {
        resource: String,
        /// `{"statement": ..., "params": ...}`, only filled in debug mode
        debug_info: Option<Value>,
    },

    /// The field does not support the requested operator
    #[error("unsupported comparator '{operator}' for field '{field}'")]
    UnsupportedComparator { field: String, operator: String },

    /// A filter operand or field value could not be converted
    #[error("invalid value for field '{field}': {message}")]
    Validation { field: String, message: String },

    /// Manager registration failed (unknown column type, bad identifier...)
    #[error("configuration error: {0}")]
    Config(String),

    /// Unanticipated driver failure
    #[error("backend error: {0}")]
    Backend(String),
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ManagerError {
    pub fn not_found(resource: impl Into<String>, id: &Value) -> Self {
        ManagerError::ItemNotFound {
            resource: resource.into(),
            id: display_id(id),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ManagerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ManagerError::ItemNotFound { .. } => StatusCode::NOT_FOUND,
            ManagerError::DuplicateKey { .. } => StatusCode::CONFLICT,
            ManagerError::BackendConflict { .. } => StatusCode::CONFLICT,
            ManagerError::UnsupportedComparator { .. } => StatusCode::BAD_REQUEST,
            ManagerError::Validation { .. } => StatusCode::BAD_REQUEST,
            ManagerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ManagerError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ManagerError::ItemNotFound { .. } => "ITEM_NOT_FOUND",
            ManagerError::DuplicateKey { .. } => "DUPLICATE_KEY",
            ManagerError::BackendConflict { .. } => "BACKEND_CONFLICT",
            ManagerError::UnsupportedComparator { .. } => "UNSUPPORTED_COMPARATOR",
            ManagerError::Validation { .. } => "VALIDATION_ERROR",
            ManagerError::Config(_) => "CONFIG_ERROR",
            ManagerError::Backend(_) => "BACKEND_ERROR",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ManagerError::ItemNotFound { resource, id } => Some(serde_json::json!({
                "resource": resource,
                "id": id,
            })),
            ManagerError::DuplicateKey { detail, .. } => {
                Some(serde_json::json!({ "detail": detail }))
            }
            ManagerError::BackendConflict { debug_info, .. } => debug_info.clone(),
            ManagerError::UnsupportedComparator { field, operator } => Some(serde_json::json!({
                "field": field,
                "operator": operator,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ManagerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

/// Render an id for messages without the JSON quotes around strings
pub(crate) fn display_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
