//! HTTP handlers.

mod portals;
mod scans;
mod workflows;

pub use portals::{api_status, create_portal, delete_portal, get_portal, list_portals};
pub use scans::{active_scans, get_scan, scan_history, start_scan, stream_scan};
pub use workflows::{
    cancel_workflow, get_workflow, resume_workflow, start_discovery_workflow,
    suspend_workflow, suspended_workflows,
};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::repository::RepositoryError;
use crate::scan::ExecutorError;
use crate::workflow::WorkflowError;

/// JSON error response with an appropriate status code.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        tracing::error!(error = %e, "repository error in handler");
        Self::internal(e.to_string())
    }
}

impl From<ExecutorError> for ApiError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::PortalNotFound(_) => Self::not_found(e.to_string()),
            ExecutorError::AlreadyScanning(_) => Self::conflict(e.to_string()),
            ExecutorError::Repository(inner) => inner.into(),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::NotFound(_) => Self::not_found(e.to_string()),
            WorkflowError::NotSuspended { .. } | WorkflowError::Terminal(_) => {
                Self::conflict(e.to_string())
            }
            WorkflowError::Repository(inner) => inner.into(),
            WorkflowError::Serialization(inner) => Self::internal(inner.to_string()),
        }
    }
}
