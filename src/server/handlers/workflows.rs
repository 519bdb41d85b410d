//! Workflow control surface.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use super::ApiError;
use crate::models::WorkflowState;
use crate::server::AppState;
use crate::workflow::{DiscoveryParams, HumanInput};

pub async fn start_discovery_workflow(
    State(state): State<AppState>,
    Json(params): Json<DiscoveryParams>,
) -> Result<(StatusCode, Json<WorkflowState>), ApiError> {
    let workflow = state.coordinator.execute_discovery_workflow(params).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn suspended_workflows(
    State(state): State<AppState>,
) -> Result<Json<Vec<WorkflowState>>, ApiError> {
    Ok(Json(state.coordinator.suspended_workflows()?))
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<WorkflowState>, ApiError> {
    Ok(Json(state.coordinator.status(&workflow_id)?))
}

/// Suspend request; the reason is mandatory.
#[derive(Debug, Deserialize)]
pub struct SuspendRequest {
    pub reason: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub instructions: Option<String>,
}

pub async fn suspend_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<SuspendRequest>,
) -> Result<Json<WorkflowState>, ApiError> {
    let workflow = state
        .coordinator
        .suspend(
            &workflow_id,
            &request.reason,
            request.data,
            request.instructions.as_deref(),
        )
        .await?;
    Ok(Json(workflow))
}

/// Resume request; human input is optional and phase-specific.
#[derive(Debug, Default, Deserialize)]
pub struct ResumeRequest {
    #[serde(default)]
    pub human_input: Option<HumanInput>,
}

pub async fn resume_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    body: Option<Json<ResumeRequest>>,
) -> Result<Json<WorkflowState>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let workflow = state
        .coordinator
        .resume(&workflow_id, request.human_input)
        .await?;
    Ok(Json(workflow))
}

pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<WorkflowState>, ApiError> {
    Ok(Json(state.coordinator.cancel(&workflow_id).await?))
}
