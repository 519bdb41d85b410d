//! Portal management and system status handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::ApiError;
use crate::models::{Portal, PortalFilters, PortalSelectors};
use crate::server::AppState;

/// Request body for portal creation; everything beyond the selectors
/// falls back to the model defaults.
#[derive(Debug, Deserialize)]
pub struct CreatePortalRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub base_url: String,
    pub selectors: PortalSelectors,
    #[serde(default)]
    pub filters: Option<PortalFilters>,
    #[serde(default)]
    pub requires_login: bool,
    #[serde(default)]
    pub login_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub scan_frequency_hours: Option<u32>,
    #[serde(default)]
    pub max_rfps_per_scan: Option<usize>,
}

pub async fn create_portal(
    State(state): State<AppState>,
    Json(request): Json<CreatePortalRequest>,
) -> Result<(StatusCode, Json<Portal>), ApiError> {
    let id = request
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if state.portals.get(&id)?.is_some() {
        return Err(ApiError::conflict(format!("portal {} already exists", id)));
    }

    let mut portal = Portal::new(id, request.name, request.base_url, request.selectors);
    portal.requires_login = request.requires_login;
    portal.login_url = request.login_url;
    portal.username = request.username;
    portal.password = request.password;
    if let Some(filters) = request.filters {
        portal.filters = filters;
    }
    if let Some(frequency) = request.scan_frequency_hours {
        portal.scan_frequency_hours = frequency;
    }
    if let Some(cap) = request.max_rfps_per_scan {
        portal.max_rfps_per_scan = cap;
    }

    state.portals.save(&portal)?;
    Ok((StatusCode::CREATED, Json(portal)))
}

pub async fn list_portals(
    State(state): State<AppState>,
) -> Result<Json<Vec<Portal>>, ApiError> {
    Ok(Json(state.portals.get_all()?))
}

pub async fn get_portal(
    State(state): State<AppState>,
    Path(portal_id): Path<String>,
) -> Result<Json<Portal>, ApiError> {
    state
        .portals
        .get(&portal_id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("portal not found: {}", portal_id)))
}

pub async fn delete_portal(
    State(state): State<AppState>,
    Path(portal_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.portals.delete(&portal_id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("portal not found: {}", portal_id)))
    }
}

pub async fn api_status(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let portals = state.portals.get_all()?.len();
    let rfps = state.rfps.count()?;
    let active_scans = state.registry.active_scans().await.len();
    let suspended = state
        .workflows
        .count_by_status(crate::models::WorkflowStatus::Suspended)?;

    Ok(Json(json!({
        "portals": portals,
        "rfps": rfps,
        "active_scans": active_scans,
        "suspended_workflows": suspended,
    })))
}
