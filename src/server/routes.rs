//! Router configuration for the web server.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Portals
        .route("/api/portals", post(handlers::create_portal).get(handlers::list_portals))
        .route(
            "/api/portals/:portal_id",
            get(handlers::get_portal).delete(handlers::delete_portal),
        )
        // Scan control surface
        .route("/api/scans/portal/:portal_id", post(handlers::start_scan))
        .route("/api/scans/active", get(handlers::active_scans))
        .route("/api/scans/history/:portal_id", get(handlers::scan_history))
        .route("/api/scans/:scan_id", get(handlers::get_scan))
        .route("/api/scans/:scan_id/stream", get(handlers::stream_scan))
        // Workflow control surface
        .route("/api/workflows/discovery", post(handlers::start_discovery_workflow))
        .route("/api/workflows/suspended", get(handlers::suspended_workflows))
        .route("/api/workflows/:workflow_id", get(handlers::get_workflow))
        .route("/api/workflows/:workflow_id/suspend", post(handlers::suspend_workflow))
        .route("/api/workflows/:workflow_id/resume", post(handlers::resume_workflow))
        .route("/api/workflows/:workflow_id/cancel", post(handlers::cancel_workflow))
        // Status
        .route("/api/status", get(handlers::api_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
