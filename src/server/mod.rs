//! Web server exposing the scan and workflow control surfaces.
//!
//! JSON API plus a per-scan SSE stream. Starting the server also
//! starts the portal scheduler; stopping it leaves in-flight scans to
//! finish on their own.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::repository::{
    NotificationRepository, PortalRepository, RfpRepository, WorkflowRepository,
};
use crate::scan::{HttpFetcher, PortalScanExecutor, PortalScheduler, ScanRegistry};
use crate::workflow::WorkflowCoordinator;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ScanRegistry>,
    pub executor: Arc<PortalScanExecutor>,
    pub coordinator: Arc<WorkflowCoordinator>,
    pub portals: Arc<PortalRepository>,
    pub rfps: Arc<RfpRepository>,
    pub workflows: Arc<WorkflowRepository>,
    pub notifications: Arc<NotificationRepository>,
}

impl AppState {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let db = settings.db_path();
        let registry = Arc::new(ScanRegistry::new(settings.config.history_cap));
        let portals = Arc::new(PortalRepository::new(&db)?);
        let rfps = Arc::new(RfpRepository::new(&db)?);
        let workflows = Arc::new(WorkflowRepository::new(&db)?);
        let notifications = Arc::new(NotificationRepository::new(&db)?);

        let fetcher = Arc::new(HttpFetcher::new(settings.request_timeout())?);
        let executor = Arc::new(PortalScanExecutor::new(
            registry.clone(),
            portals.clone(),
            rfps.clone(),
            notifications.clone(),
            fetcher,
            settings.inter_scan_delay(),
            settings.config.max_pages_per_scan,
        ));
        let coordinator = Arc::new(WorkflowCoordinator::new(
            workflows.clone(),
            rfps.clone(),
            notifications.clone(),
        ));

        Ok(Self {
            registry,
            executor,
            coordinator,
            portals,
            rfps,
            workflows,
            notifications,
        })
    }
}

/// Start the web server and the portal scheduler.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(settings)?;

    let scheduler = Arc::new(PortalScheduler::new(
        state.executor.clone(),
        state.registry.clone(),
        state.portals.clone(),
        state.notifications.clone(),
        settings.backup_sweep_interval(),
    ));
    scheduler.initialize().await?;

    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    scheduler.shutdown().await;
    Ok(())
}
