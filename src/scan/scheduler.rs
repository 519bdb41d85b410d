//! Recurring scan scheduler.
//!
//! One timer task per portal, derived from its configured frequency,
//! plus a global backup sweep as a safety net for missed or
//! misconfigured schedules. Every trigger path checks the registry
//! guard first; busy ticks are skipped and logged, never queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::models::{Notification, NotificationKind, Portal, PortalStatus};
use crate::repository::{NotificationRepository, PortalRepository, RepositoryError};

use super::executor::PortalScanExecutor;
use super::registry::ScanRegistry;

/// Minimum supported recurrence, in hours.
pub const MIN_FREQUENCY_HOURS: u32 = 1;
/// Maximum supported recurrence (one week), in hours.
pub const MAX_FREQUENCY_HOURS: u32 = 168;

/// Snapshot of one portal's recurring job.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub portal_id: String,
    pub interval_hours: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub is_active: bool,
}

struct Job {
    meta: Arc<RwLock<ScheduledJob>>,
    /// None while paused.
    handle: Option<JoinHandle<()>>,
}

/// Owns the recurring triggers for all portals.
pub struct PortalScheduler {
    executor: Arc<PortalScanExecutor>,
    registry: Arc<ScanRegistry>,
    portals: Arc<PortalRepository>,
    notifications: Arc<NotificationRepository>,
    jobs: RwLock<HashMap<String, Job>>,
    backup: RwLock<Option<JoinHandle<()>>>,
    backup_interval: Duration,
}

impl PortalScheduler {
    pub fn new(
        executor: Arc<PortalScanExecutor>,
        registry: Arc<ScanRegistry>,
        portals: Arc<PortalRepository>,
        notifications: Arc<NotificationRepository>,
        backup_interval: Duration,
    ) -> Self {
        Self {
            executor,
            registry,
            portals,
            notifications,
            jobs: RwLock::new(HashMap::new()),
            backup: RwLock::new(None),
            backup_interval,
        }
    }

    /// Load all active portals, create one recurring job each, and
    /// start the global backup sweep.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), RepositoryError> {
        let portals = self.portals.get_active()?;
        let count = portals.len();
        for portal in portals {
            self.schedule_portal(&portal).await;
        }

        let scheduler = self.clone();
        let mut backup = self.backup.write().await;
        if let Some(old) = backup.take() {
            old.abort();
        }
        *backup = Some(tokio::spawn(async move {
            let period = scheduler.backup_interval;
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + period,
                period,
            );
            loop {
                interval.tick().await;
                scheduler.run_sweep().await;
            }
        }));

        tracing::info!(portals = count, "scheduler initialized");
        Ok(())
    }

    /// Schedule (or reschedule) a portal. Any prior job is cancelled
    /// first; jobs are replaced wholesale, never stacked.
    pub async fn schedule_portal(self: &Arc<Self>, portal: &Portal) {
        let interval_hours = portal
            .scan_frequency_hours
            .clamp(MIN_FREQUENCY_HOURS, MAX_FREQUENCY_HOURS);
        let period = Duration::from_secs(u64::from(interval_hours) * 3600);

        let meta = Arc::new(RwLock::new(ScheduledJob {
            portal_id: portal.id.clone(),
            interval_hours,
            last_run: None,
            next_run: Utc::now() + chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::zero()),
            is_active: true,
        }));
        let handle = self.spawn_job(portal.id.clone(), period, meta.clone());

        let mut jobs = self.jobs.write().await;
        if let Some(old) = jobs.insert(
            portal.id.clone(),
            Job {
                meta,
                handle: Some(handle),
            },
        ) {
            if let Some(old_handle) = old.handle {
                old_handle.abort();
            }
        }
        tracing::info!(portal_id = %portal.id, interval_hours, "portal scheduled");
    }

    fn spawn_job(
        self: &Arc<Self>,
        portal_id: String,
        period: Duration,
        meta: Arc<RwLock<ScheduledJob>>,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                {
                    let mut meta = meta.write().await;
                    meta.last_run = Some(Utc::now());
                    meta.next_run =
                        Utc::now() + chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::zero());
                }
                // The scan runs detached so that cancelling this job's
                // recurrence never aborts an in-flight scan.
                let scheduler = scheduler.clone();
                let portal_id = portal_id.clone();
                tokio::spawn(async move {
                    scheduler.run_tick(&portal_id).await;
                });
            }
        })
    }

    /// One trigger firing. Every failure mode is contained here; a
    /// tick can never take down its own or any other portal's
    /// recurrence.
    async fn run_tick(&self, portal_id: &str) {
        if self.registry.is_portal_scanning(portal_id).await {
            tracing::info!(portal_id, "tick skipped: scan already in progress");
            return;
        }

        match self.executor.scan(portal_id).await {
            Ok(outcome) if outcome.success => {
                tracing::info!(
                    portal_id,
                    discovered = outcome.discovered.len(),
                    "scheduled scan completed"
                );
            }
            Ok(outcome) => {
                tracing::warn!(
                    portal_id,
                    errors = outcome.errors.len(),
                    "scheduled scan completed with errors"
                );
            }
            Err(e) => {
                tracing::error!(portal_id, error = %e, "scheduled scan failed to run");
                let notification = Notification::new(
                    NotificationKind::SchedulerError,
                    format!("Scheduled scan failed for {}", portal_id),
                    e.to_string(),
                );
                if let Err(save_err) = self.notifications.save(&notification) {
                    tracing::error!(error = %save_err, "failed to save scheduler notification");
                }
            }
        }
    }

    /// One backup sweep firing. Like `run_tick`, every failure mode is
    /// contained at the job boundary and surfaced as a notification.
    /// scan_all applies the same already-scanning guard per portal, so
    /// the sweep can never double-scan.
    async fn run_sweep(&self) {
        tracing::info!("backup sweep starting");
        if let Err(e) = self.executor.scan_all().await {
            tracing::error!(error = %e, "backup sweep failed");
            let notification = Notification::new(
                NotificationKind::SchedulerError,
                "Backup sweep failed".to_string(),
                e.to_string(),
            );
            if let Err(save_err) = self.notifications.save(&notification) {
                tracing::error!(error = %save_err, "failed to save scheduler notification");
            }
        }
    }

    /// Re-read a portal's configuration and reschedule it. Removes the
    /// job when the portal is gone or deactivated.
    pub async fn update_schedule(self: &Arc<Self>, portal_id: &str) -> Result<(), RepositoryError> {
        match self.portals.get(portal_id)? {
            Some(portal) if portal.is_active => self.schedule_portal(&portal).await,
            _ => self.unschedule(portal_id).await,
        }
        Ok(())
    }

    /// Stop a portal's recurrence without forgetting the job. The
    /// portal row is marked `paused` so the status surfaces agree with
    /// the schedule.
    pub async fn pause(&self, portal_id: &str) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(portal_id) {
            if let Some(handle) = job.handle.take() {
                handle.abort();
            }
            job.meta.write().await.is_active = false;
            self.sync_portal_status(portal_id, PortalStatus::Paused);
            tracing::info!(portal_id, "schedule paused");
        }
    }

    /// Restart a paused portal's recurrence.
    pub async fn resume(self: &Arc<Self>, portal_id: &str) {
        let period = {
            let jobs = self.jobs.read().await;
            let Some(job) = jobs.get(portal_id) else {
                return;
            };
            let meta = job.meta.read().await;
            if meta.is_active && job.handle.is_some() {
                return;
            }
            Duration::from_secs(u64::from(meta.interval_hours) * 3600)
        };

        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(portal_id) {
            {
                let mut meta = job.meta.write().await;
                meta.is_active = true;
                meta.next_run =
                    Utc::now() + chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::zero());
            }
            job.handle = Some(self.spawn_job(portal_id.to_string(), period, job.meta.clone()));
            self.sync_portal_status(portal_id, PortalStatus::Active);
            tracing::info!(portal_id, "schedule resumed");
        }
    }

    /// Write a pause or resume through to the portal row. Resume only
    /// clears `paused`; an `error` status is left for the next scan
    /// outcome to settle.
    fn sync_portal_status(&self, portal_id: &str, to: PortalStatus) {
        match self.portals.get(portal_id) {
            Ok(Some(mut portal)) => {
                if to == PortalStatus::Active && portal.status != PortalStatus::Paused {
                    return;
                }
                portal.status = to;
                if let Err(e) = self.portals.save(&portal) {
                    tracing::warn!(portal_id, error = %e, "failed to update portal status");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(portal_id, error = %e, "failed to load portal"),
        }
    }

    /// Cancel and forget a portal's job.
    pub async fn unschedule(&self, portal_id: &str) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.remove(portal_id) {
            if let Some(handle) = job.handle {
                handle.abort();
            }
            tracing::info!(portal_id, "portal unscheduled");
        }
    }

    /// Cancel all recurrence. In-flight scans keep running; only their
    /// triggers stop.
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.write().await;
        for (_, job) in jobs.drain() {
            if let Some(handle) = job.handle {
                handle.abort();
            }
        }
        if let Some(handle) = self.backup.write().await.take() {
            handle.abort();
        }
        tracing::info!("scheduler shut down");
    }

    /// Snapshot of all jobs, for the status surfaces.
    pub async fn jobs(&self) -> Vec<ScheduledJob> {
        let jobs = self.jobs.read().await;
        let mut snapshot = Vec::with_capacity(jobs.len());
        for job in jobs.values() {
            snapshot.push(job.meta.read().await.clone());
        }
        snapshot
    }
}
