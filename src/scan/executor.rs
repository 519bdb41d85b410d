//! Portal scan executor.
//!
//! Implements one scan end to end: authenticate, extract, filter,
//! deduplicate, persist. All progress is reported through the scan
//! registry; extraction and per-item failures are recorded in the
//! session's error list rather than thrown, so a scan always reaches a
//! terminal state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::models::{
    DiscoveredRfp, LogLevel, Notification, NotificationKind, Portal, PortalStatus, Rfp,
    ScanOutcome,
};
use crate::repository::{
    NotificationRepository, PortalRepository, RepositoryError, RfpRepository,
};

use super::extract;
use super::registry::{RegistryError, ScanRegistry};

/// Errors that abort a scan before a session is opened.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("portal not found: {0}")]
    PortalNotFound(String),

    #[error(transparent)]
    AlreadyScanning(#[from] RegistryError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Page retrieval seam. The production implementation is a reqwest
/// client with a cookie store; tests substitute canned pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a listing page as HTML.
    async fn fetch(&self, url: &str) -> anyhow::Result<String>;

    /// Perform a form login for a portal that requires one.
    async fn login(&self, portal: &Portal) -> anyhow::Result<()>;
}

/// reqwest-backed fetcher with cookie persistence across the login and
/// subsequent listing requests.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .user_agent(concat!("rfpscout/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    async fn login(&self, portal: &Portal) -> anyhow::Result<()> {
        let login_url = portal
            .login_url
            .as_deref()
            .unwrap_or(portal.base_url.as_str());
        let form = [
            ("username", portal.username.as_deref().unwrap_or_default()),
            ("password", portal.password.as_deref().unwrap_or_default()),
        ];
        self.client
            .post(login_url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Executes scans against portals, reporting through the registry.
pub struct PortalScanExecutor {
    registry: Arc<ScanRegistry>,
    portals: Arc<PortalRepository>,
    rfps: Arc<RfpRepository>,
    notifications: Arc<NotificationRepository>,
    fetcher: Arc<dyn PageFetcher>,
    /// Politeness delay between portals in a sequential sweep.
    inter_scan_delay: Duration,
    /// Pagination bound per scan.
    max_pages: usize,
}

impl PortalScanExecutor {
    pub fn new(
        registry: Arc<ScanRegistry>,
        portals: Arc<PortalRepository>,
        rfps: Arc<RfpRepository>,
        notifications: Arc<NotificationRepository>,
        fetcher: Arc<dyn PageFetcher>,
        inter_scan_delay: Duration,
        max_pages: usize,
    ) -> Self {
        Self {
            registry,
            portals,
            rfps,
            notifications,
            fetcher,
            inter_scan_delay,
            max_pages: max_pages.max(1),
        }
    }

    /// Run one scan against a portal.
    ///
    /// Fails fast only when the portal is unknown or already scanning;
    /// everything after the session opens is recorded-not-thrown.
    pub async fn scan(&self, portal_id: &str) -> Result<ScanOutcome, ExecutorError> {
        let (scan_id, portal) = self.open_session(portal_id).await?;
        self.run_opened(&scan_id, &portal).await
    }

    /// Open a session and run the scan on a detached task, returning
    /// the scan id immediately so callers can subscribe to progress.
    pub async fn scan_detached(self: &Arc<Self>, portal_id: &str) -> Result<String, ExecutorError> {
        let (scan_id, portal) = self.open_session(portal_id).await?;
        let executor = self.clone();
        let detached_id = scan_id.clone();
        tokio::spawn(async move {
            if let Err(e) = executor.run_opened(&detached_id, &portal).await {
                tracing::error!(scan_id = %detached_id, error = %e, "detached scan failed");
            }
        });
        Ok(scan_id)
    }

    async fn open_session(&self, portal_id: &str) -> Result<(String, Portal), ExecutorError> {
        let portal = self
            .portals
            .get(portal_id)?
            .ok_or_else(|| ExecutorError::PortalNotFound(portal_id.to_string()))?;
        let scan_id = self.registry.start_scan(&portal.id, &portal.name).await?;
        Ok((scan_id, portal))
    }

    async fn run_opened(&self, scan_id: &str, portal: &Portal) -> Result<ScanOutcome, ExecutorError> {
        let auth_ok = self.authenticate(scan_id, portal).await;
        if auth_ok {
            let extracted = self.extract_pages(scan_id, portal).await;
            let survivors = self.filter_and_dedup(scan_id, portal, extracted).await;
            self.persist(scan_id, portal, &survivors).await;
        }
        self.finalize(scan_id, portal).await
    }

    /// Scan every active portal sequentially with a politeness delay
    /// between them. Portals already scanning are skipped, never queued.
    pub async fn scan_all(&self) -> Result<Vec<ScanOutcome>, ExecutorError> {
        let portals = self.portals.get_active()?;
        let mut outcomes = Vec::new();

        for (index, portal) in portals.iter().enumerate() {
            if self.registry.is_portal_scanning(&portal.id).await {
                tracing::info!(portal_id = %portal.id, "sweep skipping portal with scan in progress");
                continue;
            }
            if index > 0 {
                tokio::time::sleep(self.inter_scan_delay).await;
            }
            match self.scan(&portal.id).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(portal_id = %portal.id, error = %e, "sweep scan failed");
                    let notification = Notification::new(
                        NotificationKind::SchedulerError,
                        format!("Sweep scan failed for {}", portal.id),
                        e.to_string(),
                    );
                    if let Err(save_err) = self.notifications.save(&notification) {
                        tracing::warn!(error = %save_err, "failed to save sweep notification");
                    }
                }
            }
        }

        Ok(outcomes)
    }

    /// Returns false when a required login failed; the scan then goes
    /// straight to its terminal failed state.
    async fn authenticate(&self, scan_id: &str, portal: &Portal) -> bool {
        if !portal.requires_login {
            return true;
        }
        if portal.username.is_none() || portal.password.is_none() {
            self.registry
                .log(
                    scan_id,
                    LogLevel::Warn,
                    "login required but no credentials configured; scanning anonymously",
                )
                .await;
            return true;
        }

        self.registry
            .update_step(scan_id, "authenticating", 10, "Logging in to portal")
            .await;
        match self.fetcher.login(portal).await {
            Ok(()) => {
                self.registry
                    .log(scan_id, LogLevel::Info, "authentication succeeded")
                    .await;
                true
            }
            Err(e) => {
                self.registry
                    .log(
                        scan_id,
                        LogLevel::Error,
                        &format!("authentication failed: {}", e),
                    )
                    .await;
                false
            }
        }
    }

    async fn extract_pages(&self, scan_id: &str, portal: &Portal) -> Vec<DiscoveredRfp> {
        self.registry
            .update_step(scan_id, "extracting", 30, "Fetching listing pages")
            .await;

        let mut items = Vec::new();
        let mut page_url = portal.base_url.clone();

        for page in 0..self.max_pages {
            let html = match self.fetcher.fetch(&page_url).await {
                Ok(html) => html,
                Err(e) => {
                    self.registry
                        .log(
                            scan_id,
                            LogLevel::Error,
                            &format!("failed to fetch {}: {}", page_url, e),
                        )
                        .await;
                    break;
                }
            };

            match extract::extract_listings(&html, &page_url, &portal.id, &portal.selectors) {
                Ok(mut page_items) => {
                    self.registry
                        .log(
                            scan_id,
                            LogLevel::Info,
                            &format!("page {}: {} items extracted", page + 1, page_items.len()),
                        )
                        .await;
                    items.append(&mut page_items);
                }
                Err(e) => {
                    self.registry
                        .log(scan_id, LogLevel::Error, &format!("extraction failed: {}", e))
                        .await;
                    break;
                }
            }

            match extract::next_page_url(&html, &page_url, &portal.selectors) {
                Ok(Some(next)) if next != page_url => page_url = next,
                _ => break,
            }
        }

        items
    }

    async fn filter_and_dedup(
        &self,
        scan_id: &str,
        portal: &Portal,
        extracted: Vec<DiscoveredRfp>,
    ) -> Vec<DiscoveredRfp> {
        self.registry
            .update_step(scan_id, "filtering", 60, "Applying filters and deduplicating")
            .await;

        let mut survivors = Vec::new();
        for item in extracted {
            if !extract::passes_filters(&item, &portal.filters) {
                continue;
            }
            // Already-persisted URLs are dropped silently; this is the
            // exactly-once ingestion guarantee, not an error.
            match self.rfps.exists_by_source_url(&item.source_url) {
                Ok(true) => continue,
                Ok(false) => survivors.push(item),
                Err(e) => {
                    self.registry
                        .log(
                            scan_id,
                            LogLevel::Error,
                            &format!("dedup check failed for {}: {}", item.source_url, e),
                        )
                        .await;
                }
            }
        }

        if survivors.len() > portal.max_rfps_per_scan {
            self.registry
                .log(
                    scan_id,
                    LogLevel::Info,
                    &format!(
                        "truncating {} new items to per-scan cap {}",
                        survivors.len(),
                        portal.max_rfps_per_scan
                    ),
                )
                .await;
            survivors.truncate(portal.max_rfps_per_scan);
        }

        survivors
    }

    async fn persist(&self, scan_id: &str, portal: &Portal, survivors: &[DiscoveredRfp]) {
        self.registry
            .update_step(scan_id, "persisting", 85, "Saving discovered RFPs")
            .await;

        for item in survivors {
            match self.rfps.save(&Rfp::from_discovered(item)) {
                Ok(()) => {
                    self.registry.record_discovery(scan_id, item.clone()).await;
                    let notification = Notification::new(
                        NotificationKind::RfpDiscovered,
                        format!("New RFP: {}", item.title),
                        format!("Discovered on {}: {}", portal.name, item.source_url),
                    );
                    if let Err(e) = self.notifications.save(&notification) {
                        tracing::warn!(error = %e, "failed to save discovery notification");
                    }
                }
                Err(e) => {
                    self.registry
                        .log(
                            scan_id,
                            LogLevel::Error,
                            &format!("failed to persist {}: {}", item.source_url, e),
                        )
                        .await;
                }
            }
        }
    }

    /// Terminate the session and update portal telemetry. Telemetry is
    /// written on every outcome so portal health is always observable.
    async fn finalize(&self, scan_id: &str, portal: &Portal) -> Result<ScanOutcome, ExecutorError> {
        let session = self
            .registry
            .get_scan(scan_id)
            .await
            .ok_or_else(|| ExecutorError::PortalNotFound(portal.id.to_string()))?;
        let success = session.errors.is_empty();

        if success {
            self.registry
                .update_step(scan_id, "done", 100, "Scan complete")
                .await;
            self.registry.complete_scan(scan_id).await;
        } else {
            self.registry.fail_scan(scan_id).await;
            let notification = Notification::new(
                NotificationKind::ScanFailed,
                format!("Scan failed: {}", portal.name),
                session.errors.join("; "),
            );
            if let Err(e) = self.notifications.save(&notification) {
                tracing::warn!(error = %e, "failed to save scan-failure notification");
            }
        }

        let (status, error_count) = if success {
            (PortalStatus::Active, 0)
        } else {
            (PortalStatus::Error, portal.error_count + 1)
        };
        self.portals.update_scan_telemetry(
            &portal.id,
            Utc::now(),
            status,
            session.errors.last().map(String::as_str),
            error_count,
        )?;

        let session = self
            .registry
            .get_scan(scan_id)
            .await
            .unwrap_or(session);
        Ok(ScanOutcome {
            scan_id: session.scan_id.clone(),
            success,
            discovered: session.discovered.clone(),
            errors: session.errors.clone(),
            duration_ms: session.duration_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PortalSelectors, ScanStatus};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    const PAGE: &str = r#"
        <div class="opp"><h3 class="t">Bridge inspection services</h3>
          <a class="l" href="/rfp/1">x</a><span class="v">$1,500,000</span></div>
        <div class="opp"><h3 class="t">Janitorial services</h3>
          <a class="l" href="/rfp/2">x</a><span class="v">$5,000</span></div>
        <div class="opp"><h3 class="t">Bridge painting</h3>
          <a class="l" href="/rfp/3">x</a><span class="v">$900,000</span></div>
    "#;

    struct StubFetcher {
        pages: Mutex<HashMap<String, String>>,
        fail_login: bool,
    }

    impl StubFetcher {
        fn serving(url: &str, html: &str) -> Self {
            let mut pages = HashMap::new();
            pages.insert(url.to_string(), html.to_string());
            Self {
                pages: Mutex::new(pages),
                fail_login: false,
            }
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> anyhow::Result<String> {
            self.pages
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 for {}", url))
        }

        async fn login(&self, _portal: &Portal) -> anyhow::Result<()> {
            if self.fail_login {
                anyhow::bail!("invalid credentials")
            }
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        registry: Arc<ScanRegistry>,
        portals: Arc<PortalRepository>,
        rfps: Arc<RfpRepository>,
        notifications: Arc<NotificationRepository>,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        Fixture {
            registry: Arc::new(ScanRegistry::new(10)),
            portals: Arc::new(PortalRepository::new(&db).unwrap()),
            rfps: Arc::new(RfpRepository::new(&db).unwrap()),
            notifications: Arc::new(NotificationRepository::new(&db).unwrap()),
            _dir: dir,
        }
    }

    fn executor(fx: &Fixture, fetcher: StubFetcher) -> PortalScanExecutor {
        PortalScanExecutor::new(
            fx.registry.clone(),
            fx.portals.clone(),
            fx.rfps.clone(),
            fx.notifications.clone(),
            Arc::new(fetcher),
            Duration::from_millis(1),
            3,
        )
    }

    fn test_portal() -> Portal {
        Portal::new(
            "state-gov".to_string(),
            "State Procurement".to_string(),
            "https://procure.example.gov/listings".to_string(),
            PortalSelectors {
                item: ".opp".to_string(),
                title: ".t".to_string(),
                link: Some("a.l".to_string()),
                value: Some(".v".to_string()),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn successful_scan_persists_and_updates_telemetry() {
        let fx = fixture();
        let portal = test_portal();
        fx.portals.save(&portal).unwrap();

        let executor = executor(&fx, StubFetcher::serving(&portal.base_url, PAGE));
        let outcome = executor.scan("state-gov").await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.discovered.len(), 3);
        assert!(outcome.errors.is_empty());
        assert_eq!(fx.rfps.count().unwrap(), 3);

        let portal = fx.portals.get("state-gov").unwrap().unwrap();
        assert_eq!(portal.status, PortalStatus::Active);
        assert_eq!(portal.error_count, 0);
        assert!(portal.last_scanned.is_some());

        // One discovery notification per new RFP.
        let notifications = fx.notifications.recent(10).unwrap();
        assert_eq!(notifications.len(), 3);
    }

    #[tokio::test]
    async fn rescan_drops_known_urls_silently() {
        let fx = fixture();
        let portal = test_portal();
        fx.portals.save(&portal).unwrap();

        let executor = executor(&fx, StubFetcher::serving(&portal.base_url, PAGE));
        executor.scan("state-gov").await.unwrap();
        let outcome = executor.scan("state-gov").await.unwrap();

        assert!(outcome.success);
        assert!(outcome.discovered.is_empty());
        assert_eq!(fx.rfps.count().unwrap(), 3);
    }

    #[tokio::test]
    async fn filters_and_cap_apply_before_persistence() {
        let fx = fixture();
        let mut portal = test_portal();
        portal.filters.min_value = Some(100_000.0);
        portal.max_rfps_per_scan = 1;
        fx.portals.save(&portal).unwrap();

        let executor = executor(&fx, StubFetcher::serving(&portal.base_url, PAGE));
        let outcome = executor.scan("state-gov").await.unwrap();

        // Janitorial is filtered by value; cap keeps one of the two bridges.
        assert!(outcome.success);
        assert_eq!(outcome.discovered.len(), 1);
        assert_eq!(fx.rfps.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn auth_failure_reaches_failed_terminal_state() {
        let fx = fixture();
        let mut portal = test_portal();
        portal.requires_login = true;
        portal.username = Some("svc".to_string());
        portal.password = Some("hunter2".to_string());
        portal.error_count = 2;
        fx.portals.save(&portal).unwrap();

        let mut fetcher = StubFetcher::serving(&portal.base_url, PAGE);
        fetcher.fail_login = true;
        let executor = executor(&fx, fetcher);
        let outcome = executor.scan("state-gov").await.unwrap();

        assert!(!outcome.success);
        assert!(!outcome.errors.is_empty());
        assert!(outcome.discovered.is_empty());
        assert_eq!(fx.rfps.count().unwrap(), 0);

        let portal = fx.portals.get("state-gov").unwrap().unwrap();
        assert_eq!(portal.status, PortalStatus::Error);
        assert_eq!(portal.error_count, 3);

        let session = fx.registry.get_scan(&outcome.scan_id).await.unwrap();
        assert_eq!(session.status, ScanStatus::Failed);
    }

    #[tokio::test]
    async fn fetch_failure_fails_the_scan_but_terminates_it() {
        let fx = fixture();
        fx.portals.save(&test_portal()).unwrap();

        let executor = executor(&fx, StubFetcher::serving("https://elsewhere.test", PAGE));
        let outcome = executor.scan("state-gov").await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.errors.len(), 1);
        assert!(!fx.registry.is_portal_scanning("state-gov").await);
    }

    #[tokio::test]
    async fn zero_items_is_still_a_successful_scan() {
        let fx = fixture();
        let portal = test_portal();
        fx.portals.save(&portal).unwrap();

        let executor = executor(
            &fx,
            StubFetcher::serving(&portal.base_url, "<html><body></body></html>"),
        );
        let outcome = executor.scan("state-gov").await.unwrap();

        assert!(outcome.success);
        assert!(outcome.discovered.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn scan_conflicts_with_running_session() {
        let fx = fixture();
        let portal = test_portal();
        fx.portals.save(&portal).unwrap();
        fx.registry.start_scan("state-gov", "held").await.unwrap();

        let executor = executor(&fx, StubFetcher::serving(&portal.base_url, PAGE));
        let result = executor.scan("state-gov").await;
        assert!(matches!(result, Err(ExecutorError::AlreadyScanning(_))));
    }

    #[tokio::test]
    async fn unknown_portal_is_an_error() {
        let fx = fixture();
        let executor = executor(&fx, StubFetcher::serving("https://x.test", PAGE));
        assert!(matches!(
            executor.scan("missing").await,
            Err(ExecutorError::PortalNotFound(_))
        ));
    }

    struct DeletingFetcher {
        portals: Arc<PortalRepository>,
        doomed: String,
    }

    #[async_trait]
    impl PageFetcher for DeletingFetcher {
        async fn fetch(&self, _url: &str) -> anyhow::Result<String> {
            let _ = self.portals.delete(&self.doomed);
            Ok("<html><body></body></html>".to_string())
        }

        async fn login(&self, _portal: &Portal) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn sweep_scan_error_is_recorded_as_notification() {
        let fx = fixture();
        fx.portals.save(&test_portal()).unwrap();
        let mut other = test_portal();
        other.id = "city-gov".to_string();
        other.base_url = "https://city.example.gov/bids".to_string();
        fx.portals.save(&other).unwrap();

        // The second portal disappears while the first is being
        // scanned, so its sweep entry fails after the guard check.
        let executor = PortalScanExecutor::new(
            fx.registry.clone(),
            fx.portals.clone(),
            fx.rfps.clone(),
            fx.notifications.clone(),
            Arc::new(DeletingFetcher {
                portals: fx.portals.clone(),
                doomed: "city-gov".to_string(),
            }),
            Duration::from_millis(1),
            3,
        );

        let outcomes = executor.scan_all().await.unwrap();
        assert_eq!(outcomes.len(), 1);

        let kinds: Vec<_> = fx
            .notifications
            .recent(10)
            .unwrap()
            .into_iter()
            .map(|n| n.kind)
            .collect();
        assert!(kinds.contains(&NotificationKind::SchedulerError));
    }

    #[tokio::test]
    async fn scan_all_skips_busy_portals() {
        let fx = fixture();
        let portal = test_portal();
        fx.portals.save(&portal).unwrap();
        let mut other = test_portal();
        other.id = "city-gov".to_string();
        other.base_url = "https://city.example.gov/bids".to_string();
        fx.portals.save(&other).unwrap();

        // Hold a running session for the first portal.
        fx.registry.start_scan("state-gov", "held").await.unwrap();

        let mut fetcher = StubFetcher::serving(&portal.base_url, PAGE);
        fetcher
            .pages
            .lock()
            .unwrap()
            .insert(other.base_url.clone(), PAGE.to_string());
        let executor = executor(&fx, fetcher);

        let outcomes = executor.scan_all().await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].discovered[0].portal_id, "city-gov");
        // The held session is untouched.
        assert!(fx.registry.is_portal_scanning("state-gov").await);
    }
}
