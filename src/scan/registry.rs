//! Scan session registry.
//!
//! Owns the lifecycle and event log of every scan. The executor is the
//! single writer; any number of subscribers tail a per-scan broadcast
//! channel. Terminal sessions move into a capped per-portal history
//! ring so the active map never grows unbounded.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use crate::models::{
    DiscoveredRfp, LogLevel, ScanEvent, ScanEventRecord, ScanSession, ScanStatus, ScanStep,
};

/// Broadcast buffer per scan; a subscriber lagging past this many
/// events misses the gap rather than blocking the writer.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors surfaced by the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("portal {0} already has a scan in progress")]
    AlreadyScanning(String),
}

struct ActiveScan {
    session: ScanSession,
    tx: broadcast::Sender<ScanEventRecord>,
}

#[derive(Default)]
struct Inner {
    /// Non-terminal sessions keyed by scan id.
    active: HashMap<String, ActiveScan>,
    /// portal_id -> scan_id for the running scan, enforcing the
    /// one-scan-per-portal invariant.
    by_portal: HashMap<String, String>,
    /// Terminal sessions per portal, oldest first.
    history: HashMap<String, VecDeque<ScanSession>>,
}

/// A subscription to one scan: the full snapshot at subscribe time,
/// plus a receiver for every event after it. `events` is None when the
/// scan was already terminal.
pub struct ScanSubscription {
    pub snapshot: ScanSession,
    pub events: Option<broadcast::Receiver<ScanEventRecord>>,
}

/// Registry of in-flight and historical scan sessions.
pub struct ScanRegistry {
    inner: RwLock<Inner>,
    history_cap: usize,
}

impl ScanRegistry {
    pub fn new(history_cap: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            history_cap: history_cap.max(1),
        }
    }

    /// Open a scan session for a portal.
    ///
    /// Fails if the portal already has a non-terminal session.
    pub async fn start_scan(
        &self,
        portal_id: &str,
        portal_name: &str,
    ) -> Result<String, RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.by_portal.contains_key(portal_id) {
            return Err(RegistryError::AlreadyScanning(portal_id.to_string()));
        }

        let session = ScanSession::new(portal_id.to_string(), portal_name.to_string());
        let scan_id = session.scan_id.clone();
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        inner
            .by_portal
            .insert(portal_id.to_string(), scan_id.clone());
        inner.active.insert(scan_id.clone(), ActiveScan { session, tx });

        tracing::info!(portal_id, scan_id, "scan session started");
        Ok(scan_id)
    }

    /// Record a step change. Unknown scan ids are logged and ignored so
    /// a stray late call from an aborted executor can never crash the
    /// caller.
    pub async fn update_step(&self, scan_id: &str, step: &str, progress: u8, message: &str) {
        let mut inner = self.inner.write().await;
        let Some(active) = inner.active.get_mut(scan_id) else {
            tracing::warn!(scan_id, step, "step update for unknown scan ignored");
            return;
        };
        active.session.current_step = ScanStep {
            name: step.to_string(),
            progress: progress.min(100),
            message: message.to_string(),
        };
        Self::emit(
            active,
            ScanEvent::Step {
                step: step.to_string(),
                progress: progress.min(100),
                message: message.to_string(),
            },
        );
    }

    /// Append a log entry. Error-level entries also land in the
    /// session's error list.
    pub async fn log(&self, scan_id: &str, level: LogLevel, message: &str) {
        let mut inner = self.inner.write().await;
        let Some(active) = inner.active.get_mut(scan_id) else {
            tracing::warn!(scan_id, message, "log for unknown scan ignored");
            return;
        };
        if level == LogLevel::Error {
            active.session.errors.push(message.to_string());
        }
        Self::emit(
            active,
            ScanEvent::Log {
                level,
                message: message.to_string(),
            },
        );
    }

    /// Record a discovered RFP for live counters.
    pub async fn record_discovery(&self, scan_id: &str, rfp: DiscoveredRfp) {
        let mut inner = self.inner.write().await;
        let Some(active) = inner.active.get_mut(scan_id) else {
            tracing::warn!(scan_id, "discovery for unknown scan ignored");
            return;
        };
        active.session.discovered.push(rfp.clone());
        Self::emit(active, ScanEvent::RfpDiscovered { rfp });
    }

    /// Mark a scan completed and move it to history. A scan that is
    /// already terminal is left untouched.
    pub async fn complete_scan(&self, scan_id: &str) {
        self.terminate(scan_id, ScanStatus::Completed).await;
    }

    /// Mark a scan failed and move it to history. Idempotent like
    /// `complete_scan`.
    pub async fn fail_scan(&self, scan_id: &str) {
        self.terminate(scan_id, ScanStatus::Failed).await;
    }

    async fn terminate(&self, scan_id: &str, status: ScanStatus) {
        let mut inner = self.inner.write().await;
        let Some(mut active) = inner.active.remove(scan_id) else {
            // Already terminal (or never existed); double termination
            // is a no-op.
            return;
        };

        active.session.status = status;
        active.session.completed_at = Some(Utc::now());
        let duration_ms = active.session.duration_ms();
        let event = match status {
            ScanStatus::Completed => ScanEvent::ScanCompleted {
                discovered: active.session.discovered.len(),
                errors: active.session.errors.len(),
                duration_ms,
            },
            _ => ScanEvent::ScanFailed {
                errors: active.session.errors.clone(),
                duration_ms,
            },
        };
        Self::emit(&mut active, event);

        inner.by_portal.remove(&active.session.portal_id);

        let ring = inner
            .history
            .entry(active.session.portal_id.clone())
            .or_default();
        ring.push_back(active.session);
        while ring.len() > self.history_cap {
            ring.pop_front();
        }
    }

    /// Look up a session by id, active or historical.
    pub async fn get_scan(&self, scan_id: &str) -> Option<ScanSession> {
        let inner = self.inner.read().await;
        if let Some(active) = inner.active.get(scan_id) {
            return Some(active.session.clone());
        }
        inner
            .history
            .values()
            .flat_map(|ring| ring.iter())
            .find(|s| s.scan_id == scan_id)
            .cloned()
    }

    /// All non-terminal sessions.
    pub async fn active_scans(&self) -> Vec<ScanSession> {
        let inner = self.inner.read().await;
        inner.active.values().map(|a| a.session.clone()).collect()
    }

    /// Terminal sessions for a portal, newest first, at most `limit`.
    pub async fn scan_history(&self, portal_id: &str, limit: usize) -> Vec<ScanSession> {
        let inner = self.inner.read().await;
        inner
            .history
            .get(portal_id)
            .map(|ring| ring.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the portal has a non-terminal session.
    pub async fn is_portal_scanning(&self, portal_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.by_portal.contains_key(portal_id)
    }

    /// Subscribe to a scan: current snapshot first, then every
    /// subsequent event in order. Returns None for unknown scan ids.
    /// Dropping the receiver never affects the scan.
    pub async fn subscribe(&self, scan_id: &str) -> Option<ScanSubscription> {
        let inner = self.inner.read().await;
        if let Some(active) = inner.active.get(scan_id) {
            return Some(ScanSubscription {
                snapshot: active.session.clone(),
                events: Some(active.tx.subscribe()),
            });
        }
        // Terminal sessions have no live tail; the snapshot already
        // contains the final event.
        inner
            .history
            .values()
            .flat_map(|ring| ring.iter())
            .find(|s| s.scan_id == scan_id)
            .map(|s| ScanSubscription {
                snapshot: s.clone(),
                events: None,
            })
    }

    fn emit(active: &mut ActiveScan, event: ScanEvent) {
        let record = ScanEventRecord {
            at: Utc::now(),
            event,
        };
        active.session.events.push(record.clone());
        // No receivers is fine; the log is still appended.
        let _ = active.tx.send(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_non_terminal_session_per_portal() {
        let registry = ScanRegistry::new(10);
        let scan_id = registry.start_scan("p1", "Portal One").await.unwrap();
        assert!(registry.is_portal_scanning("p1").await);

        let second = registry.start_scan("p1", "Portal One").await;
        assert!(matches!(second, Err(RegistryError::AlreadyScanning(_))));

        // A different portal is unaffected.
        registry.start_scan("p2", "Portal Two").await.unwrap();

        registry.complete_scan(&scan_id).await;
        assert!(!registry.is_portal_scanning("p1").await);
        registry.start_scan("p1", "Portal One").await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_then_tail_ordering() {
        let registry = ScanRegistry::new(10);
        let scan_id = registry.start_scan("p1", "Portal One").await.unwrap();

        registry
            .update_step(&scan_id, "authenticating", 10, "Logging in")
            .await;

        let sub = registry.subscribe(&scan_id).await.unwrap();
        assert_eq!(sub.snapshot.events.len(), 1);
        assert_eq!(sub.snapshot.current_step.name, "authenticating");
        let mut rx = sub.events.unwrap();

        registry
            .update_step(&scan_id, "extracting", 40, "Extracting listings")
            .await;
        registry.log(&scan_id, LogLevel::Info, "found 3 items").await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.event, ScanEvent::Step { ref step, .. } if step == "extracting"));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.event, ScanEvent::Log { .. }));

        // A second subscriber gets the fuller snapshot plus its own tail.
        let sub2 = registry.subscribe(&scan_id).await.unwrap();
        assert_eq!(sub2.snapshot.events.len(), 3);

        registry.complete_scan(&scan_id).await;
        let last = rx.recv().await.unwrap();
        assert!(matches!(last.event, ScanEvent::ScanCompleted { .. }));
    }

    #[tokio::test]
    async fn error_logs_accumulate_in_error_list() {
        let registry = ScanRegistry::new(10);
        let scan_id = registry.start_scan("p1", "Portal One").await.unwrap();

        registry.log(&scan_id, LogLevel::Info, "ok").await;
        registry.log(&scan_id, LogLevel::Error, "auth failed").await;
        registry.fail_scan(&scan_id).await;

        let session = registry.get_scan(&scan_id).await.unwrap();
        assert_eq!(session.status, ScanStatus::Failed);
        assert_eq!(session.errors, vec!["auth failed".to_string()]);
        assert!(session.completed_at.is_some());
    }

    #[tokio::test]
    async fn unknown_scan_updates_are_ignored() {
        let registry = ScanRegistry::new(10);
        // None of these may panic or error.
        registry.update_step("nope", "step", 10, "msg").await;
        registry.log("nope", LogLevel::Error, "msg").await;
        registry.complete_scan("nope").await;
        assert!(registry.get_scan("nope").await.is_none());
    }

    #[tokio::test]
    async fn double_termination_is_a_noop() {
        let registry = ScanRegistry::new(10);
        let scan_id = registry.start_scan("p1", "Portal One").await.unwrap();
        registry.complete_scan(&scan_id).await;
        registry.fail_scan(&scan_id).await;

        let session = registry.get_scan(&scan_id).await.unwrap();
        assert_eq!(session.status, ScanStatus::Completed);
        assert_eq!(registry.scan_history("p1", 10).await.len(), 1);
    }

    #[tokio::test]
    async fn history_evicts_oldest_beyond_cap() {
        let registry = ScanRegistry::new(2);
        let mut ids = Vec::new();
        for _ in 0..4 {
            let scan_id = registry.start_scan("p1", "Portal One").await.unwrap();
            registry.complete_scan(&scan_id).await;
            ids.push(scan_id);
        }

        let history = registry.scan_history("p1", 10).await;
        assert_eq!(history.len(), 2);
        // Newest first; the two oldest were evicted.
        assert_eq!(history[0].scan_id, ids[3]);
        assert_eq!(history[1].scan_id, ids[2]);
        assert!(registry.get_scan(&ids[0]).await.is_none());
    }

    #[tokio::test]
    async fn subscribing_to_terminal_scan_yields_snapshot_only() {
        let registry = ScanRegistry::new(10);
        let scan_id = registry.start_scan("p1", "Portal One").await.unwrap();
        registry.complete_scan(&scan_id).await;

        let sub = registry.subscribe(&scan_id).await.unwrap();
        assert!(sub.events.is_none());
        assert_eq!(sub.snapshot.status, ScanStatus::Completed);
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_affect_the_scan() {
        let registry = ScanRegistry::new(10);
        let scan_id = registry.start_scan("p1", "Portal One").await.unwrap();

        let sub = registry.subscribe(&scan_id).await.unwrap();
        drop(sub);

        registry.update_step(&scan_id, "persisting", 90, "Saving").await;
        let session = registry.get_scan(&scan_id).await.unwrap();
        assert_eq!(session.current_step.name, "persisting");
        assert_eq!(session.status, ScanStatus::Running);
    }
}
