//! Scan session models.
//!
//! A scan session is one discovery execution against a portal, with its
//! own progress state and ordered event log. Sessions are owned by the
//! scan registry; everything else mutates them through its API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DiscoveredRfp;

/// Lifecycle status of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Log severity for scan events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// The step a scan is currently on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStep {
    pub name: String,
    /// 0 to 100.
    pub progress: u8,
    pub message: String,
}

/// One entry in a session's event log, as streamed to subscribers.
///
/// Serialized with a `type` discriminator so SSE consumers can switch on
/// the event kind directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    Step {
        step: String,
        progress: u8,
        message: String,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    RfpDiscovered {
        rfp: DiscoveredRfp,
    },
    ScanCompleted {
        discovered: usize,
        errors: usize,
        duration_ms: u64,
    },
    ScanFailed {
        errors: Vec<String>,
        duration_ms: u64,
    },
}

/// A timestamped event-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ScanEvent,
}

/// One scan execution against a portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSession {
    pub scan_id: String,
    pub portal_id: String,
    pub portal_name: String,
    pub status: ScanStatus,
    pub current_step: ScanStep,
    /// Ordered, append-only event log.
    pub events: Vec<ScanEventRecord>,
    /// Summaries of RFPs discovered so far (live counters).
    pub discovered: Vec<DiscoveredRfp>,
    /// Error messages accumulated during the scan.
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanSession {
    pub fn new(portal_id: String, portal_name: String) -> Self {
        Self {
            scan_id: uuid::Uuid::new_v4().to_string(),
            portal_id,
            portal_name,
            status: ScanStatus::Running,
            current_step: ScanStep {
                name: "starting".to_string(),
                progress: 0,
                message: "Scan starting".to_string(),
            },
            events: Vec::new(),
            discovered: Vec::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Milliseconds elapsed since the scan started.
    pub fn duration_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Final outcome of one scan execution.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub scan_id: String,
    pub success: bool,
    pub discovered: Vec<DiscoveredRfp>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let event = ScanEvent::Step {
            step: "extracting".to_string(),
            progress: 40,
            message: "Extracting listings".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step");
        assert_eq!(json["progress"], 40);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ScanStatus::Running.is_terminal());
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
    }
}
