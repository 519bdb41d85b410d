//! Notification models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RfpDiscovered,
    ScanFailed,
    SchedulerError,
    WorkflowSuspended,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RfpDiscovered => "rfp_discovered",
            Self::ScanFailed => "scan_failed",
            Self::SchedulerError => "scheduler_error",
            Self::WorkflowSuspended => "workflow_suspended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "rfp_discovered" => Some(Self::RfpDiscovered),
            "scan_failed" => Some(Self::ScanFailed),
            "scheduler_error" => Some(Self::SchedulerError),
            "workflow_suspended" => Some(Self::WorkflowSuspended),
            _ => None,
        }
    }
}

/// An operator-facing notification row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: String, body: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title,
            body,
            read: false,
            created_at: Utc::now(),
        }
    }
}
