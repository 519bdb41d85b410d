//! Portal models for procurement listing sites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operational status of a portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalStatus {
    Active,
    Error,
    Paused,
}

impl PortalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Error => "error",
            Self::Paused => "paused",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "error" => Some(Self::Error),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

/// CSS selectors used to pull listing fields out of a portal page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortalSelectors {
    /// Selector matching one listing item (the iteration root).
    pub item: String,
    /// Title selector, relative to the item.
    pub title: String,
    /// Agency/buyer selector (optional).
    #[serde(default)]
    pub agency: Option<String>,
    /// Link selector; the href becomes the RFP source URL.
    #[serde(default)]
    pub link: Option<String>,
    /// Deadline text selector (optional).
    #[serde(default)]
    pub deadline: Option<String>,
    /// Estimated-value text selector (optional).
    #[serde(default)]
    pub value: Option<String>,
    /// "Next page" link selector for paginated listings (optional).
    #[serde(default)]
    pub next_page: Option<String>,
}

/// Item filters applied before an extracted listing is considered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortalFilters {
    /// Drop items whose estimated value is below this (when both are known).
    #[serde(default)]
    pub min_value: Option<f64>,
    /// Drop items whose estimated value is above this (when both are known).
    #[serde(default)]
    pub max_value: Option<f64>,
    /// Keep only items whose title contains at least one of these.
    #[serde(default)]
    pub include_keywords: Vec<String>,
    /// Drop items whose title contains any of these.
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
}

/// A procurement portal polled for new RFPs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portal {
    /// Unique identifier for this portal.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Listing page URL.
    pub base_url: String,
    /// Whether a login is required before the listing is visible.
    pub requires_login: bool,
    /// Login form URL (defaults to base_url when absent).
    pub login_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Field extraction selectors.
    pub selectors: PortalSelectors,
    /// Pre-ingest item filters.
    pub filters: PortalFilters,
    /// How often to scan, in hours.
    pub scan_frequency_hours: u32,
    /// Hard cap on items ingested per scan.
    pub max_rfps_per_scan: usize,
    /// Whether the scheduler should run this portal at all.
    pub is_active: bool,
    pub status: PortalStatus,
    pub last_scanned: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Consecutive-failure telemetry; never resets the schedule by itself.
    pub error_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Portal {
    /// Create a new active portal with default filters and caps.
    pub fn new(id: String, name: String, base_url: String, selectors: PortalSelectors) -> Self {
        Self {
            id,
            name,
            base_url,
            requires_login: false,
            login_url: None,
            username: None,
            password: None,
            selectors,
            filters: PortalFilters::default(),
            scan_frequency_hours: 24,
            max_rfps_per_scan: 50,
            is_active: true,
            status: PortalStatus::Active,
            last_scanned: None,
            last_error: None,
            error_count: 0,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [PortalStatus::Active, PortalStatus::Error, PortalStatus::Paused] {
            assert_eq!(PortalStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(PortalStatus::from_str("bogus"), None);
    }
}
