//! RFP models for discovered procurement opportunities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An opportunity extracted from a portal page, before persistence.
///
/// `source_url` is the deduplication key: one persisted RFP per URL,
/// for the lifetime of the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredRfp {
    pub title: String,
    pub agency: Option<String>,
    pub source_url: String,
    pub deadline: Option<String>,
    pub estimated_value: Option<f64>,
    pub portal_id: String,
}

/// A persisted procurement opportunity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rfp {
    pub id: String,
    pub portal_id: String,
    pub title: String,
    pub agency: Option<String>,
    pub source_url: String,
    pub deadline: Option<String>,
    pub estimated_value: Option<f64>,
    /// Lifecycle marker; always "discovered" at ingest time.
    pub status: String,
    pub discovered_at: DateTime<Utc>,
}

impl Rfp {
    /// Build a persisted record from an extracted item.
    pub fn from_discovered(discovered: &DiscoveredRfp) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            portal_id: discovered.portal_id.clone(),
            title: discovered.title.clone(),
            agency: discovered.agency.clone(),
            source_url: discovered.source_url.clone(),
            deadline: discovered.deadline.clone(),
            estimated_value: discovered.estimated_value,
            status: "discovered".to_string(),
            discovered_at: Utc::now(),
        }
    }
}
