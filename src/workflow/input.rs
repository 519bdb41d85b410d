//! Typed human input for workflow resumption.
//!
//! Each phase handler inspects the `action` discriminator to decide how
//! to proceed; resumption is phase-specific, never a blind restart.

use serde::{Deserialize, Serialize};

/// Human-supplied input merged into a workflow on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HumanInput {
    /// Replace the discovery search criteria and search again.
    OverrideCriteria {
        #[serde(default)]
        keyword: Option<String>,
        #[serde(default)]
        min_value: Option<f64>,
    },
    /// Approve a subset of analyzed candidates to carry forward.
    ApproveSelection { selected_ids: Vec<String> },
    /// Approve the submission and let the workflow finish.
    ApproveSubmission,
    /// Send the current phase back for rework.
    RequestChanges { notes: String },
    /// No decision; leave the workflow where it is.
    Acknowledge,
}
