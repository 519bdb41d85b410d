//! Workflow state models.
//!
//! A workflow is a multi-phase business process that may suspend for
//! human input and resume arbitrarily later, including after a process
//! restart. The durable `WorkflowState` row is the only authoritative
//! representation of a suspended workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered phases of an RFP workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Discovery,
    Analysis,
    Generation,
    Submission,
    Monitoring,
}

impl WorkflowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Analysis => "analysis",
            Self::Generation => "generation",
            Self::Submission => "submission",
            Self::Monitoring => "monitoring",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discovery" => Some(Self::Discovery),
            "analysis" => Some(Self::Analysis),
            "generation" => Some(Self::Generation),
            "submission" => Some(Self::Submission),
            "monitoring" => Some(Self::Monitoring),
            _ => None,
        }
    }

    /// The phase after this one, or None at the end of the chain.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Discovery => Some(Self::Analysis),
            Self::Analysis => Some(Self::Generation),
            Self::Generation => Some(Self::Submission),
            Self::Submission => Some(Self::Monitoring),
            Self::Monitoring => None,
        }
    }

    /// Progress fraction reached once this phase has finished.
    pub fn progress(&self) -> f64 {
        match self {
            Self::Discovery => 0.2,
            Self::Analysis => 0.4,
            Self::Generation => 0.6,
            Self::Submission => 0.8,
            Self::Monitoring => 1.0,
        }
    }
}

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "suspended" => Some(Self::Suspended),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Durable state of one workflow, checkpointed on every suspend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub current_phase: WorkflowPhase,
    pub status: WorkflowStatus,
    /// 0.0 to 1.0, monotonically non-decreasing.
    pub progress: f64,
    /// Opaque key/value bag carried across phases.
    pub context: Map<String, Value>,
    pub suspension_reason: Option<String>,
    pub suspension_data: Option<Value>,
    /// Free-text guidance for the human who will resume this workflow.
    pub resume_instructions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(workflow_id: String) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            current_phase: WorkflowPhase::Discovery,
            status: WorkflowStatus::Pending,
            progress: 0.0,
            context: Map::new(),
            suspension_reason: None,
            suspension_data: None,
            resume_instructions: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_chain_is_ordered() {
        let mut phase = WorkflowPhase::Discovery;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(next.progress() > phase.progress());
            seen.push(next);
            phase = next;
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(phase, WorkflowPhase::Monitoring);
    }

    #[test]
    fn phase_round_trips_through_str() {
        for phase in [
            WorkflowPhase::Discovery,
            WorkflowPhase::Analysis,
            WorkflowPhase::Generation,
            WorkflowPhase::Submission,
            WorkflowPhase::Monitoring,
        ] {
            assert_eq!(WorkflowPhase::from_str(phase.as_str()), Some(phase));
        }
    }
}
