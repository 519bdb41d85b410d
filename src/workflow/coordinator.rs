//! Workflow coordinator.
//!
//! Runs the ordered phase chain and checkpoints to the workflow
//! repository at every phase boundary. A suspend is durable before the
//! call returns, so a crash immediately afterwards loses nothing; the
//! next resume rehydrates the latest row and re-enters the exact phase
//! that suspended.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::{
    Notification, NotificationKind, WorkflowPhase, WorkflowState, WorkflowStatus,
};
use crate::repository::{
    NotificationRepository, RepositoryError, RfpRepository, WorkflowRepository,
};

use super::input::HumanInput;

/// Errors surfaced by the coordinator.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("workflow {workflow_id} is {status} and cannot be resumed")]
    NotSuspended {
        workflow_id: String,
        status: &'static str,
    },

    #[error("workflow {0} is already terminal")]
    Terminal(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Initial search criteria for a discovery workflow.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DiscoveryParams {
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
}

enum PhaseOutcome {
    /// Move on to the next phase.
    Advance,
    /// Checkpoint and wait for a human.
    Suspend {
        reason: String,
        data: Option<Value>,
        instructions: String,
    },
    /// The final phase finished.
    Complete,
}

/// Drives multi-phase workflows with durable suspension.
pub struct WorkflowCoordinator {
    workflows: Arc<WorkflowRepository>,
    rfps: Arc<RfpRepository>,
    notifications: Arc<NotificationRepository>,
}

impl WorkflowCoordinator {
    pub fn new(
        workflows: Arc<WorkflowRepository>,
        rfps: Arc<RfpRepository>,
        notifications: Arc<NotificationRepository>,
    ) -> Self {
        Self {
            workflows,
            rfps,
            notifications,
        }
    }

    /// Start a discovery workflow and run it until it suspends or
    /// finishes.
    pub async fn execute_discovery_workflow(
        &self,
        params: DiscoveryParams,
    ) -> Result<WorkflowState, WorkflowError> {
        let mut state = WorkflowState::new(uuid::Uuid::new_v4().to_string());
        state
            .context
            .insert("criteria".to_string(), serde_json::to_value(&params)?);
        state.status = WorkflowStatus::Running;
        self.workflows.save(&state)?;
        tracing::info!(workflow_id = %state.workflow_id, "discovery workflow started");

        self.run_phases(state, None).await
    }

    /// Resume a suspended workflow, merging optional human input, and
    /// re-enter the phase that suspended.
    pub async fn resume(
        &self,
        workflow_id: &str,
        input: Option<HumanInput>,
    ) -> Result<WorkflowState, WorkflowError> {
        let mut state = self.load(workflow_id)?;
        if state.status != WorkflowStatus::Suspended {
            return Err(WorkflowError::NotSuspended {
                workflow_id: workflow_id.to_string(),
                status: state.status.as_str(),
            });
        }

        if let Some(ref input) = input {
            state
                .context
                .insert("human_input".to_string(), serde_json::to_value(input)?);
        }
        state.status = WorkflowStatus::Running;
        state.suspension_reason = None;
        state.suspension_data = None;
        state.resume_instructions = None;
        state.updated_at = Utc::now();
        self.workflows.save(&state)?;
        tracing::info!(
            workflow_id,
            phase = state.current_phase.as_str(),
            "workflow resumed"
        );

        self.run_phases(state, input).await
    }

    /// Checkpoint a workflow as suspended. Durable before returning.
    pub async fn suspend(
        &self,
        workflow_id: &str,
        reason: &str,
        data: Option<Value>,
        instructions: Option<&str>,
    ) -> Result<WorkflowState, WorkflowError> {
        let mut state = self.load(workflow_id)?;
        if state.status.is_terminal() {
            return Err(WorkflowError::Terminal(workflow_id.to_string()));
        }
        self.suspend_state(&mut state, reason, data, instructions.unwrap_or_default())?;
        Ok(state)
    }

    /// Cancel a workflow: terminal `failed`, persisted.
    pub async fn cancel(&self, workflow_id: &str) -> Result<WorkflowState, WorkflowError> {
        let mut state = self.load(workflow_id)?;
        if state.status.is_terminal() {
            return Err(WorkflowError::Terminal(workflow_id.to_string()));
        }
        state.status = WorkflowStatus::Failed;
        state.suspension_reason = Some("cancelled".to_string());
        state.updated_at = Utc::now();
        self.workflows.save(&state)?;
        tracing::info!(workflow_id, "workflow cancelled");
        Ok(state)
    }

    /// Current state of a workflow.
    pub fn status(&self, workflow_id: &str) -> Result<WorkflowState, WorkflowError> {
        self.load(workflow_id)
    }

    /// All suspended workflows, oldest suspension first.
    pub fn suspended_workflows(&self) -> Result<Vec<WorkflowState>, WorkflowError> {
        Ok(self.workflows.get_suspended()?)
    }

    fn load(&self, workflow_id: &str) -> Result<WorkflowState, WorkflowError> {
        self.workflows
            .get(workflow_id)?
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))
    }

    async fn run_phases(
        &self,
        mut state: WorkflowState,
        mut input: Option<HumanInput>,
    ) -> Result<WorkflowState, WorkflowError> {
        loop {
            let outcome = self.run_phase(&mut state, input.take())?;
            state.updated_at = Utc::now();
            match outcome {
                PhaseOutcome::Advance => {
                    state.progress = state.progress.max(state.current_phase.progress());
                    match state.current_phase.next() {
                        Some(next) => state.current_phase = next,
                        None => {
                            state.status = WorkflowStatus::Completed;
                            self.workflows.save(&state)?;
                            return Ok(state);
                        }
                    }
                    self.workflows.save(&state)?;
                }
                PhaseOutcome::Suspend {
                    reason,
                    data,
                    instructions,
                } => {
                    self.suspend_state(&mut state, &reason, data, &instructions)?;
                    return Ok(state);
                }
                PhaseOutcome::Complete => {
                    state.progress = 1.0;
                    state.status = WorkflowStatus::Completed;
                    self.workflows.save(&state)?;
                    tracing::info!(workflow_id = %state.workflow_id, "workflow completed");
                    return Ok(state);
                }
            }
        }
    }

    /// Write the suspended checkpoint and a notification. The row is on
    /// disk before this returns.
    fn suspend_state(
        &self,
        state: &mut WorkflowState,
        reason: &str,
        data: Option<Value>,
        instructions: &str,
    ) -> Result<(), WorkflowError> {
        state.status = WorkflowStatus::Suspended;
        state.suspension_reason = Some(reason.to_string());
        state.suspension_data = data;
        state.resume_instructions = if instructions.is_empty() {
            None
        } else {
            Some(instructions.to_string())
        };
        state.updated_at = Utc::now();
        self.workflows.save(state)?;

        let notification = Notification::new(
            NotificationKind::WorkflowSuspended,
            format!("Workflow suspended: {}", state.workflow_id),
            format!("{} ({})", reason, state.current_phase.as_str()),
        );
        if let Err(e) = self.notifications.save(&notification) {
            tracing::warn!(error = %e, "failed to save suspension notification");
        }
        tracing::info!(
            workflow_id = %state.workflow_id,
            phase = state.current_phase.as_str(),
            reason,
            "workflow suspended"
        );
        Ok(())
    }

    fn run_phase(
        &self,
        state: &mut WorkflowState,
        input: Option<HumanInput>,
    ) -> Result<PhaseOutcome, WorkflowError> {
        match state.current_phase {
            WorkflowPhase::Discovery => self.phase_discovery(state, input),
            WorkflowPhase::Analysis => Ok(Self::phase_analysis(state, input)),
            WorkflowPhase::Generation => Ok(Self::phase_generation(state)),
            WorkflowPhase::Submission => Ok(Self::phase_submission(state, input)),
            WorkflowPhase::Monitoring => Ok(Self::phase_monitoring(state)),
        }
    }

    /// Select candidate RFPs from the store by the criteria in context.
    fn phase_discovery(
        &self,
        state: &mut WorkflowState,
        input: Option<HumanInput>,
    ) -> Result<PhaseOutcome, WorkflowError> {
        if let Some(HumanInput::OverrideCriteria { keyword, min_value }) = input {
            let params = DiscoveryParams { keyword, min_value };
            state
                .context
                .insert("criteria".to_string(), serde_json::to_value(&params)?);
        }

        let params: DiscoveryParams = state
            .context
            .get("criteria")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        let candidates = self
            .rfps
            .search(params.keyword.as_deref(), params.min_value)?;
        let ids: Vec<Value> = candidates.iter().map(|r| json!(r.id)).collect();
        state
            .context
            .insert("candidate_count".to_string(), json!(candidates.len()));
        state
            .context
            .insert("candidate_ids".to_string(), Value::Array(ids));
        Ok(PhaseOutcome::Advance)
    }

    /// Rank candidates, then wait for a human to approve a selection.
    fn phase_analysis(state: &mut WorkflowState, input: Option<HumanInput>) -> PhaseOutcome {
        match input {
            Some(HumanInput::ApproveSelection { selected_ids }) if !selected_ids.is_empty() => {
                state.context.insert(
                    "selected_ids".to_string(),
                    Value::Array(selected_ids.into_iter().map(Value::String).collect()),
                );
                return PhaseOutcome::Advance;
            }
            Some(HumanInput::RequestChanges { notes }) => {
                state.context.insert("change_notes".to_string(), json!(notes));
            }
            _ => {}
        }

        if state.context.contains_key("selected_ids") {
            return PhaseOutcome::Advance;
        }

        let ranked = state
            .context
            .get("candidate_ids")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        state.context.insert("ranked_ids".to_string(), ranked.clone());
        PhaseOutcome::Suspend {
            reason: "human_input_required".to_string(),
            data: Some(ranked),
            instructions: "Approve a selection of candidate RFPs to continue".to_string(),
        }
    }

    /// Assemble the draft summary from the approved selection. Content
    /// generation itself lives in external services; this phase only
    /// records what was selected for them.
    fn phase_generation(state: &mut WorkflowState) -> PhaseOutcome {
        let selected = state
            .context
            .get("selected_ids")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        state.context.insert(
            "proposal_draft".to_string(),
            json!(format!("draft covering {} selected RFPs", selected)),
        );
        PhaseOutcome::Advance
    }

    /// Hold for explicit submission approval.
    fn phase_submission(state: &mut WorkflowState, input: Option<HumanInput>) -> PhaseOutcome {
        match input {
            Some(HumanInput::ApproveSubmission) => {
                state.context.insert("submitted".to_string(), json!(true));
                PhaseOutcome::Advance
            }
            Some(HumanInput::RequestChanges { notes }) => {
                state.context.insert("change_notes".to_string(), json!(notes));
                PhaseOutcome::Suspend {
                    reason: "changes_requested".to_string(),
                    data: None,
                    instructions: "Revise the draft, then approve submission".to_string(),
                }
            }
            _ => PhaseOutcome::Suspend {
                reason: "approval_required".to_string(),
                data: None,
                instructions: "Approve submission to finish the workflow".to_string(),
            },
        }
    }

    fn phase_monitoring(state: &mut WorkflowState) -> PhaseOutcome {
        state
            .context
            .insert("monitoring_started".to_string(), json!(true));
        PhaseOutcome::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscoveredRfp, Rfp};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        coordinator: WorkflowCoordinator,
        workflows: Arc<WorkflowRepository>,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        let workflows = Arc::new(WorkflowRepository::new(&db).unwrap());
        let rfps = Arc::new(RfpRepository::new(&db).unwrap());
        let notifications = Arc::new(NotificationRepository::new(&db).unwrap());

        // Seed two discoverable RFPs.
        for (i, value) in [(1, 500_000.0), (2, 20_000.0)] {
            rfps.save(&Rfp::from_discovered(&DiscoveredRfp {
                title: format!("Bridge project {}", i),
                agency: None,
                source_url: format!("https://x.test/rfp/{}", i),
                deadline: None,
                estimated_value: Some(value),
                portal_id: "p1".to_string(),
            }))
            .unwrap();
        }

        Fixture {
            coordinator: WorkflowCoordinator::new(workflows.clone(), rfps, notifications),
            workflows,
            dir,
        }
    }

    #[tokio::test]
    async fn workflow_runs_to_completion_through_approvals() {
        let fx = fixture();
        let state = fx
            .coordinator
            .execute_discovery_workflow(DiscoveryParams::default())
            .await
            .unwrap();

        // Halts at analysis awaiting a selection.
        assert_eq!(state.status, WorkflowStatus::Suspended);
        assert_eq!(state.current_phase, WorkflowPhase::Analysis);
        assert_eq!(state.context["candidate_count"], json!(2));
        assert_eq!(
            state.suspension_reason.as_deref(),
            Some("human_input_required")
        );

        let state = fx
            .coordinator
            .resume(
                &state.workflow_id,
                Some(HumanInput::ApproveSelection {
                    selected_ids: vec!["some-rfp".to_string()],
                }),
            )
            .await
            .unwrap();

        // Generation runs straight through; submission waits.
        assert_eq!(state.status, WorkflowStatus::Suspended);
        assert_eq!(state.current_phase, WorkflowPhase::Submission);
        assert_eq!(state.suspension_reason.as_deref(), Some("approval_required"));
        assert!(state.context.contains_key("proposal_draft"));

        let state = fx
            .coordinator
            .resume(&state.workflow_id, Some(HumanInput::ApproveSubmission))
            .await
            .unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.current_phase, WorkflowPhase::Monitoring);
        assert_eq!(state.progress, 1.0);
        assert_eq!(state.context["submitted"], json!(true));
    }

    #[tokio::test]
    async fn empty_input_resume_is_a_round_trip() {
        let fx = fixture();
        let suspended = fx
            .coordinator
            .execute_discovery_workflow(DiscoveryParams::default())
            .await
            .unwrap();
        let phase_before = suspended.current_phase;
        let context_before = suspended.context.clone();

        let resumed = fx
            .coordinator
            .resume(&suspended.workflow_id, None)
            .await
            .unwrap();

        assert_eq!(resumed.status, WorkflowStatus::Suspended);
        assert_eq!(resumed.current_phase, phase_before);
        assert_eq!(resumed.context, context_before);
    }

    #[tokio::test]
    async fn resume_survives_process_restart() {
        let fx = fixture();
        let suspended = fx
            .coordinator
            .execute_discovery_workflow(DiscoveryParams {
                keyword: Some("bridge".to_string()),
                min_value: Some(100_000.0),
            })
            .await
            .unwrap();
        assert_eq!(suspended.context["candidate_count"], json!(1));

        // "Restart": rebuild everything from the same database path.
        let db = fx.dir.path().join("test.db");
        let coordinator = WorkflowCoordinator::new(
            Arc::new(WorkflowRepository::new(&db).unwrap()),
            Arc::new(RfpRepository::new(&db).unwrap()),
            Arc::new(NotificationRepository::new(&db).unwrap()),
        );

        let resumed = coordinator
            .resume(
                &suspended.workflow_id,
                Some(HumanInput::ApproveSelection {
                    selected_ids: vec!["r1".to_string()],
                }),
            )
            .await
            .unwrap();
        assert_eq!(resumed.current_phase, WorkflowPhase::Submission);
        assert!(resumed.progress > suspended.progress);
    }

    #[tokio::test]
    async fn resume_requires_suspended_status() {
        let fx = fixture();
        assert!(matches!(
            fx.coordinator.resume("ghost", None).await,
            Err(WorkflowError::NotFound(_))
        ));

        let mut running = WorkflowState::new("wf-r".to_string());
        running.status = WorkflowStatus::Running;
        fx.workflows.save(&running).unwrap();
        assert!(matches!(
            fx.coordinator.resume("wf-r", None).await,
            Err(WorkflowError::NotSuspended { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_is_terminal_and_persisted() {
        let fx = fixture();
        let state = fx
            .coordinator
            .execute_discovery_workflow(DiscoveryParams::default())
            .await
            .unwrap();

        let cancelled = fx.coordinator.cancel(&state.workflow_id).await.unwrap();
        assert_eq!(cancelled.status, WorkflowStatus::Failed);

        // Persisted: visible through a fresh load, and not resumable.
        let loaded = fx.coordinator.status(&state.workflow_id).unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Failed);
        assert!(matches!(
            fx.coordinator.resume(&state.workflow_id, None).await,
            Err(WorkflowError::NotSuspended { .. })
        ));
        assert!(matches!(
            fx.coordinator.cancel(&state.workflow_id).await,
            Err(WorkflowError::Terminal(_))
        ));
    }

    #[tokio::test]
    async fn request_changes_at_submission_stays_suspended() {
        let fx = fixture();
        let state = fx
            .coordinator
            .execute_discovery_workflow(DiscoveryParams::default())
            .await
            .unwrap();
        let state = fx
            .coordinator
            .resume(
                &state.workflow_id,
                Some(HumanInput::ApproveSelection {
                    selected_ids: vec!["r1".to_string()],
                }),
            )
            .await
            .unwrap();

        let state = fx
            .coordinator
            .resume(
                &state.workflow_id,
                Some(HumanInput::RequestChanges {
                    notes: "tighten the budget section".to_string(),
                }),
            )
            .await
            .unwrap();
        assert_eq!(state.status, WorkflowStatus::Suspended);
        assert_eq!(state.current_phase, WorkflowPhase::Submission);
        assert_eq!(state.suspension_reason.as_deref(), Some("changes_requested"));
        assert_eq!(
            state.context["change_notes"],
            json!("tighten the budget section")
        );
    }

    #[tokio::test]
    async fn suspended_workflows_are_listed() {
        let fx = fixture();
        let state = fx
            .coordinator
            .execute_discovery_workflow(DiscoveryParams::default())
            .await
            .unwrap();

        let listed = fx.coordinator.suspended_workflows().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].workflow_id, state.workflow_id);

        let explicit = fx
            .coordinator
            .suspend(
                &state.workflow_id,
                "waiting_on_legal",
                Some(json!({"ticket": "LEG-12"})),
                Some("resume after legal review"),
            )
            .await
            .unwrap();
        assert_eq!(
            explicit.suspension_reason.as_deref(),
            Some("waiting_on_legal")
        );
        assert_eq!(explicit.suspension_data, Some(json!({"ticket": "LEG-12"})));
    }
}
