//! Workflow state repository for SQLite persistence.
//!
//! The row written here is the only durable representation of a
//! suspended workflow; `save` is an upsert so the latest write for a
//! workflow_id always wins.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, Row};

use super::{parse_datetime, to_option, Result};
use crate::models::{WorkflowPhase, WorkflowState, WorkflowStatus};

/// SQLite-backed workflow state repository.
pub struct WorkflowRepository {
    db_path: PathBuf,
}

impl WorkflowRepository {
    /// Create a new workflow repository, initializing the schema.
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_states (
                workflow_id TEXT PRIMARY KEY,
                current_phase TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL,
                context TEXT NOT NULL,
                suspension_reason TEXT,
                suspension_data TEXT,
                resume_instructions TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<WorkflowState> {
        Ok(WorkflowState {
            workflow_id: row.get("workflow_id")?,
            current_phase: WorkflowPhase::from_str(&row.get::<_, String>("current_phase")?)
                .unwrap_or(WorkflowPhase::Discovery),
            status: WorkflowStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(WorkflowStatus::Failed),
            progress: row.get("progress")?,
            context: serde_json::from_str(&row.get::<_, String>("context")?)
                .unwrap_or_default(),
            suspension_reason: row.get("suspension_reason")?,
            suspension_data: row
                .get::<_, Option<String>>("suspension_data")?
                .and_then(|s| serde_json::from_str(&s).ok()),
            resume_instructions: row.get("resume_instructions")?,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?),
            updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
        })
    }

    /// Save a workflow state (insert or latest-wins update).
    pub fn save(&self, state: &WorkflowState) -> Result<()> {
        let conn = self.connect()?;
        let suspension_data = state
            .suspension_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            r#"
            INSERT INTO workflow_states (
                workflow_id, current_phase, status, progress, context,
                suspension_reason, suspension_data, resume_instructions,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(workflow_id) DO UPDATE SET
                current_phase = excluded.current_phase,
                status = excluded.status,
                progress = excluded.progress,
                context = excluded.context,
                suspension_reason = excluded.suspension_reason,
                suspension_data = excluded.suspension_data,
                resume_instructions = excluded.resume_instructions,
                updated_at = excluded.updated_at
            "#,
            params![
                state.workflow_id,
                state.current_phase.as_str(),
                state.status.as_str(),
                state.progress,
                serde_json::to_string(&state.context)?,
                state.suspension_reason,
                suspension_data,
                state.resume_instructions,
                state.created_at.to_rfc3339(),
                state.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a workflow state by ID.
    pub fn get(&self, workflow_id: &str) -> Result<Option<WorkflowState>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM workflow_states WHERE workflow_id = ?")?;
        to_option(stmt.query_row(params![workflow_id], Self::map_row))
    }

    /// All workflows currently suspended, oldest suspension first.
    pub fn get_suspended(&self) -> Result<Vec<WorkflowState>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM workflow_states WHERE status = 'suspended' ORDER BY updated_at",
        )?;
        let states = stmt
            .query_map([], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    /// Count workflows by status.
    pub fn count_by_status(&self, status: WorkflowStatus) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM workflow_states WHERE status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
