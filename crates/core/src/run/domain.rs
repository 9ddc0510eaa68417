//! Run lifecycle types.

use crate::error::{StoreError, StoreResult};
use crate::ids::{AgentId, ProjectId, RunId, TaskId, TeamId, TenantId};
use crate::macros::sql_enum;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

sql_enum! {
    /// `pending → running → {completed, failed, cancelled}`. Pending may jump
    /// straight to a terminal state.
    pub enum RunStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// One agent execution and its accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub tenant_id: TenantId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub project_id: ProjectId,
    pub team_id: Option<TeamId>,
    pub policy_profile: String,
    pub exec_mode: String,
    pub deliver_mode: String,
    pub status: RunStatus,
    pub step_count: i64,
    pub cost_usd: f64,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub model: String,
    pub output: String,
    pub error: String,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRun {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub team_id: Option<TeamId>,
    #[serde(default)]
    pub policy_profile: String,
    #[serde(default)]
    pub exec_mode: String,
    #[serde(default)]
    pub deliver_mode: String,
}

impl NewRun {
    pub fn new(project_id: ProjectId, task_id: TaskId, agent_id: AgentId) -> Self {
        Self {
            task_id,
            agent_id,
            project_id,
            team_id: None,
            policy_profile: String::new(),
            exec_mode: String::new(),
            deliver_mode: String::new(),
        }
    }
}

/// Cumulative counters reported while a run is active.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub status: RunStatus,
    pub step_count: i64,
    pub cost_usd: f64,
    pub tokens_in: i64,
    pub tokens_out: i64,
}

impl RunProgress {
    pub(crate) fn validate_against(&self, current: &Run) -> StoreResult<()> {
        if self.status.is_terminal() {
            return Err(StoreError::Validation(format!(
                "progress updates cannot set terminal status {}; complete the run instead",
                self.status
            )));
        }
        if !self.cost_usd.is_finite() {
            return Err(StoreError::Validation(format!(
                "cost_usd must be a finite number for run {}",
                current.id
            )));
        }
        let regressed = [
            ("step_count", self.step_count < current.step_count),
            ("cost_usd", self.cost_usd < current.cost_usd),
            ("tokens_in", self.tokens_in < current.tokens_in),
            ("tokens_out", self.tokens_out < current.tokens_out),
        ];
        if let Some((field, _)) = regressed.iter().find(|(_, lower)| *lower) {
            return Err(StoreError::Validation(format!(
                "{field} must not decrease for run {}",
                current.id
            )));
        }
        Ok(())
    }
}

/// Final outcome written once by `complete_run`.
///
/// Totals are floors: stored counters that are already higher are kept, and
/// an empty `model` keeps the stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompletion {
    pub status: RunStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub step_count: i64,
    #[serde(default)]
    pub tokens_in: i64,
    #[serde(default)]
    pub tokens_out: i64,
    #[serde(default)]
    pub model: String,
}

impl RunCompletion {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self::with_status(RunStatus::Completed, output.into(), String::new())
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::with_status(RunStatus::Failed, String::new(), error.into())
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::with_status(RunStatus::Cancelled, String::new(), reason.into())
    }

    fn with_status(status: RunStatus, output: String, error: String) -> Self {
        Self {
            status,
            output,
            error,
            cost_usd: 0.0,
            step_count: 0,
            tokens_in: 0,
            tokens_out: 0,
            model: String::new(),
        }
    }

    pub(crate) fn validate(&self) -> StoreResult<()> {
        if !self.status.is_terminal() {
            return Err(StoreError::Validation(format!(
                "completion status must be terminal, got {}",
                self.status
            )));
        }
        if !self.cost_usd.is_finite()
            || self.cost_usd < 0.0
            || self.step_count < 0
            || self.tokens_in < 0
            || self.tokens_out < 0
        {
            return Err(StoreError::Validation(
                "completion totals must be finite and not negative".into(),
            ));
        }
        Ok(())
    }
}
