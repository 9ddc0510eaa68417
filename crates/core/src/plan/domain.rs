//! Execution plan and step types.

use crate::entities::domain::require_text;
use crate::error::{StoreError, StoreResult};
use crate::ids::{AgentId, PlanId, ProjectId, RunId, StepId, TaskId, TeamId, TenantId};
use crate::macros::sql_enum;
use crate::plan::dag::DagNode;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

sql_enum! {
    /// How agents in a plan collaborate. `Sequential` runs one step at a time.
    pub enum PlanProtocol {
        Sequential => "sequential",
        Parallel => "parallel",
        PingPong => "ping_pong",
        Consensus => "consensus",
    }
}

sql_enum! {
    pub enum FailurePolicy {
        /// The first failed step skips everything not yet started and fails the plan.
        FailFast => "fail_fast",
        /// Only the failed step's dependents are skipped.
        BestEffort => "best_effort",
    }
}

sql_enum! {
    pub enum PlanStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: PlanStatus) -> bool {
        use PlanStatus::*;
        matches!(
            (self, next),
            (Pending, Running | Failed | Cancelled) | (Running, Completed | Failed | Cancelled)
        )
    }
}

sql_enum! {
    pub enum StepStatus {
        Pending => "pending",
        /// Claimed by a scheduler; its run is being created.
        Ready => "ready",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Skipped => "skipped",
    }
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }

    /// Counts against the plan's parallelism budget.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, StepStatus::Ready | StepStatus::Running)
    }

    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Ready | Running | Skipped | Failed)
                | (Ready, Pending | Running | Skipped | Failed)
                | (Running, Completed | Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: PlanId,
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub team_id: Option<TeamId>,
    pub name: String,
    pub description: String,
    pub protocol: PlanProtocol,
    pub failure_policy: FailurePolicy,
    pub status: PlanStatus,
    pub max_parallel: u32,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ExecutionPlan {
    /// Steps allowed in flight at once.
    pub fn parallel_limit(&self) -> usize {
        match self.protocol {
            PlanProtocol::Sequential => 1,
            _ => self.max_parallel.max(1) as usize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub plan_id: PlanId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub policy_profile: String,
    pub deliver_mode: String,
    pub depends_on: Vec<StepId>,
    pub status: StepStatus,
    pub run_id: Option<RunId>,
    pub round: u32,
    pub error: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DagNode for Step {
    type Key = StepId;

    fn key(&self) -> StepId {
        self.id
    }

    fn dependencies(&self) -> &[StepId] {
        &self.depends_on
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPlan {
    pub project_id: ProjectId,
    #[serde(default)]
    pub team_id: Option<TeamId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub protocol: PlanProtocol,
    pub failure_policy: FailurePolicy,
    pub max_parallel: u32,
}

impl NewPlan {
    pub fn new(project_id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            project_id,
            team_id: None,
            name: name.into(),
            description: String::new(),
            protocol: PlanProtocol::Parallel,
            failure_policy: FailurePolicy::FailFast,
            max_parallel: 1,
        }
    }

    pub(crate) fn validate(&self) -> StoreResult<()> {
        require_text("plan name", &self.name)?;
        if self.max_parallel < 1 {
            return Err(StoreError::Validation("max_parallel must be at least 1".into()));
        }
        Ok(())
    }
}

/// A step to add to a plan. The caller picks the id so dependencies can be
/// expressed before anything is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStep {
    pub id: StepId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    #[serde(default)]
    pub policy_profile: String,
    #[serde(default)]
    pub deliver_mode: String,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
}

impl NewStep {
    pub fn new(task_id: TaskId, agent_id: AgentId) -> Self {
        Self {
            id: StepId::new(),
            task_id,
            agent_id,
            policy_profile: String::new(),
            deliver_mode: String::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn after(mut self, deps: &[StepId]) -> Self {
        self.depends_on.extend_from_slice(deps);
        self
    }
}

impl DagNode for NewStep {
    type Key = StepId;

    fn key(&self) -> StepId {
        self.id
    }

    fn dependencies(&self) -> &[StepId] {
        &self.depends_on
    }
}
