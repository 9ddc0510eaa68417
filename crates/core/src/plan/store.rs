use crate::context::Context;
use crate::error::StoreResult;
use crate::ids::{PlanId, ProjectId, RunId, StepId};
use crate::plan::domain::{ExecutionPlan, NewPlan, NewStep, PlanStatus, Step, StepStatus};
use async_trait::async_trait;

/// Persistence for execution plans and their steps.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Validates the dependency graph, assigns rounds and stores the plan with
    /// all of its steps in one transaction. Nothing is written on rejection.
    async fn create_plan(
        &self,
        cx: &Context,
        plan: NewPlan,
        steps: Vec<NewStep>,
    ) -> StoreResult<(ExecutionPlan, Vec<Step>)>;

    async fn get_plan(&self, cx: &Context, id: PlanId) -> StoreResult<ExecutionPlan>;

    async fn list_plans_by_project(
        &self,
        cx: &Context,
        project_id: ProjectId,
    ) -> StoreResult<Vec<ExecutionPlan>>;

    async fn update_plan_status(
        &self,
        cx: &Context,
        id: PlanId,
        status: PlanStatus,
        expected_version: i64,
    ) -> StoreResult<ExecutionPlan>;

    /// Appends a step to a non-terminal plan. Its dependencies must already
    /// belong to the plan; its round is one past the deepest dependency.
    async fn create_plan_step(&self, cx: &Context, plan_id: PlanId, step: NewStep)
    -> StoreResult<Step>;

    async fn get_plan_step(&self, cx: &Context, id: StepId) -> StoreResult<Step>;

    /// Ordered by round, then insertion.
    async fn list_plan_steps(&self, cx: &Context, plan_id: PlanId) -> StoreResult<Vec<Step>>;

    async fn get_plan_step_by_run_id(&self, cx: &Context, run_id: RunId) -> StoreResult<Step>;

    /// Moves a step along its state machine with a compare-and-set on the
    /// current status. Illegal or repeated terminal transitions are `Conflict`.
    async fn update_plan_step_status(
        &self,
        cx: &Context,
        id: StepId,
        status: StepStatus,
        run_id: Option<RunId>,
        error: Option<String>,
    ) -> StoreResult<Step>;

    /// Re-levels a step. The new round must stay above every dependency and
    /// below every dependent.
    async fn update_plan_step_round(&self, cx: &Context, id: StepId, round: u32)
    -> StoreResult<Step>;

    /// Skips the listed steps that have not started yet and returns the ids
    /// actually skipped.
    async fn skip_plan_steps(
        &self,
        cx: &Context,
        plan_id: PlanId,
        ids: Vec<StepId>,
        reason: String,
    ) -> StoreResult<Vec<StepId>>;
}
