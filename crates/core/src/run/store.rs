use crate::context::Context;
use crate::error::StoreResult;
use crate::ids::{RunId, TaskId};
use crate::run::domain::{NewRun, Run, RunCompletion, RunProgress};
use async_trait::async_trait;

/// Persistence for the run state machine.
///
/// Terminal runs are immutable: any write against one fails with `Conflict`.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Allocates a pending run at version 1.
    async fn create_run(&self, cx: &Context, run: NewRun) -> StoreResult<Run>;

    async fn get_run(&self, cx: &Context, id: RunId) -> StoreResult<Run>;

    /// Runs for a task in creation order.
    async fn list_runs_by_task(&self, cx: &Context, task_id: TaskId) -> StoreResult<Vec<Run>>;

    /// `pending → running`; stamps `started_at`.
    async fn start_run(&self, cx: &Context, id: RunId) -> StoreResult<Run>;

    /// Records progress without leaving the active states. Counters are
    /// cumulative and may not go down.
    async fn update_run_status(
        &self,
        cx: &Context,
        id: RunId,
        progress: RunProgress,
    ) -> StoreResult<Run>;

    /// Writes the terminal status and final totals in one statement.
    ///
    /// Not idempotent: completing a terminal run is a `Conflict` and leaves
    /// the stored values untouched.
    async fn complete_run(
        &self,
        cx: &Context,
        id: RunId,
        completion: RunCompletion,
    ) -> StoreResult<Run>;
}
