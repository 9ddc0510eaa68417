use crate::context::Context;
use crate::error::StoreResult;
use crate::events::domain::*;
use crate::ids::{AgentId, RunId, TaskId};
use async_trait::async_trait;

/// Append-only trajectory ledger.
///
/// Append failures always propagate; the store never retries or drops an
/// event on the caller's behalf.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists one event and returns it with its scope version assigned.
    async fn append(&self, cx: &Context, event: NewEvent) -> StoreResult<AgentEvent>;

    async fn load_by_run(&self, cx: &Context, run_id: RunId) -> StoreResult<Vec<AgentEvent>>;
    async fn load_by_task(&self, cx: &Context, task_id: TaskId) -> StoreResult<Vec<AgentEvent>>;
    async fn load_by_agent(&self, cx: &Context, agent_id: AgentId)
    -> StoreResult<Vec<AgentEvent>>;

    /// One page of a run's trajectory in ascending version order.
    ///
    /// `limit` is clamped to the configured page bounds.
    async fn load_trajectory(
        &self,
        cx: &Context,
        run_id: RunId,
        filter: TrajectoryFilter,
        cursor: Option<String>,
        limit: Option<usize>,
    ) -> StoreResult<TrajectoryPage>;

    async fn trajectory_stats(&self, cx: &Context, run_id: RunId) -> StoreResult<TrajectoryStats>;
}

/// Security-relevant actions, paginated separately from trajectories.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, cx: &Context, entry: NewAuditEntry) -> StoreResult<AuditEntry>;

    async fn load_audit(
        &self,
        cx: &Context,
        filter: AuditFilter,
        cursor: Option<String>,
        limit: Option<usize>,
    ) -> StoreResult<AuditPage>;
}
