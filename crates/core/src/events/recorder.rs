//! Trajectory recording with run bookkeeping on failure.

use crate::context::Context;
use crate::error::{StoreError, StoreResult};
use crate::events::domain::{AgentEvent, NewEvent};
use crate::events::store::EventStore;
use crate::ids::RunId;
use crate::run::{RunCompletion, RunStore};
use std::sync::Arc;
use tracing::{error, instrument, warn};

/// Appends trajectory events on behalf of an execution backend.
///
/// A lost event leaves the trajectory incomplete, so when an append for a run
/// fails the run is marked failed (if it is still active) before the error is
/// handed back to the caller.
#[derive(Clone)]
pub struct TrajectoryRecorder {
    events: Arc<dyn EventStore>,
    runs: Arc<dyn RunStore>,
}

impl TrajectoryRecorder {
    pub fn new(events: Arc<dyn EventStore>, runs: Arc<dyn RunStore>) -> Self {
        Self { events, runs }
    }

    #[instrument(skip(self, cx, event), fields(tenant = %cx.tenant(), event_type = %event.event_type))]
    pub async fn record(&self, cx: &Context, event: NewEvent) -> StoreResult<AgentEvent> {
        let run_id = event.run_id;
        match self.events.append(cx, event).await {
            Ok(stored) => Ok(stored),
            Err(err) => {
                error!(error = %err, run_id = ?run_id, "trajectory append failed");
                if let Some(run_id) = run_id {
                    self.fail_run(cx, run_id, &err).await;
                }
                Err(err)
            }
        }
    }

    async fn fail_run(&self, cx: &Context, run_id: RunId, cause: &StoreError) {
        // The caller may already be cancelled; the flag must still land.
        let cx = cx.detached();
        let run = match self.runs.get_run(&cx, run_id).await {
            Ok(run) if !run.status.is_terminal() => run,
            Ok(_) => return,
            Err(e) => {
                warn!(%run_id, error = %e, "could not load run after append failure");
                return;
            }
        };

        let completion = RunCompletion {
            cost_usd: run.cost_usd,
            step_count: run.step_count,
            tokens_in: run.tokens_in,
            tokens_out: run.tokens_out,
            model: run.model.clone(),
            ..RunCompletion::failed(format!("trajectory append failed: {cause}"))
        };
        if let Err(e) = self.runs.complete_run(&cx, run_id, completion).await {
            warn!(%run_id, error = %e, "could not mark run failed after append failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ProjectFields, ProjectRepository};
    use crate::events::domain::EventType;
    use crate::ids::{AgentId, TaskId, TenantId};
    use crate::run::{NewRun, RunStatus};
    use crate::storage::SqliteStore;
    use serde_json::json;

    #[tokio::test]
    async fn failed_append_fails_the_run() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cx = Context::new(TenantId::new());
        let home = store
            .create_project(&cx, ProjectFields::named("home"))
            .await
            .unwrap();
        let elsewhere = store
            .create_project(&cx, ProjectFields::named("elsewhere"))
            .await
            .unwrap();
        let task = TaskId::new();
        let agent = AgentId::new();
        let run = store
            .create_run(&cx, NewRun::new(home.id, task, agent))
            .await
            .unwrap();
        let recorder = TrajectoryRecorder::new(store.clone(), store.clone());

        let ok = NewEvent::new(home.id, agent, EventType::RunStarted, json!({})).for_run(task, run.id);
        assert_eq!(recorder.record(&cx, ok).await.unwrap().version, 1);

        // Mismatched project makes the append fail.
        let bad =
            NewEvent::new(elsewhere.id, agent, EventType::ToolCall, json!({})).for_run(task, run.id);
        let err = recorder.record(&cx, bad).await.unwrap_err();
        assert!(err.is_validation());

        let run = store.get_run(&cx, run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.contains("trajectory append failed"));
    }

    #[tokio::test]
    async fn terminal_runs_are_left_alone() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cx = Context::new(TenantId::new());
        let home = store
            .create_project(&cx, ProjectFields::named("home"))
            .await
            .unwrap();
        let other = store
            .create_project(&cx, ProjectFields::named("other"))
            .await
            .unwrap();
        let task = TaskId::new();
        let agent = AgentId::new();
        let run = store
            .create_run(&cx, NewRun::new(home.id, task, agent))
            .await
            .unwrap();
        store
            .complete_run(&cx, run.id, RunCompletion::succeeded("done"))
            .await
            .unwrap();

        let recorder = TrajectoryRecorder::new(store.clone(), store.clone());
        let bad = NewEvent::new(other.id, agent, EventType::ToolCall, json!({})).for_run(task, run.id);
        assert!(recorder.record(&cx, bad).await.is_err());

        let run = store.get_run(&cx, run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.version, 2);
    }
}
