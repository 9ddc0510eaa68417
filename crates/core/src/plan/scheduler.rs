//! Stateless plan scheduler.
//!
//! Every decision is recomputed from the stored steps, so any number of
//! scheduler instances can advance the same plan. Steps are claimed with a
//! `pending → ready` compare-and-set before their run is created; the loser
//! of a race simply moves on.

use crate::context::Context;
use crate::error::{StoreError, StoreResult};
use crate::ids::{PlanId, RunId, StepId};
use crate::plan::dag::transitive_dependents;
use crate::plan::domain::{ExecutionPlan, FailurePolicy, PlanStatus, Step, StepStatus};
use crate::plan::store::PlanStore;
use crate::run::{NewRun, Run, RunCompletion, RunStatus, RunStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Attempts at a plan status change before giving up on version conflicts.
const STATUS_RETRIES: usize = 5;

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("backend rejected run: {0}")]
    Rejected(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Execution backend that actually runs an agent for a step.
#[async_trait]
pub trait RunDispatcher: Send + Sync {
    async fn dispatch(&self, cx: &Context, run: &Run, step: &Step) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatched {
    pub step_id: StepId,
    pub run_id: RunId,
}

/// What one scheduling pass did to a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub dispatched: Vec<Dispatched>,
    pub failed: Vec<StepId>,
    pub skipped: Vec<StepId>,
    pub plan_status: PlanStatus,
}

impl DispatchReport {
    fn new(plan_status: PlanStatus) -> Self {
        Self {
            dispatched: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            plan_status,
        }
    }
}

enum StepOutcome {
    Dispatched(RunId),
    /// Another scheduler claimed the step, or the plan moved on.
    Lost,
    Failed,
}

/// Pending steps whose dependencies have all completed, in (round, insertion)
/// order, limited to the plan's free parallel slots.
///
/// `steps` must come from `PlanStore::list_plan_steps`.
pub fn select_dispatchable(plan: &ExecutionPlan, steps: &[Step]) -> Vec<StepId> {
    let completed: HashSet<StepId> = steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .map(|s| s.id)
        .collect();
    let in_flight = steps.iter().filter(|s| s.status.is_in_flight()).count();
    let capacity = plan.parallel_limit().saturating_sub(in_flight);

    steps
        .iter()
        .filter(|s| s.status == StepStatus::Pending)
        .filter(|s| s.depends_on.iter().all(|d| completed.contains(d)))
        .take(capacity)
        .map(|s| s.id)
        .collect()
}

#[derive(Clone)]
pub struct Scheduler {
    plans: Arc<dyn PlanStore>,
    runs: Arc<dyn RunStore>,
    dispatcher: Arc<dyn RunDispatcher>,
}

impl Scheduler {
    pub fn new(
        plans: Arc<dyn PlanStore>,
        runs: Arc<dyn RunStore>,
        dispatcher: Arc<dyn RunDispatcher>,
    ) -> Self {
        Self {
            plans,
            runs,
            dispatcher,
        }
    }

    /// Moves a pending plan to running and dispatches its first steps.
    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    pub async fn start_plan(&self, cx: &Context, plan_id: PlanId) -> StoreResult<DispatchReport> {
        let plan = self.plans.get_plan(cx, plan_id).await?;
        match plan.status {
            PlanStatus::Pending => {
                self.plans
                    .update_plan_status(cx, plan_id, PlanStatus::Running, plan.version)
                    .await?;
                info!(%plan_id, "plan started");
            }
            PlanStatus::Running => {}
            status => {
                return Err(StoreError::Conflict(format!(
                    "plan {plan_id} is already {status}"
                )));
            }
        }
        self.dispatch_ready(cx, plan_id).await
    }

    /// Dispatches every step that is eligible and fits in the plan's
    /// parallelism budget. A no-op unless the plan is running.
    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    pub async fn dispatch_ready(
        &self,
        cx: &Context,
        plan_id: PlanId,
    ) -> StoreResult<DispatchReport> {
        let mut report = DispatchReport::new(PlanStatus::Pending);
        loop {
            let plan = self.plans.get_plan(cx, plan_id).await?;
            if plan.status != PlanStatus::Running {
                break;
            }
            let steps = self.plans.list_plan_steps(cx, plan_id).await?;
            let candidates = select_dispatchable(&plan, &steps);
            if candidates.is_empty() {
                break;
            }

            // Failed dispatches free their slot, so go around again after one.
            let mut freed = false;
            for step_id in candidates {
                let Some(step) = steps.iter().find(|s| s.id == step_id) else {
                    continue;
                };
                match self.dispatch_step(cx, &plan, step).await? {
                    StepOutcome::Dispatched(run_id) => {
                        report.dispatched.push(Dispatched { step_id, run_id })
                    }
                    StepOutcome::Lost => {}
                    StepOutcome::Failed => {
                        report.failed.push(step_id);
                        report
                            .skipped
                            .extend(self.apply_failure_policy(cx, plan_id, step_id).await?);
                        freed = true;
                    }
                }
            }
            if !freed {
                break;
            }
        }
        report.plan_status = self.finalize(cx, plan_id).await?;
        Ok(report)
    }

    async fn dispatch_step(
        &self,
        cx: &Context,
        plan: &ExecutionPlan,
        step: &Step,
    ) -> StoreResult<StepOutcome> {
        match self
            .plans
            .update_plan_step_status(cx, step.id, StepStatus::Ready, None, None)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!(step_id = %step.id, "step claimed elsewhere");
                return Ok(StepOutcome::Lost);
            }
            Err(e) => return Err(e),
        }

        let new_run = NewRun {
            task_id: step.task_id,
            agent_id: step.agent_id,
            project_id: plan.project_id,
            team_id: plan.team_id,
            policy_profile: step.policy_profile.clone(),
            exec_mode: plan.protocol.to_string(),
            deliver_mode: step.deliver_mode.clone(),
        };
        let run = match self.runs.create_run(cx, new_run).await {
            Ok(run) => run,
            Err(e) => {
                if let Err(release) = self
                    .plans
                    .update_plan_step_status(cx, step.id, StepStatus::Pending, None, None)
                    .await
                {
                    warn!(step_id = %step.id, error = %release, "could not release step claim");
                }
                return Err(e);
            }
        };

        let step = match self
            .plans
            .update_plan_step_status(cx, step.id, StepStatus::Running, Some(run.id), None)
            .await
        {
            Ok(step) => step,
            Err(e) if e.is_conflict() => {
                // Skipped or cancelled between claim and start.
                self.abandon_run(cx, run.id, RunCompletion::cancelled("step no longer runnable"))
                    .await;
                return Ok(StepOutcome::Lost);
            }
            Err(e) => return Err(e),
        };

        match self.dispatcher.dispatch(cx, &run, &step).await {
            Ok(()) => {
                debug!(step_id = %step.id, run_id = %run.id, "step dispatched");
                Ok(StepOutcome::Dispatched(run.id))
            }
            Err(e) => {
                error!(step_id = %step.id, run_id = %run.id, error = %e, "dispatch failed");
                let reason = format!("dispatch failed: {e}");
                self.abandon_run(cx, run.id, RunCompletion::failed(reason.clone()))
                    .await;
                self.plans
                    .update_plan_step_status(cx, step.id, StepStatus::Failed, None, Some(reason))
                    .await?;
                Ok(StepOutcome::Failed)
            }
        }
    }

    async fn abandon_run(&self, cx: &Context, run_id: RunId, completion: RunCompletion) {
        if let Err(e) = self.runs.complete_run(cx, run_id, completion).await {
            warn!(%run_id, error = %e, "could not close abandoned run");
        }
    }

    /// Records a finished run on its step, applies the failure policy and
    /// dispatches whatever became eligible.
    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    pub async fn on_run_finished(&self, cx: &Context, run_id: RunId) -> StoreResult<DispatchReport> {
        let run = self.runs.get_run(cx, run_id).await?;
        if !run.status.is_terminal() {
            return Err(StoreError::Validation(format!(
                "run {run_id} is still {}",
                run.status
            )));
        }
        let step = self.plans.get_plan_step_by_run_id(cx, run_id).await?;

        let (status, error) = match run.status {
            RunStatus::Completed => (StepStatus::Completed, None),
            RunStatus::Cancelled if run.error.is_empty() => {
                (StepStatus::Failed, Some("run cancelled".to_string()))
            }
            _ => (StepStatus::Failed, Some(run.error.clone())),
        };

        let mut skipped = Vec::new();
        if step.status.is_terminal() {
            debug!(step_id = %step.id, "run outcome already recorded");
        } else {
            match self
                .plans
                .update_plan_step_status(cx, step.id, status, None, error)
                .await
            {
                Ok(_) => {
                    debug!(step_id = %step.id, %status, "step finished");
                    if status == StepStatus::Failed {
                        skipped = self.apply_failure_policy(cx, step.plan_id, step.id).await?;
                    }
                }
                Err(e) if e.is_conflict() => {
                    debug!(step_id = %step.id, "step finished concurrently");
                }
                Err(e) => return Err(e),
            }
        }

        let mut report = self.dispatch_ready(cx, step.plan_id).await?;
        if status == StepStatus::Failed {
            report.failed.insert(0, step.id);
        }
        skipped.append(&mut report.skipped);
        report.skipped = skipped;
        Ok(report)
    }

    /// Cancels the plan and skips every step that has not started. Running
    /// steps keep going until their runs finish.
    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    pub async fn cancel_plan(&self, cx: &Context, plan_id: PlanId) -> StoreResult<Vec<StepId>> {
        let mut attempts = 0;
        loop {
            let plan = self.plans.get_plan(cx, plan_id).await?;
            match self
                .plans
                .update_plan_status(cx, plan_id, PlanStatus::Cancelled, plan.version)
                .await
            {
                Ok(_) => break,
                Err(e) if e.is_conflict() && !plan.status.is_terminal() => {
                    attempts += 1;
                    if attempts >= STATUS_RETRIES {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let skipped = self.skip_unstarted(cx, plan_id, "plan cancelled").await?;
        info!(%plan_id, skipped = skipped.len(), "plan cancelled");
        Ok(skipped)
    }

    async fn apply_failure_policy(
        &self,
        cx: &Context,
        plan_id: PlanId,
        failed: StepId,
    ) -> StoreResult<Vec<StepId>> {
        let plan = self.plans.get_plan(cx, plan_id).await?;
        match plan.failure_policy {
            FailurePolicy::FailFast => {
                let skipped = self
                    .skip_unstarted(cx, plan_id, &format!("plan failed at step {failed}"))
                    .await?;
                self.transition_plan(cx, plan_id, PlanStatus::Failed).await?;
                warn!(%plan_id, step_id = %failed, "plan failed fast");
                Ok(skipped)
            }
            FailurePolicy::BestEffort => {
                let steps = self.plans.list_plan_steps(cx, plan_id).await?;
                let downstream = transitive_dependents(&steps, &failed);
                let dependents: Vec<StepId> = steps
                    .iter()
                    .map(|s| s.id)
                    .filter(|id| downstream.contains(id))
                    .collect();
                if dependents.is_empty() {
                    return Ok(Vec::new());
                }
                self.plans
                    .skip_plan_steps(cx, plan_id, dependents, format!("dependency {failed} failed"))
                    .await
            }
        }
    }

    async fn skip_unstarted(
        &self,
        cx: &Context,
        plan_id: PlanId,
        reason: &str,
    ) -> StoreResult<Vec<StepId>> {
        let unstarted: Vec<StepId> = self
            .plans
            .list_plan_steps(cx, plan_id)
            .await?
            .into_iter()
            .filter(|s| matches!(s.status, StepStatus::Pending | StepStatus::Ready))
            .map(|s| s.id)
            .collect();
        if unstarted.is_empty() {
            return Ok(unstarted);
        }
        self.plans
            .skip_plan_steps(cx, plan_id, unstarted, reason.to_string())
            .await
    }

    /// Completes or fails a running plan once every step is terminal.
    async fn finalize(&self, cx: &Context, plan_id: PlanId) -> StoreResult<PlanStatus> {
        let plan = self.plans.get_plan(cx, plan_id).await?;
        if plan.status != PlanStatus::Running {
            return Ok(plan.status);
        }
        let steps = self.plans.list_plan_steps(cx, plan_id).await?;
        if !steps.iter().all(|s| s.status.is_terminal()) {
            return Ok(plan.status);
        }
        let outcome = if steps.iter().any(|s| s.status == StepStatus::Failed) {
            PlanStatus::Failed
        } else {
            PlanStatus::Completed
        };
        let status = self.transition_plan(cx, plan_id, outcome).await?;
        info!(%plan_id, %status, "plan finished");
        Ok(status)
    }

    /// Applies a status change, re-reading the plan on version conflicts.
    /// A plan that is already terminal is left as it is.
    async fn transition_plan(
        &self,
        cx: &Context,
        plan_id: PlanId,
        status: PlanStatus,
    ) -> StoreResult<PlanStatus> {
        for _ in 0..STATUS_RETRIES {
            let plan = self.plans.get_plan(cx, plan_id).await?;
            if plan.status.is_terminal() {
                return Ok(plan.status);
            }
            match self
                .plans
                .update_plan_status(cx, plan_id, status, plan.version)
                .await
            {
                Ok(updated) => return Ok(updated.status),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::Conflict(format!(
            "plan {plan_id} kept changing while moving to {status}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ProjectFields, ProjectRepository};
    use crate::ids::{AgentId, ProjectId, TaskId, TenantId};
    use crate::plan::domain::{NewPlan, NewStep, PlanProtocol};
    use crate::storage::SqliteStore;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        dispatched: Mutex<Vec<StepId>>,
        reject: Mutex<HashSet<StepId>>,
    }

    #[async_trait]
    impl RunDispatcher for RecordingDispatcher {
        async fn dispatch(&self, _cx: &Context, _run: &Run, step: &Step) -> Result<(), DispatchError> {
            if self.reject.lock().contains(&step.id) {
                return Err(DispatchError::Unavailable("no workers".into()));
            }
            self.dispatched.lock().push(step.id);
            Ok(())
        }
    }

    struct Harness {
        store: Arc<SqliteStore>,
        dispatcher: Arc<RecordingDispatcher>,
        scheduler: Scheduler,
        cx: Context,
        project: ProjectId,
    }

    async fn harness() -> Harness {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cx = Context::new(TenantId::new());
        let project = store
            .create_project(&cx, ProjectFields::named("sched"))
            .await
            .unwrap()
            .id;
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let scheduler = Scheduler::new(store.clone(), store.clone(), dispatcher.clone());
        Harness {
            store,
            dispatcher,
            scheduler,
            cx,
            project,
        }
    }

    fn step() -> NewStep {
        NewStep::new(TaskId::new(), AgentId::new())
    }

    impl Harness {
        async fn plan(
            &self,
            configure: impl FnOnce(&mut NewPlan),
            steps: Vec<NewStep>,
        ) -> PlanId {
            let mut new = NewPlan::new(self.project, "plan");
            configure(&mut new);
            self.store.create_plan(&self.cx, new, steps).await.unwrap().0.id
        }

        async fn finish(&self, report: &DispatchReport, step: StepId, completion: RunCompletion) -> DispatchReport {
            let run_id = report
                .dispatched
                .iter()
                .find(|d| d.step_id == step)
                .map(|d| d.run_id)
                .unwrap();
            self.store.complete_run(&self.cx, run_id, completion).await.unwrap();
            self.scheduler.on_run_finished(&self.cx, run_id).await.unwrap()
        }

        async fn status(&self, step: StepId) -> StepStatus {
            self.store.get_plan_step(&self.cx, step).await.unwrap().status
        }
    }

    fn ids(report: &DispatchReport) -> Vec<StepId> {
        report.dispatched.iter().map(|d| d.step_id).collect()
    }

    #[tokio::test]
    async fn fan_in_waits_for_both_parents() {
        let h = harness().await;
        let a = step();
        let b = step();
        let c = step().after(&[a.id, b.id]);
        let plan = h
            .plan(|p| p.max_parallel = 2, vec![a.clone(), b.clone(), c.clone()])
            .await;

        let first = h.scheduler.start_plan(&h.cx, plan).await.unwrap();
        assert_eq!(ids(&first), vec![a.id, b.id]);
        assert_eq!(first.plan_status, PlanStatus::Running);
        assert_eq!(h.status(c.id).await, StepStatus::Pending);

        let after_a = h.finish(&first, a.id, RunCompletion::succeeded("a")).await;
        assert!(after_a.dispatched.is_empty());

        let after_b = h.finish(&first, b.id, RunCompletion::succeeded("b")).await;
        assert_eq!(ids(&after_b), vec![c.id]);

        let done = h.finish(&after_b, c.id, RunCompletion::succeeded("c")).await;
        assert_eq!(done.plan_status, PlanStatus::Completed);
        assert_eq!(*h.dispatcher.dispatched.lock(), vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn sequential_protocol_runs_one_at_a_time() {
        let h = harness().await;
        let a = step();
        let b = step();
        let plan = h
            .plan(
                |p| {
                    p.protocol = PlanProtocol::Sequential;
                    p.max_parallel = 4;
                },
                vec![a.clone(), b.clone()],
            )
            .await;
        let first = h.scheduler.start_plan(&h.cx, plan).await.unwrap();
        assert_eq!(ids(&first), vec![a.id]);

        // A repeated pass changes nothing while a is in flight.
        let idle = h.scheduler.dispatch_ready(&h.cx, plan).await.unwrap();
        assert!(idle.dispatched.is_empty());

        let next = h.finish(&first, a.id, RunCompletion::succeeded("a")).await;
        assert_eq!(ids(&next), vec![b.id]);
        let run = h
            .store
            .get_run(&h.cx, next.dispatched[0].run_id)
            .await
            .unwrap();
        assert_eq!(run.exec_mode, "sequential");
    }

    #[tokio::test]
    async fn fail_fast_skips_the_rest_and_fails_the_plan() {
        let h = harness().await;
        let a = step();
        let b = step();
        let c = step().after(&[a.id]);
        let d = step();
        let plan = h
            .plan(
                |p| p.max_parallel = 2,
                vec![a.clone(), b.clone(), c.clone(), d.clone()],
            )
            .await;
        let first = h.scheduler.start_plan(&h.cx, plan).await.unwrap();
        assert_eq!(ids(&first), vec![a.id, b.id]);

        let report = h.finish(&first, a.id, RunCompletion::failed("tests red")).await;
        assert_eq!(report.plan_status, PlanStatus::Failed);
        assert_eq!(report.failed, vec![a.id]);
        assert!(report.dispatched.is_empty());
        assert_eq!(h.status(c.id).await, StepStatus::Skipped);
        assert_eq!(h.status(d.id).await, StepStatus::Skipped);
        assert_eq!(h.status(b.id).await, StepStatus::Running);

        // The running step still records its outcome.
        h.finish(&first, b.id, RunCompletion::succeeded("b")).await;
        assert_eq!(h.status(b.id).await, StepStatus::Completed);
        let failed = h.store.get_plan_step(&h.cx, a.id).await.unwrap();
        assert_eq!(failed.error, "tests red");
    }

    #[tokio::test]
    async fn best_effort_only_skips_dependents() {
        let h = harness().await;
        let a = step();
        let b = step().after(&[a.id]);
        let c = step().after(&[b.id]);
        let d = step();
        let plan = h
            .plan(
                |p| {
                    p.failure_policy = FailurePolicy::BestEffort;
                    p.max_parallel = 2;
                },
                vec![a.clone(), b.clone(), c.clone(), d.clone()],
            )
            .await;
        let first = h.scheduler.start_plan(&h.cx, plan).await.unwrap();
        assert_eq!(ids(&first), vec![a.id, d.id]);

        let report = h.finish(&first, a.id, RunCompletion::failed("boom")).await;
        assert_eq!(report.skipped, vec![b.id, c.id]);
        assert_eq!(report.plan_status, PlanStatus::Running);

        let report = h.finish(&first, d.id, RunCompletion::succeeded("d")).await;
        assert_eq!(report.plan_status, PlanStatus::Failed);
    }

    #[tokio::test]
    async fn dispatcher_failure_fails_run_and_step() {
        let h = harness().await;
        let a = step();
        let b = step();
        h.dispatcher.reject.lock().insert(a.id);
        let plan = h
            .plan(
                |p| p.failure_policy = FailurePolicy::BestEffort,
                vec![a.clone(), b.clone()],
            )
            .await;

        // a fails on dispatch, which frees the single slot for b.
        let report = h.scheduler.start_plan(&h.cx, plan).await.unwrap();
        assert_eq!(report.failed, vec![a.id]);
        assert_eq!(ids(&report), vec![b.id]);

        let failed = h.store.get_plan_step(&h.cx, a.id).await.unwrap();
        assert_eq!(failed.status, StepStatus::Failed);
        assert!(failed.error.contains("no workers"));
        let run = h.store.get_run(&h.cx, failed.run_id.unwrap()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_skips_unstarted_and_blocks_dispatch() {
        let h = harness().await;
        let a = step();
        let b = step().after(&[a.id]);
        let plan = h.plan(|_| {}, vec![a.clone(), b.clone()]).await;
        let first = h.scheduler.start_plan(&h.cx, plan).await.unwrap();

        let skipped = h.scheduler.cancel_plan(&h.cx, plan).await.unwrap();
        assert_eq!(skipped, vec![b.id]);
        assert!(h.scheduler.cancel_plan(&h.cx, plan).await.unwrap_err().is_conflict());

        let report = h.finish(&first, a.id, RunCompletion::succeeded("a")).await;
        assert_eq!(report.plan_status, PlanStatus::Cancelled);
        assert!(report.dispatched.is_empty());
        assert_eq!(h.status(a.id).await, StepStatus::Completed);
    }

    #[tokio::test]
    async fn concurrent_schedulers_never_double_dispatch() {
        let h = harness().await;
        let steps: Vec<_> = (0..4).map(|_| step()).collect();
        let plan = h.plan(|p| p.max_parallel = 4, steps.clone()).await;
        let p = h.store.get_plan(&h.cx, plan).await.unwrap();
        h.store
            .update_plan_status(&h.cx, plan, PlanStatus::Running, p.version)
            .await
            .unwrap();

        let other = Scheduler::new(h.store.clone(), h.store.clone(), h.dispatcher.clone());
        let (left, right) = tokio::join!(
            h.scheduler.dispatch_ready(&h.cx, plan),
            other.dispatch_ready(&h.cx, plan)
        );
        let total = left.unwrap().dispatched.len() + right.unwrap().dispatched.len();
        assert_eq!(total, 4);

        for s in &steps {
            let runs = h.store.list_runs_by_task(&h.cx, s.task_id).await.unwrap();
            assert_eq!(runs.len(), 1);
        }
    }

    #[test]
    fn selection_respects_capacity_and_order() {
        let plan_id = PlanId::new();
        let now = time::OffsetDateTime::now_utc();
        let mk = |round, status, deps: Vec<StepId>| Step {
            id: StepId::new(),
            plan_id,
            task_id: TaskId::new(),
            agent_id: AgentId::new(),
            policy_profile: String::new(),
            deliver_mode: String::new(),
            depends_on: deps,
            status,
            run_id: None,
            round,
            error: String::new(),
            created_at: now,
            updated_at: now,
        };
        let done = mk(1, StepStatus::Completed, vec![]);
        let busy = mk(1, StepStatus::Running, vec![]);
        let blocked = mk(2, StepStatus::Pending, vec![busy.id]);
        let free_a = mk(2, StepStatus::Pending, vec![done.id]);
        let free_b = mk(3, StepStatus::Pending, vec![]);
        let steps = vec![done, busy, blocked, free_a.clone(), free_b.clone()];

        let plan = ExecutionPlan {
            id: plan_id,
            tenant_id: TenantId::new(),
            project_id: ProjectId::new(),
            team_id: None,
            name: "p".into(),
            description: String::new(),
            protocol: PlanProtocol::Parallel,
            failure_policy: FailurePolicy::FailFast,
            status: PlanStatus::Running,
            max_parallel: 2,
            version: 2,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(select_dispatchable(&plan, &steps), vec![free_a.id]);

        let wide = ExecutionPlan {
            max_parallel: 5,
            ..plan
        };
        assert_eq!(select_dispatchable(&wide, &steps), vec![free_a.id, free_b.id]);
    }
}
