//! SQLite implementation of PlanStore

use crate::context::Context;
use crate::db::util::{ensure_owned, json_column, now, stale_write, to_json, write_tx};
use crate::error::{StoreError, StoreResult};
use crate::ids::{PlanId, ProjectId, RunId, StepId, TenantId};
use crate::plan::dag::{DagError, assign_rounds};
use crate::plan::domain::{ExecutionPlan, NewPlan, NewStep, PlanStatus, Step, StepStatus};
use crate::plan::store::PlanStore;
use crate::storage::SqliteStore;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

const PLAN_COLUMNS: &str = "public_id, tenant_id, project_id, team_id, name, description, protocol, failure_policy, status, max_parallel, version, created_at, updated_at";

fn map_plan(row: &Row<'_>) -> rusqlite::Result<ExecutionPlan> {
    Ok(ExecutionPlan {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        project_id: row.get(2)?,
        team_id: row.get(3)?,
        name: row.get(4)?,
        description: row.get(5)?,
        protocol: row.get(6)?,
        failure_policy: row.get(7)?,
        status: row.get(8)?,
        max_parallel: row.get(9)?,
        version: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

const STEP_COLUMNS: &str = "public_id, plan_id, task_id, agent_id, policy_profile, deliver_mode, depends_on, status, run_id, round, error, created_at, updated_at";

fn map_step(row: &Row<'_>) -> rusqlite::Result<Step> {
    let depends_on: String = row.get(6)?;
    Ok(Step {
        id: row.get(0)?,
        plan_id: row.get(1)?,
        task_id: row.get(2)?,
        agent_id: row.get(3)?,
        policy_profile: row.get(4)?,
        deliver_mode: row.get(5)?,
        depends_on: json_column(6, &depends_on)?,
        status: row.get(7)?,
        run_id: row.get(8)?,
        round: row.get(9)?,
        error: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

pub(crate) fn load_plan(
    conn: &Connection,
    tenant: TenantId,
    id: PlanId,
) -> StoreResult<ExecutionPlan> {
    conn.query_row(
        &format!("SELECT {PLAN_COLUMNS} FROM execution_plans WHERE public_id = ?1 AND tenant_id = ?2"),
        params![id, tenant],
        map_plan,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("plan", id))
}

fn load_step(conn: &Connection, tenant: TenantId, id: StepId) -> StoreResult<Step> {
    conn.query_row(
        &format!("SELECT {STEP_COLUMNS} FROM plan_steps WHERE public_id = ?1 AND tenant_id = ?2"),
        params![id, tenant],
        map_step,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("plan step", id))
}

fn load_steps(conn: &Connection, tenant: TenantId, plan_id: PlanId) -> StoreResult<Vec<Step>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STEP_COLUMNS} FROM plan_steps WHERE plan_id = ?1 AND tenant_id = ?2 ORDER BY round, id"
    ))?;
    let rows = stmt.query_map(params![plan_id, tenant], map_step)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn insert_step(
    conn: &Connection,
    tenant: TenantId,
    plan_id: PlanId,
    step: &NewStep,
    round: u32,
    ts: OffsetDateTime,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO plan_steps (public_id, tenant_id, plan_id, task_id, agent_id, policy_profile,
                                 deliver_mode, depends_on, status, round, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            step.id,
            tenant,
            plan_id,
            step.task_id,
            step.agent_id,
            step.policy_profile,
            step.deliver_mode,
            to_json(&step.depends_on)?,
            StepStatus::Pending,
            round,
            ts
        ],
    )?;
    Ok(())
}

/// A step may only be claimed or started once every dependency completed.
fn ensure_dependencies_completed(
    conn: &Connection,
    tenant: TenantId,
    step: &Step,
) -> StoreResult<()> {
    if step.depends_on.is_empty() {
        return Ok(());
    }
    let statuses: HashMap<StepId, StepStatus> = load_steps(conn, tenant, step.plan_id)?
        .into_iter()
        .map(|s| (s.id, s.status))
        .collect();
    for dep in &step.depends_on {
        match statuses.get(dep) {
            Some(StepStatus::Completed) => {}
            Some(status) => {
                return Err(StoreError::Conflict(format!(
                    "step {} waits on dependency {dep}, which is {status}",
                    step.id
                )));
            }
            None => {
                return Err(StoreError::Internal(format!(
                    "step {} references missing dependency {dep}",
                    step.id
                )));
            }
        }
    }
    Ok(())
}

fn ensure_open(plan: &ExecutionPlan) -> StoreResult<()> {
    if plan.status.is_terminal() {
        return Err(StoreError::Conflict(format!(
            "plan {} is already {}",
            plan.id, plan.status
        )));
    }
    Ok(())
}

#[async_trait]
impl PlanStore for SqliteStore {
    #[instrument(skip(self, cx, plan, steps), fields(tenant = %cx.tenant(), steps = steps.len()))]
    async fn create_plan(
        &self,
        cx: &Context,
        plan: NewPlan,
        steps: Vec<NewStep>,
    ) -> StoreResult<(ExecutionPlan, Vec<Step>)> {
        plan.validate()?;
        let rounds = assign_rounds(&steps).inspect_err(|e| warn!(error = %e, "plan rejected"))?;
        let tenant = cx.tenant();
        let id = PlanId::new();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            ensure_owned(&tx, "projects", "project", &plan.project_id, tenant)?;
            let ts = now();
            tx.execute(
                "INSERT INTO execution_plans (public_id, tenant_id, project_id, team_id, name, description,
                                              protocol, failure_policy, status, max_parallel, version,
                                              created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?11)",
                params![
                    id,
                    tenant,
                    plan.project_id,
                    plan.team_id,
                    plan.name,
                    plan.description,
                    plan.protocol,
                    plan.failure_policy,
                    PlanStatus::Pending,
                    plan.max_parallel,
                    ts
                ],
            )?;
            for (step, round) in steps.iter().zip(rounds) {
                insert_step(&tx, tenant, id, step, round, ts)?;
            }
            let created = load_plan(&tx, tenant, id)?;
            let stored = load_steps(&tx, tenant, id)?;
            tx.commit()?;
            debug!(plan_id = %id, "plan created");
            Ok((created, stored))
        })
        .await
    }

    async fn get_plan(&self, cx: &Context, id: PlanId) -> StoreResult<ExecutionPlan> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| load_plan(conn, tenant, id))
            .await
    }

    async fn list_plans_by_project(
        &self,
        cx: &Context,
        project_id: ProjectId,
    ) -> StoreResult<Vec<ExecutionPlan>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PLAN_COLUMNS} FROM execution_plans
                 WHERE tenant_id = ?1 AND project_id = ?2 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![tenant, project_id], map_plan)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn update_plan_status(
        &self,
        cx: &Context,
        id: PlanId,
        status: PlanStatus,
        expected_version: i64,
    ) -> StoreResult<ExecutionPlan> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            let current = load_plan(&tx, tenant, id)?;
            if !current.status.can_transition_to(status) {
                warn!(plan_id = %id, from = %current.status, to = %status, "plan transition rejected");
                return Err(StoreError::Conflict(format!(
                    "plan {id} cannot move from {} to {status}",
                    current.status
                )));
            }
            let updated = tx.execute(
                "UPDATE execution_plans SET status = ?1, updated_at = ?2, version = version + 1
                 WHERE public_id = ?3 AND tenant_id = ?4 AND version = ?5",
                params![status, now(), id, tenant, expected_version],
            )?;
            if updated == 0 {
                return Err(stale_write(&tx, "execution_plans", "plan", &id, tenant, expected_version));
            }
            let plan = load_plan(&tx, tenant, id)?;
            tx.commit()?;
            debug!(plan_id = %id, status = %plan.status, "plan status updated");
            Ok(plan)
        })
        .await
    }

    #[instrument(skip(self, cx, step), fields(tenant = %cx.tenant(), step_id = %step.id))]
    async fn create_plan_step(
        &self,
        cx: &Context,
        plan_id: PlanId,
        step: NewStep,
    ) -> StoreResult<Step> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            let plan = load_plan(&tx, tenant, plan_id)?;
            ensure_open(&plan)?;

            let rounds: HashMap<StepId, u32> = load_steps(&tx, tenant, plan_id)?
                .into_iter()
                .map(|s| (s.id, s.round))
                .collect();
            let mut round = 1;
            for dep in &step.depends_on {
                if *dep == step.id {
                    return Err(DagError::SelfDependency(step.id.to_string()).into());
                }
                let dep_round = rounds.get(dep).ok_or_else(|| DagError::UnknownDependency {
                    step: step.id.to_string(),
                    dependency: dep.to_string(),
                })?;
                round = round.max(dep_round + 1);
            }

            insert_step(&tx, tenant, plan_id, &step, round, now())?;
            let created = load_step(&tx, tenant, step.id)?;
            tx.commit()?;
            Ok(created)
        })
        .await
    }

    async fn get_plan_step(&self, cx: &Context, id: StepId) -> StoreResult<Step> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| load_step(conn, tenant, id))
            .await
    }

    async fn list_plan_steps(&self, cx: &Context, plan_id: PlanId) -> StoreResult<Vec<Step>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            ensure_owned(conn, "execution_plans", "plan", &plan_id, tenant)?;
            load_steps(conn, tenant, plan_id)
        })
        .await
    }

    async fn get_plan_step_by_run_id(&self, cx: &Context, run_id: RunId) -> StoreResult<Step> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            conn.query_row(
                &format!("SELECT {STEP_COLUMNS} FROM plan_steps WHERE run_id = ?1 AND tenant_id = ?2"),
                params![run_id, tenant],
                map_step,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("plan step for run", run_id))
        })
        .await
    }

    #[instrument(skip(self, cx, error), fields(tenant = %cx.tenant()))]
    async fn update_plan_step_status(
        &self,
        cx: &Context,
        id: StepId,
        status: StepStatus,
        run_id: Option<RunId>,
        error: Option<String>,
    ) -> StoreResult<Step> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            let current = load_step(&tx, tenant, id)?;
            if !current.status.can_transition_to(status) {
                warn!(step_id = %id, from = %current.status, to = %status, "step transition rejected");
                return Err(StoreError::Conflict(format!(
                    "step {id} cannot move from {} to {status}",
                    current.status
                )));
            }
            if status == StepStatus::Running && run_id.is_none() && current.run_id.is_none() {
                return Err(StoreError::Validation(format!(
                    "step {id} cannot run without a run id"
                )));
            }
            if matches!(status, StepStatus::Ready | StepStatus::Running) {
                ensure_open(&load_plan(&tx, tenant, current.plan_id)?)?;
                ensure_dependencies_completed(&tx, tenant, &current)?;
            }
            if let Some(run_id) = run_id {
                ensure_owned(&tx, "runs", "run", &run_id, tenant)?;
            }

            let updated = tx.execute(
                "UPDATE plan_steps SET status = ?1, run_id = COALESCE(?2, run_id),
                        error = COALESCE(?3, error), updated_at = ?4
                 WHERE public_id = ?5 AND tenant_id = ?6 AND status = ?7",
                params![status, run_id, error, now(), id, tenant, current.status],
            )?;
            if updated == 0 {
                return Err(StoreError::Conflict(format!(
                    "step {id} changed concurrently"
                )));
            }
            let step = load_step(&tx, tenant, id)?;
            tx.commit()?;
            debug!(step_id = %id, status = %step.status, "step status updated");
            Ok(step)
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn update_plan_step_round(
        &self,
        cx: &Context,
        id: StepId,
        round: u32,
    ) -> StoreResult<Step> {
        if round < 1 {
            return Err(StoreError::Validation("round must be at least 1".into()));
        }
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            let current = load_step(&tx, tenant, id)?;
            if current.status.is_terminal() {
                return Err(StoreError::Conflict(format!(
                    "step {id} is already {}",
                    current.status
                )));
            }

            let siblings = load_steps(&tx, tenant, current.plan_id)?;
            for sibling in &siblings {
                if current.depends_on.contains(&sibling.id) && sibling.round >= round {
                    return Err(StoreError::Validation(format!(
                        "round {round} does not follow dependency {} in round {}",
                        sibling.id, sibling.round
                    )));
                }
                if sibling.depends_on.contains(&id) && sibling.round <= round {
                    return Err(StoreError::Validation(format!(
                        "round {round} does not precede dependent {} in round {}",
                        sibling.id, sibling.round
                    )));
                }
            }

            tx.execute(
                "UPDATE plan_steps SET round = ?1, updated_at = ?2 WHERE public_id = ?3 AND tenant_id = ?4",
                params![round, now(), id, tenant],
            )?;
            let step = load_step(&tx, tenant, id)?;
            tx.commit()?;
            Ok(step)
        })
        .await
    }

    #[instrument(skip(self, cx, ids, reason), fields(tenant = %cx.tenant(), requested = ids.len()))]
    async fn skip_plan_steps(
        &self,
        cx: &Context,
        plan_id: PlanId,
        ids: Vec<StepId>,
        reason: String,
    ) -> StoreResult<Vec<StepId>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            ensure_owned(&tx, "execution_plans", "plan", &plan_id, tenant)?;
            let ts = now();
            let mut skipped = Vec::with_capacity(ids.len());
            {
                let mut stmt = tx.prepare(
                    "UPDATE plan_steps SET status = 'skipped', error = ?1, updated_at = ?2
                     WHERE public_id = ?3 AND plan_id = ?4 AND tenant_id = ?5
                       AND status IN ('pending', 'ready')",
                )?;
                for id in ids {
                    if stmt.execute(params![reason, ts, id, plan_id, tenant])? == 1 {
                        skipped.push(id);
                    }
                }
            }
            tx.commit()?;
            debug!(plan_id = %plan_id, skipped = skipped.len(), "steps skipped");
            Ok(skipped)
        })
        .await
    }
}
