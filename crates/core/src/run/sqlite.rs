//! SQLite implementation of RunStore

use crate::context::Context;
use crate::db::util::{ensure_owned, now, write_tx};
use crate::error::{StoreError, StoreResult};
use crate::ids::{RunId, TaskId, TenantId};
use crate::run::domain::{NewRun, Run, RunCompletion, RunProgress, RunStatus};
use crate::run::store::RunStore;
use crate::storage::SqliteStore;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, instrument, warn};

const COLUMNS: &str = "public_id, tenant_id, task_id, agent_id, project_id, team_id, policy_profile, exec_mode, deliver_mode, status, step_count, cost_usd, tokens_in, tokens_out, model, output, error, version, started_at, completed_at, created_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    Ok(Run {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        task_id: row.get(2)?,
        agent_id: row.get(3)?,
        project_id: row.get(4)?,
        team_id: row.get(5)?,
        policy_profile: row.get(6)?,
        exec_mode: row.get(7)?,
        deliver_mode: row.get(8)?,
        status: row.get(9)?,
        step_count: row.get(10)?,
        cost_usd: row.get(11)?,
        tokens_in: row.get(12)?,
        tokens_out: row.get(13)?,
        model: row.get(14)?,
        output: row.get(15)?,
        error: row.get(16)?,
        version: row.get(17)?,
        started_at: row.get(18)?,
        completed_at: row.get(19)?,
        created_at: row.get(20)?,
    })
}

pub(crate) fn load_run(conn: &Connection, tenant: TenantId, id: RunId) -> StoreResult<Run> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM runs WHERE public_id = ?1 AND tenant_id = ?2"),
        params![id, tenant],
        map_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("run", id))
}

/// Why a guarded run write matched nothing.
fn rejected(conn: &Connection, tenant: TenantId, id: RunId, action: &str) -> StoreError {
    match load_run(conn, tenant, id) {
        Ok(run) => {
            warn!(run_id = %id, status = %run.status, action, "run transition rejected");
            StoreError::Conflict(format!("cannot {action} run {id} in status {}", run.status))
        }
        Err(e) => e,
    }
}

#[async_trait]
impl RunStore for SqliteStore {
    #[instrument(skip(self, cx, run), fields(tenant = %cx.tenant(), task_id = %run.task_id))]
    async fn create_run(&self, cx: &Context, run: NewRun) -> StoreResult<Run> {
        let tenant = cx.tenant();
        let id = RunId::new();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            ensure_owned(&tx, "projects", "project", &run.project_id, tenant)?;
            tx.execute(
                "INSERT INTO runs (public_id, tenant_id, task_id, agent_id, project_id, team_id,
                                   policy_profile, exec_mode, deliver_mode, status, version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11)",
                params![
                    id,
                    tenant,
                    run.task_id,
                    run.agent_id,
                    run.project_id,
                    run.team_id,
                    run.policy_profile,
                    run.exec_mode,
                    run.deliver_mode,
                    RunStatus::Pending,
                    now()
                ],
            )?;
            let created = load_run(&tx, tenant, id)?;
            tx.commit()?;
            debug!(run_id = %id, "run created");
            Ok(created)
        })
        .await
    }

    async fn get_run(&self, cx: &Context, id: RunId) -> StoreResult<Run> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| load_run(conn, tenant, id)).await
    }

    async fn list_runs_by_task(&self, cx: &Context, task_id: TaskId) -> StoreResult<Vec<Run>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM runs WHERE tenant_id = ?1 AND task_id = ?2 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![tenant, task_id], map_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn start_run(&self, cx: &Context, id: RunId) -> StoreResult<Run> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            let updated = tx.execute(
                "UPDATE runs SET status = 'running', started_at = ?1, version = version + 1
                 WHERE public_id = ?2 AND tenant_id = ?3 AND status = 'pending'",
                params![now(), id, tenant],
            )?;
            if updated == 0 {
                return Err(rejected(&tx, tenant, id, "start"));
            }
            let run = load_run(&tx, tenant, id)?;
            tx.commit()?;
            debug!(run_id = %id, "run started");
            Ok(run)
        })
        .await
    }

    #[instrument(skip(self, cx, progress), fields(tenant = %cx.tenant(), status = %progress.status))]
    async fn update_run_status(
        &self,
        cx: &Context,
        id: RunId,
        progress: RunProgress,
    ) -> StoreResult<Run> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            let current = load_run(&tx, tenant, id)?;
            if current.status.is_terminal() {
                warn!(run_id = %id, status = %current.status, "progress on terminal run");
                return Err(StoreError::Conflict(format!(
                    "run {id} is already {}",
                    current.status
                )));
            }
            if current.status == RunStatus::Running && progress.status == RunStatus::Pending {
                return Err(StoreError::Conflict(format!(
                    "run {id} cannot return to pending"
                )));
            }
            progress.validate_against(&current)?;

            tx.execute(
                "UPDATE runs SET status = ?1, step_count = ?2, cost_usd = ?3, tokens_in = ?4,
                        tokens_out = ?5,
                        started_at = CASE WHEN ?1 = 'running' THEN COALESCE(started_at, ?6)
                                          ELSE started_at END,
                        version = version + 1
                 WHERE public_id = ?7 AND tenant_id = ?8 AND version = ?9",
                params![
                    progress.status,
                    progress.step_count,
                    progress.cost_usd,
                    progress.tokens_in,
                    progress.tokens_out,
                    now(),
                    id,
                    tenant,
                    current.version
                ],
            )?;
            let run = load_run(&tx, tenant, id)?;
            tx.commit()?;
            Ok(run)
        })
        .await
    }

    #[instrument(skip(self, cx, completion), fields(tenant = %cx.tenant(), status = %completion.status))]
    async fn complete_run(
        &self,
        cx: &Context,
        id: RunId,
        completion: RunCompletion,
    ) -> StoreResult<Run> {
        completion.validate()?;
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            let updated = tx.execute(
                "UPDATE runs SET status = ?1, output = ?2, error = ?3,
                        cost_usd = MAX(cost_usd, ?4), step_count = MAX(step_count, ?5),
                        tokens_in = MAX(tokens_in, ?6), tokens_out = MAX(tokens_out, ?7),
                        model = CASE WHEN ?8 = '' THEN model ELSE ?8 END,
                        completed_at = ?9, version = version + 1
                 WHERE public_id = ?10 AND tenant_id = ?11 AND status IN ('pending', 'running')",
                params![
                    completion.status,
                    completion.output,
                    completion.error,
                    completion.cost_usd,
                    completion.step_count,
                    completion.tokens_in,
                    completion.tokens_out,
                    completion.model,
                    now(),
                    id,
                    tenant
                ],
            )?;
            if updated == 0 {
                return Err(rejected(&tx, tenant, id, "complete"));
            }
            let run = load_run(&tx, tenant, id)?;
            tx.commit()?;
            debug!(run_id = %id, status = %run.status, "run completed");
            Ok(run)
        })
        .await
    }
}
