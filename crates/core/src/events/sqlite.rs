//! SQLite implementation of EventStore and AuditStore

use crate::context::Context;
use crate::db::util::{ensure_owned, from_millis, json_column, now, to_json, to_millis, write_tx};
use crate::error::{StoreError, StoreResult};
use crate::events::cursor::{self, CursorKind};
use crate::events::domain::*;
use crate::events::store::{AuditStore, EventStore};
use crate::ids::{AgentId, AuditId, EventId, ProjectId, RunId, TaskId, TenantId};
use crate::storage::SqliteStore;
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

const EVENT_COLUMNS: &str = "public_id, tenant_id, agent_id, task_id, project_id, run_id, event_type, payload, request_id, version, created_at, tool_name, model, tokens_in, tokens_out, cost_usd";

fn map_event(row: &Row<'_>) -> rusqlite::Result<AgentEvent> {
    let payload: String = row.get(7)?;
    Ok(AgentEvent {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        agent_id: row.get(2)?,
        task_id: row.get(3)?,
        project_id: row.get(4)?,
        run_id: row.get(5)?,
        event_type: row.get(6)?,
        payload: json_column(7, &payload)?,
        request_id: row.get(8)?,
        version: row.get(9)?,
        created_at: from_millis(row.get(10)?)?,
        tool_name: row.get(11)?,
        model: row.get(12)?,
        tokens_in: row.get(13)?,
        tokens_out: row.get(14)?,
        cost_usd: row.get(15)?,
    })
}

const AUDIT_COLUMNS: &str =
    "id, public_id, tenant_id, project_id, run_id, agent_id, action, details, created_at";

fn map_audit(row: &Row<'_>) -> rusqlite::Result<(i64, AuditEntry)> {
    let details: String = row.get(7)?;
    Ok((
        row.get(0)?,
        AuditEntry {
            id: row.get(1)?,
            tenant_id: row.get(2)?,
            project_id: row.get(3)?,
            run_id: row.get(4)?,
            agent_id: row.get(5)?,
            action: row.get(6)?,
            details: json_column(7, &details)?,
            created_at: from_millis(row.get(8)?)?,
        },
    ))
}

/// Accumulates a dynamic WHERE clause with positional parameters.
#[derive(Default)]
struct Conditions {
    clauses: Vec<String>,
    values: Vec<SqlValue>,
}

impl Conditions {
    fn push(&mut self, clause: &str, value: impl Into<SqlValue>) {
        self.values.push(value.into());
        let slot = format!("?{}", self.values.len());
        self.clauses.push(clause.replace('?', &slot));
    }

    fn push_in(&mut self, column: &str, values: Vec<SqlValue>) {
        if values.is_empty() {
            return;
        }
        let mut slots = Vec::with_capacity(values.len());
        for value in values {
            self.values.push(value);
            slots.push(format!("?{}", self.values.len()));
        }
        self.clauses.push(format!("{column} IN ({})", slots.join(", ")));
    }

    fn sql(&self) -> String {
        self.clauses.join(" AND ")
    }
}

fn text(id: impl ToString) -> SqlValue {
    SqlValue::Text(id.to_string())
}

fn load_events(
    conn: &Connection,
    tenant: TenantId,
    column: &str,
    id: String,
    order: &str,
) -> StoreResult<Vec<AgentEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM agent_events
         WHERE tenant_id = ?1 AND {column} = ?2
         ORDER BY {order}"
    ))?;
    let rows = stmt.query_map(params![tenant, id], map_event)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn ensure_run_in_project(
    conn: &Connection,
    tenant: TenantId,
    run_id: RunId,
    project_id: ProjectId,
) -> StoreResult<()> {
    let owner: Option<ProjectId> = conn
        .query_row(
            "SELECT project_id FROM runs WHERE public_id = ?1 AND tenant_id = ?2",
            params![run_id, tenant],
            |row| row.get(0),
        )
        .optional()?;
    match owner {
        None => Err(StoreError::not_found("run", run_id)),
        Some(owner) if owner != project_id => Err(StoreError::Validation(format!(
            "run {run_id} does not belong to project {project_id}"
        ))),
        Some(_) => Ok(()),
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    #[instrument(
        skip(self, cx, event),
        fields(
            tenant = %cx.tenant(),
            event_type = %event.event_type,
            scope = tracing::field::Empty,
            version = tracing::field::Empty
        )
    )]
    async fn append(&self, cx: &Context, event: NewEvent) -> StoreResult<AgentEvent> {
        let tenant = cx.tenant();
        let scope = event.scope().to_string();
        tracing::Span::current().record("scope", scope.as_str());
        let payload = to_json(&event.payload)?;
        let id = EventId::new();

        let stored = self
            .run_blocking(cx, move |conn| {
                let tx = write_tx(conn)?;
                ensure_owned(&tx, "projects", "project", &event.project_id, tenant)?;
                if let Some(run_id) = event.run_id {
                    ensure_run_in_project(&tx, tenant, run_id, event.project_id)?;
                }

                // Reserve the next version for this scope inside the same transaction.
                let version: i64 = tx.query_row(
                    "INSERT INTO event_streams (tenant_id, scope, project_id, last_version)
                     VALUES (?1, ?2, ?3, 1)
                     ON CONFLICT(tenant_id, scope) DO UPDATE SET last_version = last_version + 1
                     RETURNING last_version",
                    params![tenant, scope, event.project_id],
                    |row| row.get(0),
                )?;

                let created_at = now();
                tx.execute(
                    "INSERT INTO agent_events (public_id, tenant_id, scope, version, agent_id, task_id,
                                               project_id, run_id, event_type, payload, request_id,
                                               tool_name, model, tokens_in, tokens_out, cost_usd, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                    params![
                        id,
                        tenant,
                        scope,
                        version,
                        event.agent_id,
                        event.task_id,
                        event.project_id,
                        event.run_id,
                        event.event_type,
                        payload,
                        event.request_id,
                        event.tool_name,
                        event.model,
                        event.tokens_in,
                        event.tokens_out,
                        event.cost_usd,
                        to_millis(created_at)
                    ],
                )?;
                let stored = tx.query_row(
                    &format!("SELECT {EVENT_COLUMNS} FROM agent_events WHERE public_id = ?1"),
                    params![id],
                    map_event,
                )?;
                tx.commit()?;
                Ok(stored)
            })
            .await?;

        tracing::Span::current().record("version", stored.version);
        debug!("event appended");
        Ok(stored)
    }

    async fn load_by_run(&self, cx: &Context, run_id: RunId) -> StoreResult<Vec<AgentEvent>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            load_events(conn, tenant, "run_id", run_id.to_string(), "version")
        })
        .await
    }

    async fn load_by_task(&self, cx: &Context, task_id: TaskId) -> StoreResult<Vec<AgentEvent>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            load_events(conn, tenant, "task_id", task_id.to_string(), "id")
        })
        .await
    }

    async fn load_by_agent(
        &self,
        cx: &Context,
        agent_id: AgentId,
    ) -> StoreResult<Vec<AgentEvent>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            load_events(conn, tenant, "agent_id", agent_id.to_string(), "id")
        })
        .await
    }

    #[instrument(skip(self, cx, filter, cursor), fields(tenant = %cx.tenant()))]
    async fn load_trajectory(
        &self,
        cx: &Context,
        run_id: RunId,
        filter: TrajectoryFilter,
        cursor: Option<String>,
        limit: Option<usize>,
    ) -> StoreResult<TrajectoryPage> {
        let tenant = cx.tenant();
        let after_version = cursor::decode(CursorKind::Trajectory, cursor.as_deref())?;
        let limit = self.events_config().page_size(limit);

        self.run_blocking(cx, move |conn| {
            // One read transaction so the page and the total agree.
            let tx = conn.transaction()?;
            ensure_owned(&tx, "runs", "run", &run_id, tenant)?;

            let mut cond = Conditions::default();
            cond.push("tenant_id = ?", text(tenant));
            cond.push("run_id = ?", text(run_id));
            cond.push_in(
                "event_type",
                filter.types.iter().map(|t| text(t.as_str())).collect(),
            );
            if let Some(after) = filter.after {
                cond.push("created_at > ?", to_millis(after));
            }
            if let Some(before) = filter.before {
                cond.push("created_at < ?", to_millis(before));
            }

            let total: i64 = tx.query_row(
                &format!("SELECT COUNT(*) FROM agent_events WHERE {}", cond.sql()),
                params_from_iter(cond.values.iter()),
                |row| row.get(0),
            )?;

            cond.push("version > ?", after_version);
            let fetch = limit as i64 + 1;
            let mut stmt = tx.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM agent_events WHERE {} ORDER BY version LIMIT {fetch}",
                cond.sql()
            ))?;
            let mut events = stmt
                .query_map(params_from_iter(cond.values.iter()), map_event)?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);
            tx.finish()?;

            let has_more = events.len() > limit;
            events.truncate(limit);
            let cursor = events
                .last()
                .map(|e| cursor::encode(CursorKind::Trajectory, e.version));
            Ok(TrajectoryPage {
                events,
                cursor,
                has_more,
                total: total as u64,
            })
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn trajectory_stats(&self, cx: &Context, run_id: RunId) -> StoreResult<TrajectoryStats> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let tx = conn.transaction()?;
            ensure_owned(&tx, "runs", "run", &run_id, tenant)?;

            let mut by_type = BTreeMap::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT event_type, COUNT(*) FROM agent_events
                     WHERE tenant_id = ?1 AND run_id = ?2
                     GROUP BY event_type",
                )?;
                let rows = stmt.query_map(params![tenant, run_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (kind, count) = row?;
                    by_type.insert(kind, count as u64);
                }
            }

            let stats = tx.query_row(
                "SELECT COUNT(*),
                        COALESCE(MAX(created_at) - MIN(created_at), 0),
                        COALESCE(SUM(CASE WHEN event_type = 'error'
                                            OR (event_type = 'tool_result'
                                                AND json_valid(payload)
                                                AND json_extract(payload, '$.is_error') = 1)
                                          THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN event_type = 'tool_result' THEN tokens_in END), 0),
                        COALESCE(SUM(CASE WHEN event_type = 'tool_result' THEN tokens_out END), 0),
                        COALESCE(SUM(CASE WHEN event_type = 'tool_result' THEN cost_usd END), 0.0)
                 FROM agent_events
                 WHERE tenant_id = ?1 AND run_id = ?2",
                params![tenant, run_id],
                |row| {
                    Ok(TrajectoryStats {
                        total_events: row.get::<_, i64>(0)? as u64,
                        by_type: BTreeMap::new(),
                        duration_ms: row.get(1)?,
                        tool_calls: 0,
                        errors: row.get::<_, i64>(2)? as u64,
                        tokens_in: row.get(3)?,
                        tokens_out: row.get(4)?,
                        cost_usd: row.get(5)?,
                    })
                },
            )?;
            tx.finish()?;

            let tool_calls = by_type
                .get(EventType::ToolCall.as_str())
                .copied()
                .unwrap_or(0);
            Ok(TrajectoryStats {
                by_type,
                tool_calls,
                ..stats
            })
        })
        .await
    }
}

#[async_trait]
impl AuditStore for SqliteStore {
    #[instrument(skip(self, cx, entry), fields(tenant = %cx.tenant(), action = %entry.action))]
    async fn append_audit(&self, cx: &Context, entry: NewAuditEntry) -> StoreResult<AuditEntry> {
        if entry.action.trim().is_empty() {
            return Err(StoreError::Validation("audit action must not be empty".into()));
        }
        let tenant = cx.tenant();
        let details = to_json(&entry.details)?;
        let id = AuditId::new();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            ensure_owned(&tx, "projects", "project", &entry.project_id, tenant)?;
            if let Some(run_id) = entry.run_id {
                ensure_run_in_project(&tx, tenant, run_id, entry.project_id)?;
            }
            tx.execute(
                "INSERT INTO audit_entries (public_id, tenant_id, project_id, run_id, agent_id, action, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    tenant,
                    entry.project_id,
                    entry.run_id,
                    entry.agent_id,
                    entry.action,
                    details,
                    to_millis(now())
                ],
            )?;
            let (_, stored) = tx.query_row(
                &format!("SELECT {AUDIT_COLUMNS} FROM audit_entries WHERE public_id = ?1"),
                params![id],
                map_audit,
            )?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    #[instrument(skip(self, cx, filter, cursor), fields(tenant = %cx.tenant()))]
    async fn load_audit(
        &self,
        cx: &Context,
        filter: AuditFilter,
        cursor: Option<String>,
        limit: Option<usize>,
    ) -> StoreResult<AuditPage> {
        let tenant = cx.tenant();
        let after_seq = cursor::decode(CursorKind::Audit, cursor.as_deref())?;
        let limit = self.events_config().page_size(limit);

        self.run_blocking(cx, move |conn| {
            let tx = conn.transaction()?;
            let mut cond = Conditions::default();
            cond.push("tenant_id = ?", text(tenant));
            if let Some(project_id) = filter.project_id {
                cond.push("project_id = ?", text(project_id));
            }
            if let Some(run_id) = filter.run_id {
                cond.push("run_id = ?", text(run_id));
            }
            if let Some(agent_id) = filter.agent_id {
                cond.push("agent_id = ?", text(agent_id));
            }
            if let Some(action) = filter.action {
                cond.push("action = ?", action);
            }
            if let Some(after) = filter.after {
                cond.push("created_at > ?", to_millis(after));
            }
            if let Some(before) = filter.before {
                cond.push("created_at < ?", to_millis(before));
            }

            let total: i64 = tx.query_row(
                &format!("SELECT COUNT(*) FROM audit_entries WHERE {}", cond.sql()),
                params_from_iter(cond.values.iter()),
                |row| row.get(0),
            )?;

            cond.push("id > ?", after_seq);
            let fetch = limit as i64 + 1;
            let mut stmt = tx.prepare(&format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_entries WHERE {} ORDER BY id LIMIT {fetch}",
                cond.sql()
            ))?;
            let mut rows = stmt
                .query_map(params_from_iter(cond.values.iter()), map_audit)?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);
            tx.finish()?;

            let has_more = rows.len() > limit;
            rows.truncate(limit);
            let cursor = rows
                .last()
                .map(|(seq, _)| cursor::encode(CursorKind::Audit, *seq));
            Ok(AuditPage {
                entries: rows.into_iter().map(|(_, entry)| entry).collect(),
                cursor,
                has_more,
                total: total as u64,
            })
        })
        .await
    }
}
