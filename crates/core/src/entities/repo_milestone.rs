//! SQLite implementation of MilestoneRepository

use crate::context::Context;
use crate::db::util::{ensure_owned, now, stale_write, write_tx};
use crate::entities::domain::{Milestone, MilestoneFields};
use crate::entities::repository::MilestoneRepository;
use crate::error::{StoreError, StoreResult};
use crate::ids::{MilestoneId, RoadmapId, TenantId};
use crate::storage::SqliteStore;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::instrument;

const COLUMNS: &str = "public_id, tenant_id, roadmap_id, title, description, status, sort_order, version, created_at, updated_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        roadmap_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        sort_order: row.get(6)?,
        version: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn load(conn: &Connection, tenant: TenantId, id: MilestoneId) -> StoreResult<Milestone> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM milestones WHERE public_id = ?1 AND tenant_id = ?2"),
        params![id, tenant],
        map_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("milestone", id))
}

#[async_trait]
impl MilestoneRepository for SqliteStore {
    #[instrument(skip(self, cx, fields), fields(tenant = %cx.tenant()))]
    async fn create_milestone(
        &self,
        cx: &Context,
        roadmap_id: RoadmapId,
        fields: MilestoneFields,
    ) -> StoreResult<Milestone> {
        fields.validate()?;
        let tenant = cx.tenant();
        let id = MilestoneId::new();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            ensure_owned(&tx, "roadmaps", "roadmap", &roadmap_id, tenant)?;
            tx.execute(
                "INSERT INTO milestones (public_id, tenant_id, roadmap_id, title, description, status, sort_order, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
                params![
                    id,
                    tenant,
                    roadmap_id,
                    fields.title,
                    fields.description,
                    fields.status,
                    fields.sort_order,
                    now()
                ],
            )?;
            let milestone = load(&tx, tenant, id)?;
            tx.commit()?;
            Ok(milestone)
        })
        .await
    }

    async fn get_milestone(&self, cx: &Context, id: MilestoneId) -> StoreResult<Milestone> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| load(conn, tenant, id)).await
    }

    async fn list_milestones(
        &self,
        cx: &Context,
        roadmap_id: RoadmapId,
    ) -> StoreResult<Vec<Milestone>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM milestones
                 WHERE tenant_id = ?1 AND roadmap_id = ?2
                 ORDER BY sort_order, id"
            ))?;
            let rows = stmt.query_map(params![tenant, roadmap_id], map_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    #[instrument(skip(self, cx, fields), fields(tenant = %cx.tenant()))]
    async fn update_milestone(
        &self,
        cx: &Context,
        id: MilestoneId,
        fields: MilestoneFields,
        expected_version: i64,
    ) -> StoreResult<Milestone> {
        fields.validate()?;
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let updated = conn.execute(
                "UPDATE milestones SET title = ?1, description = ?2, status = ?3, sort_order = ?4,
                        version = version + 1, updated_at = ?5
                 WHERE public_id = ?6 AND tenant_id = ?7 AND version = ?8",
                params![
                    fields.title,
                    fields.description,
                    fields.status,
                    fields.sort_order,
                    now(),
                    id,
                    tenant,
                    expected_version
                ],
            )?;
            if updated == 0 {
                return Err(stale_write(
                    conn,
                    "milestones",
                    "milestone",
                    &id,
                    tenant,
                    expected_version,
                ));
            }
            load(conn, tenant, id)
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn delete_milestone(
        &self,
        cx: &Context,
        id: MilestoneId,
        expected_version: i64,
    ) -> StoreResult<()> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let deleted = conn.execute(
                "DELETE FROM milestones WHERE public_id = ?1 AND tenant_id = ?2 AND version = ?3",
                params![id, tenant, expected_version],
            )?;
            if deleted == 0 {
                return Err(stale_write(
                    conn,
                    "milestones",
                    "milestone",
                    &id,
                    tenant,
                    expected_version,
                ));
            }
            Ok(())
        })
        .await
    }
}
