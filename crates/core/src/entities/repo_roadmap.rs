//! SQLite implementation of RoadmapRepository

use crate::context::Context;
use crate::db::util::{ensure_owned, now, stale_write, write_tx};
use crate::entities::domain::{Roadmap, RoadmapFields};
use crate::entities::repository::RoadmapRepository;
use crate::error::{StoreError, StoreResult};
use crate::ids::{ProjectId, RoadmapId, TenantId};
use crate::storage::SqliteStore;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::instrument;

const COLUMNS: &str =
    "public_id, tenant_id, project_id, title, description, status, version, created_at, updated_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Roadmap> {
    Ok(Roadmap {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        project_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        version: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn load(conn: &Connection, tenant: TenantId, id: RoadmapId) -> StoreResult<Roadmap> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM roadmaps WHERE public_id = ?1 AND tenant_id = ?2"),
        params![id, tenant],
        map_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("roadmap", id))
}

#[async_trait]
impl RoadmapRepository for SqliteStore {
    #[instrument(skip(self, cx, fields), fields(tenant = %cx.tenant()))]
    async fn create_roadmap(
        &self,
        cx: &Context,
        project_id: ProjectId,
        fields: RoadmapFields,
    ) -> StoreResult<Roadmap> {
        fields.validate()?;
        let tenant = cx.tenant();
        let id = RoadmapId::new();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            ensure_owned(&tx, "projects", "project", &project_id, tenant)?;
            let ts = now();
            tx.execute(
                "INSERT INTO roadmaps (public_id, tenant_id, project_id, title, description, status, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
                params![id, tenant, project_id, fields.title, fields.description, fields.status, ts],
            )?;
            let roadmap = load(&tx, tenant, id)?;
            tx.commit()?;
            Ok(roadmap)
        })
        .await
    }

    async fn get_roadmap(&self, cx: &Context, id: RoadmapId) -> StoreResult<Roadmap> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| load(conn, tenant, id)).await
    }

    async fn list_roadmaps(
        &self,
        cx: &Context,
        project_id: ProjectId,
    ) -> StoreResult<Vec<Roadmap>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM roadmaps WHERE tenant_id = ?1 AND project_id = ?2 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![tenant, project_id], map_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    #[instrument(skip(self, cx, fields), fields(tenant = %cx.tenant()))]
    async fn update_roadmap(
        &self,
        cx: &Context,
        id: RoadmapId,
        fields: RoadmapFields,
        expected_version: i64,
    ) -> StoreResult<Roadmap> {
        fields.validate()?;
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let updated = conn.execute(
                "UPDATE roadmaps SET title = ?1, description = ?2, status = ?3,
                        version = version + 1, updated_at = ?4
                 WHERE public_id = ?5 AND tenant_id = ?6 AND version = ?7",
                params![
                    fields.title,
                    fields.description,
                    fields.status,
                    now(),
                    id,
                    tenant,
                    expected_version
                ],
            )?;
            if updated == 0 {
                return Err(stale_write(conn, "roadmaps", "roadmap", &id, tenant, expected_version));
            }
            load(conn, tenant, id)
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn delete_roadmap(
        &self,
        cx: &Context,
        id: RoadmapId,
        expected_version: i64,
    ) -> StoreResult<()> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let deleted = conn.execute(
                "DELETE FROM roadmaps WHERE public_id = ?1 AND tenant_id = ?2 AND version = ?3",
                params![id, tenant, expected_version],
            )?;
            if deleted == 0 {
                return Err(stale_write(conn, "roadmaps", "roadmap", &id, tenant, expected_version));
            }
            Ok(())
        })
        .await
    }
}
