//! SQLite implementation of ProjectRepository

use crate::context::Context;
use crate::db::util::{now, stale_write};
use crate::entities::domain::{Project, ProjectFields};
use crate::entities::repository::ProjectRepository;
use crate::error::{StoreError, StoreResult};
use crate::ids::{ProjectId, TenantId};
use crate::storage::SqliteStore;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, instrument};

const COLUMNS: &str =
    "public_id, tenant_id, name, description, repo_url, version, created_at, updated_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        repo_url: row.get(4)?,
        version: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

pub(crate) fn load_project(
    conn: &Connection,
    tenant: TenantId,
    id: ProjectId,
) -> StoreResult<Project> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM projects WHERE public_id = ?1 AND tenant_id = ?2"),
        params![id, tenant],
        map_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("project", id))
}

#[async_trait]
impl ProjectRepository for SqliteStore {
    #[instrument(skip(self, cx, fields), fields(tenant = %cx.tenant()))]
    async fn create_project(&self, cx: &Context, fields: ProjectFields) -> StoreResult<Project> {
        fields.validate()?;
        let ts = now();
        let project = Project {
            id: ProjectId::new(),
            tenant_id: cx.tenant(),
            name: fields.name,
            description: fields.description,
            repo_url: fields.repo_url,
            version: 1,
            created_at: ts,
            updated_at: ts,
        };
        let row = project.clone();
        self.run_blocking(cx, move |conn| {
            conn.execute(
                "INSERT INTO projects (public_id, tenant_id, name, description, repo_url, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                params![row.id, row.tenant_id, row.name, row.description, row.repo_url, row.created_at],
            )?;
            Ok(())
        })
        .await?;
        debug!(project_id = %project.id, "project created");
        Ok(project)
    }

    async fn get_project(&self, cx: &Context, id: ProjectId) -> StoreResult<Project> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| load_project(conn, tenant, id)).await
    }

    async fn list_projects(&self, cx: &Context) -> StoreResult<Vec<Project>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM projects WHERE tenant_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![tenant], map_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    #[instrument(skip(self, cx, fields), fields(tenant = %cx.tenant()))]
    async fn update_project(
        &self,
        cx: &Context,
        id: ProjectId,
        fields: ProjectFields,
        expected_version: i64,
    ) -> StoreResult<Project> {
        fields.validate()?;
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let updated = conn.execute(
                "UPDATE projects SET name = ?1, description = ?2, repo_url = ?3,
                        version = version + 1, updated_at = ?4
                 WHERE public_id = ?5 AND tenant_id = ?6 AND version = ?7",
                params![
                    fields.name,
                    fields.description,
                    fields.repo_url,
                    now(),
                    id,
                    tenant,
                    expected_version
                ],
            )?;
            if updated == 0 {
                return Err(stale_write(conn, "projects", "project", &id, tenant, expected_version));
            }
            load_project(conn, tenant, id)
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn delete_project(
        &self,
        cx: &Context,
        id: ProjectId,
        expected_version: i64,
    ) -> StoreResult<()> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let deleted = conn.execute(
                "DELETE FROM projects WHERE public_id = ?1 AND tenant_id = ?2 AND version = ?3",
                params![id, tenant, expected_version],
            )?;
            if deleted == 0 {
                return Err(stale_write(conn, "projects", "project", &id, tenant, expected_version));
            }
            Ok(())
        })
        .await?;
        debug!("project deleted with its dependents");
        Ok(())
    }
}
