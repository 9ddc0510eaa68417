//! SQLite implementation of BranchRuleRepository

use crate::context::Context;
use crate::db::util::{ensure_owned, now, stale_write, write_tx};
use crate::entities::domain::{BranchProtectionRule, BranchRuleFields};
use crate::entities::repository::BranchRuleRepository;
use crate::error::{StoreError, StoreResult};
use crate::ids::{BranchRuleId, ProjectId, TenantId};
use crate::storage::SqliteStore;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, instrument};

const COLUMNS: &str = "public_id, tenant_id, project_id, branch_pattern, require_reviews, require_tests, allow_force_push, enabled, version, created_at, updated_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<BranchProtectionRule> {
    Ok(BranchProtectionRule {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        project_id: row.get(2)?,
        branch_pattern: row.get(3)?,
        require_reviews: row.get(4)?,
        require_tests: row.get(5)?,
        allow_force_push: row.get(6)?,
        enabled: row.get(7)?,
        version: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn load(conn: &Connection, tenant: TenantId, id: BranchRuleId) -> StoreResult<BranchProtectionRule> {
    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM branch_protection_rules WHERE public_id = ?1 AND tenant_id = ?2"
        ),
        params![id, tenant],
        map_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("branch protection rule", id))
}

fn list(
    conn: &Connection,
    tenant: TenantId,
    project_id: ProjectId,
    enabled_only: bool,
) -> StoreResult<Vec<BranchProtectionRule>> {
    let filter = if enabled_only { " AND enabled = 1" } else { "" };
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM branch_protection_rules
         WHERE tenant_id = ?1 AND project_id = ?2{filter}
         ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![tenant, project_id], map_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[async_trait]
impl BranchRuleRepository for SqliteStore {
    #[instrument(skip(self, cx, fields), fields(tenant = %cx.tenant()))]
    async fn create_branch_rule(
        &self,
        cx: &Context,
        project_id: ProjectId,
        fields: BranchRuleFields,
    ) -> StoreResult<BranchProtectionRule> {
        fields.validate()?;
        let tenant = cx.tenant();
        let id = BranchRuleId::new();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            ensure_owned(&tx, "projects", "project", &project_id, tenant)?;
            tx.execute(
                "INSERT INTO branch_protection_rules (public_id, tenant_id, project_id, branch_pattern, require_reviews, require_tests, allow_force_push, enabled, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9)",
                params![
                    id,
                    tenant,
                    project_id,
                    fields.branch_pattern,
                    fields.require_reviews,
                    fields.require_tests,
                    fields.allow_force_push,
                    fields.enabled,
                    now()
                ],
            )?;
            let rule = load(&tx, tenant, id)?;
            tx.commit()?;
            Ok(rule)
        })
        .await
    }

    async fn get_branch_rule(
        &self,
        cx: &Context,
        id: BranchRuleId,
    ) -> StoreResult<BranchProtectionRule> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| load(conn, tenant, id)).await
    }

    async fn list_branch_rules(
        &self,
        cx: &Context,
        project_id: ProjectId,
    ) -> StoreResult<Vec<BranchProtectionRule>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| list(conn, tenant, project_id, false))
            .await
    }

    #[instrument(skip(self, cx, fields), fields(tenant = %cx.tenant()))]
    async fn update_branch_rule(
        &self,
        cx: &Context,
        id: BranchRuleId,
        fields: BranchRuleFields,
        expected_version: i64,
    ) -> StoreResult<BranchProtectionRule> {
        fields.validate()?;
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let updated = conn.execute(
                "UPDATE branch_protection_rules
                 SET branch_pattern = ?1, require_reviews = ?2, require_tests = ?3,
                     allow_force_push = ?4, enabled = ?5,
                     version = version + 1, updated_at = ?6
                 WHERE public_id = ?7 AND tenant_id = ?8 AND version = ?9",
                params![
                    fields.branch_pattern,
                    fields.require_reviews,
                    fields.require_tests,
                    fields.allow_force_push,
                    fields.enabled,
                    now(),
                    id,
                    tenant,
                    expected_version
                ],
            )?;
            if updated == 0 {
                return Err(stale_write(
                    conn,
                    "branch_protection_rules",
                    "branch protection rule",
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
    async fn delete_branch_rule(
        &self,
        cx: &Context,
        id: BranchRuleId,
        expected_version: i64,
    ) -> StoreResult<()> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let deleted = conn.execute(
                "DELETE FROM branch_protection_rules
                 WHERE public_id = ?1 AND tenant_id = ?2 AND version = ?3",
                params![id, tenant, expected_version],
            )?;
            if deleted == 0 {
                return Err(stale_write(
                    conn,
                    "branch_protection_rules",
                    "branch protection rule",
                    &id,
                    tenant,
                    expected_version,
                ));
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn matching_branch_rule(
        &self,
        cx: &Context,
        project_id: ProjectId,
        branch: &str,
    ) -> StoreResult<Option<BranchProtectionRule>> {
        let tenant = cx.tenant();
        let rules = self
            .run_blocking(cx, move |conn| list(conn, tenant, project_id, true))
            .await?;
        let matched = rules.into_iter().find(|rule| rule.matches(branch));
        debug!(matched = matched.is_some(), "branch rule lookup");
        Ok(matched)
    }
}
