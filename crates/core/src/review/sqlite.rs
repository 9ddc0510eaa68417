//! SQLite implementation of ReviewStore

use crate::context::Context;
use crate::db::util::{ensure_owned, now, stale_write, write_tx};
use crate::error::{StoreError, StoreResult};
use crate::ids::{PlanId, PolicyId, ProjectId, ReviewId, TenantId};
use crate::review::domain::{
    CommitOutcome, CounterOutcome, NewReview, PolicyTrigger, Review, ReviewPolicy, ReviewPolicyFields,
    ReviewStatus, TriggerType,
};
use crate::review::store::ReviewStore;
use crate::storage::SqliteStore;
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, instrument, warn};

const POLICY_COLUMNS: &str = "public_id, tenant_id, project_id, name, trigger_type, commit_threshold, cron_expr, branch_pattern, template_id, enabled, commit_counter, version, created_at, updated_at";

fn map_policy(row: &Row<'_>) -> rusqlite::Result<ReviewPolicy> {
    let trigger_type: TriggerType = row.get(4)?;
    let trigger = PolicyTrigger::from_columns(trigger_type, row.get(5)?, row.get(6)?, row.get(7)?)
        .ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                Box::new(StoreError::Internal(format!(
                    "{trigger_type} policy is missing its trigger settings"
                ))),
            )
        })?;
    Ok(ReviewPolicy {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        project_id: row.get(2)?,
        name: row.get(3)?,
        trigger,
        template_id: row.get(8)?,
        enabled: row.get(9)?,
        commit_counter: row.get(10)?,
        version: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn load_policy(conn: &Connection, tenant: TenantId, id: PolicyId) -> StoreResult<ReviewPolicy> {
    conn.query_row(
        &format!("SELECT {POLICY_COLUMNS} FROM review_policies WHERE public_id = ?1 AND tenant_id = ?2"),
        params![id, tenant],
        map_policy,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("review policy", id))
}

fn list_policies(
    conn: &Connection,
    tenant: TenantId,
    project_id: ProjectId,
    trigger_type: Option<TriggerType>,
) -> StoreResult<Vec<ReviewPolicy>> {
    let rows = match trigger_type {
        Some(trigger_type) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POLICY_COLUMNS} FROM review_policies
                 WHERE tenant_id = ?1 AND project_id = ?2 AND trigger_type = ?3 AND enabled = 1
                 ORDER BY id"
            ))?;
            stmt.query_map(params![tenant, project_id, trigger_type], map_policy)?
                .collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POLICY_COLUMNS} FROM review_policies
                 WHERE tenant_id = ?1 AND project_id = ?2 ORDER BY id"
            ))?;
            stmt.query_map(params![tenant, project_id], map_policy)?
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(rows)
}

const REVIEW_COLUMNS: &str =
    "public_id, tenant_id, policy_id, project_id, plan_id, status, trigger_ref, created_at, completed_at";

fn map_review(row: &Row<'_>) -> rusqlite::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        policy_id: row.get(2)?,
        project_id: row.get(3)?,
        plan_id: row.get(4)?,
        status: row.get(5)?,
        trigger_ref: row.get(6)?,
        created_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn load_review(conn: &Connection, tenant: TenantId, id: ReviewId) -> StoreResult<Review> {
    conn.query_row(
        &format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE public_id = ?1 AND tenant_id = ?2"),
        params![id, tenant],
        map_review,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("review", id))
}

/// Why an increment matched no row.
fn increment_rejected(conn: &Connection, tenant: TenantId, id: PolicyId) -> StoreError {
    match load_policy(conn, tenant, id) {
        Ok(policy) if policy.trigger_type() != TriggerType::CommitThreshold => {
            StoreError::Validation(format!(
                "policy {id} is triggered by {}, not commits",
                policy.trigger_type()
            ))
        }
        Ok(_) => StoreError::Conflict(format!("policy {id} is disabled")),
        Err(e) => e,
    }
}

fn validate_count(count: i64) -> StoreResult<()> {
    if count < 1 {
        return Err(StoreError::Validation(format!(
            "commit count must be positive, got {count}"
        )));
    }
    Ok(())
}

/// Single-statement increment; a crossing zeroes the counter.
fn bump_counter(
    conn: &Connection,
    tenant: TenantId,
    id: PolicyId,
    count: i64,
) -> StoreResult<CounterOutcome> {
    let row: Option<(i64, i64)> = conn
        .query_row(
            "UPDATE review_policies
             SET commit_counter = CASE WHEN commit_counter + ?1 >= commit_threshold
                                       THEN 0 ELSE commit_counter + ?1 END,
                 last_crossing = CASE WHEN commit_counter + ?1 >= commit_threshold
                                      THEN commit_counter + ?1 ELSE 0 END,
                 updated_at = ?2
             WHERE public_id = ?3 AND tenant_id = ?4
               AND trigger_type = 'commit_threshold' AND enabled = 1
             RETURNING commit_counter, last_crossing",
            params![count, now(), id, tenant],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((_, crossing)) if crossing > 0 => Ok(CounterOutcome::Triggered(crossing)),
        Some((counter, _)) => Ok(CounterOutcome::Accumulated(counter)),
        None => Err(increment_rejected(conn, tenant, id)),
    }
}

fn insert_review(conn: &Connection, tenant: TenantId, review: &NewReview) -> StoreResult<Review> {
    let policy = load_policy(conn, tenant, review.policy_id)?;
    if policy.project_id != review.project_id {
        return Err(StoreError::Validation(format!(
            "policy {} belongs to another project",
            review.policy_id
        )));
    }
    if let Some(plan_id) = review.plan_id {
        ensure_owned(conn, "execution_plans", "plan", &plan_id, tenant)?;
    }
    let id = ReviewId::new();
    conn.execute(
        "INSERT INTO reviews (public_id, tenant_id, policy_id, project_id, plan_id, status,
                              trigger_ref, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            tenant,
            review.policy_id,
            review.project_id,
            review.plan_id,
            ReviewStatus::Pending,
            review.trigger_ref,
            now()
        ],
    )?;
    debug!(review_id = %id, "review created");
    load_review(conn, tenant, id)
}

#[async_trait]
impl ReviewStore for SqliteStore {
    #[instrument(skip(self, cx, fields), fields(tenant = %cx.tenant(), trigger = %fields.trigger.trigger_type()))]
    async fn create_review_policy(
        &self,
        cx: &Context,
        project_id: ProjectId,
        fields: ReviewPolicyFields,
    ) -> StoreResult<ReviewPolicy> {
        fields.validate()?;
        let tenant = cx.tenant();
        let id = PolicyId::new();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            ensure_owned(&tx, "projects", "project", &project_id, tenant)?;
            let (threshold, cron_expr, branch_pattern) = fields.trigger.columns();
            tx.execute(
                "INSERT INTO review_policies (public_id, tenant_id, project_id, name, trigger_type,
                                              commit_threshold, cron_expr, branch_pattern, template_id,
                                              enabled, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?11)",
                params![
                    id,
                    tenant,
                    project_id,
                    fields.name,
                    fields.trigger.trigger_type(),
                    threshold,
                    cron_expr,
                    branch_pattern,
                    fields.template_id,
                    fields.enabled,
                    now()
                ],
            )?;
            let policy = load_policy(&tx, tenant, id)?;
            tx.commit()?;
            Ok(policy)
        })
        .await
    }

    async fn get_review_policy(&self, cx: &Context, id: PolicyId) -> StoreResult<ReviewPolicy> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| load_policy(conn, tenant, id))
            .await
    }

    async fn list_review_policies_by_project(
        &self,
        cx: &Context,
        project_id: ProjectId,
    ) -> StoreResult<Vec<ReviewPolicy>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| list_policies(conn, tenant, project_id, None))
            .await
    }

    #[instrument(skip(self, cx, fields), fields(tenant = %cx.tenant()))]
    async fn update_review_policy(
        &self,
        cx: &Context,
        id: PolicyId,
        fields: ReviewPolicyFields,
        expected_version: i64,
    ) -> StoreResult<ReviewPolicy> {
        fields.validate()?;
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let (threshold, cron_expr, branch_pattern) = fields.trigger.columns();
            let updated = conn.execute(
                "UPDATE review_policies
                 SET name = ?1, trigger_type = ?2, commit_threshold = ?3, cron_expr = ?4,
                     branch_pattern = ?5, template_id = ?6, enabled = ?7,
                     commit_counter = CASE WHEN trigger_type = ?2 THEN commit_counter ELSE 0 END,
                     last_crossing = CASE WHEN trigger_type = ?2 THEN last_crossing ELSE 0 END,
                     version = version + 1, updated_at = ?8
                 WHERE public_id = ?9 AND tenant_id = ?10 AND version = ?11",
                params![
                    fields.name,
                    fields.trigger.trigger_type(),
                    threshold,
                    cron_expr,
                    branch_pattern,
                    fields.template_id,
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
                    "review_policies",
                    "review policy",
                    &id,
                    tenant,
                    expected_version,
                ));
            }
            load_policy(conn, tenant, id)
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn delete_review_policy(
        &self,
        cx: &Context,
        id: PolicyId,
        expected_version: i64,
    ) -> StoreResult<()> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let deleted = conn.execute(
                "DELETE FROM review_policies WHERE public_id = ?1 AND tenant_id = ?2 AND version = ?3",
                params![id, tenant, expected_version],
            )?;
            if deleted == 0 {
                return Err(stale_write(
                    conn,
                    "review_policies",
                    "review policy",
                    &id,
                    tenant,
                    expected_version,
                ));
            }
            Ok(())
        })
        .await
    }

    async fn list_enabled_policies_by_trigger(
        &self,
        cx: &Context,
        project_id: ProjectId,
        trigger_type: TriggerType,
    ) -> StoreResult<Vec<ReviewPolicy>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            list_policies(conn, tenant, project_id, Some(trigger_type))
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn increment_commit_counter(
        &self,
        cx: &Context,
        id: PolicyId,
        count: i64,
    ) -> StoreResult<CounterOutcome> {
        validate_count(count)?;
        let tenant = cx.tenant();
        let outcome = self
            .run_blocking(cx, move |conn| bump_counter(conn, tenant, id, count))
            .await?;
        if let CounterOutcome::Triggered(at) = outcome {
            info!(policy_id = %id, counter = at, "commit threshold crossed");
        }
        Ok(outcome)
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn record_commits(
        &self,
        cx: &Context,
        id: PolicyId,
        count: i64,
        branch: &str,
    ) -> StoreResult<CommitOutcome> {
        validate_count(count)?;
        let tenant = cx.tenant();
        let branch = branch.to_string();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            let at = match bump_counter(&tx, tenant, id, count)? {
                CounterOutcome::Accumulated(counter) => {
                    tx.commit()?;
                    return Ok(CommitOutcome::Accumulated(counter));
                }
                CounterOutcome::Triggered(at) => at,
            };
            let policy = load_policy(&tx, tenant, id)?;
            let review = insert_review(
                &tx,
                tenant,
                &NewReview {
                    policy_id: id,
                    project_id: policy.project_id,
                    plan_id: None,
                    trigger_ref: format!("commits:{branch}:{at}"),
                },
            )?;
            tx.commit()?;
            info!(policy_id = %id, counter = at, review_id = %review.id, "commit threshold crossed");
            Ok(CommitOutcome::Triggered(review))
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn reset_commit_counter(&self, cx: &Context, id: PolicyId) -> StoreResult<ReviewPolicy> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let updated = conn.execute(
                "UPDATE review_policies SET commit_counter = 0, last_crossing = 0, updated_at = ?1
                 WHERE public_id = ?2 AND tenant_id = ?3",
                params![now(), id, tenant],
            )?;
            if updated == 0 {
                return Err(StoreError::not_found("review policy", id));
            }
            load_policy(conn, tenant, id)
        })
        .await
    }

    #[instrument(skip(self, cx, review), fields(tenant = %cx.tenant(), policy_id = %review.policy_id))]
    async fn create_review(&self, cx: &Context, review: NewReview) -> StoreResult<Review> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            let created = insert_review(&tx, tenant, &review)?;
            tx.commit()?;
            Ok(created)
        })
        .await
    }

    async fn get_review(&self, cx: &Context, id: ReviewId) -> StoreResult<Review> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| load_review(conn, tenant, id))
            .await
    }

    async fn list_reviews_by_project(
        &self,
        cx: &Context,
        project_id: ProjectId,
    ) -> StoreResult<Vec<Review>> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews WHERE tenant_id = ?1 AND project_id = ?2 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![tenant, project_id], map_review)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn update_review_status(
        &self,
        cx: &Context,
        id: ReviewId,
        status: ReviewStatus,
    ) -> StoreResult<Review> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            let current = load_review(&tx, tenant, id)?;
            if !current.status.can_transition_to(status) {
                warn!(review_id = %id, from = %current.status, to = %status, "review transition rejected");
                return Err(StoreError::Conflict(format!(
                    "review {id} cannot move from {} to {status}",
                    current.status
                )));
            }
            let completed_at = status.is_terminal().then(now);
            tx.execute(
                "UPDATE reviews SET status = ?1, completed_at = COALESCE(?2, completed_at)
                 WHERE public_id = ?3 AND tenant_id = ?4 AND status = ?5",
                params![status, completed_at, id, tenant, current.status],
            )?;
            let review = load_review(&tx, tenant, id)?;
            tx.commit()?;
            Ok(review)
        })
        .await
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    async fn attach_review_plan(
        &self,
        cx: &Context,
        id: ReviewId,
        plan_id: PlanId,
    ) -> StoreResult<Review> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            let tx = write_tx(conn)?;
            ensure_owned(&tx, "execution_plans", "plan", &plan_id, tenant)?;
            let updated = tx.execute(
                "UPDATE reviews SET plan_id = ?1
                 WHERE public_id = ?2 AND tenant_id = ?3 AND plan_id IS NULL",
                params![plan_id, id, tenant],
            )?;
            let review = load_review(&tx, tenant, id)?;
            if updated == 0 {
                return Err(StoreError::Conflict(format!("review {id} already has a plan")));
            }
            tx.commit()?;
            debug!(review_id = %id, %plan_id, "review plan attached");
            Ok(review)
        })
        .await
    }

    async fn get_review_by_plan_id(&self, cx: &Context, plan_id: PlanId) -> StoreResult<Review> {
        let tenant = cx.tenant();
        self.run_blocking(cx, move |conn| {
            conn.query_row(
                &format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE plan_id = ?1 AND tenant_id = ?2"),
                params![plan_id, tenant],
                map_review,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("review for plan", plan_id))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ProjectFields, ProjectRepository};

    async fn setup() -> (SqliteStore, Context, ProjectId) {
        let store = SqliteStore::in_memory().unwrap();
        let cx = Context::new(TenantId::new());
        let project = store
            .create_project(&cx, ProjectFields::named("reviews"))
            .await
            .unwrap();
        (store, cx, project.id)
    }

    fn threshold(n: i64) -> ReviewPolicyFields {
        ReviewPolicyFields::new("every few commits", PolicyTrigger::CommitThreshold { threshold: n })
    }

    #[tokio::test]
    async fn counter_crosses_once_and_resets() {
        let (store, cx, project) = setup().await;
        let policy = store
            .create_review_policy(&cx, project, threshold(5))
            .await
            .unwrap();

        for expected in 1..=4 {
            assert_eq!(
                store.increment_commit_counter(&cx, policy.id, 1).await.unwrap(),
                CounterOutcome::Accumulated(expected)
            );
        }
        assert_eq!(
            store.increment_commit_counter(&cx, policy.id, 1).await.unwrap(),
            CounterOutcome::Triggered(5)
        );
        let stored = store.get_review_policy(&cx, policy.id).await.unwrap();
        assert_eq!(stored.commit_counter, 0);
        // The counter is not versioned.
        assert_eq!(stored.version, 1);

        // A batch that overshoots reports the overshooting value.
        store.increment_commit_counter(&cx, policy.id, 3).await.unwrap();
        assert_eq!(
            store.increment_commit_counter(&cx, policy.id, 4).await.unwrap(),
            CounterOutcome::Triggered(7)
        );
        assert_eq!(
            store.increment_commit_counter(&cx, policy.id, 2).await.unwrap(),
            CounterOutcome::Accumulated(2)
        );
        let reset = store.reset_commit_counter(&cx, policy.id).await.unwrap();
        assert_eq!(reset.commit_counter, 0);
    }

    #[tokio::test]
    async fn increment_rejections() {
        let (store, cx, project) = setup().await;
        let commits = store
            .create_review_policy(&cx, project, threshold(3))
            .await
            .unwrap();
        let branch = store
            .create_review_policy(
                &cx,
                project,
                ReviewPolicyFields::new(
                    "release",
                    PolicyTrigger::BranchPattern {
                        pattern: "release/*".into(),
                    },
                ),
            )
            .await
            .unwrap();

        assert!(
            store
                .increment_commit_counter(&cx, commits.id, 0)
                .await
                .unwrap_err()
                .is_validation()
        );
        assert!(
            store
                .increment_commit_counter(&cx, branch.id, 1)
                .await
                .unwrap_err()
                .is_validation()
        );
        assert!(
            store
                .increment_commit_counter(&cx, PolicyId::new(), 1)
                .await
                .unwrap_err()
                .is_not_found()
        );

        let mut disabled = threshold(3);
        disabled.enabled = false;
        store
            .update_review_policy(&cx, commits.id, disabled, 1)
            .await
            .unwrap();
        assert!(
            store
                .increment_commit_counter(&cx, commits.id, 1)
                .await
                .unwrap_err()
                .is_conflict()
        );

        let other = Context::new(TenantId::new());
        assert!(
            store
                .increment_commit_counter(&other, branch.id, 1)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn policy_updates_are_versioned_and_type_change_resets_counter() {
        let (store, cx, project) = setup().await;
        let policy = store
            .create_review_policy(&cx, project, threshold(10))
            .await
            .unwrap();
        store.increment_commit_counter(&cx, policy.id, 4).await.unwrap();

        let renamed = ReviewPolicyFields {
            name: "renamed".into(),
            ..threshold(10)
        };
        let updated = store
            .update_review_policy(&cx, policy.id, renamed, 1)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.commit_counter, 4);

        let stale = store
            .update_review_policy(&cx, policy.id, threshold(3), 1)
            .await
            .unwrap_err();
        assert!(stale.is_conflict());

        let nightly = ReviewPolicyFields::new(
            "nightly",
            PolicyTrigger::Cron {
                expr: "0 3 * * *".into(),
            },
        );
        let switched = store
            .update_review_policy(&cx, policy.id, nightly, 2)
            .await
            .unwrap();
        assert_eq!(switched.commit_counter, 0);
        assert_eq!(switched.trigger_type(), TriggerType::Cron);

        assert!(
            store
                .delete_review_policy(&cx, policy.id, 2)
                .await
                .unwrap_err()
                .is_conflict()
        );
        store.delete_review_policy(&cx, policy.id, 3).await.unwrap();
        assert!(
            store
                .get_review_policy(&cx, policy.id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn enabled_listing_keeps_creation_order() {
        let (store, cx, project) = setup().await;
        let first = store
            .create_review_policy(&cx, project, threshold(2))
            .await
            .unwrap();
        let mut off = threshold(2);
        off.enabled = false;
        store.create_review_policy(&cx, project, off).await.unwrap();
        let third = store
            .create_review_policy(&cx, project, threshold(9))
            .await
            .unwrap();

        let ids: Vec<_> = store
            .list_enabled_policies_by_trigger(&cx, project, TriggerType::CommitThreshold)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![first.id, third.id]);
        assert_eq!(
            store
                .list_review_policies_by_project(&cx, project)
                .await
                .unwrap()
                .len(),
            3
        );
        assert!(
            store
                .list_enabled_policies_by_trigger(&cx, project, TriggerType::Cron)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn review_status_lifecycle() {
        let (store, cx, project) = setup().await;
        let policy = store
            .create_review_policy(&cx, project, threshold(1))
            .await
            .unwrap();
        let review = store
            .create_review(
                &cx,
                NewReview {
                    policy_id: policy.id,
                    project_id: project,
                    plan_id: None,
                    trigger_ref: "commits:main:1".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(review.status, ReviewStatus::Pending);
        assert!(review.completed_at.is_none());

        let running = store
            .update_review_status(&cx, review.id, ReviewStatus::Running)
            .await
            .unwrap();
        assert!(running.completed_at.is_none());
        let done = store
            .update_review_status(&cx, review.id, ReviewStatus::Completed)
            .await
            .unwrap();
        assert!(done.completed_at.is_some());
        assert!(
            store
                .update_review_status(&cx, review.id, ReviewStatus::Failed)
                .await
                .unwrap_err()
                .is_conflict()
        );

        let elsewhere = store
            .create_project(&cx, ProjectFields::named("elsewhere"))
            .await
            .unwrap();
        let err = store
            .create_review(
                &cx,
                NewReview {
                    policy_id: policy.id,
                    project_id: elsewhere.id,
                    plan_id: None,
                    trigger_ref: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(
            store
                .get_review_by_plan_id(&cx, PlanId::new())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}
