//! Turns repository activity into reviews.

use crate::context::Context;
use crate::error::StoreResult;
use crate::ids::{ProjectId, ReviewId};
use crate::plan::{NewPlan, NewStep, PlanStore};
use crate::review::domain::{CommitOutcome, NewReview, Review, ReviewPolicy, TriggerType};
use crate::review::store::ReviewStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Builds the execution plan a review runs, usually from the policy's template.
#[async_trait]
pub trait ReviewPlanBuilder: Send + Sync {
    async fn build_plan(
        &self,
        cx: &Context,
        policy: &ReviewPolicy,
        trigger_ref: &str,
    ) -> StoreResult<(NewPlan, Vec<NewStep>)>;
}

/// Evaluates enabled policies of one trigger type in creation order. The
/// first policy that fires creates the review and ends the evaluation.
#[derive(Clone)]
pub struct ReviewEngine {
    reviews: Arc<dyn ReviewStore>,
    plans: Arc<dyn PlanStore>,
    builder: Option<Arc<dyn ReviewPlanBuilder>>,
}

impl ReviewEngine {
    pub fn new(reviews: Arc<dyn ReviewStore>, plans: Arc<dyn PlanStore>) -> Self {
        Self {
            reviews,
            plans,
            builder: None,
        }
    }

    pub fn with_plan_builder(mut self, builder: Arc<dyn ReviewPlanBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    /// Adds `count` commits on `branch` to every threshold policy up to the
    /// first one that crosses.
    ///
    /// The crossing and its review are stored together, so a failure while
    /// building the review plan leaves a pending review without a plan
    /// instead of losing the crossing. [`ensure_plan`](Self::ensure_plan)
    /// retries the plan.
    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    pub async fn on_commits(
        &self,
        cx: &Context,
        project_id: ProjectId,
        branch: &str,
        count: i64,
    ) -> StoreResult<Option<Review>> {
        let policies = self
            .reviews
            .list_enabled_policies_by_trigger(cx, project_id, TriggerType::CommitThreshold)
            .await?;
        for policy in policies {
            match self
                .reviews
                .record_commits(cx, policy.id, count, branch)
                .await
            {
                Ok(CommitOutcome::Triggered(review)) => {
                    return self.with_plan(cx, &policy, review).await.map(Some);
                }
                Ok(CommitOutcome::Accumulated(counter)) => {
                    debug!(policy_id = %policy.id, counter, "commits accumulated");
                }
                // Deleted or disabled since it was listed.
                Err(e) if e.is_not_found() || e.is_conflict() => {
                    debug!(policy_id = %policy.id, error = %e, "policy skipped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    pub async fn on_branch(
        &self,
        cx: &Context,
        project_id: ProjectId,
        branch: &str,
    ) -> StoreResult<Option<Review>> {
        let policies = self
            .reviews
            .list_enabled_policies_by_trigger(cx, project_id, TriggerType::BranchPattern)
            .await?;
        match policies.iter().find(|p| p.matches_branch(branch)) {
            Some(policy) => self
                .fire(cx, policy, format!("branch:{branch}"))
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    pub async fn on_cron(
        &self,
        cx: &Context,
        project_id: ProjectId,
        cron_expr: &str,
    ) -> StoreResult<Option<Review>> {
        let policies = self
            .reviews
            .list_enabled_policies_by_trigger(cx, project_id, TriggerType::Cron)
            .await?;
        match policies.iter().find(|p| p.matches_cron(cron_expr)) {
            Some(policy) => self
                .fire(cx, policy, format!("cron:{cron_expr}"))
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Builds and attaches the plan of a review created without one. A review
    /// that already has a plan, or an engine without a builder, returns the
    /// review unchanged.
    #[instrument(skip(self, cx), fields(tenant = %cx.tenant()))]
    pub async fn ensure_plan(&self, cx: &Context, review_id: ReviewId) -> StoreResult<Review> {
        let review = self.reviews.get_review(cx, review_id).await?;
        if review.plan_id.is_some() || self.builder.is_none() {
            return Ok(review);
        }
        let policy = self.reviews.get_review_policy(cx, review.policy_id).await?;
        self.with_plan(cx, &policy, review).await
    }

    async fn fire(
        &self,
        cx: &Context,
        policy: &ReviewPolicy,
        trigger_ref: String,
    ) -> StoreResult<Review> {
        let review = self
            .reviews
            .create_review(
                cx,
                NewReview {
                    policy_id: policy.id,
                    project_id: policy.project_id,
                    plan_id: None,
                    trigger_ref,
                },
            )
            .await?;
        self.with_plan(cx, policy, review).await
    }

    async fn with_plan(
        &self,
        cx: &Context,
        policy: &ReviewPolicy,
        review: Review,
    ) -> StoreResult<Review> {
        let review = match &self.builder {
            Some(builder) => {
                let attached = async {
                    let (plan, steps) = builder.build_plan(cx, policy, &review.trigger_ref).await?;
                    let (plan, _) = self.plans.create_plan(cx, plan, steps).await?;
                    self.reviews.attach_review_plan(cx, review.id, plan.id).await
                }
                .await;
                match attached {
                    Ok(review) => review,
                    Err(e) => {
                        warn!(review_id = %review.id, error = %e, "review plan not created");
                        return Err(e);
                    }
                }
            }
            None => review,
        };
        info!(
            policy_id = %policy.id,
            review_id = %review.id,
            trigger = %review.trigger_ref,
            "review triggered"
        );
        Ok(review)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ProjectFields, ProjectRepository};
    use crate::ids::{AgentId, TaskId, TenantId};
    use crate::review::domain::{PolicyTrigger, ReviewPolicyFields};
    use crate::error::StoreError;
    use crate::storage::SqliteStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SingleStepReview;

    #[async_trait]
    impl ReviewPlanBuilder for SingleStepReview {
        async fn build_plan(
            &self,
            _cx: &Context,
            policy: &ReviewPolicy,
            trigger_ref: &str,
        ) -> StoreResult<(NewPlan, Vec<NewStep>)> {
            let mut plan = NewPlan::new(policy.project_id, format!("review {trigger_ref}"));
            plan.description = policy.template_id.clone().unwrap_or_default();
            Ok((plan, vec![NewStep::new(TaskId::new(), AgentId::new())]))
        }
    }

    struct FlakyTemplates {
        down: AtomicBool,
    }

    #[async_trait]
    impl ReviewPlanBuilder for FlakyTemplates {
        async fn build_plan(
            &self,
            cx: &Context,
            policy: &ReviewPolicy,
            trigger_ref: &str,
        ) -> StoreResult<(NewPlan, Vec<NewStep>)> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Internal("template service down".into()));
            }
            SingleStepReview.build_plan(cx, policy, trigger_ref).await
        }
    }

    async fn setup() -> (Arc<SqliteStore>, Context, ProjectId) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cx = Context::new(TenantId::new());
        let project = store
            .create_project(&cx, ProjectFields::named("engine"))
            .await
            .unwrap();
        (store, cx, project.id)
    }

    fn branch_policy(name: &str, pattern: &str) -> ReviewPolicyFields {
        ReviewPolicyFields::new(
            name,
            PolicyTrigger::BranchPattern {
                pattern: pattern.into(),
            },
        )
    }

    #[tokio::test]
    async fn threshold_policy_fires_on_fifth_commit() {
        let (store, cx, project) = setup().await;
        store
            .create_review_policy(
                &cx,
                project,
                ReviewPolicyFields::new("five", PolicyTrigger::CommitThreshold { threshold: 5 }),
            )
            .await
            .unwrap();
        let engine = ReviewEngine::new(store.clone(), store.clone());

        for _ in 0..4 {
            assert!(engine.on_commits(&cx, project, "main", 1).await.unwrap().is_none());
        }
        let review = engine
            .on_commits(&cx, project, "main", 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(review.trigger_ref, "commits:main:5");
        assert!(review.plan_id.is_none());
        assert_eq!(store.list_reviews_by_project(&cx, project).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn first_matching_branch_policy_wins() {
        let (store, cx, project) = setup().await;
        let broad = store
            .create_review_policy(&cx, project, branch_policy("all releases", "release/*"))
            .await
            .unwrap();
        store
            .create_review_policy(&cx, project, branch_policy("exact", "release/2.0"))
            .await
            .unwrap();
        let engine = ReviewEngine::new(store.clone(), store.clone());

        let review = engine
            .on_branch(&cx, project, "release/2.0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(review.policy_id, broad.id);
        assert_eq!(store.list_reviews_by_project(&cx, project).await.unwrap().len(), 1);
        assert!(engine.on_branch(&cx, project, "main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn builder_attaches_a_review_plan() {
        let (store, cx, project) = setup().await;
        let mut nightly = ReviewPolicyFields::new(
            "nightly",
            PolicyTrigger::Cron {
                expr: "0 3 * * *".into(),
            },
        );
        nightly.template_id = Some("security-sweep".into());
        store.create_review_policy(&cx, project, nightly).await.unwrap();

        let engine = ReviewEngine::new(store.clone(), store.clone())
            .with_plan_builder(Arc::new(SingleStepReview));
        assert!(engine.on_cron(&cx, project, "0 4 * * *").await.unwrap().is_none());

        let review = engine
            .on_cron(&cx, project, "0 3 * * *")
            .await
            .unwrap()
            .unwrap();
        let plan_id = review.plan_id.unwrap();
        let plan = store.get_plan(&cx, plan_id).await.unwrap();
        assert_eq!(plan.description, "security-sweep");
        assert_eq!(
            store.get_review_by_plan_id(&cx, plan_id).await.unwrap().id,
            review.id
        );
    }

    #[tokio::test]
    async fn crossing_survives_a_failed_plan_build() {
        let (store, cx, project) = setup().await;
        let policy = store
            .create_review_policy(
                &cx,
                project,
                ReviewPolicyFields::new("pair", PolicyTrigger::CommitThreshold { threshold: 2 }),
            )
            .await
            .unwrap();
        let templates = Arc::new(FlakyTemplates {
            down: AtomicBool::new(true),
        });
        let engine =
            ReviewEngine::new(store.clone(), store.clone()).with_plan_builder(templates.clone());

        assert!(engine.on_commits(&cx, project, "main", 1).await.unwrap().is_none());
        let err = engine.on_commits(&cx, project, "main", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Internal(_)), "got {err:?}");

        let reviews = store.list_reviews_by_project(&cx, project).await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].trigger_ref, "commits:main:2");
        assert!(reviews[0].plan_id.is_none());
        let stored = store.get_review_policy(&cx, policy.id).await.unwrap();
        assert_eq!(stored.commit_counter, 0);

        templates.down.store(false, Ordering::SeqCst);
        let planned = engine.ensure_plan(&cx, reviews[0].id).await.unwrap();
        let plan_id = planned.plan_id.unwrap();
        assert_eq!(
            engine.ensure_plan(&cx, reviews[0].id).await.unwrap().plan_id,
            Some(plan_id)
        );
        assert!(
            store
                .attach_review_plan(&cx, planned.id, plan_id)
                .await
                .unwrap_err()
                .is_conflict()
        );
    }
}
