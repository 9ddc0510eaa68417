use crate::context::Context;
use crate::error::StoreResult;
use crate::ids::{PlanId, PolicyId, ProjectId, ReviewId};
use crate::review::domain::{
    CommitOutcome, CounterOutcome, NewReview, Review, ReviewPolicy, ReviewPolicyFields, ReviewStatus, TriggerType,
};
use async_trait::async_trait;

/// Persistence for review policies, their commit counters and reviews.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn create_review_policy(
        &self,
        cx: &Context,
        project_id: ProjectId,
        fields: ReviewPolicyFields,
    ) -> StoreResult<ReviewPolicy>;

    async fn get_review_policy(&self, cx: &Context, id: PolicyId) -> StoreResult<ReviewPolicy>;

    async fn list_review_policies_by_project(
        &self,
        cx: &Context,
        project_id: ProjectId,
    ) -> StoreResult<Vec<ReviewPolicy>>;

    /// Changing the trigger type resets the commit counter.
    async fn update_review_policy(
        &self,
        cx: &Context,
        id: PolicyId,
        fields: ReviewPolicyFields,
        expected_version: i64,
    ) -> StoreResult<ReviewPolicy>;

    async fn delete_review_policy(
        &self,
        cx: &Context,
        id: PolicyId,
        expected_version: i64,
    ) -> StoreResult<()>;

    /// Enabled policies of one trigger type, in creation order.
    async fn list_enabled_policies_by_trigger(
        &self,
        cx: &Context,
        project_id: ProjectId,
        trigger_type: TriggerType,
    ) -> StoreResult<Vec<ReviewPolicy>>;

    /// Adds `count` commits in a single statement. Crossing the threshold
    /// zeroes the counter and reports the value at the crossing, so each
    /// crossing is observed by exactly one caller.
    async fn increment_commit_counter(
        &self,
        cx: &Context,
        id: PolicyId,
        count: i64,
    ) -> StoreResult<CounterOutcome>;

    /// Like [`increment_commit_counter`](Self::increment_commit_counter), but
    /// a crossing inserts its pending review (`trigger_ref`
    /// `commits:{branch}:{counter}`) in the same transaction as the reset.
    async fn record_commits(
        &self,
        cx: &Context,
        id: PolicyId,
        count: i64,
        branch: &str,
    ) -> StoreResult<CommitOutcome>;

    async fn reset_commit_counter(&self, cx: &Context, id: PolicyId) -> StoreResult<ReviewPolicy>;

    async fn create_review(&self, cx: &Context, review: NewReview) -> StoreResult<Review>;

    async fn get_review(&self, cx: &Context, id: ReviewId) -> StoreResult<Review>;

    async fn list_reviews_by_project(
        &self,
        cx: &Context,
        project_id: ProjectId,
    ) -> StoreResult<Vec<Review>>;

    /// Terminal reviews are immutable; `completed_at` is stamped on entry to
    /// a terminal status.
    async fn update_review_status(
        &self,
        cx: &Context,
        id: ReviewId,
        status: ReviewStatus,
    ) -> StoreResult<Review>;

    /// Sets the plan of a review that has none yet; a review that already
    /// has a plan is a `Conflict`.
    async fn attach_review_plan(
        &self,
        cx: &Context,
        id: ReviewId,
        plan_id: PlanId,
    ) -> StoreResult<Review>;

    async fn get_review_by_plan_id(&self, cx: &Context, plan_id: PlanId) -> StoreResult<Review>;
}
