//! Repository traits for the versioned planning entities.
//!
//! Updates and deletes take the version the caller read. A mismatch is a
//! `Conflict`; an id that is missing or owned by another tenant is `NotFound`.

use crate::context::Context;
use crate::entities::domain::*;
use crate::error::StoreResult;
use crate::ids::{BranchRuleId, FeatureId, MilestoneId, ProjectId, RoadmapId};
use async_trait::async_trait;

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn create_project(&self, cx: &Context, fields: ProjectFields) -> StoreResult<Project>;
    async fn get_project(&self, cx: &Context, id: ProjectId) -> StoreResult<Project>;
    async fn list_projects(&self, cx: &Context) -> StoreResult<Vec<Project>>;
    async fn update_project(
        &self,
        cx: &Context,
        id: ProjectId,
        fields: ProjectFields,
        expected_version: i64,
    ) -> StoreResult<Project>;
    /// Removes the project and everything that hangs off it.
    async fn delete_project(
        &self,
        cx: &Context,
        id: ProjectId,
        expected_version: i64,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait RoadmapRepository: Send + Sync {
    async fn create_roadmap(
        &self,
        cx: &Context,
        project_id: ProjectId,
        fields: RoadmapFields,
    ) -> StoreResult<Roadmap>;
    async fn get_roadmap(&self, cx: &Context, id: RoadmapId) -> StoreResult<Roadmap>;
    async fn list_roadmaps(&self, cx: &Context, project_id: ProjectId)
    -> StoreResult<Vec<Roadmap>>;
    async fn update_roadmap(
        &self,
        cx: &Context,
        id: RoadmapId,
        fields: RoadmapFields,
        expected_version: i64,
    ) -> StoreResult<Roadmap>;
    async fn delete_roadmap(
        &self,
        cx: &Context,
        id: RoadmapId,
        expected_version: i64,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait MilestoneRepository: Send + Sync {
    async fn create_milestone(
        &self,
        cx: &Context,
        roadmap_id: RoadmapId,
        fields: MilestoneFields,
    ) -> StoreResult<Milestone>;
    async fn get_milestone(&self, cx: &Context, id: MilestoneId) -> StoreResult<Milestone>;
    /// Ordered by `sort_order`, then creation.
    async fn list_milestones(
        &self,
        cx: &Context,
        roadmap_id: RoadmapId,
    ) -> StoreResult<Vec<Milestone>>;
    async fn update_milestone(
        &self,
        cx: &Context,
        id: MilestoneId,
        fields: MilestoneFields,
        expected_version: i64,
    ) -> StoreResult<Milestone>;
    async fn delete_milestone(
        &self,
        cx: &Context,
        id: MilestoneId,
        expected_version: i64,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait FeatureRepository: Send + Sync {
    async fn create_feature(
        &self,
        cx: &Context,
        milestone_id: MilestoneId,
        fields: FeatureFields,
    ) -> StoreResult<Feature>;
    async fn get_feature(&self, cx: &Context, id: FeatureId) -> StoreResult<Feature>;
    /// Ordered by `sort_order`, then creation.
    async fn list_features(
        &self,
        cx: &Context,
        milestone_id: MilestoneId,
    ) -> StoreResult<Vec<Feature>>;
    async fn update_feature(
        &self,
        cx: &Context,
        id: FeatureId,
        fields: FeatureFields,
        expected_version: i64,
    ) -> StoreResult<Feature>;
    async fn delete_feature(
        &self,
        cx: &Context,
        id: FeatureId,
        expected_version: i64,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait BranchRuleRepository: Send + Sync {
    async fn create_branch_rule(
        &self,
        cx: &Context,
        project_id: ProjectId,
        fields: BranchRuleFields,
    ) -> StoreResult<BranchProtectionRule>;
    async fn get_branch_rule(
        &self,
        cx: &Context,
        id: BranchRuleId,
    ) -> StoreResult<BranchProtectionRule>;
    async fn list_branch_rules(
        &self,
        cx: &Context,
        project_id: ProjectId,
    ) -> StoreResult<Vec<BranchProtectionRule>>;
    async fn update_branch_rule(
        &self,
        cx: &Context,
        id: BranchRuleId,
        fields: BranchRuleFields,
        expected_version: i64,
    ) -> StoreResult<BranchProtectionRule>;
    async fn delete_branch_rule(
        &self,
        cx: &Context,
        id: BranchRuleId,
        expected_version: i64,
    ) -> StoreResult<()>;
    /// First enabled rule, in creation order, whose pattern matches `branch`.
    async fn matching_branch_rule(
        &self,
        cx: &Context,
        project_id: ProjectId,
        branch: &str,
    ) -> StoreResult<Option<BranchProtectionRule>>;
}
