//! Versioned planning entities.
//!
//! Each entity carries a `version` that starts at 1 and grows by exactly one
//! per successful update. Writers pass back the version they read.

use crate::error::{StoreError, StoreResult};
use crate::ids::{BranchRuleId, FeatureId, MilestoneId, ProjectId, RoadmapId, TenantId};
use crate::macros::sql_enum;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: String,
    pub repo_url: Option<String>,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectFields {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub repo_url: Option<String>,
}

impl ProjectFields {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> StoreResult<()> {
        require_text("project name", &self.name)
    }
}

sql_enum! {
    pub enum RoadmapStatus {
        Draft => "draft",
        Active => "active",
        Archived => "archived",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roadmap {
    pub id: RoadmapId,
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub title: String,
    pub description: String,
    pub status: RoadmapStatus,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadmapFields {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: RoadmapStatus,
}

impl RoadmapFields {
    pub(crate) fn validate(&self) -> StoreResult<()> {
        require_text("roadmap title", &self.title)
    }
}

sql_enum! {
    pub enum MilestoneStatus {
        Open => "open",
        Closed => "closed",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub tenant_id: TenantId,
    pub roadmap_id: RoadmapId,
    pub title: String,
    pub description: String,
    pub status: MilestoneStatus,
    pub sort_order: i64,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneFields {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: MilestoneStatus,
    #[serde(default)]
    pub sort_order: i64,
}

impl MilestoneFields {
    pub(crate) fn validate(&self) -> StoreResult<()> {
        require_text("milestone title", &self.title)
    }
}

sql_enum! {
    pub enum FeatureStatus {
        Backlog => "backlog",
        Planned => "planned",
        InProgress => "in_progress",
        Done => "done",
        Cancelled => "cancelled",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub tenant_id: TenantId,
    pub milestone_id: MilestoneId,
    pub title: String,
    pub description: String,
    pub status: FeatureStatus,
    pub sort_order: i64,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFields {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: FeatureStatus,
    #[serde(default)]
    pub sort_order: i64,
}

impl FeatureFields {
    pub(crate) fn validate(&self) -> StoreResult<()> {
        require_text("feature title", &self.title)
    }
}

/// Protection settings applied to branches whose name matches a glob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchProtectionRule {
    pub id: BranchRuleId,
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub branch_pattern: String,
    pub require_reviews: bool,
    pub require_tests: bool,
    pub allow_force_push: bool,
    pub enabled: bool,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl BranchProtectionRule {
    pub fn matches(&self, branch: &str) -> bool {
        glob::Pattern::new(&self.branch_pattern).is_ok_and(|p| p.matches(branch))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRuleFields {
    pub branch_pattern: String,
    #[serde(default)]
    pub require_reviews: bool,
    #[serde(default)]
    pub require_tests: bool,
    #[serde(default)]
    pub allow_force_push: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl BranchRuleFields {
    pub fn for_pattern(pattern: impl Into<String>) -> Self {
        Self {
            branch_pattern: pattern.into(),
            require_reviews: false,
            require_tests: false,
            allow_force_push: false,
            enabled: true,
        }
    }

    pub(crate) fn validate(&self) -> StoreResult<()> {
        validate_glob("branch pattern", &self.branch_pattern)
    }
}

pub(crate) fn require_text(what: &str, value: &str) -> StoreResult<()> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{what} must not be empty")));
    }
    Ok(())
}

pub(crate) fn validate_glob(what: &str, pattern: &str) -> StoreResult<()> {
    require_text(what, pattern)?;
    glob::Pattern::new(pattern)
        .map(|_| ())
        .map_err(|e| StoreError::Validation(format!("invalid {what} '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_status_uses_snake_case() {
        assert_eq!(FeatureStatus::InProgress.as_str(), "in_progress");
        assert_eq!(
            "in_progress".parse::<FeatureStatus>().unwrap(),
            FeatureStatus::InProgress
        );
        assert!("started".parse::<FeatureStatus>().unwrap_err().is_validation());
    }

    #[test]
    fn rejects_malformed_glob() {
        let err = BranchRuleFields::for_pattern("release/[").validate().unwrap_err();
        assert!(err.is_validation());
        assert!(BranchRuleFields::for_pattern("release/*").validate().is_ok());
    }
}
