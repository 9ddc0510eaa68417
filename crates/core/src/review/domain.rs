//! Review policies and the reviews they trigger.

use crate::entities::domain::{require_text, validate_glob};
use crate::error::{StoreError, StoreResult};
use crate::ids::{PlanId, PolicyId, ProjectId, ReviewId, TenantId};
use crate::macros::sql_enum;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

sql_enum! {
    pub enum TriggerType {
        CommitThreshold => "commit_threshold",
        Cron => "cron",
        BranchPattern => "branch_pattern",
    }
}

/// When a policy fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyTrigger {
    /// After `threshold` commits have accumulated.
    CommitThreshold { threshold: i64 },
    /// On a schedule; the expression is matched verbatim (whitespace-normalized)
    /// against the one the external scheduler reports.
    Cron { expr: String },
    /// On pushes to branches matching a glob.
    BranchPattern { pattern: String },
}

impl PolicyTrigger {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            PolicyTrigger::CommitThreshold { .. } => TriggerType::CommitThreshold,
            PolicyTrigger::Cron { .. } => TriggerType::Cron,
            PolicyTrigger::BranchPattern { .. } => TriggerType::BranchPattern,
        }
    }

    pub(crate) fn validate(&self) -> StoreResult<()> {
        match self {
            PolicyTrigger::CommitThreshold { threshold } if *threshold < 1 => Err(
                StoreError::Validation("commit threshold must be at least 1".into()),
            ),
            PolicyTrigger::CommitThreshold { .. } => Ok(()),
            PolicyTrigger::Cron { expr } => {
                let fields = expr.split_whitespace().count();
                if !(5..=6).contains(&fields) {
                    return Err(StoreError::Validation(format!(
                        "cron expression '{expr}' must have 5 or 6 fields"
                    )));
                }
                Ok(())
            }
            PolicyTrigger::BranchPattern { pattern } => validate_glob("branch pattern", pattern),
        }
    }

    /// Column values `(commit_threshold, cron_expr, branch_pattern)`.
    pub(crate) fn columns(&self) -> (Option<i64>, Option<String>, Option<String>) {
        match self {
            PolicyTrigger::CommitThreshold { threshold } => (Some(*threshold), None, None),
            PolicyTrigger::Cron { expr } => (None, Some(normalize_cron(expr)), None),
            PolicyTrigger::BranchPattern { pattern } => (None, None, Some(pattern.clone())),
        }
    }

    pub(crate) fn from_columns(
        trigger_type: TriggerType,
        threshold: Option<i64>,
        cron_expr: Option<String>,
        branch_pattern: Option<String>,
    ) -> Option<Self> {
        Some(match trigger_type {
            TriggerType::CommitThreshold => PolicyTrigger::CommitThreshold {
                threshold: threshold?,
            },
            TriggerType::Cron => PolicyTrigger::Cron { expr: cron_expr? },
            TriggerType::BranchPattern => PolicyTrigger::BranchPattern {
                pattern: branch_pattern?,
            },
        })
    }
}

pub(crate) fn normalize_cron(expr: &str) -> String {
    expr.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPolicy {
    pub id: PolicyId,
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub name: String,
    pub trigger: PolicyTrigger,
    pub template_id: Option<String>,
    pub enabled: bool,
    /// Commits accumulated since the last crossing. Not versioned.
    pub commit_counter: i64,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ReviewPolicy {
    pub fn trigger_type(&self) -> TriggerType {
        self.trigger.trigger_type()
    }

    pub fn matches_branch(&self, branch: &str) -> bool {
        match &self.trigger {
            PolicyTrigger::BranchPattern { pattern } => {
                glob::Pattern::new(pattern).is_ok_and(|p| p.matches(branch))
            }
            _ => false,
        }
    }

    pub fn matches_cron(&self, expr: &str) -> bool {
        match &self.trigger {
            PolicyTrigger::Cron { expr: own } => normalize_cron(own) == normalize_cron(expr),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPolicyFields {
    pub name: String,
    pub trigger: PolicyTrigger,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ReviewPolicyFields {
    pub fn new(name: impl Into<String>, trigger: PolicyTrigger) -> Self {
        Self {
            name: name.into(),
            trigger,
            template_id: None,
            enabled: true,
        }
    }

    pub(crate) fn validate(&self) -> StoreResult<()> {
        require_text("policy name", &self.name)?;
        self.trigger.validate()
    }
}

/// Result of adding commits to a threshold policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "counter", rename_all = "snake_case")]
pub enum CounterOutcome {
    /// Below the threshold; carries the new counter.
    Accumulated(i64),
    /// The threshold was crossed; carries the counter value at the crossing.
    /// The stored counter is back at zero.
    Triggered(i64),
}

impl CounterOutcome {
    pub fn is_triggered(&self) -> bool {
        matches!(self, CounterOutcome::Triggered(_))
    }
}

/// Result of recording commits when the review is created with the crossing.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Accumulated(i64),
    /// The crossing and its review were committed together.
    Triggered(Review),
}

sql_enum! {
    pub enum ReviewStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl ReviewStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReviewStatus::Completed | ReviewStatus::Failed | ReviewStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: ReviewStatus) -> bool {
        use ReviewStatus::*;
        matches!(
            (self, next),
            (Pending, Running | Completed | Failed | Cancelled)
                | (Running, Completed | Failed | Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub tenant_id: TenantId,
    pub policy_id: PolicyId,
    pub project_id: ProjectId,
    pub plan_id: Option<PlanId>,
    pub status: ReviewStatus,
    /// What fired the policy, e.g. `commits:main:5` or `branch:release/1.2`.
    pub trigger_ref: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReview {
    pub policy_id: PolicyId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub plan_id: Option<PlanId>,
    #[serde(default)]
    pub trigger_ref: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_validation() {
        assert!(
            PolicyTrigger::CommitThreshold { threshold: 0 }
                .validate()
                .unwrap_err()
                .is_validation()
        );
        assert!(PolicyTrigger::Cron { expr: "0 3 * * *".into() }.validate().is_ok());
        assert!(PolicyTrigger::Cron { expr: "daily".into() }.validate().is_err());
        assert!(
            PolicyTrigger::BranchPattern { pattern: "release/[".into() }
                .validate()
                .is_err()
        );
    }

    #[test]
    fn trigger_serializes_tagged() {
        let json = serde_json::to_value(PolicyTrigger::CommitThreshold { threshold: 5 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "commit_threshold", "threshold": 5}));
    }

    #[test]
    fn cron_matching_ignores_spacing() {
        let policy = ReviewPolicy {
            id: PolicyId::new(),
            tenant_id: TenantId::new(),
            project_id: ProjectId::new(),
            name: "nightly".into(),
            trigger: PolicyTrigger::Cron { expr: "0 3 * * *".into() },
            template_id: None,
            enabled: true,
            commit_counter: 0,
            version: 1,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        assert!(policy.matches_cron("0  3 * *   *"));
        assert!(!policy.matches_cron("0 4 * * *"));
        assert!(!policy.matches_branch("main"));
    }
}
