//! Typed UUID identifiers.
//!
//! Every persisted identifier is a UUID v7 stored as hyphenated TEXT, so rows
//! stay readable and index order follows creation time.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(Uuid);

            impl $name {
                /// Generate a fresh time-ordered identifier.
                pub fn new() -> Self {
                    Self(Uuid::now_v7())
                }

                pub const fn from_uuid(id: Uuid) -> Self {
                    Self(id)
                }

                pub const fn as_uuid(&self) -> &Uuid {
                    &self.0
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Display::fmt(&self.0, f)
                }
            }

            impl FromStr for $name {
                type Err = uuid::Error;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Uuid::parse_str(s).map(Self)
                }
            }

            impl From<Uuid> for $name {
                fn from(id: Uuid) -> Self {
                    Self(id)
                }
            }

            impl ToSql for $name {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.0.to_string()))
                }
            }

            impl FromSql for $name {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    let text = value.as_str()?;
                    Uuid::parse_str(text)
                        .map(Self)
                        .map_err(|e| FromSqlError::Other(Box::new(e)))
                }
            }
        )+
    };
}

define_id!(
    /// Isolation boundary; every row is partitioned by it.
    TenantId,
    ProjectId,
    RoadmapId,
    MilestoneId,
    FeatureId,
    BranchRuleId,
    PlanId,
    StepId,
    RunId,
    TaskId,
    AgentId,
    TeamId,
    EventId,
    AuditId,
    PolicyId,
    ReviewId,
    TokenId,
    UserId,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_text() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.to_string().len(), 36);
    }

    #[test]
    fn ids_are_time_ordered() {
        let first = StepId::new();
        let second = StepId::new();
        assert!(first < second);
    }

    #[test]
    fn malformed_id_is_rejected() {
        assert!("not-a-uuid".parse::<PlanId>().is_err());
    }
}
