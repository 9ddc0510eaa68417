//! Offline plan documents for `runledger plan validate`.
//!
//! Steps are named by free-form keys instead of ids so a plan can be written
//! by hand and checked before anything is stored.

use anyhow::{Context, Result, bail};
use runledger_core::plan::{DagError, DagNode, FailurePolicy, PlanProtocol, assign_rounds};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanDocument {
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: PlanProtocol,
    #[serde(default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: u32,
    pub steps: Vec<StepDocument>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDocument {
    pub key: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_protocol() -> PlanProtocol {
    PlanProtocol::Parallel
}

fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::FailFast
}

fn default_max_parallel() -> u32 {
    1
}

impl DagNode for StepDocument {
    type Key = String;

    fn key(&self) -> String {
        self.key.clone()
    }

    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

/// Steps grouped by the round they become dispatchable in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTable {
    pub rounds: BTreeMap<u32, Vec<String>>,
    pub parallel_limit: u32,
}

impl RoundTable {
    /// Steps of the widest round that can actually run at once.
    pub fn peak_concurrency(&self) -> usize {
        self.rounds
            .values()
            .map(|steps| steps.len().min(self.parallel_limit as usize))
            .max()
            .unwrap_or(0)
    }
}

impl PlanDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid plan {}", path.display()))
    }

    fn parallel_limit(&self) -> u32 {
        match self.protocol {
            PlanProtocol::Sequential => 1,
            _ => self.max_parallel,
        }
    }

    /// Shape errors come back through `anyhow`; graph errors as [`DagError`]
    /// so the caller can render a cycle.
    pub fn rounds(&self) -> Result<std::result::Result<RoundTable, DagError>> {
        if self.name.trim().is_empty() {
            bail!("plan name is required");
        }
        if self.max_parallel == 0 {
            bail!("max_parallel must be at least 1");
        }
        let rounds = match assign_rounds(&self.steps) {
            Ok(rounds) => rounds,
            Err(err) => return Ok(Err(err)),
        };
        let mut table = BTreeMap::<u32, Vec<String>>::new();
        for (step, round) in self.steps.iter().zip(rounds) {
            table.entry(round).or_default().push(step.key.clone());
        }
        Ok(Ok(RoundTable {
            rounds: table,
            parallel_limit: self.parallel_limit(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> PlanDocument {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn fan_in_gets_two_rounds() {
        let doc = parse(
            r#"{
                "name": "fan-in",
                "max_parallel": 2,
                "steps": [
                    {"key": "a"},
                    {"key": "b"},
                    {"key": "c", "depends_on": ["a", "b"]}
                ]
            }"#,
        );
        let table = doc.rounds().unwrap().unwrap();
        assert_eq!(table.rounds[&1], vec!["a", "b"]);
        assert_eq!(table.rounds[&2], vec!["c"]);
        assert_eq!(table.peak_concurrency(), 2);
    }

    #[test]
    fn sequential_plans_run_one_at_a_time() {
        let doc = parse(
            r#"{
                "name": "serial",
                "protocol": "sequential",
                "max_parallel": 4,
                "steps": [{"key": "a"}, {"key": "b"}]
            }"#,
        );
        let table = doc.rounds().unwrap().unwrap();
        assert_eq!(table.parallel_limit, 1);
        assert_eq!(table.peak_concurrency(), 1);
    }

    #[test]
    fn cycles_are_reported_as_graph_errors() {
        let doc = parse(
            r#"{
                "name": "loop",
                "steps": [
                    {"key": "a", "depends_on": ["c"]},
                    {"key": "b", "depends_on": ["a"]},
                    {"key": "c", "depends_on": ["b"]}
                ]
            }"#,
        );
        match doc.rounds().unwrap() {
            Err(DagError::Cycle(path)) => {
                assert!(path.len() >= 3);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependencies_and_bad_shapes() {
        let dangling = parse(r#"{"name": "x", "steps": [{"key": "a", "depends_on": ["z"]}]}"#);
        assert!(matches!(
            dangling.rounds().unwrap(),
            Err(DagError::UnknownDependency { .. })
        ));

        let unnamed = parse(r#"{"name": " ", "steps": [{"key": "a"}]}"#);
        assert!(unnamed.rounds().is_err());

        let stalled = parse(r#"{"name": "x", "max_parallel": 0, "steps": [{"key": "a"}]}"#);
        assert!(stalled.rounds().is_err());

        assert!(serde_json::from_str::<PlanDocument>(r#"{"name": "x", "steps": [], "extra": 1}"#).is_err());
        assert!(
            serde_json::from_str::<PlanDocument>(
                r#"{"name": "x", "steps": [{"key": "a", "agent": "reviewer"}]}"#
            )
            .is_err()
        );
    }
}
